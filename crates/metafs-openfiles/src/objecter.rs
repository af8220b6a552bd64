//! Object store interface
//!
//! The table talks to its backing object through this trait: atomic
//! mutations composed of omap sub-operations, and combined
//! header-plus-values reads with continuation support.

use async_trait::async_trait;
use metafs_common::{PoolId, Result};
use std::collections::{BTreeMap, BTreeSet};

/// One atomic mutation on a backing object.
///
/// Sub-operations apply in declaration order: clear, header, sets,
/// removes. An empty write is legal and installs nothing but the header.
#[derive(Clone, Debug, Default)]
pub struct OmapWrite {
    /// Drop every key and the header before applying the rest. Must be
    /// tolerated when the object does not exist yet.
    pub clear: bool,
    /// New header bytes, if the header changes in this write.
    pub set_header: Option<Vec<u8>>,
    /// Key/value pairs to insert or overwrite.
    pub set: BTreeMap<String, Vec<u8>>,
    /// Keys to remove. Removing an absent key is not an error.
    pub remove: BTreeSet<String>,
    /// Scheduling priority, higher is more urgent.
    pub priority: i32,
}

impl OmapWrite {
    /// Create an empty write at the given priority.
    pub fn new(priority: i32) -> Self {
        Self {
            priority,
            ..Self::default()
        }
    }

    /// Whether this write carries any sub-operation at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.clear && self.set_header.is_none() && self.set.is_empty() && self.remove.is_empty()
    }
}

/// What to read from a backing object.
#[derive(Clone, Debug)]
pub struct OmapReadSpec {
    /// Also fetch the object header.
    pub want_header: bool,
    /// Return values with keys strictly greater than this.
    pub start_after: String,
    /// Soft cap on returned values; the store may return fewer and set
    /// `more`.
    pub limit: u64,
}

impl OmapReadSpec {
    /// Read the header and the first chunk of values.
    pub fn from_start() -> Self {
        Self {
            want_header: true,
            start_after: String::new(),
            limit: u64::MAX,
        }
    }

    /// Read the next chunk of values after `last_key`.
    pub fn continue_after(last_key: impl Into<String>) -> Self {
        Self {
            want_header: false,
            start_after: last_key.into(),
            limit: u64::MAX,
        }
    }
}

/// One chunk of a read response.
#[derive(Clone, Debug, Default)]
pub struct OmapChunk {
    /// Header bytes, present when requested.
    pub header: Option<Vec<u8>>,
    /// Key/value pairs in key order.
    pub values: BTreeMap<String, Vec<u8>>,
    /// Whether more values remain past the last returned key.
    pub more: bool,
}

/// Asynchronous access to named objects in a pool.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Apply one atomic mutation to `oid`.
    async fn mutate(&self, oid: &str, pool: PoolId, write: OmapWrite) -> Result<()>;

    /// Read header and/or a bounded value range from `oid`.
    async fn read(&self, oid: &str, pool: PoolId, spec: OmapReadSpec) -> Result<OmapChunk>;
}

//! In-memory object store
//!
//! Loopback [`ObjectStore`] used by tests and single-process tooling.
//! Supports a per-read value cap (to exercise continuation reads) and
//! fail-after-N write fault injection (to exercise interrupted
//! snapshots), and keeps a log of applied writes for assertions.

use crate::objecter::{ObjectStore, OmapChunk, OmapReadSpec, OmapWrite};
use async_trait::async_trait;
use metafs_common::{Error, PoolId, Result};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};

#[derive(Clone, Debug, Default)]
struct ObjectState {
    header: Vec<u8>,
    map: BTreeMap<String, Vec<u8>>,
}

#[derive(Default)]
struct StoreState {
    objects: HashMap<(PoolId, String), ObjectState>,
    write_log: Vec<OmapWrite>,
    /// Remaining writes before mutations start failing; `None` disables
    /// fault injection.
    writes_until_failure: Option<u64>,
}

/// In-memory loopback object store.
#[derive(Default)]
pub struct MemoryObjectStore {
    state: Mutex<StoreState>,
    /// Cap on values returned per read; reads past the cap set `more`.
    list_limit: Option<usize>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap the number of values returned by a single read.
    pub fn with_list_limit(mut self, limit: usize) -> Self {
        self.list_limit = Some(limit);
        self
    }

    /// Let the next `n` mutations succeed, then fail every mutation
    /// until [`clear_failure`](Self::clear_failure) is called.
    pub fn fail_after_writes(&self, n: u64) {
        self.state.lock().writes_until_failure = Some(n);
    }

    /// Disable write fault injection.
    pub fn clear_failure(&self) {
        self.state.lock().writes_until_failure = None;
    }

    /// Successfully applied writes, oldest first.
    pub fn write_log(&self) -> Vec<OmapWrite> {
        self.state.lock().write_log.clone()
    }

    /// Drop the applied-write log.
    pub fn clear_write_log(&self) {
        self.state.lock().write_log.clear();
    }

    /// Current header of an object, if it exists.
    pub fn header(&self, oid: &str, pool: PoolId) -> Option<Vec<u8>> {
        self.state
            .lock()
            .objects
            .get(&(pool, oid.to_string()))
            .map(|o| o.header.clone())
    }

    /// Current key/value map of an object, if it exists.
    pub fn object_map(&self, oid: &str, pool: PoolId) -> Option<BTreeMap<String, Vec<u8>>> {
        self.state
            .lock()
            .objects
            .get(&(pool, oid.to_string()))
            .map(|o| o.map.clone())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn mutate(&self, oid: &str, pool: PoolId, write: OmapWrite) -> Result<()> {
        let mut state = self.state.lock();

        if let Some(remaining) = state.writes_until_failure.as_mut() {
            if *remaining == 0 {
                return Err(Error::WriteFailed {
                    oid: oid.to_string(),
                    reason: "injected failure".to_string(),
                });
            }
            *remaining -= 1;
        }

        let object = state
            .objects
            .entry((pool, oid.to_string()))
            .or_default();

        // Sub-operations apply in the contract's order. Clearing an
        // object that was just created by the entry above is the
        // tolerated clear-on-missing case.
        if write.clear {
            object.header.clear();
            object.map.clear();
        }
        if let Some(header) = &write.set_header {
            object.header = header.clone();
        }
        for (key, value) in &write.set {
            object.map.insert(key.clone(), value.clone());
        }
        for key in &write.remove {
            object.map.remove(key);
        }

        state.write_log.push(write);
        Ok(())
    }

    async fn read(&self, oid: &str, pool: PoolId, spec: OmapReadSpec) -> Result<OmapChunk> {
        let state = self.state.lock();
        let object = state
            .objects
            .get(&(pool, oid.to_string()))
            .ok_or_else(|| Error::ObjectNotFound {
                oid: oid.to_string(),
            })?;

        let cap = self
            .list_limit
            .map_or(spec.limit, |l| (l as u64).min(spec.limit)) as usize;

        let mut values = BTreeMap::new();
        let mut more = false;
        for (key, value) in object.map.range::<String, _>((
            std::ops::Bound::Excluded(&spec.start_after),
            std::ops::Bound::Unbounded,
        )) {
            if values.len() == cap {
                more = true;
                break;
            }
            values.insert(key.clone(), value.clone());
        }

        Ok(OmapChunk {
            header: spec.want_header.then(|| object.header.clone()),
            values,
            more,
        })
    }
}

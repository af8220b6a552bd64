//! Anchor records and their wire encoding
//!
//! An anchor pins one open inode and the dentry edge to its parent
//! directory. The persisted form is a version-tagged little-endian
//! record; the runtime-only authority hint lives outside the record so
//! it can never leak onto the wire.

use metafs_common::{DentryType, Error, InodeId, MdsRank, Result};

/// Wire format version for encoded anchors.
const ANCHOR_VERSION: u8 = 1;

/// Fixed part of the encoding: version + ino + dirino + name length +
/// d_type + nref.
const ANCHOR_FIXED_SIZE: usize = 1 + 8 + 8 + 4 + 1 + 4;

/// One open inode and the dentry edge to its parent.
///
/// `nref` counts one unit per anchored child plus one per direct open;
/// it reaches zero only transiently during removal. Equality compares
/// every persisted field, which is what first-commit reconciliation
/// relies on to skip unchanged entries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Anchor {
    /// Inode this anchor pins. Redundant with the omap key; validated on
    /// decode.
    pub ino: InodeId,
    /// Parent directory inode, or zero when the inode has no known
    /// linkage.
    pub dirino: InodeId,
    /// Dentry name under `dirino`; empty when `dirino` is zero.
    pub d_name: String,
    /// Directory-entry type tag.
    pub d_type: DentryType,
    /// Reference count.
    pub nref: u32,
}

impl Anchor {
    /// Create an anchor with a single reference.
    pub fn new(ino: InodeId, dirino: InodeId, d_name: String, d_type: DentryType) -> Self {
        Self {
            ino,
            dirino,
            d_name,
            d_type,
            nref: 1,
        }
    }

    /// Serialize to the persisted wire format.
    pub fn to_bytes(&self) -> Vec<u8> {
        let name = self.d_name.as_bytes();
        let mut buf = Vec::with_capacity(ANCHOR_FIXED_SIZE + name.len());

        buf.push(ANCHOR_VERSION);
        buf.extend_from_slice(&self.ino.0.to_le_bytes());
        buf.extend_from_slice(&self.dirino.0.to_le_bytes());
        buf.extend_from_slice(&(name.len() as u32).to_le_bytes());
        buf.extend_from_slice(name);
        buf.push(u8::from(self.d_type));
        buf.extend_from_slice(&self.nref.to_le_bytes());

        buf
    }

    /// Parse from the persisted wire format.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < ANCHOR_FIXED_SIZE {
            return Err(Error::decode("anchor record too small"));
        }

        let version = data[0];
        if version != ANCHOR_VERSION {
            return Err(Error::decode(format!(
                "unsupported anchor version: {}",
                version
            )));
        }

        let ino = u64::from_le_bytes(data[1..9].try_into().unwrap());
        let dirino = u64::from_le_bytes(data[9..17].try_into().unwrap());
        let name_len = u32::from_le_bytes(data[17..21].try_into().unwrap()) as usize;

        let expected = ANCHOR_FIXED_SIZE + name_len;
        if data.len() < expected {
            return Err(Error::decode("anchor record truncated"));
        }
        if data.len() > expected {
            return Err(Error::decode("trailing bytes after anchor record"));
        }

        let d_name = std::str::from_utf8(&data[21..21 + name_len])
            .map_err(|e| Error::decode(format!("anchor name not utf-8: {}", e)))?
            .to_string();
        let d_type = DentryType::from(data[21 + name_len]);
        let nref = u32::from_le_bytes(data[22 + name_len..26 + name_len].try_into().unwrap());

        Ok(Self {
            ino: InodeId(ino),
            dirino: InodeId(dirino),
            d_name,
            d_type,
            nref,
        })
    }

    /// Approximate cost of this record in a partial write, used for
    /// batching against the write-size budget.
    pub fn encoded_len(&self) -> usize {
        ANCHOR_FIXED_SIZE + self.d_name.len()
    }
}

/// An anchor read back from the backing object.
///
/// Carries the authority hint the prefetcher fills in. The hint is never
/// persisted; decode always starts from `None`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoadedAnchor {
    pub anchor: Anchor,
    /// Rank believed authoritative for this inode, if known.
    pub auth: Option<MdsRank>,
}

impl From<Anchor> for LoadedAnchor {
    fn from(anchor: Anchor) -> Self {
        Self { anchor, auth: None }
    }
}

/// Why a dirty-set entry exists.
///
/// `New` means the anchor has never been persisted, so rescinding it
/// before a commit must drop the entry entirely rather than emit a
/// delete for a key that was never written.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DirtyState {
    /// Anchor created since the last commit.
    New,
    /// Anchor modified or removed since the last commit.
    Dirty,
}

//! Core type definitions for metafs
//!
//! Identifiers for inodes, metadata-server ranks, and storage pools, plus
//! the well-known regions of the inode number space.

use derive_more::{From, Into};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Highest rank count a cluster can be configured with.
pub const MAX_MDS: u64 = 256;

/// Number of stray directories each rank owns.
pub const NUM_STRAY: u64 = 10;

/// First per-rank MDS directory inode.
const MDS_DIR_INO_BASE: u64 = 0x100;

/// First stray directory inode.
const STRAY_INO_BASE: u64 = 0x600;

/// Inode number.
///
/// Opaque 64-bit identifier. The value 0 is the "no inode" sentinel used
/// for parent links of detached or root inodes.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, From, Into,
)]
pub struct InodeId(pub u64);

impl InodeId {
    /// The "no inode" sentinel.
    pub const ZERO: Self = Self(0);

    /// Whether this is the sentinel value.
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Whether this inode is a per-rank MDS directory inode.
    #[must_use]
    pub const fn is_mds_dir(&self) -> bool {
        self.0 >= MDS_DIR_INO_BASE && self.0 < MDS_DIR_INO_BASE + MAX_MDS
    }

    /// Rank that owns this MDS directory inode.
    ///
    /// Only meaningful when `is_mds_dir()` is true.
    #[must_use]
    pub const fn mds_dir_owner(&self) -> MdsRank {
        MdsRank((self.0 - MDS_DIR_INO_BASE) as u32)
    }

    /// Whether this inode is a stray directory inode.
    #[must_use]
    pub const fn is_stray(&self) -> bool {
        self.0 >= STRAY_INO_BASE && self.0 < STRAY_INO_BASE + MAX_MDS * NUM_STRAY
    }

    /// Rank that owns this stray directory inode.
    ///
    /// Only meaningful when `is_stray()` is true.
    #[must_use]
    pub const fn stray_owner(&self) -> MdsRank {
        MdsRank(((self.0 - STRAY_INO_BASE) / NUM_STRAY) as u32)
    }
}

impl fmt::Debug for InodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InodeId({:#x})", self.0)
    }
}

impl fmt::Display for InodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::LowerHex for InodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

/// Metadata-server rank.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, From, Into,
)]
pub struct MdsRank(pub u32);

impl fmt::Debug for MdsRank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MdsRank({})", self.0)
    }
}

impl fmt::Display for MdsRank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Storage pool identifier.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, From, Into,
)]
pub struct PoolId(pub i64);

impl fmt::Debug for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PoolId({})", self.0)
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Directory-entry type tag.
///
/// Values match the on-disk `d_type` byte. Unrecognized bytes decode to
/// `Unknown` so a single corrupt tag does not poison a whole snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum DentryType {
    Unknown = 0,
    Fifo = 1,
    Char = 2,
    Dir = 4,
    Block = 6,
    Regular = 8,
    Symlink = 10,
    Socket = 12,
}

impl DentryType {
    /// Whether this entry is a directory.
    #[must_use]
    pub const fn is_dir(&self) -> bool {
        matches!(self, Self::Dir)
    }
}

impl From<u8> for DentryType {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Fifo,
            2 => Self::Char,
            4 => Self::Dir,
            6 => Self::Block,
            8 => Self::Regular,
            10 => Self::Symlink,
            12 => Self::Socket,
            _ => Self::Unknown,
        }
    }
}

impl From<DentryType> for u8 {
    fn from(value: DentryType) -> Self {
        value as u8
    }
}

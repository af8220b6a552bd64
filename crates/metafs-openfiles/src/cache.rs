//! Interfaces to the inode cache and the cluster map
//!
//! The open file table observes the live inode cache through these
//! traits; it never mutates inodes beyond the tracked flag and never
//! pins cache entries itself.

use async_trait::async_trait;
use metafs_common::{DentryType, InodeId, MdsRank, PoolId, Result};
use std::sync::Arc;

/// Shared handle to a live cache inode.
pub type InodeRef = Arc<dyn CacheInode>;

/// The primary parent dentry of a live inode.
pub struct ParentDentry {
    /// Inode of the directory holding the dentry.
    pub dir: InodeRef,
    /// Dentry name under that directory.
    pub name: String,
}

/// View of a live cache inode as consumed by the open file table.
pub trait CacheInode: Send + Sync {
    /// Inode number.
    fn ino(&self) -> InodeId;

    /// Directory-entry type tag.
    fn d_type(&self) -> DentryType;

    /// Whether this inode is a directory.
    fn is_dir(&self) -> bool {
        self.d_type().is_dir()
    }

    /// Primary parent dentry, if linked.
    fn parent_dentry(&self) -> Option<ParentDentry>;

    /// Whether the table currently holds an anchor for this inode.
    fn is_tracked(&self) -> bool;

    /// Set or clear the tracked flag.
    fn set_tracked(&self, tracked: bool);

    /// Log sequence at which this inode was last journaled.
    fn last_journaled(&self) -> u64;
}

/// Services the inode cache provides to the open file table.
#[async_trait]
pub trait MdsCache: Send + Sync {
    /// Look up an inode in the live cache.
    fn get_inode(&self, ino: InodeId) -> Option<InodeRef>;

    /// Locate an inode by number, loading it if necessary, and return
    /// the rank authoritative for it.
    async fn open_ino(&self, ino: InodeId, pool: PoolId) -> Result<MdsRank>;

    /// A rejoin-prefetch inode has been resolved. `auth` is `None` when
    /// the open failed; otherwise the authoritative rank.
    fn rejoin_prefetch_ino_finish(&self, ino: InodeId, auth: Option<MdsRank>);
}

/// Pool and rank lookups from the cluster map.
pub trait MdsMap: Send + Sync {
    /// Pool holding metadata objects.
    fn metadata_pool(&self) -> PoolId;

    /// First data pool.
    fn first_data_pool(&self) -> PoolId;

    /// This server's rank.
    fn nodeid(&self) -> MdsRank;
}

//! Per-rank open file table
//!
//! A durable, rank-local index of the inodes currently held open on a
//! metadata server, plus the ancestor chain needed to re-locate each of
//! them from the namespace root after a crash or failover.
//!
//! The table keeps an in-memory map of reference-counted anchors (one per
//! open inode, transitively pinning its ancestor directories) and
//! persists it to the omap of a single backing object
//! (`mds<rank>_openfiles`) in the metadata pool. Snapshots are written
//! incrementally: many partial writes form one logical image, with the
//! object header recording the log sequence of the last complete
//! snapshot (0 while a multi-write snapshot is in flight).
//!
//! On startup [`OpenFileTable::load`] streams the prior epoch's image
//! into a shadow map, [`OpenFileTable::prefetch_inodes`] re-opens the
//! loaded inodes (directories first, then files) to warm the cache and
//! collect authority hints, and [`OpenFileTable::get_ancestors`] answers
//! resolver queries from the shadow until the first commit drains it.

pub mod anchor;
pub mod cache;
pub mod commit;
pub mod load;
pub mod memory;
pub mod objecter;
pub mod prefetch;
pub mod table;

#[cfg(test)]
pub(crate) mod testutil;

pub use anchor::{Anchor, DirtyState, LoadedAnchor};
pub use cache::{CacheInode, InodeRef, MdsCache, MdsMap, ParentDentry};
pub use memory::MemoryObjectStore;
pub use objecter::{ObjectStore, OmapChunk, OmapReadSpec, OmapWrite};
pub use table::{InodeBackpointer, OpenFileTable, OpenFilesStats, PrefetchState};

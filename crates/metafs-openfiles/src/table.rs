//! The open file table
//!
//! Owns the anchor map, the dirty set, and the loaded shadow, and
//! implements the reference engine driven by inode-cache events. The
//! table state sits behind a single mutex; every method takes `&self`
//! and the lock is never held across an await, so cache events may
//! interleave freely with in-flight commits and loads.

use crate::anchor::{Anchor, DirtyState, LoadedAnchor};
use crate::cache::{CacheInode, InodeRef, MdsCache, MdsMap};
use crate::objecter::ObjectStore;
use metafs_common::{InodeId, MdsRank, OpenFilesConfig};
use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::debug;

/// Prefetch state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrefetchState {
    Idle,
    DirInodes,
    FileInodes,
    Done,
}

/// One step of an ancestor chain: the directory holding the dentry, the
/// dentry name, and a version placeholder for the resolver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InodeBackpointer {
    pub dirino: InodeId,
    pub dname: String,
    pub version: u64,
}

/// Mutable table state, guarded by [`OpenFileTable::state`].
pub(crate) struct TableState {
    /// Live anchors, one per tracked inode.
    pub(crate) anchors: HashMap<InodeId, Anchor>,
    /// Inodes whose anchor differs from the last persisted image.
    pub(crate) dirty: HashMap<InodeId, DirtyState>,
    /// Prior epoch's persisted image, drained by the first commit.
    pub(crate) loaded: HashMap<InodeId, LoadedAnchor>,
    pub(crate) committed_log_seq: u64,
    pub(crate) committing_log_seq: u64,
    pub(crate) num_pending_commit: u64,
    /// The next commit must begin by clearing the backing object.
    pub(crate) clear_on_commit: bool,
    pub(crate) load_done: bool,
    pub(crate) prefetch_state: PrefetchState,
}

impl TableState {
    fn new() -> Self {
        Self {
            anchors: HashMap::new(),
            dirty: HashMap::new(),
            loaded: HashMap::new(),
            committed_log_seq: 0,
            committing_log_seq: 0,
            num_pending_commit: 0,
            clear_on_commit: false,
            load_done: false,
            prefetch_state: PrefetchState::Idle,
        }
    }
}

/// Snapshot of table counters.
#[derive(Clone, Debug)]
pub struct OpenFilesStats {
    pub anchors: usize,
    pub dirty: usize,
    pub loaded: usize,
    pub committed_log_seq: u64,
    pub committing_log_seq: u64,
    pub pending_commits: u64,
}

/// Per-rank open file table.
pub struct OpenFileTable {
    pub(crate) map: Arc<dyn MdsMap>,
    pub(crate) cache: Arc<dyn MdsCache>,
    pub(crate) store: Arc<dyn ObjectStore>,
    pub(crate) config: OpenFilesConfig,
    pub(crate) state: Mutex<TableState>,
    pub(crate) load_notify: Notify,
    pub(crate) prefetch_notify: Notify,
}

impl OpenFileTable {
    pub fn new(
        map: Arc<dyn MdsMap>,
        cache: Arc<dyn MdsCache>,
        store: Arc<dyn ObjectStore>,
        config: OpenFilesConfig,
    ) -> Self {
        Self {
            map,
            cache,
            store,
            config,
            state: Mutex::new(TableState::new()),
            load_notify: Notify::new(),
            prefetch_notify: Notify::new(),
        }
    }

    /// Name of this rank's backing object.
    pub fn object_name(&self) -> String {
        format!("mds{}_openfiles", self.map.nodeid())
    }

    /// An inode entered the tracked set.
    pub fn add_inode(&self, inode: &InodeRef) {
        debug!(ino = %inode.ino(), "add_inode");
        let mut state = self.state.lock();
        if !inode.is_dir() {
            assert!(
                !state.anchors.contains_key(&inode.ino()),
                "add_inode: non-directory {} already anchored",
                inode.ino()
            );
        }
        Self::get_ref(&mut state, inode.clone());
    }

    /// A tracked inode left the tracked set.
    pub fn remove_inode(&self, inode: &InodeRef) {
        debug!(ino = %inode.ino(), "remove_inode");
        let mut state = self.state.lock();
        if !inode.is_dir() {
            let anchor = state
                .anchors
                .get(&inode.ino())
                .unwrap_or_else(|| panic!("remove_inode: {} not anchored", inode.ino()));
            assert_eq!(
                anchor.nref, 1,
                "remove_inode: non-directory {} still referenced",
                inode.ino()
            );
        }
        Self::put_ref(&mut state, inode.clone());
    }

    /// A tracked inode just acquired a parent dentry.
    pub fn notify_link(&self, inode: &InodeRef) {
        debug!(ino = %inode.ino(), "notify_link");
        let ino = inode.ino();
        let dn = inode
            .parent_dentry()
            .unwrap_or_else(|| panic!("notify_link: {} has no parent dentry", ino));

        let mut state = self.state.lock();
        {
            let anchor = state
                .anchors
                .get_mut(&ino)
                .unwrap_or_else(|| panic!("notify_link: {} not anchored", ino));
            assert!(anchor.nref > 0);
            assert!(
                anchor.dirino.is_zero() && anchor.d_name.is_empty(),
                "notify_link: {} already linked under {}",
                ino,
                anchor.dirino
            );
            anchor.dirino = dn.dir.ino();
            anchor.d_name = dn.name.clone();
        }
        state.dirty.entry(ino).or_insert(DirtyState::Dirty);

        Self::get_ref(&mut state, dn.dir);
    }

    /// A tracked inode is about to lose its parent dentry.
    pub fn notify_unlink(&self, inode: &InodeRef) {
        debug!(ino = %inode.ino(), "notify_unlink");
        let ino = inode.ino();
        let dn = inode
            .parent_dentry()
            .unwrap_or_else(|| panic!("notify_unlink: {} has no parent dentry", ino));

        let mut state = self.state.lock();
        {
            let anchor = state
                .anchors
                .get_mut(&ino)
                .unwrap_or_else(|| panic!("notify_unlink: {} not anchored", ino));
            assert!(anchor.nref > 0);
            assert_eq!(
                anchor.dirino,
                dn.dir.ino(),
                "notify_unlink: {} anchored under a different parent",
                ino
            );
            assert_eq!(anchor.d_name, dn.name);
            anchor.dirino = InodeId::ZERO;
            anchor.d_name.clear();
        }
        state.dirty.entry(ino).or_insert(DirtyState::Dirty);

        Self::put_ref(&mut state, dn.dir);
    }

    /// Take one reference on `inode`, creating anchors up the ancestor
    /// chain until an already-anchored ancestor absorbs the pin.
    fn get_ref(state: &mut TableState, inode: InodeRef) {
        let mut cur = Some(inode);
        while let Some(node) = cur {
            let ino = node.ino();
            if let Some(anchor) = state.anchors.get_mut(&ino) {
                assert!(
                    node.is_tracked(),
                    "get_ref: anchored inode {} not flagged tracked",
                    ino
                );
                assert!(anchor.nref > 0);
                anchor.nref += 1;
                break;
            }

            let parent = node.parent_dentry();
            let (dirino, d_name) = match &parent {
                Some(dn) => (dn.dir.ino(), dn.name.clone()),
                None => (InodeId::ZERO, String::new()),
            };

            let prev = state
                .anchors
                .insert(ino, Anchor::new(ino, dirino, d_name, node.d_type()));
            assert!(prev.is_none());
            node.set_tracked(true);

            // Keep a plain-dirty entry from a pre-commit remove: the
            // persisted record may still exist, so this id is not NEW.
            state.dirty.entry(ino).or_insert(DirtyState::New);

            cur = parent.map(|dn| dn.dir);
        }
    }

    /// Drop one reference on `inode`, erasing anchors and releasing
    /// their parent pins until a still-referenced ancestor is reached.
    fn put_ref(state: &mut TableState, inode: InodeRef) {
        let mut cur = Some(inode);
        while let Some(node) = cur {
            let ino = node.ino();
            assert!(
                node.is_tracked(),
                "put_ref: inode {} not flagged tracked",
                ino
            );
            let anchor = state
                .anchors
                .get_mut(&ino)
                .unwrap_or_else(|| panic!("put_ref: {} not anchored", ino));
            assert!(anchor.nref > 0);

            if anchor.nref > 1 {
                anchor.nref -= 1;
                break;
            }

            let parent = node.parent_dentry();
            match &parent {
                Some(dn) => {
                    assert_eq!(
                        anchor.dirino,
                        dn.dir.ino(),
                        "put_ref: {} anchored under a different parent",
                        ino
                    );
                    assert_eq!(anchor.d_name, dn.name);
                }
                None => {
                    assert!(anchor.dirino.is_zero());
                    assert!(anchor.d_name.is_empty());
                }
            }

            state.anchors.remove(&ino);
            node.set_tracked(false);

            match state.dirty.entry(ino) {
                // Never persisted, nothing to rescind on disk.
                Entry::Occupied(e) if *e.get() == DirtyState::New => {
                    e.remove();
                }
                Entry::Occupied(_) => {}
                Entry::Vacant(v) => {
                    v.insert(DirtyState::Dirty);
                }
            }

            cur = parent.map(|dn| dn.dir);
        }
    }

    /// Ancestor chain of a loaded inode, plus the authority hint taken
    /// from the nearest known ancestor.
    ///
    /// Returns `None` when the inode is not in the loaded shadow or has
    /// no usable ancestry.
    pub fn get_ancestors(
        &self,
        ino: InodeId,
    ) -> Option<(Vec<InodeBackpointer>, Option<MdsRank>)> {
        let state = self.state.lock();
        let mut entry = state.loaded.get(&ino)?;

        let mut dirino = entry.anchor.dirino;
        if dirino.is_zero() {
            return None;
        }

        let mut ancestors = Vec::new();
        let mut auth_hint = None;
        let mut first = true;
        loop {
            ancestors.push(InodeBackpointer {
                dirino,
                dname: entry.anchor.d_name.clone(),
                version: 0,
            });

            match state.loaded.get(&dirino) {
                Some(parent) => {
                    if first {
                        auth_hint = parent.auth;
                    }
                    entry = parent;
                    dirino = parent.anchor.dirino;
                    if dirino.is_zero() {
                        break;
                    }
                    first = false;
                }
                None => break,
            }
        }
        Some((ancestors, auth_hint))
    }

    /// Whether the journal should record an open for this inode.
    ///
    /// The record may be skipped only when the table already tracks the
    /// inode, the journal has caught up past the current commit, and the
    /// anchor has been persisted (no longer dirty).
    pub fn should_log_open(&self, inode: &InodeRef) -> bool {
        if inode.is_tracked() {
            let state = self.state.lock();
            if inode.last_journaled() >= state.committing_log_seq
                && !state.dirty.contains_key(&inode.ino())
            {
                return false;
            }
        }
        true
    }

    /// Whether the startup load has finished (successfully or not).
    pub fn is_loaded(&self) -> bool {
        self.state.lock().load_done
    }

    /// Whether the prefetcher has reached its terminal state.
    pub fn is_prefetched(&self) -> bool {
        self.state.lock().prefetch_state == PrefetchState::Done
    }

    /// Log sequence of the last fully committed snapshot.
    pub fn committed_log_seq(&self) -> u64 {
        self.state.lock().committed_log_seq
    }

    /// Log sequence of the most recently started commit.
    pub fn committing_log_seq(&self) -> u64 {
        self.state.lock().committing_log_seq
    }

    /// Snapshot of table counters.
    pub fn stats(&self) -> OpenFilesStats {
        let state = self.state.lock();
        OpenFilesStats {
            anchors: state.anchors.len(),
            dirty: state.dirty.len(),
            loaded: state.loaded.len(),
            committed_log_seq: state.committed_log_seq,
            committing_log_seq: state.committing_log_seq,
            pending_commits: state.num_pending_commit,
        }
    }
}

//! Test doubles shared by the module tests: a scripted inode cache, a
//! fixed cluster map, and an invariant checker for the anchor graph.

use crate::cache::{CacheInode, InodeRef, MdsCache, MdsMap, ParentDentry};
use crate::memory::MemoryObjectStore;
use crate::table::OpenFileTable;
use async_trait::async_trait;
use metafs_common::{DentryType, InodeId, MdsRank, OpenFilesConfig, PoolId, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// A cache inode with settable parent linkage and flags.
pub(crate) struct TestInode {
    ino: InodeId,
    d_type: DentryType,
    state: Mutex<TestInodeState>,
}

#[derive(Default)]
struct TestInodeState {
    parent: Option<(Arc<TestInode>, String)>,
    tracked: bool,
    last_journaled: u64,
}

impl TestInode {
    fn new(ino: u64, d_type: DentryType) -> Arc<Self> {
        Arc::new(Self {
            ino: InodeId(ino),
            d_type,
            state: Mutex::new(TestInodeState::default()),
        })
    }

    pub fn dir(ino: u64) -> Arc<Self> {
        Self::new(ino, DentryType::Dir)
    }

    pub fn file(ino: u64) -> Arc<Self> {
        Self::new(ino, DentryType::Regular)
    }

    pub fn link(child: &Arc<Self>, parent: &Arc<Self>, name: &str) {
        child.state.lock().parent = Some((parent.clone(), name.to_string()));
    }

    pub fn unlink(child: &Arc<Self>) {
        child.state.lock().parent = None;
    }

    pub fn is_tracked(&self) -> bool {
        self.state.lock().tracked
    }

    pub fn set_tracked(&self, tracked: bool) {
        self.state.lock().tracked = tracked;
    }

    pub fn set_last_journaled(&self, seq: u64) {
        self.state.lock().last_journaled = seq;
    }

    pub fn as_inode_ref(self: &Arc<Self>) -> InodeRef {
        self.clone()
    }
}

impl CacheInode for TestInode {
    fn ino(&self) -> InodeId {
        self.ino
    }

    fn d_type(&self) -> DentryType {
        self.d_type
    }

    fn parent_dentry(&self) -> Option<ParentDentry> {
        self.state.lock().parent.as_ref().map(|(dir, name)| ParentDentry {
            dir: dir.clone(),
            name: name.clone(),
        })
    }

    fn is_tracked(&self) -> bool {
        TestInode::is_tracked(self)
    }

    fn set_tracked(&self, tracked: bool) {
        TestInode::set_tracked(self, tracked);
    }

    fn last_journaled(&self) -> u64 {
        self.state.lock().last_journaled
    }
}

/// Inode cache double: a live-inode map, scripted `open_ino` results,
/// and logs of opener calls and rejoin notifications.
#[derive(Default)]
pub(crate) struct TestCache {
    inodes: Mutex<HashMap<InodeId, InodeRef>>,
    scripted: Mutex<HashMap<InodeId, Result<MdsRank>>>,
    opened: Mutex<Vec<(InodeId, PoolId)>>,
    rejoined: Mutex<Vec<(InodeId, Option<MdsRank>)>>,
}

impl TestCache {
    pub fn insert_inode(&self, inode: InodeRef) {
        self.inodes.lock().insert(inode.ino(), inode);
    }

    /// Script the result of the next `open_ino` for `ino`. Unscripted
    /// opens resolve to the local rank.
    pub fn script_open(&self, ino: InodeId, result: Result<MdsRank>) {
        self.scripted.lock().insert(ino, result);
    }

    pub fn opened(&self) -> Vec<(InodeId, PoolId)> {
        self.opened.lock().clone()
    }

    pub fn rejoined(&self) -> Vec<(InodeId, Option<MdsRank>)> {
        self.rejoined.lock().clone()
    }
}

#[async_trait]
impl MdsCache for TestCache {
    fn get_inode(&self, ino: InodeId) -> Option<InodeRef> {
        self.inodes.lock().get(&ino).cloned()
    }

    async fn open_ino(&self, ino: InodeId, pool: PoolId) -> Result<MdsRank> {
        self.opened.lock().push((ino, pool));
        match self.scripted.lock().remove(&ino) {
            Some(result) => result,
            None => Ok(MdsRank(0)),
        }
    }

    fn rejoin_prefetch_ino_finish(&self, ino: InodeId, auth: Option<MdsRank>) {
        self.rejoined.lock().push((ino, auth));
    }
}

/// Rank 0, metadata pool 1, data pool 2.
pub(crate) struct TestMap;

impl MdsMap for TestMap {
    fn metadata_pool(&self) -> PoolId {
        PoolId(1)
    }

    fn first_data_pool(&self) -> PoolId {
        PoolId(2)
    }

    fn nodeid(&self) -> MdsRank {
        MdsRank(0)
    }
}

pub(crate) fn new_table() -> (OpenFileTable, Arc<TestCache>, Arc<MemoryObjectStore>) {
    new_table_with_config(OpenFilesConfig::default())
}

pub(crate) fn new_table_with_config(
    config: OpenFilesConfig,
) -> (OpenFileTable, Arc<TestCache>, Arc<MemoryObjectStore>) {
    build(Arc::new(MemoryObjectStore::new()), config)
}

pub(crate) fn new_table_with_store(
    store: Arc<MemoryObjectStore>,
) -> (OpenFileTable, Arc<TestCache>, Arc<MemoryObjectStore>) {
    build(store, OpenFilesConfig::default())
}

fn build(
    store: Arc<MemoryObjectStore>,
    config: OpenFilesConfig,
) -> (OpenFileTable, Arc<TestCache>, Arc<MemoryObjectStore>) {
    let cache = Arc::new(TestCache::default());
    let oft = OpenFileTable::new(Arc::new(TestMap), cache.clone(), store.clone(), config);
    (oft, cache, store)
}

/// Check the structural invariants of the live anchor graph: positive
/// refcounts, parents present, no cycles, and at least one reference
/// unit per anchored child.
pub(crate) fn assert_invariants(oft: &OpenFileTable) {
    let state = oft.state.lock();

    for (ino, anchor) in &state.anchors {
        assert_eq!(anchor.ino, *ino, "anchor keyed under the wrong inode");
        assert!(anchor.nref >= 1, "anchor {} has zero refs", ino);
        if !anchor.dirino.is_zero() {
            assert!(
                state.anchors.contains_key(&anchor.dirino),
                "anchor {} has unanchored parent {}",
                ino,
                anchor.dirino
            );
        }

        let mut cur = anchor.dirino;
        let mut steps = 0usize;
        while !cur.is_zero() {
            let Some(parent) = state.anchors.get(&cur) else {
                break;
            };
            cur = parent.dirino;
            steps += 1;
            assert!(
                steps <= state.anchors.len(),
                "cycle in ancestor chain of {}",
                ino
            );
        }
    }

    let mut child_counts: HashMap<InodeId, u32> = HashMap::new();
    for anchor in state.anchors.values() {
        if !anchor.dirino.is_zero() {
            *child_counts.entry(anchor.dirino).or_default() += 1;
        }
    }
    for (ino, children) in child_counts {
        assert!(
            state.anchors[&ino].nref >= children,
            "anchor {} holds fewer refs than its {} anchored children",
            ino,
            children
        );
    }
}

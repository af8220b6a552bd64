//! Startup load
//!
//! Streams the backing object back into the loaded shadow. Any storage
//! or decode problem degrades to an empty table with `clear_on_commit`
//! latched, so the next commit rewrites the object from scratch;
//! waiters are always released.

use crate::anchor::{Anchor, LoadedAnchor};
use crate::cache::MdsMap;
use crate::objecter::{ObjectStore, OmapChunk, OmapReadSpec};
use crate::table::OpenFileTable;
use metafs_common::{Error, InodeId, Result};
use tracing::{debug, error, info};

/// Outcome of ingesting one response chunk.
enum Ingest {
    Continue,
    /// Header was 0: a snapshot was interrupted mid-write, discard.
    Incomplete,
}

impl OpenFileTable {
    /// Load the persisted image into the loaded shadow.
    ///
    /// Always succeeds from the caller's perspective: failures leave an
    /// empty shadow and latch `clear_on_commit`.
    pub async fn load(&self) {
        debug!("load");
        assert!(!self.state.lock().load_done, "load called twice");

        let oid = self.object_name();
        let pool = self.map.metadata_pool();

        let mut spec = OmapReadSpec::from_start();
        let mut first = true;
        loop {
            let chunk = match self.store.read(&oid, pool, spec).await {
                Ok(chunk) => chunk,
                Err(err) => {
                    error!(%err, oid = %oid, "load read failed");
                    let mut state = self.state.lock();
                    state.clear_on_commit = true;
                    if !first {
                        state.loaded.clear();
                    }
                    break;
                }
            };

            let more = chunk.more;
            let last_key = chunk.values.keys().next_back().cloned();

            match self.ingest_chunk(first, chunk) {
                Ok(Ingest::Continue) => {}
                Ok(Ingest::Incomplete) => break,
                Err(err) => {
                    error!(%err, oid = %oid, "load: corrupted header or values");
                    let mut state = self.state.lock();
                    state.clear_on_commit = true;
                    state.loaded.clear();
                    break;
                }
            }

            let Some(last_key) = last_key.filter(|_| more) else {
                debug!(loaded = self.state.lock().loaded.len(), "load complete");
                break;
            };
            debug!(last_key = %last_key, "load continues");
            spec = OmapReadSpec::continue_after(last_key);
            first = false;
        }

        self.state.lock().load_done = true;
        self.load_notify.notify_waiters();
    }

    /// Wait until [`load`](Self::load) has finished.
    pub async fn wait_for_load(&self) {
        let notified = self.load_notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.state.lock().load_done {
            return;
        }
        // `load_done` latches before the notify, so one wakeup suffices.
        notified.await;
    }

    fn ingest_chunk(&self, first: bool, chunk: OmapChunk) -> Result<Ingest> {
        let mut state = self.state.lock();

        if first {
            let header = chunk
                .header
                .as_deref()
                .ok_or_else(|| Error::decode("missing omap header"))?;
            let bytes: [u8; 8] = header
                .try_into()
                .map_err(|_| Error::decode(format!("bad header length: {}", header.len())))?;
            let log_seq = u64::from_le_bytes(bytes);
            state.committed_log_seq = log_seq;
            state.committing_log_seq = log_seq;
            if log_seq == 0 {
                info!("load: incomplete values, discarding");
                state.clear_on_commit = true;
                return Ok(Ingest::Incomplete);
            }
        }

        for (key, value) in &chunk.values {
            let ino = u64::from_str_radix(key, 16)
                .map(InodeId)
                .map_err(|e| Error::decode(format!("bad omap key {:?}: {}", key, e)))?;
            let anchor = Anchor::from_bytes(value)?;
            if anchor.ino != ino {
                return Err(Error::decode(format!(
                    "anchor ino {} does not match key {}",
                    anchor.ino, ino
                )));
            }
            state.loaded.insert(ino, LoadedAnchor::from(anchor));
        }
        Ok(Ingest::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objecter::OmapWrite;
    use crate::testutil::{new_table, new_table_with_store, TestInode};
    use metafs_common::{DentryType, PoolId};
    use std::collections::HashMap;
    use std::sync::Arc;

    const POOL: PoolId = PoolId(1);

    #[tokio::test]
    async fn test_commit_then_load_round_trips() {
        let (oft, _cache, store) = new_table();
        let dir = TestInode::dir(0xd);
        let f = TestInode::file(0xf);
        TestInode::link(&f, &dir, "a");
        oft.add_inode(&f.as_inode_ref());

        let before: HashMap<_, _> = oft.state.lock().anchors.clone();
        oft.commit(7, 0).await.unwrap();

        // Fresh table over the same backing object.
        let (oft2, _cache2, _store2) = new_table_with_store(store);
        oft2.load().await;
        assert!(oft2.is_loaded());

        let state = oft2.state.lock();
        assert_eq!(state.committed_log_seq, 7);
        assert_eq!(state.committing_log_seq, 7);
        assert_eq!(state.loaded.len(), before.len());
        for (ino, anchor) in &before {
            let loaded = state.loaded.get(ino).unwrap();
            assert_eq!(&loaded.anchor, anchor);
            assert_eq!(loaded.auth, None);
        }
        assert!(!state.clear_on_commit);
    }

    #[tokio::test]
    async fn test_missing_object_tolerated() {
        let (oft, _cache, _store) = new_table();
        oft.load().await;
        assert!(oft.is_loaded());

        let state = oft.state.lock();
        assert!(state.loaded.is_empty());
        assert!(state.clear_on_commit);
    }

    #[tokio::test]
    async fn test_incomplete_header_discards_values() {
        let (oft, _cache, store) = new_table();
        let mut write = OmapWrite::new(0);
        write.set_header = Some(0u64.to_le_bytes().to_vec());
        write
            .set
            .insert("f".to_string(), b"should be ignored".to_vec());
        store.mutate("mds0_openfiles", POOL, write).await.unwrap();

        oft.load().await;
        assert!(oft.is_loaded());

        let state = oft.state.lock();
        assert!(state.loaded.is_empty());
        assert!(state.clear_on_commit);
        assert_eq!(state.committed_log_seq, 0);
    }

    #[tokio::test]
    async fn test_corrupt_value_discards_shadow() {
        let (oft, _cache, store) = new_table();
        let good = Anchor::new(InodeId(0x10), InodeId::ZERO, String::new(), DentryType::Dir);
        let mut write = OmapWrite::new(0);
        write.set_header = Some(3u64.to_le_bytes().to_vec());
        write.set.insert("10".to_string(), good.to_bytes());
        write.set.insert("11".to_string(), b"garbage".to_vec());
        store.mutate("mds0_openfiles", POOL, write).await.unwrap();

        oft.load().await;

        let state = oft.state.lock();
        assert!(state.loaded.is_empty());
        assert!(state.clear_on_commit);
    }

    #[tokio::test]
    async fn test_key_value_ino_mismatch_discards_shadow() {
        let (oft, _cache, store) = new_table();
        let anchor = Anchor::new(InodeId(0x10), InodeId::ZERO, String::new(), DentryType::Dir);
        let mut write = OmapWrite::new(0);
        write.set_header = Some(3u64.to_le_bytes().to_vec());
        // Keyed under the wrong inode.
        write.set.insert("99".to_string(), anchor.to_bytes());
        store.mutate("mds0_openfiles", POOL, write).await.unwrap();

        oft.load().await;

        let state = oft.state.lock();
        assert!(state.loaded.is_empty());
        assert!(state.clear_on_commit);
    }

    #[tokio::test]
    async fn test_continuation_reads() {
        let store = Arc::new(crate::MemoryObjectStore::new().with_list_limit(2));
        let (oft, _cache, store) = new_table_with_store(store);

        // Seed seven anchors through a real commit.
        for ino in 0x30..0x37u64 {
            let f = TestInode::file(ino);
            oft.add_inode(&f.as_inode_ref());
        }
        oft.commit(4, 0).await.unwrap();

        let (oft2, _cache2, _store2) = new_table_with_store(store);
        oft2.load().await;

        let state = oft2.state.lock();
        assert_eq!(state.loaded.len(), 7);
        for ino in 0x30..0x37u64 {
            assert!(state.loaded.contains_key(&InodeId(ino)), "ino {:x}", ino);
        }
    }

    #[tokio::test]
    async fn test_wait_for_load_releases_waiters() {
        let (oft, _cache, _store) = new_table();
        let oft = Arc::new(oft);

        let waiter = {
            let oft = oft.clone();
            tokio::spawn(async move {
                oft.wait_for_load().await;
                oft.is_loaded()
            })
        };

        oft.load().await;
        assert!(waiter.await.unwrap());

        // Waiting after the fact returns immediately.
        oft.wait_for_load().await;
    }

    #[tokio::test]
    async fn test_crash_mid_commit_then_recover() {
        // A commit split into several partials dies after two writes.
        let (oft, _cache, store) = crate::testutil::new_table_with_config(
            metafs_common::OpenFilesConfig { max_write_size: 1 },
        );
        for ino in [0x40, 0x41, 0x42] {
            let f = TestInode::file(ino);
            oft.add_inode(&f.as_inode_ref());
        }
        store.fail_after_writes(2);
        assert!(oft.commit(9, 0).await.is_err());
        store.clear_failure();

        // The interrupted image advertises itself as incomplete.
        assert_eq!(
            store.header("mds0_openfiles", POOL).unwrap(),
            0u64.to_le_bytes().to_vec()
        );

        // A restarted table discards it and latches the clear.
        let (oft2, _cache2, store2) = new_table_with_store(store);
        oft2.load().await;
        assert!(oft2.state.lock().loaded.is_empty());
        assert!(oft2.state.lock().clear_on_commit);

        // Next commit starts with a clear and rewrites the live image.
        let f = TestInode::file(0x50);
        oft2.add_inode(&f.as_inode_ref());
        store2.clear_write_log();
        oft2.commit(10, 0).await.unwrap();

        let log = store2.write_log();
        assert!(log[0].clear);
        let map = store2.object_map("mds0_openfiles", POOL).unwrap();
        assert_eq!(map.keys().cloned().collect::<Vec<_>>(), ["50"]);
        assert_eq!(
            store2.header("mds0_openfiles", POOL).unwrap(),
            10u64.to_le_bytes().to_vec()
        );
    }
}

//! Rejoin prefetch
//!
//! Re-opens every loaded inode after a restart: directories first (so
//! path resolution lands on warm parents), then files. Openers run
//! concurrently; each phase transition happens only once every opener
//! of the current phase has come back.

use crate::cache::{MdsCache, MdsMap};
use crate::table::{OpenFileTable, PrefetchState};
use futures::stream::{FuturesUnordered, StreamExt};
use metafs_common::{DentryType, InodeId, MdsRank, Result};
use tracing::{debug, warn};

impl OpenFileTable {
    /// Open every loaded inode through the inode opener, directories
    /// then files, recording authority hints along the way. Defers
    /// until the startup load has finished.
    pub async fn prefetch_inodes(&self) {
        debug!("prefetch_inodes");
        {
            let mut state = self.state.lock();
            assert_eq!(
                state.prefetch_state,
                PrefetchState::Idle,
                "prefetch already started"
            );
            state.prefetch_state = PrefetchState::DirInodes;
        }

        self.wait_for_load().await;

        self.open_loaded_inodes(PrefetchState::DirInodes).await;
        self.state.lock().prefetch_state = PrefetchState::FileInodes;

        self.open_loaded_inodes(PrefetchState::FileInodes).await;
        self.state.lock().prefetch_state = PrefetchState::Done;
        debug!("prefetch done");
        self.prefetch_notify.notify_waiters();
    }

    /// Wait until [`prefetch_inodes`](Self::prefetch_inodes) has
    /// reached its terminal state.
    pub async fn wait_for_prefetch(&self) {
        let notified = self.prefetch_notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_prefetched() {
            return;
        }
        notified.await;
    }

    /// Fan out one phase's openers and drain them to completion.
    async fn open_loaded_inodes(&self, phase: PrefetchState) {
        let own_rank = self.map.nodeid();
        let pool = match phase {
            PrefetchState::DirInodes => self.map.metadata_pool(),
            PrefetchState::FileInodes => self.map.first_data_pool(),
            _ => unreachable!("prefetch scan in state {:?}", phase),
        };

        let mut candidates = Vec::new();
        {
            let mut state = self.state.lock();
            for (ino, entry) in state.loaded.iter_mut() {
                match entry.anchor.d_type {
                    DentryType::Dir => {
                        if phase != PrefetchState::DirInodes {
                            continue;
                        }
                        // System directories are owned by the rank their
                        // number encodes; no need to ask the opener.
                        if ino.is_mds_dir() {
                            entry.auth = Some(ino.mds_dir_owner());
                            continue;
                        }
                        if ino.is_stray() {
                            entry.auth = Some(ino.stray_owner());
                            continue;
                        }
                    }
                    // Corrupt type tag: no way to pick a pool, skip.
                    DentryType::Unknown => continue,
                    _ => {
                        if phase != PrefetchState::FileInodes {
                            continue;
                        }
                    }
                }
                candidates.push(*ino);
            }
        }

        let to_open: Vec<InodeId> = candidates
            .into_iter()
            .filter(|ino| self.cache.get_inode(*ino).is_none())
            .collect();
        debug!(phase = ?phase, opening = to_open.len(), "prefetch scan");

        let mut openers: FuturesUnordered<_> = to_open
            .into_iter()
            .map(|ino| {
                let cache = self.cache.clone();
                async move { (ino, cache.open_ino(ino, pool).await) }
            })
            .collect();

        while let Some((ino, result)) = openers.next().await {
            self.open_ino_finish(phase, own_rank, ino, result);
        }
    }

    fn open_ino_finish(
        &self,
        phase: PrefetchState,
        own_rank: MdsRank,
        ino: InodeId,
        result: Result<MdsRank>,
    ) {
        if phase == PrefetchState::DirInodes {
            if let Ok(rank) = &result {
                let mut state = self.state.lock();
                let entry = state
                    .loaded
                    .get_mut(&ino)
                    .unwrap_or_else(|| panic!("prefetched inode {} left the loaded map", ino));
                entry.auth = Some(*rank);
            }
        }

        match result {
            Ok(rank) if rank == own_rank => {}
            Ok(rank) => self.cache.rejoin_prefetch_ino_finish(ino, Some(rank)),
            Err(err) => {
                warn!(%err, ino = %ino, "open_ino failed");
                self.cache.rejoin_prefetch_ino_finish(ino, None);
            }
        }
    }
}

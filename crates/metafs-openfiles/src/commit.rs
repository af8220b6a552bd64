//! Snapshot commit
//!
//! Streams the anchor map and dirty set to the backing object as a
//! sequence of partial writes forming one logical snapshot labeled with
//! a journal log sequence. The object header is driven to 0 by the
//! first partial of a multi-write snapshot and to the new sequence by
//! the last, so a reader never sees a half-written image advertised as
//! complete; a single-partial commit installs the new header in one
//! atomic step.

use crate::cache::MdsMap;
use crate::objecter::{ObjectStore, OmapWrite};
use crate::table::{OpenFileTable, TableState};
use metafs_common::Result;
use std::collections::{BTreeMap, BTreeSet};
use std::mem;
use tracing::{debug, error};

impl OpenFileTable {
    /// Persist a snapshot of the table as of this call, labeled
    /// `log_seq`.
    ///
    /// The snapshot (including reconciliation against the loaded
    /// shadow) is taken synchronously; only the object writes await.
    /// On error the caller owns write-error policy and
    /// `committed_log_seq` does not advance.
    pub async fn commit(&self, log_seq: u64, priority: i32) -> Result<()> {
        let oid = self.object_name();
        let pool = self.map.metadata_pool();

        let writes = {
            let mut state = self.state.lock();
            assert!(
                log_seq >= state.committing_log_seq,
                "commit: log_seq {} regresses below {}",
                log_seq,
                state.committing_log_seq
            );
            state.committing_log_seq = log_seq;
            let writes = build_commit_writes(
                &mut state,
                log_seq,
                priority,
                self.config.max_write_size,
            );
            state.num_pending_commit += 1;
            writes
        };
        debug!(log_seq, partials = writes.len(), oid = %oid, "commit");

        for write in writes {
            if let Err(err) = self.store.mutate(&oid, pool, write).await {
                error!(%err, oid = %oid, log_seq, "commit write failed");
                return Err(err);
            }
        }

        let mut state = self.state.lock();
        assert!(log_seq <= state.committing_log_seq);
        assert!(log_seq >= state.committed_log_seq);
        state.committed_log_seq = log_seq;
        state.num_pending_commit -= 1;
        debug!(log_seq, "commit finished");
        Ok(())
    }
}

/// Drain the dirty set (and, on the first commit after a load, the
/// remainder of the loaded shadow) into partial writes bounded by
/// `max_write_size`.
fn build_commit_writes(
    state: &mut TableState,
    log_seq: u64,
    priority: i32,
    max_write_size: usize,
) -> Vec<OmapWrite> {
    let mut batches: Vec<(BTreeMap<String, Vec<u8>>, BTreeSet<String>)> = Vec::new();
    let mut set = BTreeMap::new();
    let mut remove = BTreeSet::new();
    let mut write_size = 0usize;

    // While the loaded shadow is non-empty the on-disk image still
    // reflects the prior epoch; this commit reconciles against it.
    let first_commit = !state.loaded.is_empty();

    for (ino, _) in mem::take(&mut state.dirty) {
        let anchor = state.anchors.get(&ino);
        if first_commit {
            if let Some(loaded) = state.loaded.remove(&ino) {
                if anchor == Some(&loaded.anchor) {
                    // Disk already matches the live anchor.
                    continue;
                }
            }
        }

        let key = format!("{:x}", ino);
        write_size += key.len() + 4;
        match anchor {
            Some(anchor) => {
                let value = anchor.to_bytes();
                write_size += value.len() + 4;
                set.insert(key, value);
            }
            None => {
                remove.insert(key);
            }
        }

        if write_size >= max_write_size {
            batches.push((mem::take(&mut set), mem::take(&mut remove)));
            write_size = 0;
        }
    }

    if first_commit {
        // Whatever the current process never re-opened is stale.
        for (ino, _) in mem::take(&mut state.loaded) {
            let key = format!("{:x}", ino);
            write_size += key.len() + 4;
            remove.insert(key);

            if write_size >= max_write_size {
                batches.push((mem::take(&mut set), mem::take(&mut remove)));
                write_size = 0;
            }
        }
    }

    // The final partial also carries the new header, even when empty.
    batches.push((set, remove));

    let clear = mem::replace(&mut state.clear_on_commit, false);
    let last = batches.len() - 1;
    batches
        .into_iter()
        .enumerate()
        .map(|(i, (set, remove))| {
            let mut write = OmapWrite::new(priority);
            write.clear = clear && i == 0;
            write.set_header = if i == last {
                Some(log_seq.to_le_bytes().to_vec())
            } else if i == 0 {
                // Tombstone the old image while the snapshot is partial.
                Some(0u64.to_le_bytes().to_vec())
            } else {
                None
            };
            write.set = set;
            write.remove = remove;
            write
        })
        .collect()
}

use logd_storage::{CommitCount, Storage, VirtualPath};
use logd_wire::TreeCodec;

use crate::cache::ReconstructionCache;
use crate::error::Result;
use crate::reconstruct::reconstruct;

/// Out-of-band snapshot cadence (`spec.md` §4.5 "Snapshot policy" /
/// Design Notes open question: "the source suggests out-of-band but does
/// not prescribe timing" -- this implementation snapshots synchronously,
/// right after the commit that crosses the cadence boundary, rather than on
/// a separate background schedule; see DESIGN.md). `None` disables
/// snapshotting entirely.
#[derive(Debug, Clone, Copy)]
pub struct SnapshotPolicy {
    every: Option<u64>,
}

impl SnapshotPolicy {
    pub fn new(every: Option<u64>) -> Self {
        SnapshotPolicy { every: every.filter(|n| *n > 0) }
    }

    pub fn disabled() -> Self {
        SnapshotPolicy { every: None }
    }

    pub fn crosses_cadence(&self, commit_count: CommitCount) -> bool {
        match self.every {
            Some(every) => commit_count.get() % every == 0,
            None => false,
        }
    }

    /// Reconstructs state exactly at `commit_count` and persists it as a
    /// snapshot, if the cadence calls for one at this commit. Correctness
    /// never depends on this running -- callers may ignore failures here
    /// and proceed with the response they already owe the client.
    pub fn maybe_snapshot(
        &self,
        storage: &Storage,
        codec: &dyn TreeCodec,
        cache: &ReconstructionCache,
        path: &VirtualPath,
        commit_count: CommitCount,
        timestamp: i64,
    ) -> Result<()> {
        if !self.crosses_cadence(commit_count) {
            return Ok(());
        }
        let reconstructed = reconstruct(storage, codec, cache, path, Some(commit_count.get()))?;
        let encoded = codec.encode_string(&reconstructed.state);
        storage.write_snapshot(path, commit_count, timestamp, &encoded)?;
        tracing::debug!(path = %path, commit_count = commit_count.get(), "wrote out-of-band snapshot");
        Ok(())
    }
}

//! Reconstruction and watch engine: replays committed diffs (optionally
//! starting from a cached snapshot) into document state, and streams that
//! state plus live updates in strict `commitCount` order (`spec.md` §4.5).

mod cache;
mod error;
mod reconstruct;
mod snapshot;
mod watch;

use std::sync::Arc;
use std::time::Duration;

use logd_storage::{CommitCount, Storage, VirtualPath};
use logd_wire::TreeCodec;
use tokio_stream::Stream;

pub use cache::ReconstructionCache;
pub use error::{Error, Result};
pub use reconstruct::Reconstructed;
pub use snapshot::SnapshotPolicy;
pub use watch::WatchEvent;

/// Ties the diff store, a wire codec, the reconstruction cache, and the
/// snapshot policy together into the one object `bin/logd-server` hands
/// each request handler.
pub struct Engine {
    storage: Arc<Storage>,
    codec: Arc<dyn TreeCodec>,
    cache: Arc<ReconstructionCache>,
    snapshot_policy: SnapshotPolicy,
    poll_interval: Duration,
}

impl Engine {
    pub fn new(
        storage: Arc<Storage>,
        codec: Arc<dyn TreeCodec>,
        cache_capacity: usize,
        snapshot_policy: SnapshotPolicy,
        poll_interval: Duration,
    ) -> Self {
        Engine {
            storage,
            codec,
            cache: Arc::new(ReconstructionCache::new(cache_capacity)),
            snapshot_policy,
            poll_interval,
        }
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    pub fn codec(&self) -> &Arc<dyn TreeCodec> {
        &self.codec
    }

    /// `MATCH /api/data`: reconstruct state at `target_commit_count` (or
    /// latest when `None`).
    pub fn reconstruct(&self, path: &VirtualPath, target_commit_count: Option<u64>) -> Result<Reconstructed> {
        reconstruct::reconstruct(&self.storage, self.codec.as_ref(), &self.cache, path, target_commit_count)
    }

    /// `WATCH /api/data`: seed + live diff stream, bounded by `to_seq` when
    /// present.
    pub fn watch(
        &self,
        path: VirtualPath,
        from_seq: Option<u64>,
        to_seq: Option<u64>,
    ) -> impl Stream<Item = Result<WatchEvent>> {
        watch::watch(self.storage.clone(), self.codec.clone(), self.cache.clone(), path, from_seq, to_seq, self.poll_interval)
    }

    /// Invalidates cached reconstructions for `path` and writes an
    /// out-of-band snapshot if `commit_count` crosses the configured
    /// cadence. Called by the HTTP layer right after a write commits.
    pub fn on_committed(&self, path: &VirtualPath, commit_count: CommitCount, timestamp: i64) -> Result<()> {
        self.cache.invalidate_path(path);
        self.snapshot_policy.maybe_snapshot(&self.storage, self.codec.as_ref(), &self.cache, path, commit_count, timestamp)
    }
}

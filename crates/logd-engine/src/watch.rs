use std::sync::Arc;
use std::time::Duration;

use async_stream::try_stream;
use logd_core::Node;
use logd_storage::{CommitCount, Storage, VirtualPath};
use logd_wire::TreeCodec;
use tokio_stream::Stream;

use crate::cache::ReconstructionCache;
use crate::error::Result;

/// A document emitted by [`watch`]: either the seed state the subscription
/// starts from, or one historical/live diff (`spec.md` §4.5 step 3).
#[derive(Debug, Clone)]
pub enum WatchEvent {
    Seed { commit_count: CommitCount, timestamp: i64, state: Node, from_snapshot: bool },
    Diff { commit_count: CommitCount, timestamp: i64, diff: Node },
}

impl WatchEvent {
    pub fn commit_count(&self) -> CommitCount {
        match self {
            WatchEvent::Seed { commit_count, .. } => *commit_count,
            WatchEvent::Diff { commit_count, .. } => *commit_count,
        }
    }
}

/// Consecutive polls a watermark is allowed to stall on a missing commit
/// count before it is treated as permanently absent (a transaction that
/// allocated the count and then aborted without ever logging it -- see
/// DESIGN.md's note on the recovery-policy Open Question). At the default
/// ~100ms poll interval this is roughly two seconds.
const STALL_LIMIT: u32 = 20;

/// Streams the seed document followed by every diff for `path` in strict
/// `commitCount` order (`spec.md` §4.5). Bounded by `to_seq` when present;
/// otherwise keeps polling forever until the stream is dropped (client
/// disconnect).
pub fn watch(
    storage: Arc<Storage>,
    codec: Arc<dyn TreeCodec>,
    // Watch seeds from a raw snapshot lookup, never a folded reconstruction,
    // so the reconstruction cache has nothing to contribute here.
    _cache: Arc<ReconstructionCache>,
    path: VirtualPath,
    from_seq: Option<u64>,
    to_seq: Option<u64>,
    poll_interval: Duration,
) -> impl Stream<Item = Result<WatchEvent>> {
    try_stream! {
        let mut last_emitted = CommitCount::zero();

        if from_seq.unwrap_or(0) == 0 {
            // Seed from the nearest snapshot at or below the path's current
            // max commitCount (or Null@0 if none exists yet) -- never fold
            // diffs into the seed itself (`spec.md` §4.5 step 1).
            let max_commit = storage.list_diffs(&path)?.last().map(|(c, _)| *c).unwrap_or(CommitCount::zero());
            match storage.find_nearest_snapshot(&path, max_commit)? {
                Some(snapshot) => {
                    let state = codec.decode_str(&snapshot.state)?;
                    let commit_count = CommitCount(snapshot.commit_count);
                    yield WatchEvent::Seed {
                        commit_count,
                        timestamp: snapshot.timestamp,
                        state,
                        from_snapshot: true,
                    };
                    last_emitted = commit_count;
                }
                None => {
                    yield WatchEvent::Seed {
                        commit_count: CommitCount::zero(),
                        timestamp: 0,
                        state: Node::null(),
                        from_snapshot: false,
                    };
                }
            }
        } else {
            let from = CommitCount(from_seq.unwrap());
            if let Some(snapshot) = storage.find_nearest_snapshot(&path, from)? {
                if snapshot.commit_count == from.get() {
                    let state = codec.decode_str(&snapshot.state)?;
                    yield WatchEvent::Seed {
                        commit_count: from,
                        timestamp: snapshot.timestamp,
                        state,
                        from_snapshot: true,
                    };
                    last_emitted = from;
                } else {
                    last_emitted = CommitCount(from.get().saturating_sub(1));
                }
            } else {
                last_emitted = CommitCount(from.get().saturating_sub(1));
            }
        }

        // Historical replay and live polling share one loop, gated by the
        // same contiguous transaction-log watermark: a `.diff` file can be
        // renamed into place before its commitCount is logged, and emitting
        // it early would let a later commit overtake an earlier one that
        // hasn't landed yet (`spec.md` §8.7 / scenario S6). The first pass
        // runs immediately, without sleeping, to replay what's already safe
        // to emit before falling into polling for new commits.
        let mut next_expected = last_emitted.get() + 1;
        let mut stall: u32 = 0;
        let mut first_pass = true;

        loop {
            if first_pass {
                first_pass = false;
            } else {
                tokio::time::sleep(poll_interval).await;
            }

            let log = storage.read_transaction_log()?;
            let logged: std::collections::HashSet<u64> = log.iter().map(|e| e.commit_count).collect();

            let mut watermark = last_emitted.get();
            while logged.contains(&next_expected) {
                watermark = next_expected;
                next_expected += 1;
                stall = 0;
            }
            if watermark == last_emitted.get() {
                stall += 1;
                if stall >= STALL_LIMIT {
                    let max_allocated = storage.sequence().current().commit_count.get();
                    if max_allocated >= next_expected {
                        tracing::warn!(
                            commit_count = next_expected,
                            "watch watermark treating unlogged commit as permanently absent"
                        );
                        watermark = next_expected;
                        next_expected += 1;
                        stall = 0;
                    }
                }
            }

            for (commit_count, tx_seq) in storage.list_diffs(&path)? {
                if commit_count <= last_emitted || commit_count.get() > watermark {
                    continue;
                }
                if let Some(to) = to_seq {
                    if commit_count.get() > to {
                        return;
                    }
                }
                let record = storage.read_diff(&path, commit_count, tx_seq)?;
                let diff = codec.decode_str(&record.diff)?;
                yield WatchEvent::Diff { commit_count, timestamp: record.timestamp, diff };
                last_emitted = commit_count;
            }

            if let Some(to) = to_seq {
                if last_emitted.get() >= to {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use logd_core::{FieldKey, Tag};
    use logd_storage::TransactionLogEntryRecord;
    use logd_wire::JsonTreeCodec;

    fn p(s: &str) -> VirtualPath {
        VirtualPath::parse(s).unwrap()
    }

    fn write_insert(storage: &Storage, path: &VirtualPath, field: &str, value: i64, timestamp: i64) -> CommitCount {
        let codec = JsonTreeCodec;
        let diff = Node::object(vec![(
            FieldKey::Str(field.to_string()),
            Node::int(value).with_tag(Tag::single("!insert")),
        )]);
        let tx_seq = storage.sequence().next_tx_seq().unwrap();
        storage.write_diff_pending(path, tx_seq, timestamp, &codec.encode_string(&diff)).unwrap();
        let commit = storage.sequence().next_commit_count().unwrap();
        storage.rename_pending_to_diff(path, tx_seq, commit).unwrap();
        let entry = TransactionLogEntryRecord {
            commit_count: commit.get(),
            transaction_id: format!("tx-{}-1", tx_seq.get()),
            timestamp,
            writes: vec![logd_storage::TransactionWriteRecord { virtual_path: path.as_str().into(), tx_seq: tx_seq.get() }],
        };
        storage.append_transaction_log(&entry).unwrap();
        commit
    }

    #[tokio::test]
    async fn seed_then_bounded_diffs_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(Storage::open(dir.path()).unwrap());
        let codec: Arc<dyn TreeCodec> = Arc::new(JsonTreeCodec);
        let cache = Arc::new(ReconstructionCache::new(8));
        let path = p("/x");

        write_insert(&storage, &path, "a", 1, 1);
        let c2 = write_insert(&storage, &path, "b", 2, 2);

        let stream = watch(storage, codec, cache, path, None, Some(c2.get()), Duration::from_millis(10));
        tokio::pin!(stream);

        let seed = stream.next().await.unwrap().unwrap();
        assert!(matches!(seed, WatchEvent::Seed { commit_count, .. } if commit_count == CommitCount::zero()));

        let d1 = stream.next().await.unwrap().unwrap();
        assert_eq!(d1.commit_count(), CommitCount(1));
        let d2 = stream.next().await.unwrap().unwrap();
        assert_eq!(d2.commit_count(), CommitCount(2));
        assert!(stream.next().await.is_none(), "stream must close once to_seq is reached");
    }

    #[tokio::test]
    async fn live_phase_emits_newly_committed_diffs() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(Storage::open(dir.path()).unwrap());
        let codec: Arc<dyn TreeCodec> = Arc::new(JsonTreeCodec);
        let cache = Arc::new(ReconstructionCache::new(8));
        let path = p("/x");

        let stream = watch(storage.clone(), codec, cache, path.clone(), None, None, Duration::from_millis(10));
        tokio::pin!(stream);

        let seed = stream.next().await.unwrap().unwrap();
        assert!(matches!(seed, WatchEvent::Seed { .. }));

        let commit = write_insert(&storage, &path, "a", 1, 1);
        let emitted = stream.next().await.unwrap().unwrap();
        assert_eq!(emitted.commit_count(), commit);
    }
}

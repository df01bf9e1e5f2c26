use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use logd_core::{FieldKey, Node, Tag};
use logd_engine::{Engine, SnapshotPolicy, WatchEvent};
use logd_storage::{CommitCount, Storage, TransactionLogEntryRecord, TransactionWriteRecord, TxSeq, VirtualPath};
use logd_wire::{JsonTreeCodec, TreeCodec};

fn p(s: &str) -> VirtualPath {
    VirtualPath::parse(s).unwrap()
}

fn insert_diff(field: &str, value: i64) -> String {
    let codec = JsonTreeCodec;
    let diff = Node::object(vec![(
        FieldKey::Str(field.to_string()),
        Node::int(value).with_tag(Tag::single("!insert")),
    )]);
    codec.encode_string(&diff)
}

/// Writes a diff directly into its final `{commit}-{tx}.diff` location
/// without logging it, simulating a commit whose rename has completed but
/// whose transaction-log append has not landed yet.
fn write_unlogged_diff(storage: &Storage, path: &VirtualPath, tx_seq: TxSeq, commit: CommitCount, field: &str, value: i64) {
    storage.write_diff_pending(path, tx_seq, 0, &insert_diff(field, value)).unwrap();
    storage.rename_pending_to_diff(path, tx_seq, commit).unwrap();
}

fn log_entry(commit: CommitCount, tx_seq: TxSeq, path: &VirtualPath) -> TransactionLogEntryRecord {
    TransactionLogEntryRecord {
        commit_count: commit.get(),
        transaction_id: format!("tx-{}-1", tx_seq.get()),
        timestamp: 0,
        writes: vec![TransactionWriteRecord { virtual_path: path.as_str().into(), tx_seq: tx_seq.get() }],
    }
}

/// Mirrors `spec.md` S6: a higher `commitCount`'s diff file and log entry
/// can become visible before a lower one's, because nothing but the
/// transaction log serializes cross-transaction commit completion. The
/// watch engine must still emit strictly in `commitCount` order.
#[tokio::test]
async fn watch_withholds_later_commit_until_earlier_one_is_logged() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(Storage::open(dir.path()).unwrap());
    let codec: Arc<dyn TreeCodec> = Arc::new(JsonTreeCodec);
    let path = p("/proc/processes");

    // Reserve commit counts 1 and 2 up front, as two concurrent
    // transactions would.
    let tx_a = storage.sequence().next_tx_seq().unwrap();
    let commit_a = storage.sequence().next_commit_count().unwrap();
    let tx_b = storage.sequence().next_tx_seq().unwrap();
    let commit_b = storage.sequence().next_commit_count().unwrap();

    // Transaction B (commit_b, the higher count) finishes its rename and
    // log append first.
    write_unlogged_diff(&storage, &path, tx_b, commit_b, "b", 2);
    storage.append_transaction_log(&log_entry(commit_b, tx_b, &path)).unwrap();

    let engine = Engine::new(storage.clone(), codec, 8, SnapshotPolicy::disabled(), Duration::from_millis(15));
    let stream = engine.watch(path.clone(), None, Some(commit_b.get()));
    tokio::pin!(stream);

    let seed = stream.next().await.unwrap().unwrap();
    assert!(matches!(seed, WatchEvent::Seed { .. }));

    // The only safe thing to emit so far is nothing: commit_a has not been
    // logged yet, so commit_b cannot be delivered without risking a gap.
    let raced = tokio::time::timeout(Duration::from_millis(60), stream.next()).await;
    assert!(raced.is_err(), "watch must not emit commit_b before commit_a is logged");

    // Transaction A (commit_a, the lower count) finally finishes.
    write_unlogged_diff(&storage, &path, tx_a, commit_a, "a", 1);
    storage.append_transaction_log(&log_entry(commit_a, tx_a, &path)).unwrap();

    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first.commit_count(), commit_a, "commit_a must be emitted before commit_b");
    let second = stream.next().await.unwrap().unwrap();
    assert_eq!(second.commit_count(), commit_b);
    assert!(stream.next().await.is_none());
}

use serde::{Deserialize, Serialize};

/// On-disk JSON envelope for a single `{commitCount}-{txSeq}.diff` file
/// (`spec.md` §4.2). The diff body itself is kept as an opaque, already-wire-
/// encoded string: `logd-storage` never parses tree content, only bytes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiffFileRecord {
    pub path: String,
    pub timestamp: i64,
    pub diff: String,
}

/// On-disk JSON envelope for a `{commitCount}.snapshot` file (`spec.md`
/// §4.4). `state` is the wire-encoded reconstructed tree at `commit_count`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SnapshotFileRecord {
    pub commit_count: u64,
    pub timestamp: i64,
    pub state: String,
}

/// One line of the append-only `meta/transactions.log` (`spec.md` §4.3/§5):
/// records which virtual paths were written at a given commit, and the
/// txSeq of the diff file backing each write, so recovery and the watch
/// engine can find diffs by commit without scanning every path directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransactionLogEntryRecord {
    pub commit_count: u64,
    pub transaction_id: String,
    pub timestamp: i64,
    pub writes: Vec<TransactionWriteRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransactionWriteRecord {
    pub virtual_path: String,
    pub tx_seq: u64,
}

/// Persisted transaction state (`spec.md` §5), written before a participant
/// is allowed to block on commit and consulted during startup recovery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransactionStateRecord {
    pub transaction_id: String,
    pub participant_count: u32,
    pub participants_received: u32,
    pub status: TransactionStatus,
    pub created_at: i64,
    pub entries: Vec<TxEntryRecord>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Committed,
    Aborted,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TxEntryRecord {
    pub virtual_path: String,
    pub pending_file: String,
    pub written_at: i64,
}

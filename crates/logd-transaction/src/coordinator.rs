use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use logd_storage::{CommitCount, Storage, TransactionStateRecord, TransactionStatus, TxEntryRecord, VirtualPath};

use crate::error::{Error, Result};
use crate::id::TransactionId;
use crate::waiter::{ArrivedWrite, TransactionOutcome, Waiter};

/// Owns the in-memory `transactionId -> Waiter` map (`spec.md` §4.4) and
/// drives the commit procedure. Cheap to clone: everything mutable lives
/// behind `Arc`.
#[derive(Clone)]
pub struct Coordinator {
    storage: Arc<Storage>,
    waiters: Arc<DashMap<TransactionId, Arc<Waiter>>>,
}

impl Coordinator {
    pub fn new(storage: Arc<Storage>) -> Self {
        Coordinator { storage, waiters: Arc::new(DashMap::new()) }
    }

    /// `Create(participantCount)`. `deadline`, if given, is measured from
    /// this call (the Open Question in `spec.md` §9 is resolved this way,
    /// recorded in DESIGN.md) and aborts the transaction in the background
    /// if it is still pending when the deadline elapses.
    pub fn create(&self, participant_count: u32, deadline: Option<Duration>, now: i64) -> Result<TransactionId> {
        let tx_seq = self.storage.sequence().next_tx_seq()?;
        let id = TransactionId::new(tx_seq, participant_count);

        let record = TransactionStateRecord {
            transaction_id: id.to_string(),
            participant_count,
            participants_received: 0,
            status: TransactionStatus::Pending,
            created_at: now,
            entries: Vec::new(),
        };
        self.storage.write_transaction_state(&record)?;

        let waiter = Arc::new(Waiter::new(participant_count));
        self.waiters.insert(id.clone(), waiter.clone());
        tracing::info!(transaction_id = %id, participant_count, "transaction created");

        if let Some(deadline) = deadline {
            let storage = self.storage.clone();
            let id = id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(deadline).await;
                if waiter.result().is_none() && waiter.set_result(TransactionOutcome::DeadlineExceeded) {
                    tracing::warn!(transaction_id = %id, "transaction deadline exceeded");
                    if let Err(err) = abort_persisted(&storage, &id) {
                        tracing::error!(transaction_id = %id, %err, "failed to clean up pending files after deadline abort");
                    }
                }
            });
        }

        Ok(id)
    }

    /// `Join(transactionId, virtualPath, patch, timestamp)`.
    pub async fn join(
        &self,
        id: &TransactionId,
        path: VirtualPath,
        diff_body: &str,
        timestamp: i64,
    ) -> Result<CommitCount> {
        let waiter = self
            .waiters
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::TransactionNotFound(id.to_string()))?;

        let tx_seq = self.storage.sequence().next_tx_seq()?;
        self.storage.write_diff_pending(&path, tx_seq, timestamp, diff_body)?;

        let entry = TxEntryRecord {
            virtual_path: path.as_str().to_string(),
            pending_file: format!("{tx_seq}.pending"),
            written_at: timestamp,
        };
        let write = ArrivedWrite { virtual_path: path.clone(), tx_seq };

        let outcome = match waiter.arrive_and_persist(&self.storage, id.as_str(), write, entry) {
            Ok(outcome) => outcome,
            Err(err) => {
                let _ = self.storage.remove_pending(&path, tx_seq);
                return Err(err);
            }
        };

        if outcome.is_last {
            match self.commit(id, outcome.arrived, timestamp) {
                Ok(commit_count) => {
                    waiter.set_result(TransactionOutcome::Committed { commit_count });
                    Ok(commit_count)
                }
                Err(err) => {
                    waiter.set_result(TransactionOutcome::Aborted { reason: err.to_string() });
                    let _ = abort_persisted(&self.storage, id);
                    Err(err)
                }
            }
        } else {
            match waiter.wait_for_completion().await {
                TransactionOutcome::Committed { commit_count } => Ok(commit_count),
                TransactionOutcome::Aborted { .. } => Err(Error::TransactionAborted(id.to_string())),
                TransactionOutcome::DeadlineExceeded => Err(Error::DeadlineExceeded(id.to_string())),
            }
        }
    }

    /// Writes a single diff directly, allocating exactly one `txSeq` and one
    /// `commitCount`, without routing through `create`/`join`'s multi-
    /// participant rendezvous (`spec.md` §4.3: "otherwise allocates both ...
    /// directly (for implicit single-write transactions)"). Used when a
    /// `PATCH` carries no `meta.tx-id`.
    pub fn write_single(&self, path: VirtualPath, diff_body: &str, timestamp: i64) -> Result<CommitCount> {
        let tx_seq = self.storage.sequence().next_tx_seq()?;
        self.storage.write_diff_pending(&path, tx_seq, timestamp, diff_body)?;

        let commit_count = self.storage.sequence().next_commit_count()?;
        if let Err(err) = self.storage.rename_pending_to_diff(&path, tx_seq, commit_count) {
            let _ = self.storage.remove_pending(&path, tx_seq);
            return Err(err.into());
        }

        let id = TransactionId::new(tx_seq, 1);
        let log_entry = logd_storage::TransactionLogEntryRecord {
            commit_count: commit_count.get(),
            transaction_id: id.to_string(),
            timestamp,
            writes: vec![logd_storage::TransactionWriteRecord { virtual_path: path.as_str().to_string(), tx_seq: tx_seq.get() }],
        };
        self.storage.append_transaction_log(&log_entry)?;

        tracing::info!(transaction_id = %id, commit_count = commit_count.get(), "single write committed");
        Ok(commit_count)
    }

    /// The commit procedure of `spec.md` §4.4: allocate `commitCount`,
    /// rename every participant's pending file into place in
    /// lexicographic-by-path order (unwinding on failure), append the
    /// transaction-log entry, and mark the persisted state `committed`.
    fn commit(&self, id: &TransactionId, mut arrived: Vec<ArrivedWrite>, timestamp: i64) -> Result<CommitCount> {
        arrived.sort_by(|a, b| a.virtual_path.as_str().cmp(b.virtual_path.as_str()));
        let commit_count = self.storage.sequence().next_commit_count()?;

        let mut renamed = Vec::with_capacity(arrived.len());
        for write in &arrived {
            match self.storage.rename_pending_to_diff(&write.virtual_path, write.tx_seq, commit_count) {
                Ok(()) => renamed.push(write),
                Err(err) => {
                    for done in renamed.into_iter().rev() {
                        if let Err(unwind_err) =
                            self.storage.rename_diff_to_pending(&done.virtual_path, commit_count, done.tx_seq)
                        {
                            tracing::error!(transaction_id = %id, %unwind_err, "failed to unwind partial commit rename");
                        }
                    }
                    return Err(err.into());
                }
            }
        }

        let log_entry = logd_storage::TransactionLogEntryRecord {
            commit_count: commit_count.get(),
            transaction_id: id.to_string(),
            timestamp,
            writes: arrived
                .iter()
                .map(|w| logd_storage::TransactionWriteRecord {
                    virtual_path: w.virtual_path.as_str().to_string(),
                    tx_seq: w.tx_seq.get(),
                })
                .collect(),
        };
        self.storage.append_transaction_log(&log_entry)?;

        if let Ok(mut record) = self.storage.read_transaction_state(id.as_str()) {
            record.status = TransactionStatus::Committed;
            let _ = self.storage.write_transaction_state(&record);
        }

        tracing::info!(transaction_id = %id, commit_count = commit_count.get(), "transaction committed");
        Ok(commit_count)
    }

    /// `Abort(transactionId)`.
    pub fn abort(&self, id: &TransactionId) -> Result<()> {
        let waiter = self.waiters.get(id).map(|e| e.value().clone()).ok_or_else(|| Error::TransactionNotFound(id.to_string()))?;
        if matches!(waiter.result(), Some(TransactionOutcome::Committed { .. })) {
            return Err(Error::InvalidTransactionState(id.to_string()));
        }
        waiter.set_result(TransactionOutcome::Aborted { reason: "aborted".to_string() });
        abort_persisted(&self.storage, id)?;
        tracing::info!(transaction_id = %id, "transaction aborted");
        Ok(())
    }

    /// `Status(transactionId) -> state`.
    pub fn status(&self, id: &TransactionId) -> Result<TransactionStateRecord> {
        match self.storage.read_transaction_state(id.as_str()) {
            Ok(record) => Ok(record),
            Err(logd_storage::Error::TransactionStateNotFound(_)) => Err(Error::TransactionNotFound(id.to_string())),
            Err(err) => Err(err.into()),
        }
    }

    /// `Watch(transactionId)`: the current state, then the terminal state
    /// once the transaction resolves. `logd-engine`/`bin/logd-server` frame
    /// these as wire documents; this yields the raw records.
    pub async fn watch(&self, id: &TransactionId) -> Result<Vec<TransactionStateRecord>> {
        let seed = self.status(id)?;
        if seed.status != TransactionStatus::Pending {
            return Ok(vec![seed]);
        }
        let waiter = self.waiters.get(id).map(|e| e.value().clone()).ok_or_else(|| Error::TransactionNotFound(id.to_string()))?;
        waiter.wait_for_completion().await;
        let final_state = self.status(id)?;
        Ok(vec![seed, final_state])
    }
}

fn abort_persisted(storage: &Storage, id: &TransactionId) -> Result<()> {
    match storage.read_transaction_state(id.as_str()) {
        Ok(mut record) => {
            for entry in &record.entries {
                if let Ok(path) = VirtualPath::parse(&entry.virtual_path) {
                    let tx_seq = entry
                        .pending_file
                        .strip_suffix(".pending")
                        .and_then(|s| s.parse().ok())
                        .map(logd_storage::TxSeq)
                        .unwrap_or(logd_storage::TxSeq(0));
                    storage.remove_pending(&path, tx_seq)?;
                }
            }
            record.status = TransactionStatus::Aborted;
            storage.write_transaction_state(&record)?;
            Ok(())
        }
        Err(logd_storage::Error::TransactionStateNotFound(_)) => Ok(()),
        Err(err) => Err(err.into()),
    }
}

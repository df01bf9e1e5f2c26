use parking_lot::Mutex;
use tokio::sync::Notify;

use logd_storage::{CommitCount, Storage, TxEntryRecord, TxSeq, VirtualPath};

use crate::error::{Error, Result};

/// One write that has arrived at a transaction's rendezvous, carrying
/// everything the commit procedure needs (`spec.md` §4.4).
#[derive(Debug, Clone)]
pub struct ArrivedWrite {
    pub virtual_path: VirtualPath,
    pub tx_seq: TxSeq,
}

#[derive(Debug, Clone)]
pub enum TransactionOutcome {
    Committed { commit_count: CommitCount },
    Aborted { reason: String },
    DeadlineExceeded,
}

pub struct ArriveOutcome {
    pub is_last: bool,
    pub arrived: Vec<ArrivedWrite>,
}

struct WaiterState {
    arrived: Vec<ArrivedWrite>,
    result: Option<TransactionOutcome>,
}

/// The rendezvous of N participants in one transaction (`spec.md` §9's
/// redesign flag: a typed `Barrier` with `Register`, `ArriveAndMaybeCommit`,
/// `SetResult`, `WaitForCompletion`). `state` is a `parking_lot::Mutex`
/// guarding only this waiter's bookkeeping -- the coordinator never holds
/// its transaction-map lock while a caller is parked on `notify`.
pub struct Waiter {
    participant_count: u32,
    state: Mutex<WaiterState>,
    notify: Notify,
}

impl Waiter {
    pub fn new(participant_count: u32) -> Self {
        Waiter {
            participant_count,
            state: Mutex::new(WaiterState { arrived: Vec::new(), result: None }),
            notify: Notify::new(),
        }
    }

    /// `Register` + `ArriveAndMaybeCommit`, fused: validates this write
    /// against the waiter's state and the persisted transaction state
    /// under the same lock, so two concurrent joiners can never both
    /// believe they are the last arrival.
    pub fn arrive_and_persist(
        &self,
        storage: &Storage,
        transaction_id: &str,
        write: ArrivedWrite,
        entry: TxEntryRecord,
    ) -> Result<ArriveOutcome> {
        let mut guard = self.state.lock();
        match &guard.result {
            Some(TransactionOutcome::Aborted { .. }) => {
                return Err(Error::TransactionAborted(transaction_id.to_string()))
            }
            Some(TransactionOutcome::DeadlineExceeded) => {
                return Err(Error::DeadlineExceeded(transaction_id.to_string()))
            }
            Some(TransactionOutcome::Committed { .. }) => {
                return Err(Error::InvalidTransactionState(transaction_id.to_string()))
            }
            None => {}
        }
        if guard.arrived.len() as u32 >= self.participant_count {
            return Err(Error::TransactionFull(transaction_id.to_string(), self.participant_count));
        }

        let mut record = storage.read_transaction_state(transaction_id)?;
        record.participants_received += 1;
        record.entries.push(entry);
        storage.write_transaction_state(&record)?;

        guard.arrived.push(write);
        let is_last = guard.arrived.len() as u32 == self.participant_count;
        let arrived = if is_last { guard.arrived.clone() } else { Vec::new() };
        Ok(ArriveOutcome { is_last, arrived })
    }

    pub fn arrived_snapshot(&self) -> Vec<ArrivedWrite> {
        self.state.lock().arrived.clone()
    }

    /// `SetResult`: publishes the outcome and wakes every blocked
    /// participant. A no-op if the outcome is already set (abort racing a
    /// just-completed commit, or a repeated abort).
    pub fn set_result(&self, outcome: TransactionOutcome) -> bool {
        let mut guard = self.state.lock();
        if guard.result.is_some() {
            return false;
        }
        guard.result = Some(outcome);
        drop(guard);
        self.notify.notify_waiters();
        true
    }

    pub fn result(&self) -> Option<TransactionOutcome> {
        self.state.lock().result.clone()
    }

    /// `WaitForCompletion`. Safe against the classic notify-before-wait
    /// race: the `Notified` future is created before the result check, so
    /// a `set_result` that lands between the check and the `.await` is
    /// never missed.
    pub async fn wait_for_completion(&self) -> TransactionOutcome {
        loop {
            let notified = self.notify.notified();
            if let Some(result) = self.state.lock().result.clone() {
                return result;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn second_arrival_completes_and_wakes_first() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        let waiter = Arc::new(Waiter::new(2));

        let record = logd_storage::TransactionStateRecord {
            transaction_id: "tx-1-2".into(),
            participant_count: 2,
            participants_received: 0,
            status: logd_storage::TransactionStatus::Pending,
            created_at: 0,
            entries: vec![],
        };
        storage.write_transaction_state(&record).unwrap();

        let w1 = waiter.clone();
        let first = tokio::spawn(async move {
            let outcome = w1.wait_for_completion().await;
            matches!(outcome, TransactionOutcome::Committed { commit_count } if commit_count.get() == 9)
        });

        let write = ArrivedWrite { virtual_path: VirtualPath::parse("/a").unwrap(), tx_seq: TxSeq(1) };
        let entry = TxEntryRecord { virtual_path: "/a".into(), pending_file: "1.pending".into(), written_at: 0 };
        let outcome = waiter.arrive_and_persist(&storage, "tx-1-2", write, entry).unwrap();
        assert!(!outcome.is_last);

        let write2 = ArrivedWrite { virtual_path: VirtualPath::parse("/b").unwrap(), tx_seq: TxSeq(2) };
        let entry2 = TxEntryRecord { virtual_path: "/b".into(), pending_file: "2.pending".into(), written_at: 0 };
        let outcome2 = waiter.arrive_and_persist(&storage, "tx-1-2", write2, entry2).unwrap();
        assert!(outcome2.is_last);
        assert_eq!(outcome2.arrived.len(), 2);

        waiter.set_result(TransactionOutcome::Committed { commit_count: CommitCount(9) });
        assert!(first.await.unwrap());
    }

    #[test]
    fn third_arrival_rejected_as_full() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        let waiter = Waiter::new(1);
        let record = logd_storage::TransactionStateRecord {
            transaction_id: "tx-1-1".into(),
            participant_count: 1,
            participants_received: 0,
            status: logd_storage::TransactionStatus::Pending,
            created_at: 0,
            entries: vec![],
        };
        storage.write_transaction_state(&record).unwrap();
        let write = ArrivedWrite { virtual_path: VirtualPath::parse("/a").unwrap(), tx_seq: TxSeq(1) };
        let entry = TxEntryRecord { virtual_path: "/a".into(), pending_file: "1.pending".into(), written_at: 0 };
        waiter.arrive_and_persist(&storage, "tx-1-1", write.clone(), entry.clone()).unwrap();
        let err = waiter.arrive_and_persist(&storage, "tx-1-1", write, entry).unwrap_err();
        assert!(matches!(err, Error::TransactionFull(_, 1)));
    }
}

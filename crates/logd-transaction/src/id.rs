use std::fmt;

use logd_storage::TxSeq;

/// `tx-<txSeq>-<participantCount>` (`spec.md` §4.4's `Create`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(String);

impl TransactionId {
    pub fn new(tx_seq: TxSeq, participant_count: u32) -> Self {
        TransactionId(format!("tx-{}-{participant_count}", tx_seq.get()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn from_raw(raw: impl Into<String>) -> Self {
        TransactionId(raw.into())
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

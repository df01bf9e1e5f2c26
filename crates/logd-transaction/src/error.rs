#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("transaction {0} not found")]
    TransactionNotFound(String),

    #[error("transaction {0} already has all {1} participants")]
    TransactionFull(String, u32),

    #[error("transaction {0} was aborted")]
    TransactionAborted(String),

    #[error("transaction {0} is not in a joinable state")]
    InvalidTransactionState(String),

    #[error("transaction {0} deadline exceeded before all participants arrived")]
    DeadlineExceeded(String),

    #[error(transparent)]
    Storage(#[from] logd_storage::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid virtual path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("storage I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt record at {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("transaction log entry for commit {0} not found")]
    LogEntryNotFound(u64),

    #[error("transaction state {0} not found")]
    TransactionStateNotFound(String),
}

pub type Result<T> = std::result::Result<T, Error>;

pub(crate) trait IoContext<T> {
    fn ctx(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn ctx(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|source| Error::Io { path: path.into(), source })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("malformed wire document: {0}")]
    Malformed(String),

    #[error(transparent)]
    Core(#[from] logd_core::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

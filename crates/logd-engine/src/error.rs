#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no diff {commit_count} for path {path} (or a prior diff on the same path)")]
    DiffMissing { path: String, commit_count: u64 },

    #[error("failed to reconstruct {path} at commit {commit_count}: {source}")]
    PatchFailed { path: String, commit_count: u64, #[source] source: logd_core::Error },

    #[error(transparent)]
    Storage(#[from] logd_storage::Error),

    #[error(transparent)]
    Wire(#[from] logd_wire::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

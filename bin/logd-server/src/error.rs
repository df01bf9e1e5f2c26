use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// The error kinds `spec.md` §7 names, composed from every lower crate's
/// error type into the one the HTTP boundary renders (`spec.md` §6: "body
/// is a tree document with an `error` field carrying `code` and
/// `message`"). `500` is reserved for faults that are not representable as
/// an application error (`spec.md` §7).
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("invalid diff: {0}")]
    InvalidDiff(String),

    #[error("transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("transaction full: {0}")]
    TransactionFull(String),

    #[error("transaction aborted: {0}")]
    TransactionAborted(String),

    #[error("invalid transaction state: {0}")]
    InvalidTransactionState(String),

    #[error("patch conflict: {0}")]
    PatchConflict(String),

    #[error("storage error: {0}")]
    StorageError(String),

    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidPath(_) => "InvalidPath",
            ApiError::InvalidDiff(_) => "InvalidDiff",
            ApiError::TransactionNotFound(_) => "TransactionNotFound",
            ApiError::TransactionFull(_) => "TransactionFull",
            ApiError::TransactionAborted(_) => "TransactionAborted",
            ApiError::InvalidTransactionState(_) => "InvalidTransactionState",
            ApiError::PatchConflict(_) => "PatchConflict",
            ApiError::StorageError(_) => "StorageError",
            ApiError::DeadlineExceeded(_) => "DeadlineExceeded",
            ApiError::Internal(_) => "Internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: ErrorField<'a>,
}

#[derive(Serialize)]
struct ErrorField<'a> {
    code: &'a str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "internal error");
        } else {
            tracing::debug!(error = %self, "application error");
        }
        let body = ErrorBody { error: ErrorField { code: self.code(), message: self.to_string() } };
        (status, axum::Json(body)).into_response()
    }
}

impl From<logd_core::Error> for ApiError {
    fn from(err: logd_core::Error) -> Self {
        match err {
            logd_core::Error::PatchConflict { .. } => ApiError::PatchConflict(err.to_string()),
            other => ApiError::InvalidDiff(other.to_string()),
        }
    }
}

impl From<logd_storage::Error> for ApiError {
    fn from(err: logd_storage::Error) -> Self {
        match err {
            logd_storage::Error::InvalidPath { .. } => ApiError::InvalidPath(err.to_string()),
            other => ApiError::StorageError(other.to_string()),
        }
    }
}

impl From<logd_transaction::Error> for ApiError {
    fn from(err: logd_transaction::Error) -> Self {
        match err {
            logd_transaction::Error::TransactionNotFound(id) => ApiError::TransactionNotFound(id),
            logd_transaction::Error::TransactionFull(id, n) => ApiError::TransactionFull(format!("{id} ({n})")),
            logd_transaction::Error::TransactionAborted(id) => ApiError::TransactionAborted(id),
            logd_transaction::Error::InvalidTransactionState(id) => ApiError::InvalidTransactionState(id),
            logd_transaction::Error::DeadlineExceeded(id) => ApiError::DeadlineExceeded(id),
            logd_transaction::Error::Storage(e) => e.into(),
        }
    }
}

impl From<logd_engine::Error> for ApiError {
    fn from(err: logd_engine::Error) -> Self {
        match err {
            logd_engine::Error::Storage(e) => e.into(),
            logd_engine::Error::PatchFailed { source, .. } => source.into(),
            other => ApiError::StorageError(other.to_string()),
        }
    }
}

impl From<logd_wire::Error> for ApiError {
    fn from(err: logd_wire::Error) -> Self {
        ApiError::InvalidDiff(err.to_string())
    }
}

use thiserror::Error;

/// Failures reported by a [`Backend`](crate::Backend) implementation.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Credentials rejected or session missing/expired. The message is meant
    /// to be shown to the user as is.
    #[error("{0}")]
    Unauthorized(String),
    /// A unique constraint rejected the write.
    #[error("duplicate row: {0}")]
    Conflict(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("backend returned {status}: {message}")]
    Http { status: u16, message: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("backend not configured")]
    NotConfigured,
    /// Input rejected before it reached the backend.
    #[error("{0}")]
    Validation(String),
}

impl BackendError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, BackendError::Conflict(_))
    }
}

pub type Result<T, E = BackendError> = std::result::Result<T, E>;

use thiserror::Error;

/// Errors surfaced by the tracker core.
///
/// Lookups are always scoped to the requesting user, so a record owned by
/// someone else is reported as `NotFound` rather than leaking its existence.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("unauthorized: user id missing")]
    Unauthorized,

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TrackerError {
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        TrackerError::Validation(msg.into())
    }

    pub fn not_found<S: Into<String>>(what: S) -> Self {
        TrackerError::NotFound(what.into())
    }
}

pub type Result<T> = std::result::Result<T, TrackerError>;

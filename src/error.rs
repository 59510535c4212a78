use thiserror::Error;

use crate::storage::StorageError;

/// Failures surfaced by metric recording and stats aggregation.
///
/// Missing or expired sessions are never errors; the tracker reports them as
/// `false`, `0` or an empty list.
#[derive(Debug, Error)]
pub enum TrackingError {
    /// Malformed or incomplete event
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Unknown website or notification
    #[error("not found: {0}")]
    NotFound(String),

    /// The storage collaborator failed. Not retried here.
    #[error("store unavailable: {0}")]
    TransientStore(#[from] anyhow::Error),
}

impl From<StorageError> for TrackingError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Conflict => {
                TrackingError::InvalidInput("record already exists".to_string())
            }
            StorageError::Other(inner) => TrackingError::TransientStore(inner),
        }
    }
}

pub type TrackingResult<T> = Result<T, TrackingError>;

//! Error kinds surfaced by the directory engine.

use crate::store::StoreError;

/// Failure of a directory operation.
///
/// `Storage` is kept apart from `NotFound` all the way to the HTTP boundary:
/// a failed lookup never counts as a missing record.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DirectoryError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Storage(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, DirectoryError>;

impl DirectoryError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }
}

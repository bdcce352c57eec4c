//! Error types for core stores.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in a core store.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The store is unreachable; the operation may succeed later.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The backend rejected the operation.
    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Creates an unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    /// Creates a backend error.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }

    /// Returns true if retrying the operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

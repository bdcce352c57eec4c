//! Error types for the sync engine.

use emocore_model::CoreId;
use emocore_store::StoreError;
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Classification of an engine error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A read from the store failed.
    DataLoadFailure,
    /// Offline queue replay failed.
    SyncFailure,
    /// A navigation request referenced an unknown core.
    NavigationError,
    /// An analysis result could not be applied.
    AnalysisError,
    /// A write was rejected or could not be persisted.
    PersistenceError,
}

/// Errors that can occur in engine operations.
///
/// Errors are `Clone` because the most recent one is retained as engine
/// state until cleared or superseded (see
/// [`CoreSyncEngine::last_error`](crate::CoreSyncEngine::last_error)).
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// A read from the store failed.
    #[error("data load failure: {message}")]
    DataLoadFailure {
        /// Error message.
        message: String,
        /// Whether cached data can still be served.
        recoverable: bool,
    },

    /// Offline queue replay failed.
    #[error("sync failure: {message}")]
    SyncFailure {
        /// Error message.
        message: String,
        /// Whether another drain attempt may succeed.
        recoverable: bool,
        /// The core whose replay failed, if known.
        core_id: Option<CoreId>,
    },

    /// A navigation request referenced an unknown core.
    #[error("navigation error: {message}")]
    NavigationError {
        /// Error message.
        message: String,
        /// The core id that was requested, if any.
        core_id: Option<CoreId>,
    },

    /// An analysis result could not be applied.
    #[error("analysis error: {message}")]
    AnalysisError {
        /// Error message.
        message: String,
    },

    /// A write was rejected or could not be persisted.
    #[error("persistence error: {message}")]
    PersistenceError {
        /// Error message.
        message: String,
        /// Whether retrying the write may succeed.
        recoverable: bool,
        /// The core the write targeted, if known.
        core_id: Option<CoreId>,
    },
}

impl EngineError {
    /// Creates a recoverable data load failure.
    pub fn data_load(message: impl Into<String>) -> Self {
        Self::DataLoadFailure {
            message: message.into(),
            recoverable: true,
        }
    }

    /// Creates a navigation error for an unknown core id.
    pub fn unknown_core(id: &CoreId) -> Self {
        Self::NavigationError {
            message: format!("unknown core: {id}"),
            core_id: Some(id.clone()),
        }
    }

    /// Creates a validation rejection for an out-of-range level.
    pub fn level_out_of_range(id: &CoreId, level: f64) -> Self {
        Self::PersistenceError {
            message: format!("level {level} out of range [0.0, 1.0] for core {id}"),
            recoverable: false,
            core_id: Some(id.clone()),
        }
    }

    /// Classifies the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::DataLoadFailure { .. } => ErrorKind::DataLoadFailure,
            EngineError::SyncFailure { .. } => ErrorKind::SyncFailure,
            EngineError::NavigationError { .. } => ErrorKind::NavigationError,
            EngineError::AnalysisError { .. } => ErrorKind::AnalysisError,
            EngineError::PersistenceError { .. } => ErrorKind::PersistenceError,
        }
    }

    /// Returns true if the engine can keep serving last-known-good data
    /// and a retry or recovery action may clear the condition.
    pub fn is_recoverable(&self) -> bool {
        match self {
            EngineError::DataLoadFailure { recoverable, .. } => *recoverable,
            EngineError::SyncFailure { recoverable, .. } => *recoverable,
            EngineError::NavigationError { .. } => true,
            EngineError::AnalysisError { .. } => true,
            EngineError::PersistenceError { recoverable, .. } => *recoverable,
        }
    }

    /// Returns the core the error concerns, if known.
    pub fn core_id(&self) -> Option<&CoreId> {
        match self {
            EngineError::SyncFailure { core_id, .. }
            | EngineError::NavigationError { core_id, .. }
            | EngineError::PersistenceError { core_id, .. } => core_id.as_ref(),
            _ => None,
        }
    }

    /// Converts a store read failure into a data load failure.
    pub(crate) fn from_store_read(err: StoreError) -> Self {
        Self::DataLoadFailure {
            message: err.to_string(),
            recoverable: err.is_transient(),
        }
    }

    /// Converts a store write failure into a persistence error.
    pub(crate) fn from_store_write(err: StoreError, id: &CoreId) -> Self {
        Self::PersistenceError {
            message: err.to_string(),
            recoverable: err.is_transient(),
            core_id: Some(id.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_and_recoverability() {
        let load = EngineError::data_load("store down");
        assert_eq!(load.kind(), ErrorKind::DataLoadFailure);
        assert!(load.is_recoverable());

        let rejected = EngineError::level_out_of_range(&"optimism".into(), 1.5);
        assert_eq!(rejected.kind(), ErrorKind::PersistenceError);
        assert!(!rejected.is_recoverable());
        assert_eq!(rejected.core_id().unwrap().as_str(), "optimism");

        let nav = EngineError::unknown_core(&"mystery".into());
        assert_eq!(nav.kind(), ErrorKind::NavigationError);
        assert!(nav.is_recoverable());
    }

    #[test]
    fn store_error_conversion() {
        let transient = EngineError::from_store_read(StoreError::unavailable("timeout"));
        assert!(transient.is_recoverable());

        let fatal = EngineError::from_store_write(
            StoreError::backend("constraint"),
            &"resilience".into(),
        );
        assert!(!fatal.is_recoverable());
        assert_eq!(fatal.kind(), ErrorKind::PersistenceError);
    }

    #[test]
    fn error_display() {
        let err = EngineError::level_out_of_range(&"optimism".into(), 2.0);
        assert!(err.to_string().contains("out of range"));
        assert!(err.to_string().contains("optimism"));
    }
}

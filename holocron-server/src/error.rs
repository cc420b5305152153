//! Error taxonomy surfaced by the engine.
//!
//! Everything below the store speaks its own error type; callers of
//! `LifecycleStore::process_event` and the command dispatcher only ever see
//! `EngineError`.

use std::time::Duration;

use thiserror::Error;

use holocron_core::{LifecycleError, NominationId};

use crate::state_machine::repository::RepositoryError;

/// Failure talking to the wiki, chat or social platform.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollaboratorError {
    #[error("{operation} timed out")]
    Timeout { operation: String },

    #[error("{operation} failed: {message}")]
    Http {
        operation: String,
        status: Option<u16>,
        message: String,
    },

    #[error("{operation} rate limited")]
    RateLimited {
        operation: String,
        retry_after: Option<Duration>,
    },

    #[error("{operation} rejected our credentials: {message}")]
    Auth { operation: String, message: String },

    #[error("{what} not found")]
    NotFound { what: String },
}

impl CollaboratorError {
    pub fn http(operation: impl Into<String>, status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Http {
            operation: operation.into(),
            status,
            message: message.into(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Whether trying the same call again later can succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::RateLimited { .. } => true,
            Self::Http { status, .. } => status.map_or(true, |s| s >= 500 || s == 408),
            Self::Auth { .. } | Self::NotFound { .. } => false,
        }
    }

    /// Earliest time the platform asked us to come back, if it said.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("{0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("{requested} cannot start while {existing} is still open")]
    DuplicateActiveNomination {
        existing: NominationId,
        requested: NominationId,
    },

    #[error("transient failure: {0}")]
    TransientIo(String),

    #[error("data corruption: {0}")]
    DataCorruption(String),
}

impl EngineError {
    /// Short machine-readable name, used in acknowledgments and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Conflict(_) => "conflict",
            Self::DuplicateActiveNomination { .. } => "duplicate_active_nomination",
            Self::TransientIo(_) => "transient_io",
            Self::DataCorruption(_) => "data_corruption",
        }
    }
}

impl From<LifecycleError> for EngineError {
    fn from(e: LifecycleError) -> Self {
        match e {
            LifecycleError::Validation(msg) => Self::Validation(msg),
            LifecycleError::Conflict(msg) => Self::Conflict(msg),
            LifecycleError::DuplicateActiveNomination {
                existing,
                requested,
            } => Self::DuplicateActiveNomination {
                existing,
                requested,
            },
            LifecycleError::EditFailed(msg) => Self::TransientIo(msg),
        }
    }
}

impl From<RepositoryError> for EngineError {
    fn from(e: RepositoryError) -> Self {
        match e {
            RepositoryError::Storage { .. } => Self::TransientIo(e.to_string()),
            RepositoryError::Corruption { .. } => Self::DataCorruption(e.to_string()),
        }
    }
}

impl From<CollaboratorError> for EngineError {
    fn from(e: CollaboratorError) -> Self {
        match e {
            CollaboratorError::NotFound { .. } => Self::Validation(e.to_string()),
            other => Self::TransientIo(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryability() {
        assert!(CollaboratorError::Timeout {
            operation: "edit".into()
        }
        .is_retryable());
        assert!(CollaboratorError::http("edit", Some(502), "bad gateway").is_retryable());
        assert!(!CollaboratorError::http("edit", Some(400), "bad request").is_retryable());
        assert!(!CollaboratorError::not_found("page").is_retryable());
    }

    #[test]
    fn test_lifecycle_errors_map_onto_taxonomy() {
        let e: EngineError = LifecycleError::EditFailed("wiki down".into()).into();
        assert_eq!(e.kind(), "transient_io");
        let e: EngineError = RepositoryError::corruption("record").into();
        assert_eq!(e.kind(), "data_corruption");
        let e: EngineError = CollaboratorError::not_found("Yoda").into();
        assert!(matches!(e, EngineError::Validation(_)));
    }
}

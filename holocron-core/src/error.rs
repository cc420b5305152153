//! Errors a lifecycle transition can reject an event with.

use thiserror::Error;

use crate::nomination::NominationId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    /// The request is well formed but the record or page does not allow it.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The record already reached a different terminal outcome.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("{existing} is still open; cannot start {requested}")]
    DuplicateActiveNomination {
        existing: NominationId,
        requested: NominationId,
    },

    /// A wiki edit failed part-way through a transition.
    #[error("wiki edit failed: {0}")]
    EditFailed(String),
}

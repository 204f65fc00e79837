//! Engine error taxonomy.
//!
//! Errors are classified by how callers must react:
//! - Validation: rejected synchronously, nothing was applied
//! - Upstream: a collaborator (store, task sink, date extraction) failed;
//!   the failure surfaces unchanged; the engine never substitutes a
//!   default classification for it
//!
//! A commitment whose underlying violation has cleared is not an error at
//! all: it is "nothing to show" and the aggregator simply omits it. Nothing
//! here is retried internally; retry policy belongs to the caller.

use thiserror::Error;

use crate::db::DbError;

#[derive(Debug, Error)]
pub enum TriageError {
    // Validation errors
    #[error("commitment date must be {min}-{max} days out, got {got}")]
    CommitmentDateOutOfRange { min: i64, max: i64, got: i64 },

    #[error("no open commitment for record {0}")]
    NoOpenCommitment(String),

    // Upstream failures
    #[error("record store error: {0}")]
    Store(#[from] DbError),

    #[error("task sink error: {0}")]
    TaskSink(String),

    #[error("date extraction failed: {0}")]
    DateExtraction(String),
}

impl TriageError {
    /// True for errors the caller caused and can fix by changing the input.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            TriageError::CommitmentDateOutOfRange { .. } | TriageError::NoOpenCommitment(_)
        )
    }

    /// True when an external collaborator failed and the operation may be
    /// retried by the caller once the collaborator recovers.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            TriageError::Store(_) | TriageError::TaskSink(_) | TriageError::DateExtraction(_)
        )
    }
}

//! Typed error surface for the MSE core.
//!
//! Most subsystems never produce an `MseError` at all: the estimator, the
//! parser, and the gaming detector are specified to degrade to a default
//! score rather than fail. `MseError` exists for the
//! genuinely exceptional cases the orchestrator and collaborators can
//! raise — validation, lookup, and lifecycle conflicts a caller must
//! branch on.

use thiserror::Error;

/// Errors surfaced by the session orchestrator and its collaborators.
///
/// `gaming_detected` and `judge_unavailable` are
/// deliberately absent here: the former is an annotation on a snapshot,
/// never a failure; the latter is always recovered locally by falling
/// back to the heuristic judge.
#[derive(Debug, Error)]
pub enum MseError {
    #[error("validation failed for field `{field}`: {reason}")]
    Validation { field: String, reason: String },

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("conflict: {reason}")]
    Conflict { reason: String },

    #[error("run is already complete")]
    RunAlreadyComplete,

    #[error("storage operation failed: {0}")]
    StorageFailure(String),
}

pub type MseResult<T> = Result<T, MseError>;

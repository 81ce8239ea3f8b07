//! Errors surfaced by the dispatcher API.
//!
//! Rejections are part of the submission contract, not pipeline faults:
//! `Busy` and `Duplicate` mean no job was created and the caller should
//! retry later (or treat the submission as already accepted). Pipeline
//! failures never propagate here; they land in the job's terminal state.

use thiserror::Error;
use uuid::Uuid;

use pipeline::LockError;

/// Why a submission was not accepted.
#[derive(Debug, Error)]
pub enum SubmitError {
    /// Submission failed domain validation; no job was created.
    #[error("invalid submission: {0}")]
    Invalid(String),

    /// An identical `(player, score, difficulty)` submission arrived inside
    /// the dedup window. Treat as already accepted.
    #[error("duplicate submission inside the dedup window")]
    Duplicate,

    /// Another pipeline run is in progress. Retry later; nothing was queued.
    #[error("proof pipeline busy, retry later")]
    Busy,

    /// The execution lock could not be claimed for a non-contention reason.
    #[error("execution lock unavailable")]
    Lock(#[source] LockError),
}

/// Status queries fail only for unknown job IDs.
#[derive(Debug, Error)]
pub enum StatusError {
    #[error("no job with id {0}")]
    NotFound(Uuid),
}

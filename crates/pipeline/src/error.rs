//! Error types surfaced by the pipeline crate.
//!
//! Submission-side rejections (`Busy`, duplicates) live in the dispatch
//! crate; this module covers failures of the execution machinery itself.

use thiserror::Error;

/// Failure to claim the execution lock.
#[derive(Debug, Error)]
pub enum LockError {
    /// Another live process holds the lock. Callers should report busy and
    /// let the user retry; this is not an error state of the run itself.
    #[error("execution lock held by live process {holder}")]
    Busy { holder: u32 },

    #[error("lock record at {path} is unreadable: {reason}")]
    CorruptRecord { path: String, reason: String },

    #[error("lock i/o failed")]
    Io(#[from] std::io::Error),
}

/// The resource gate gave up before every resource was observed free.
#[derive(Debug, Error)]
#[error("resources still claimed after {waited_ms}ms: {}", busy.join(", "))]
pub struct GateTimeout {
    /// Resources observed busy in the final poll.
    pub busy: Vec<String>,
    pub waited_ms: u64,
}

//! Job lifecycle events broadcast to subscribers.

use std::path::PathBuf;

use crate::job::JobId;

/// Published on the dispatcher's broadcast channel as jobs move through
/// their lifecycle. Best-effort: events with no subscribers are dropped.
#[derive(Debug, Clone)]
pub enum JobEvent {
    /// Submission accepted, job created in `pending`.
    Accepted { id: JobId },
    /// Lock held and resources free; pipeline execution started.
    Started { id: JobId },
    Completed {
        id: JobId,
        artifact: Option<PathBuf>,
    },
    Failed { id: JobId, error: String },
    TimedOut { id: JobId, error: String },
}

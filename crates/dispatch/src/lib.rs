//! Job layer over the proof pipeline.
//!
//! Wires the pipeline crate's orchestration primitives into the contract
//! upstream callers see: `submit` a score, poll `get_status` to a terminal
//! state, stream the finished artifact. One pipeline executes at a time
//! system-wide; submissions and status queries stay concurrent and prompt.
//!
//! Modules are organized by responsibility:
//! - [`dispatcher`] hosts the submission façade and builder
//! - [`job`] defines the job record and its state machine
//! - [`dedup`] rejects repeated submissions inside a sliding window
//! - [`worker`] keeps the background pipeline task internal to the crate
//! - [`events`] and [`metrics`] expose lifecycle observability

pub mod dedup;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod job;
pub mod metrics;

mod worker;

pub use dispatcher::{Dispatcher, DispatcherBuilder, DispatcherConfig, StepPlanner, ZiskPlanner};
pub use error::{StatusError, SubmitError};
pub use events::JobEvent;
pub use job::{Job, JobId, JobState, Submission};
pub use metrics::{MetricsSnapshot, PipelineMetrics};

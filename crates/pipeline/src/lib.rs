//! Orchestration core for the score-proof pipeline.
//!
//! The expensive part of submitting a score is not the game or the proof
//! math; it is safely driving the external ZisK toolchain: a single,
//! long-running, multi-step command sequence that claims TCP ports and
//! shared-memory segments and must never run twice concurrently.
//!
//! Modules are organized by responsibility:
//! - [`lock`] guards the singleton run with a PID-bearing lock record
//! - [`resources`] gates a run on the toolchain's ports and shm segments
//! - [`artifact`] confirms step outputs have finished being written
//! - [`step`] describes the external commands and their failure policy
//! - [`executor`] interprets the step sequence and bounds every wait
//! - [`cleanup`] performs idempotent teardown on every exit path

pub mod artifact;
pub mod cleanup;
pub mod config;
pub mod error;
pub mod executor;
pub mod lock;
pub mod resources;
pub mod step;

pub use artifact::{ArtifactStatus, ArtifactVerifier};
pub use cleanup::CleanupRecovery;
pub use config::PipelineConfig;
pub use error::{GateTimeout, LockError};
pub use executor::{PipelineExecutor, PipelineReport, RunOutcome, StepReport, StepStatus};
pub use lock::{ExecutionLock, LockGuard, LockRecord};
pub use resources::{ResourceGate, ResourceSet};
pub use step::{ArtifactSpec, ProofRequest, StepSpec, zisk_steps};

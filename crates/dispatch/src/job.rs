//! Job records and their lifecycle state machine.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use pipeline::ProofRequest;

use crate::error::SubmitError;

pub type JobId = Uuid;

/// Domain bounds for a score submission, carried over from the game.
pub const MAX_SCORE: u32 = 1_000_000;
pub const MIN_DIFFICULTY: u8 = 1;
pub const MAX_DIFFICULTY: u8 = 10;

/// One request to prove a score, as received from the game client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub player_id: String,
    pub score: u32,
    pub difficulty: u8,
}

impl Submission {
    pub fn new(player_id: impl Into<String>, score: u32, difficulty: u8) -> Self {
        Self {
            player_id: player_id.into(),
            score,
            difficulty,
        }
    }

    /// Validate domain bounds before any job is created.
    pub fn validate(&self) -> Result<(), SubmitError> {
        if self.player_id.trim().is_empty() {
            return Err(SubmitError::Invalid("player id cannot be empty".into()));
        }
        if self.score > MAX_SCORE {
            return Err(SubmitError::Invalid(format!(
                "score {} exceeds maximum {MAX_SCORE}",
                self.score
            )));
        }
        if !(MIN_DIFFICULTY..=MAX_DIFFICULTY).contains(&self.difficulty) {
            return Err(SubmitError::Invalid(format!(
                "difficulty {} outside {MIN_DIFFICULTY}..={MAX_DIFFICULTY}",
                self.difficulty
            )));
        }
        Ok(())
    }

    pub fn to_request(&self) -> ProofRequest {
        ProofRequest {
            player_id: self.player_id.clone(),
            score: self.score,
            difficulty: self.difficulty,
        }
    }
}

/// Lifecycle of a proof job.
///
/// `Pending → InProgress → {Completed, Failed, Timeout}`; terminal states
/// are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    InProgress,
    Completed,
    Failed,
    Timeout,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Timeout)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
        };
        write!(f, "{label}")
    }
}

/// Snapshot of one job, as returned to status queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub player_id: String,
    pub score: u32,
    pub difficulty: u8,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
    pub artifact_path: Option<PathBuf>,
    pub error_message: Option<String>,
}

impl Job {
    pub fn new(submission: &Submission) -> Self {
        Self {
            id: Uuid::new_v4(),
            player_id: submission.player_id.clone(),
            score: submission.score,
            difficulty: submission.difficulty,
            state: JobState::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            duration_seconds: None,
            artifact_path: None,
            error_message: None,
        }
    }

    pub fn mark_started(&mut self) {
        self.state = JobState::InProgress;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self, artifact_path: Option<PathBuf>) {
        self.artifact_path = artifact_path;
        self.finish(JobState::Completed, None);
    }

    pub fn mark_failed(&mut self, error_message: String) {
        self.finish(JobState::Failed, Some(error_message));
    }

    pub fn mark_timed_out(&mut self, error_message: String) {
        self.finish(JobState::Timeout, Some(error_message));
    }

    fn finish(&mut self, state: JobState, error_message: Option<String>) {
        let now = Utc::now();
        self.state = state;
        self.completed_at = Some(now);
        self.error_message = error_message;
        if let Some(started) = self.started_at {
            let elapsed = (now - started).num_milliseconds().max(0) as f64 / 1000.0;
            self.duration_seconds = Some(elapsed);
        }
    }
}

//! Sequential pipeline executor.
//!
//! Runs an ordered sequence of [`StepSpec`]s, short-circuiting on the first
//! fatal failure and always running [`CleanupRecovery`] on exit. Steps are
//! strictly sequential because each step's output is a precondition for the
//! next; there is no automatic retry, retry is a resubmission decision made
//! by the caller.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::artifact::{ArtifactStatus, ArtifactVerifier};
use crate::cleanup::CleanupRecovery;
use crate::config::PipelineConfig;
use crate::lock::LockGuard;
use crate::step::StepSpec;

/// Terminal result of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every fatal step succeeded. `artifacts` lists the verified outputs in
    /// production order; the last entry is the terminal proof file.
    Succeeded { artifacts: Vec<PathBuf> },
    /// A fatal step failed; remaining steps were not executed.
    Failed { step: String, cause: String },
    /// A fatal step exceeded its timeout and was killed.
    TimedOut { step: String },
}

/// Per-step result recorded in the run report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepStatus {
    Succeeded,
    Failed { cause: String },
    TimedOut,
    /// Not executed because an earlier fatal step aborted the run.
    Skipped,
}

#[derive(Debug, Clone)]
pub struct StepReport {
    pub name: String,
    pub status: StepStatus,
    pub duration: Duration,
}

/// Full account of one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub outcome: RunOutcome,
    pub steps: Vec<StepReport>,
}

/// Interprets a tagged list of step descriptors against the external
/// toolchain.
#[derive(Debug, Clone)]
pub struct PipelineExecutor {
    config: PipelineConfig,
    verifier: ArtifactVerifier,
    cleanup: CleanupRecovery,
}

impl PipelineExecutor {
    pub fn new(config: PipelineConfig) -> Self {
        let verifier = ArtifactVerifier::from_config(&config);
        let cleanup = CleanupRecovery::new(config.clone());
        Self {
            config,
            verifier,
            cleanup,
        }
    }

    pub fn cleanup(&self) -> &CleanupRecovery {
        &self.cleanup
    }

    /// Run the ordered step sequence, then clean up.
    ///
    /// Cleanup executes exactly once on every exit path (success, fatal
    /// failure, or timeout) and releases the execution lock last.
    pub async fn run(&self, steps: &[StepSpec], lock: LockGuard) -> PipelineReport {
        let report = self.run_steps(steps).await;
        self.cleanup.run(Some(lock)).await;
        report
    }

    async fn run_steps(&self, steps: &[StepSpec]) -> PipelineReport {
        let mut reports = Vec::with_capacity(steps.len());
        let mut artifacts = Vec::new();

        for (index, step) in steps.iter().enumerate() {
            info!(step = %step.name, index, total = steps.len(), "running pipeline step");
            let started = Instant::now();
            let status = self.run_step(step, &mut artifacts).await;
            let duration = started.elapsed();

            let aborts = step.fatal && !matches!(status, StepStatus::Succeeded);
            match &status {
                StepStatus::Succeeded => {
                    info!(step = %step.name, elapsed_ms = duration.as_millis() as u64, "step succeeded");
                }
                StepStatus::Failed { cause } if !step.fatal => {
                    warn!(step = %step.name, cause, "tolerated step failed, continuing");
                }
                StepStatus::TimedOut if !step.fatal => {
                    warn!(step = %step.name, "tolerated step timed out, continuing");
                }
                StepStatus::Failed { cause } => {
                    error!(step = %step.name, cause, "fatal step failed, aborting run");
                }
                StepStatus::TimedOut => {
                    error!(
                        step = %step.name,
                        timeout_ms = step.timeout.as_millis() as u64,
                        "fatal step timed out, aborting run"
                    );
                }
                StepStatus::Skipped => unreachable!("executed steps are never Skipped"),
            }

            reports.push(StepReport {
                name: step.name.clone(),
                status: status.clone(),
                duration,
            });

            if aborts {
                for remaining in &steps[index + 1..] {
                    reports.push(StepReport {
                        name: remaining.name.clone(),
                        status: StepStatus::Skipped,
                        duration: Duration::ZERO,
                    });
                }
                let outcome = match status {
                    StepStatus::TimedOut => RunOutcome::TimedOut {
                        step: step.name.clone(),
                    },
                    StepStatus::Failed { cause } => RunOutcome::Failed {
                        step: step.name.clone(),
                        cause,
                    },
                    _ => unreachable!("only failures abort the run"),
                };
                return PipelineReport {
                    outcome,
                    steps: reports,
                };
            }
        }

        PipelineReport {
            outcome: RunOutcome::Succeeded { artifacts },
            steps: reports,
        }
    }

    /// Launch a single step, bound its runtime, and verify its artifacts.
    ///
    /// Verified artifact paths are appended to `artifacts` in order.
    async fn run_step(&self, step: &StepSpec, artifacts: &mut Vec<PathBuf>) -> StepStatus {
        let mut command = Command::new(&step.program);
        command
            .args(&step.args)
            .current_dir(&self.config.work_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                return StepStatus::Failed {
                    cause: format!("failed to launch {}: {e}", step.program),
                };
            }
        };

        let output = match timeout(step.timeout, child.wait_with_output()).await {
            // Dropping the wait future reaps the child via kill_on_drop.
            Err(_) => return StepStatus::TimedOut,
            Ok(Err(e)) => {
                return StepStatus::Failed {
                    cause: format!("failed to collect process output: {e}"),
                };
            }
            Ok(Ok(output)) => output,
        };

        let code = output.status.code().unwrap_or(-1);
        if !step.success_codes.contains(&code) {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return StepStatus::Failed {
                cause: format!("exit status {code}: {}", tail(&stderr, 400)),
            };
        }

        for spec in &step.artifacts {
            match self
                .verifier
                .await_stable(&spec.path, spec.min_size, self.config.artifact_wait)
                .await
            {
                ArtifactStatus::Stable { size } => {
                    info!(
                        step = %step.name,
                        artifact = %spec.path.display(),
                        size,
                        "artifact verified"
                    );
                    artifacts.push(spec.path.clone());
                }
                ArtifactStatus::Missing => {
                    return StepStatus::Failed {
                        cause: format!("expected artifact {} never appeared", spec.path.display()),
                    };
                }
                ArtifactStatus::Unstable { last_size } => {
                    return StepStatus::Failed {
                        cause: format!(
                            "artifact {} did not stabilize (last size {last_size})",
                            spec.path.display()
                        ),
                    };
                }
            }
        }

        StepStatus::Succeeded
    }
}

/// Last `limit` characters of a command's captured output, single line.
fn tail(text: &str, limit: usize) -> String {
    let trimmed = text.trim();
    let start = trimmed
        .char_indices()
        .rev()
        .nth(limit.saturating_sub(1))
        .map(|(i, _)| i)
        .unwrap_or(0);
    trimmed[start..].replace('\n', " | ")
}

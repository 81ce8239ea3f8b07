//! Artifact stabilization checks.
//!
//! A step's output file may still be mid-write when the producing process
//! is observed to exit (buffered writers, toolchain subprocesses). Before
//! trusting an artifact the verifier waits for it to exist, reach a minimum
//! size, and hold that size across several consecutive polls.

use std::path::Path;
use std::time::Duration;

use tokio::time::{Instant, sleep};
use tracing::{debug, trace};

use crate::config::PipelineConfig;

/// Outcome of waiting for an artifact to stabilize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactStatus {
    /// File exists, met the minimum size, and held a constant size across
    /// the required number of consecutive polls.
    Stable { size: u64 },
    /// File never appeared within the wait budget.
    Missing,
    /// File appeared but was still changing (or undersized) when the wait
    /// budget ran out.
    Unstable { last_size: u64 },
}

#[derive(Debug, Clone)]
pub struct ArtifactVerifier {
    poll_interval: Duration,
    stability_checks: u32,
}

impl ArtifactVerifier {
    pub fn new(poll_interval: Duration, stability_checks: u32) -> Self {
        Self {
            poll_interval,
            stability_checks: stability_checks.max(1),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.artifact_poll, config.stability_checks)
    }

    /// Wait for `path` to exist with at least `min_size` bytes and a size
    /// unchanged across `stability_checks` consecutive polls.
    pub async fn await_stable(
        &self,
        path: &Path,
        min_size: u64,
        max_wait: Duration,
    ) -> ArtifactStatus {
        let deadline = Instant::now() + max_wait;
        let mut last_size: Option<u64> = None;
        let mut constant_polls: u32 = 0;

        loop {
            match tokio::fs::metadata(path).await {
                Ok(meta) => {
                    let size = meta.len();
                    if size >= min_size && last_size == Some(size) {
                        constant_polls += 1;
                    } else {
                        // Size changed, first sighting, or still undersized.
                        constant_polls = if size >= min_size { 1 } else { 0 };
                    }
                    last_size = Some(size);

                    trace!(
                        path = %path.display(),
                        size,
                        constant_polls,
                        "artifact poll"
                    );

                    if constant_polls >= self.stability_checks {
                        debug!(path = %path.display(), size, "artifact stable");
                        return ArtifactStatus::Stable { size };
                    }
                }
                Err(_) => {
                    last_size = None;
                    constant_polls = 0;
                }
            }

            if Instant::now() >= deadline {
                return match last_size {
                    Some(last_size) => ArtifactStatus::Unstable { last_size },
                    None => ArtifactStatus::Missing,
                };
            }
            sleep(self.poll_interval).await;
        }
    }
}

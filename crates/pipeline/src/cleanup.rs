//! Idempotent teardown after a pipeline run.
//!
//! A timeout-kill of a step's parent process can strand toolchain children
//! and their shared-memory segments. Cleanup reaps both and releases the
//! execution lock. Every action is best-effort: failures are logged and
//! never surfaced to the job's terminal state.

use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::lock::LockGuard;
use crate::resources::ResourceSet;

#[derive(Debug, Clone)]
pub struct CleanupRecovery {
    config: PipelineConfig,
    runs: Arc<AtomicU64>,
}

impl CleanupRecovery {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            runs: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of times cleanup has run. Exposed for observability; the
    /// executor invokes cleanup exactly once per run.
    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::Relaxed)
    }

    /// Tear down leftover toolchain state and release the lock.
    ///
    /// Safe to call repeatedly; never returns an error and never panics.
    pub async fn run(&self, lock: Option<LockGuard>) {
        let run = self.runs.fetch_add(1, Ordering::Relaxed) + 1;
        info!(run, "running pipeline cleanup");

        self.kill_leftover_processes().await;
        self.remove_stale_segments();

        if let Some(guard) = lock {
            guard.release();
        }
    }

    /// Kill surviving toolchain processes by signature.
    ///
    /// The prover spawns its own workers; killing the step's direct child
    /// on timeout does not reach them, so they are matched by name.
    async fn kill_leftover_processes(&self) {
        for signature in &self.config.process_signatures {
            let result = Command::new("pkill")
                .arg("-f")
                .arg(signature)
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await;

            match result {
                // pkill exits 1 when nothing matched; both are fine here.
                Ok(status) => {
                    debug!(signature, code = ?status.code(), "pkill finished")
                }
                Err(e) => warn!(signature, error = %e, "failed to run pkill"),
            }
        }
    }

    fn remove_stale_segments(&self) {
        let set = ResourceSet::derive(&self.config);
        for segment in &set.shm_segments {
            match std::fs::remove_file(segment) {
                Ok(()) => info!(segment = %segment.display(), "removed stale shm segment"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(segment = %segment.display(), error = %e, "failed to remove shm segment")
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::ExecutionLock;

    fn test_config(dir: &tempfile::TempDir) -> PipelineConfig {
        PipelineConfig {
            shm_dir: dir.path().to_path_buf(),
            shm_prefix: "CLEANSHM".to_string(),
            base_port: 24_300,
            port_count: 2,
            lock_path: dir.path().join("prover.lock"),
            // No signatures: tests must not pkill anything real.
            process_signatures: Vec::new(),
            ..PipelineConfig::default()
        }
    }

    #[tokio::test]
    async fn cleanup_removes_segments_and_releases_lock() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);

        let set = ResourceSet::derive(&config);
        for segment in &set.shm_segments {
            std::fs::write(segment, b"stale").unwrap();
        }

        let lock = ExecutionLock::new(&config.lock_path);
        let guard = lock.acquire().unwrap();

        let cleanup = CleanupRecovery::new(config.clone());
        cleanup.run(Some(guard)).await;

        for segment in &set.shm_segments {
            assert!(!segment.exists(), "segment should be removed");
        }
        assert!(!config.lock_path.exists(), "lock should be released");
        assert_eq!(cleanup.runs(), 1);
    }

    #[tokio::test]
    async fn cleanup_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let cleanup = CleanupRecovery::new(test_config(&dir));

        cleanup.run(None).await;
        cleanup.run(None).await;
        assert_eq!(cleanup.runs(), 2);
    }
}

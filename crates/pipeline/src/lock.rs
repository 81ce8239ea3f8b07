//! Singleton execution lock for the proof pipeline.
//!
//! The toolchain is not re-entrant on its ports and shared-memory segments,
//! so only one pipeline run may execute at a time system-wide. The lock is a
//! PID-bearing JSON record claimed with exclusive file creation, which makes
//! the claim atomic across processes: two acquirers racing on an empty slot
//! cannot both succeed. Records left behind by dead processes are reclaimed.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::LockError;

/// On-disk lock record: holder PID plus acquisition timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockRecord {
    pub pid: u32,
    pub acquired_at: i64,
}

/// Process-external mutual-exclusion primitive guarding pipeline runs.
#[derive(Debug, Clone)]
pub struct ExecutionLock {
    path: PathBuf,
}

impl ExecutionLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Attempt to claim the lock without blocking.
    ///
    /// Returns [`LockError::Busy`] immediately when a live process holds the
    /// record; callers decide whether to retry or report busy upstream. A
    /// record whose PID no longer denotes a live process is stale and is
    /// reclaimed. Losing the reclaim race is treated as `Busy`: whoever won
    /// it is alive by definition.
    pub fn acquire(&self) -> Result<LockGuard, LockError> {
        // Bounded attempts: each pass claims, then inspects the record that
        // blocked the claim. A record that vanishes between the two was
        // released or reclaimed concurrently and is worth another pass, not
        // an I/O error.
        let mut last_holder = None;
        for attempt in 0..3 {
            match self.try_claim() {
                Ok(guard) => return Ok(guard),
                Err(LockError::Io(e)) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    let record = match self.read_record() {
                        Ok(record) => record,
                        Err(LockError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                            debug!(attempt, "lock record released mid-claim, retrying");
                            continue;
                        }
                        Err(e) => return Err(e),
                    };
                    if process_alive(record.pid) {
                        debug!(holder = record.pid, "execution lock held by live process");
                        return Err(LockError::Busy { holder: record.pid });
                    }
                    last_holder = Some(record.pid);
                    warn!(
                        holder = record.pid,
                        attempt, "reclaiming execution lock from dead process"
                    );
                    match std::fs::remove_file(&self.path) {
                        Ok(()) => {}
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                        Err(e) => return Err(LockError::Io(e)),
                    }
                }
                Err(e) => return Err(e),
            }
        }

        // Still contended after the retry budget: a concurrent claimer keeps
        // winning the slot and is alive by definition.
        let holder = match self.read_record() {
            Ok(record) => record.pid,
            Err(LockError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                last_holder.unwrap_or_default()
            }
            Err(e) => return Err(e),
        };
        Err(LockError::Busy { holder })
    }

    fn try_claim(&self) -> Result<LockGuard, LockError> {
        let record = LockRecord {
            pid: std::process::id(),
            acquired_at: chrono::Utc::now().timestamp(),
        };

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)?;
        file.write_all(serde_json::to_string(&record).unwrap_or_default().as_bytes())?;

        info!(path = %self.path.display(), pid = record.pid, "execution lock acquired");
        Ok(LockGuard {
            path: self.path.clone(),
            released: false,
        })
    }

    fn read_record(&self) -> Result<LockRecord, LockError> {
        let contents = std::fs::read_to_string(&self.path)?;
        serde_json::from_str(&contents).map_err(|e| LockError::CorruptRecord {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        })
    }
}

/// Scoped ownership of the execution lock.
///
/// Releasing removes the record unconditionally; dropping without an
/// explicit release does the same best-effort, so abnormal exits cannot
/// leave the slot claimed by a live guard.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    released: bool,
}

impl LockGuard {
    /// Remove the lock record, consuming the guard.
    pub fn release(mut self) {
        self.remove_record();
    }

    fn remove_record(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        match std::fs::remove_file(&self.path) {
            Ok(()) => info!(path = %self.path.display(), "execution lock released"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "failed to remove lock record"),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.remove_record();
    }
}

/// Check whether `pid` denotes a live process.
///
/// Linux exposes liveness through `/proc`; elsewhere the holder is assumed
/// live so that an uncertain probe yields a spurious `Busy` rather than a
/// double execution.
#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

#[cfg(not(target_os = "linux"))]
fn process_alive(_pid: u32) -> bool {
    true
}

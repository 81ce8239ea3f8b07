//! Pipeline run metrics and statistics.
//!
//! Tracks terminal outcomes and run durations. Uses atomics for lock-free
//! access across the worker task and status queries.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct PipelineMetrics {
    completed: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    rejected_busy: AtomicU64,
    rejected_duplicate: AtomicU64,

    /// Sum of durations of completed runs, in nanoseconds.
    total_run_time_nanos: AtomicU64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_completed(&self, run_time: Duration) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.total_run_time_nanos
            .fetch_add(run_time.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timed_out(&self) {
        self.timed_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected_busy(&self) {
        self.rejected_busy.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected_duplicate(&self) {
        self.rejected_duplicate.fetch_add(1, Ordering::Relaxed);
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn timed_out(&self) -> u64 {
        self.timed_out.load(Ordering::Relaxed)
    }

    pub fn rejected_busy(&self) -> u64 {
        self.rejected_busy.load(Ordering::Relaxed)
    }

    pub fn rejected_duplicate(&self) -> u64 {
        self.rejected_duplicate.load(Ordering::Relaxed)
    }

    /// Average duration of completed runs.
    pub fn avg_run_time(&self) -> Duration {
        let completed = self.completed.load(Ordering::Relaxed);
        if completed == 0 {
            Duration::ZERO
        } else {
            let total = self.total_run_time_nanos.load(Ordering::Relaxed);
            Duration::from_nanos(total / completed)
        }
    }

    /// Point-in-time snapshot for display/logging. Individual fields are
    /// read atomically; the snapshot as a whole may straddle an update.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            completed: self.completed(),
            failed: self.failed(),
            timed_out: self.timed_out(),
            rejected_busy: self.rejected_busy(),
            rejected_duplicate: self.rejected_duplicate(),
            avg_run_time: self.avg_run_time(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub rejected_busy: u64,
    pub rejected_duplicate: u64,
    pub avg_run_time: Duration,
}

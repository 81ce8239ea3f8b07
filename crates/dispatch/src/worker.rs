//! Background worker driving one pipeline run.
//!
//! One worker task exists per accepted submission. It waits on the resource
//! gate, marks the job in progress, runs the executor to a terminal state,
//! and publishes the outcome. The execution lock travels with the run and
//! is released by cleanup inside the executor; the gate-failure path hands
//! it to cleanup explicitly so no exit leaks the lock.

use std::sync::Arc;

use tracing::{error, info, warn};

use pipeline::{LockGuard, RunOutcome, StepSpec};

use crate::dispatcher::Inner;
use crate::events::JobEvent;
use crate::job::{Job, JobId};

pub(crate) struct PipelineWorker {
    inner: Arc<Inner>,
}

impl PipelineWorker {
    pub(crate) fn new(inner: Arc<Inner>) -> Self {
        Self { inner }
    }

    pub(crate) async fn run(self, job_id: JobId, steps: Vec<StepSpec>, lock: LockGuard) {
        if let Err(gate_timeout) = self.inner.gate.await_free(&self.inner.resources).await {
            warn!(job_id = %job_id, %gate_timeout, "resource gate timed out, deferring run");
            // Stale resources may belong to a crashed prior run; cleanup can
            // clear them for the next attempt. It also releases the lock.
            self.inner.executor.cleanup().run(Some(lock)).await;
            self.inner.metrics.record_failed();
            let error = format!("toolchain resources unavailable: {gate_timeout}");
            self.update_job(job_id, |job| job.mark_failed(error.clone()))
                .await;
            let _ = self
                .inner
                .event_tx
                .send(JobEvent::Failed { id: job_id, error });
            self.clear_active(job_id);
            return;
        }

        self.update_job(job_id, |job| job.mark_started()).await;
        let _ = self.inner.event_tx.send(JobEvent::Started { id: job_id });
        info!(job_id = %job_id, steps = steps.len(), "pipeline run started");

        let report = self.inner.executor.run(&steps, lock).await;

        match report.outcome {
            RunOutcome::Succeeded { artifacts } => {
                let artifact = artifacts.last().cloned();
                self.update_job(job_id, |job| job.mark_completed(artifact.clone()))
                    .await;
                if let Some(duration) = self.job_duration(job_id).await {
                    self.inner.metrics.record_completed(duration);
                }
                info!(job_id = %job_id, artifact = ?artifact, "pipeline run completed");
                let _ = self.inner.event_tx.send(JobEvent::Completed {
                    id: job_id,
                    artifact,
                });
            }
            RunOutcome::Failed { step, cause } => {
                let error = format!("step {step} failed: {cause}");
                error!(job_id = %job_id, step, cause, "pipeline run failed");
                self.inner.metrics.record_failed();
                self.update_job(job_id, |job| job.mark_failed(error.clone()))
                    .await;
                let _ = self
                    .inner
                    .event_tx
                    .send(JobEvent::Failed { id: job_id, error });
            }
            RunOutcome::TimedOut { step } => {
                let error = format!("step {step} exceeded its timeout");
                error!(job_id = %job_id, step, "pipeline run timed out");
                self.inner.metrics.record_timed_out();
                self.update_job(job_id, |job| job.mark_timed_out(error.clone()))
                    .await;
                let _ = self
                    .inner
                    .event_tx
                    .send(JobEvent::TimedOut { id: job_id, error });
            }
        }

        // Cleared only after the terminal state is visible in the map, so
        // a submission accepted during the handover can never coexist with
        // a job still shown in progress.
        self.clear_active(job_id);
    }

    /// Apply one exclusive mutation to the job so concurrent status reads
    /// always see a consistent snapshot.
    async fn update_job(&self, job_id: JobId, mutate: impl FnOnce(&mut Job)) {
        let mut jobs = self.inner.jobs.write().await;
        if let Some(job) = jobs.get_mut(&job_id) {
            mutate(job);
        }
    }

    async fn job_duration(&self, job_id: JobId) -> Option<std::time::Duration> {
        let jobs = self.inner.jobs.read().await;
        jobs.get(&job_id)?
            .duration_seconds
            .map(std::time::Duration::from_secs_f64)
    }

    fn clear_active(&self, job_id: JobId) {
        let mut state = self
            .inner
            .submit_state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if state.active == Some(job_id) {
            state.active = None;
        }
    }
}

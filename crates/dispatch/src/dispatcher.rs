//! Submission dispatcher.
//!
//! Accepts score submissions, enforces deduplication and the singleton-run
//! policy, and hands accepted jobs to a background worker. Submissions and
//! status queries are concurrent and return promptly; only the in-flight
//! worker touches the external toolchain.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, info};

use pipeline::{
    ExecutionLock, LockError, PipelineConfig, PipelineExecutor, ProofRequest, ResourceGate,
    ResourceSet, StepSpec, zisk_steps,
};

use crate::dedup::{DedupKey, DedupWindow};
use crate::error::{StatusError, SubmitError};
use crate::events::JobEvent;
use crate::job::{Job, JobId, Submission};
use crate::metrics::PipelineMetrics;
use crate::worker::PipelineWorker;

/// Chooses the step sequence for an accepted submission.
///
/// The default planner emits the ZisK toolchain sequence; tests and
/// alternative toolchains inject their own.
pub trait StepPlanner: Send + Sync {
    fn plan(&self, request: &ProofRequest, config: &PipelineConfig) -> Vec<StepSpec>;
}

/// Production planner: the fixed ZisK command sequence.
#[derive(Debug, Default)]
pub struct ZiskPlanner;

impl StepPlanner for ZiskPlanner {
    fn plan(&self, request: &ProofRequest, config: &PipelineConfig) -> Vec<StepSpec> {
        zisk_steps(config, request)
    }
}

/// Dispatcher configuration shared with the worker.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub pipeline: PipelineConfig,
    /// Sliding window inside which an identical submission is a duplicate.
    pub dedup_window: Duration,
    /// Terminal jobs older than this are garbage-collected on submission.
    pub job_retention: Duration,
    pub event_buffer_size: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            dedup_window: Duration::from_secs(30),
            job_retention: Duration::from_secs(60 * 60),
            event_buffer_size: 100,
        }
    }
}

impl DispatcherConfig {
    /// Construct configuration from process environment variables.
    ///
    /// `FLAPPY_DEDUP_WINDOW_SECS` and `FLAPPY_JOB_RETENTION_SECS` override
    /// the dispatcher knobs; pipeline knobs come from
    /// [`PipelineConfig::from_env`].
    pub fn from_env() -> Self {
        let mut config = Self {
            pipeline: PipelineConfig::from_env(),
            ..Self::default()
        };
        if let Some(secs) = read_env::<u64>("FLAPPY_DEDUP_WINDOW_SECS") {
            config.dedup_window = Duration::from_secs(secs);
        }
        if let Some(secs) = read_env::<u64>("FLAPPY_JOB_RETENTION_SECS") {
            config.job_retention = Duration::from_secs(secs);
        }
        config
    }
}

fn read_env<T>(key: &str) -> Option<T>
where
    T: std::str::FromStr,
{
    std::env::var(key).ok()?.parse().ok()
}

/// Submission-side state mutated under one mutex so rapid repeated
/// submissions cannot race past the at-most-one-active policy.
pub(crate) struct SubmitState {
    pub(crate) dedup: DedupWindow,
    pub(crate) active: Option<JobId>,
}

pub(crate) struct Inner {
    pub(crate) config: DispatcherConfig,
    pub(crate) lock: ExecutionLock,
    pub(crate) gate: ResourceGate,
    pub(crate) resources: ResourceSet,
    pub(crate) executor: PipelineExecutor,
    pub(crate) jobs: RwLock<HashMap<JobId, Job>>,
    pub(crate) submit_state: Mutex<SubmitState>,
    pub(crate) event_tx: broadcast::Sender<JobEvent>,
    pub(crate) metrics: Arc<PipelineMetrics>,
}

/// Accepts submissions and exposes the job-status state machine.
///
/// Cloneable façade over shared state; all clones observe the same jobs.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
    planner: Arc<dyn StepPlanner>,
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    /// Submit a score for proving.
    ///
    /// Exactly one background execution starts per accepted submission.
    /// Rejections (`Invalid`, `Duplicate`, `Busy`) create no job.
    pub async fn submit(&self, submission: Submission) -> Result<Job, SubmitError> {
        submission.validate()?;
        let key = DedupKey::from(&submission);
        let request = submission.to_request();

        // Dedup, active-job, and lock checks share one critical section so
        // concurrent submits serialize; nothing awaits while it is held.
        let (job, guard) = {
            let mut state = self
                .inner
                .submit_state
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());

            if state.dedup.is_duplicate(&key) {
                self.inner.metrics.record_rejected_duplicate();
                return Err(SubmitError::Duplicate);
            }
            if let Some(active) = state.active {
                debug!(%active, "submission rejected, job already in flight");
                self.inner.metrics.record_rejected_busy();
                return Err(SubmitError::Busy);
            }

            let guard = match self.inner.lock.acquire() {
                Ok(guard) => guard,
                Err(LockError::Busy { holder }) => {
                    debug!(holder, "submission rejected, execution lock held");
                    self.inner.metrics.record_rejected_busy();
                    return Err(SubmitError::Busy);
                }
                Err(e) => return Err(SubmitError::Lock(e)),
            };

            let job = Job::new(&submission);
            state.active = Some(job.id);
            state.dedup.record(key);
            (job, guard)
        };

        {
            let mut jobs = self.inner.jobs.write().await;
            prune_expired(&mut jobs, self.inner.config.job_retention);
            jobs.insert(job.id, job.clone());
        }

        info!(
            job_id = %job.id,
            player = %job.player_id,
            score = job.score,
            difficulty = job.difficulty,
            "submission accepted"
        );
        let _ = self.inner.event_tx.send(JobEvent::Accepted { id: job.id });

        let steps = self.planner.plan(&request, &self.inner.config.pipeline);
        let worker = PipelineWorker::new(Arc::clone(&self.inner));
        tokio::spawn(async move {
            worker.run(job.id, steps, guard).await;
        });

        // Snapshot from the map so the caller sees exactly what a status
        // query would.
        self.get_status(&job.id)
            .await
            .map_err(|_| SubmitError::Invalid("job vanished during submission".into()))
    }

    /// Latest known snapshot of a job. Never blocks on the pipeline.
    pub async fn get_status(&self, id: &JobId) -> Result<Job, StatusError> {
        self.inner
            .jobs
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or(StatusError::NotFound(*id))
    }

    /// Path of the finished proof, available once the job is `completed`.
    pub async fn artifact_path(&self, id: &JobId) -> Result<Option<std::path::PathBuf>, StatusError> {
        Ok(self.get_status(id).await?.artifact_path)
    }

    /// Snapshot of all retained jobs.
    pub async fn jobs(&self) -> Vec<Job> {
        self.inner.jobs.read().await.values().cloned().collect()
    }

    /// Subscribe to job lifecycle events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<JobEvent> {
        self.inner.event_tx.subscribe()
    }

    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        Arc::clone(&self.inner.metrics)
    }
}

fn prune_expired(jobs: &mut HashMap<JobId, Job>, retention: Duration) {
    let now = Utc::now();
    jobs.retain(|_, job| {
        if !job.state.is_terminal() {
            return true;
        }
        match job.completed_at {
            Some(completed) => {
                let age = (now - completed).num_seconds().max(0) as u64;
                age < retention.as_secs()
            }
            None => true,
        }
    });
}

/// Builder for [`Dispatcher`] with flexible configuration.
pub struct DispatcherBuilder {
    config: DispatcherConfig,
    planner: Option<Arc<dyn StepPlanner>>,
}

impl DispatcherBuilder {
    fn new() -> Self {
        Self {
            config: DispatcherConfig::default(),
            planner: None,
        }
    }

    pub fn config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the default ZisK step planner.
    pub fn planner(mut self, planner: impl StepPlanner + 'static) -> Self {
        self.planner = Some(Arc::new(planner));
        self
    }

    pub fn build(self) -> Dispatcher {
        let (event_tx, _event_rx) = broadcast::channel(self.config.event_buffer_size);
        let pipeline_config = self.config.pipeline.clone();

        let inner = Inner {
            lock: ExecutionLock::new(&pipeline_config.lock_path),
            gate: ResourceGate::from_config(&pipeline_config),
            resources: ResourceSet::derive(&pipeline_config),
            executor: PipelineExecutor::new(pipeline_config),
            jobs: RwLock::new(HashMap::new()),
            submit_state: Mutex::new(SubmitState {
                dedup: DedupWindow::new(self.config.dedup_window),
                active: None,
            }),
            event_tx,
            metrics: Arc::new(PipelineMetrics::new()),
            config: self.config,
        };

        Dispatcher {
            inner: Arc::new(inner),
            planner: self.planner.unwrap_or_else(|| Arc::new(ZiskPlanner)),
        }
    }
}

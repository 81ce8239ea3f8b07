//! Integration tests for the dispatcher and its background worker.
//!
//! Pipelines are faked with `/bin/sh` step plans so jobs reach terminal
//! states quickly and deterministically.

use std::path::Path;
use std::time::Duration;

use dispatch::{
    Dispatcher, DispatcherConfig, JobEvent, JobState, StatusError, StepPlanner, SubmitError,
    Submission,
};
use pipeline::{ExecutionLock, LockRecord, PipelineConfig, ProofRequest, StepSpec};

/// Planner returning a fixed step sequence regardless of the submission.
struct FixedPlan(Vec<StepSpec>);

impl StepPlanner for FixedPlan {
    fn plan(&self, _request: &ProofRequest, _config: &PipelineConfig) -> Vec<StepSpec> {
        self.0.clone()
    }
}

fn test_config(dir: &Path, base_port: u16) -> DispatcherConfig {
    DispatcherConfig {
        pipeline: PipelineConfig {
            work_dir: dir.to_path_buf(),
            proof_dir: "proof".into(),
            lock_path: dir.join("prover.lock"),
            shm_dir: dir.join("shm"),
            base_port,
            port_count: 2,
            resource_wait: Duration::from_secs(2),
            resource_poll: Duration::from_millis(40),
            artifact_wait: Duration::from_secs(3),
            artifact_poll: Duration::from_millis(30),
            // Tests must not pkill anything real.
            process_signatures: Vec::new(),
            ..PipelineConfig::default()
        },
        ..DispatcherConfig::default()
    }
}

fn dispatcher_with_plan(
    dir: &Path,
    base_port: u16,
    steps: Vec<StepSpec>,
) -> Dispatcher {
    Dispatcher::builder()
        .config(test_config(dir, base_port))
        .planner(FixedPlan(steps))
        .build()
}

fn shell_step(name: &str, script: &str) -> StepSpec {
    StepSpec::new(name, "/bin/sh")
        .args(["-c", script])
        .timeout(Duration::from_secs(10))
}

fn proving_plan(dir: &Path) -> Vec<StepSpec> {
    vec![
        shell_step("build", "touch build.marker"),
        shell_step(
            "prove",
            "mkdir -p proof && printf 'proofbytes' > proof/final.bin",
        )
        .artifact(dir.join("proof/final.bin"), 5),
    ]
}

/// Submit, retrying through the brief window where the previous worker has
/// published its terminal state but not yet released the active-job slot.
async fn submit_when_idle(dispatcher: &Dispatcher, submission: Submission) -> dispatch::Job {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        match dispatcher.submit(submission.clone()).await {
            Ok(job) => return job,
            Err(SubmitError::Busy) if tokio::time::Instant::now() < deadline => {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            Err(other) => panic!("expected acceptance, got {other:?}"),
        }
    }
}

async fn wait_terminal(dispatcher: &Dispatcher, id: &dispatch::JobId) -> dispatch::Job {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let job = dispatcher.get_status(id).await.expect("job must exist");
        if job.state.is_terminal() {
            return job;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job {id} never reached a terminal state (state {})",
            job.state
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

#[tokio::test]
async fn submitted_score_runs_to_completion() {
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = dispatcher_with_plan(dir.path(), 24_400, proving_plan(dir.path()));
    let mut events = dispatcher.subscribe_events();

    let job = dispatcher
        .submit(Submission::new("p1", 5, 1))
        .await
        .expect("submission should be accepted");

    let finished = wait_terminal(&dispatcher, &job.id).await;
    assert_eq!(finished.state, JobState::Completed);
    assert!(
        finished
            .artifact_path
            .as_ref()
            .is_some_and(|p| p.ends_with("proof/final.bin")),
        "artifact_path was {:?}",
        finished.artifact_path
    );
    assert!(finished.started_at.is_some());
    assert!(finished.duration_seconds.is_some());
    assert!(finished.error_message.is_none());

    // Lifecycle events arrive in submission order.
    assert!(matches!(events.recv().await, Ok(JobEvent::Accepted { id }) if id == job.id));
    assert!(matches!(events.recv().await, Ok(JobEvent::Started { id }) if id == job.id));
    assert!(matches!(events.recv().await, Ok(JobEvent::Completed { id, .. }) if id == job.id));

    assert_eq!(dispatcher.metrics().completed(), 1);
    assert_eq!(
        dispatcher.artifact_path(&job.id).await.unwrap(),
        finished.artifact_path
    );
}

#[tokio::test]
async fn fatal_step_failure_names_the_step_and_skips_the_rest() {
    let dir = tempfile::tempdir().unwrap();
    let steps = vec![
        shell_step("one", "touch one.marker"),
        shell_step("two", "exit 7"),
        shell_step("three", "touch three.marker"),
        shell_step("four", "touch four.marker"),
        shell_step("five", "touch five.marker"),
    ];
    let dispatcher = dispatcher_with_plan(dir.path(), 24_410, steps);

    let job = dispatcher
        .submit(Submission::new("p1", 6, 1))
        .await
        .unwrap();
    let finished = wait_terminal(&dispatcher, &job.id).await;

    assert_eq!(finished.state, JobState::Failed);
    let error = finished.error_message.unwrap();
    assert!(error.contains("step two"), "error was: {error}");

    assert!(dir.path().join("one.marker").exists());
    for marker in ["three.marker", "four.marker", "five.marker"] {
        assert!(!dir.path().join(marker).exists(), "{marker} must not exist");
    }
    assert_eq!(dispatcher.metrics().failed(), 1);
}

#[tokio::test]
async fn tolerated_failure_still_reaches_completed() {
    let dir = tempfile::tempdir().unwrap();
    let mut steps = proving_plan(dir.path());
    steps.insert(1, shell_step("optional", "exit 1").non_fatal());
    let dispatcher = dispatcher_with_plan(dir.path(), 24_420, steps);

    let job = dispatcher
        .submit(Submission::new("p1", 7, 1))
        .await
        .unwrap();
    let finished = wait_terminal(&dispatcher, &job.id).await;
    assert_eq!(finished.state, JobState::Completed);
}

#[tokio::test]
async fn step_timeout_moves_job_to_timeout_state() {
    let dir = tempfile::tempdir().unwrap();
    let steps = vec![
        shell_step("slow-prove", "sleep 30").timeout(Duration::from_millis(200)),
    ];
    let dispatcher = dispatcher_with_plan(dir.path(), 24_430, steps);

    let job = dispatcher
        .submit(Submission::new("p1", 8, 1))
        .await
        .unwrap();
    let finished = wait_terminal(&dispatcher, &job.id).await;

    assert_eq!(finished.state, JobState::Timeout);
    let error = finished.error_message.unwrap();
    assert!(error.contains("slow-prove"), "error was: {error}");
    assert_eq!(dispatcher.metrics().timed_out(), 1);
}

#[tokio::test]
async fn second_submission_while_running_is_busy() {
    let dir = tempfile::tempdir().unwrap();
    let steps = vec![shell_step("slow", "sleep 0.5")];
    let dispatcher = dispatcher_with_plan(dir.path(), 24_440, steps);

    let first = dispatcher
        .submit(Submission::new("p1", 9, 1))
        .await
        .unwrap();

    match dispatcher.submit(Submission::new("p2", 10, 1)).await {
        Err(SubmitError::Busy) => {}
        other => panic!("expected Busy, got {other:?}"),
    }
    assert_eq!(dispatcher.jobs().await.len(), 1, "Busy must not queue a job");

    wait_terminal(&dispatcher, &first.id).await;

    submit_when_idle(&dispatcher, Submission::new("p2", 10, 1)).await;
}

#[tokio::test]
async fn duplicate_submission_inside_window_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = dispatcher_with_plan(dir.path(), 24_450, proving_plan(dir.path()));

    let job = dispatcher
        .submit(Submission::new("p1", 11, 1))
        .await
        .unwrap();
    wait_terminal(&dispatcher, &job.id).await;

    match dispatcher.submit(Submission::new("p1", 11, 1)).await {
        Err(SubmitError::Duplicate) => {}
        other => panic!("expected Duplicate, got {other:?}"),
    }
    assert_eq!(dispatcher.jobs().await.len(), 1);
    assert_eq!(dispatcher.metrics().rejected_duplicate(), 1);

    // A different triple from the same player is not a duplicate.
    let job = submit_when_idle(&dispatcher, Submission::new("p1", 12, 1)).await;
    wait_terminal(&dispatcher, &job.id).await;
}

#[tokio::test]
async fn lock_held_by_live_process_rejects_submission() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), 24_460);

    // This process is alive, so the record is not reclaimable.
    let _guard = ExecutionLock::new(&config.pipeline.lock_path)
        .acquire()
        .unwrap();

    let dispatcher = Dispatcher::builder()
        .config(config)
        .planner(FixedPlan(proving_plan(dir.path())))
        .build();

    match dispatcher.submit(Submission::new("p1", 13, 1)).await {
        Err(SubmitError::Busy) => {}
        other => panic!("expected Busy, got {other:?}"),
    }
    assert!(dispatcher.jobs().await.is_empty());
}

#[tokio::test]
async fn stale_lock_record_is_reclaimed_on_submit() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), 24_470);

    let stale = LockRecord {
        pid: u32::MAX - 13,
        acquired_at: 0,
    };
    std::fs::write(
        &config.pipeline.lock_path,
        serde_json::to_string(&stale).unwrap(),
    )
    .unwrap();

    let dispatcher = Dispatcher::builder()
        .config(config)
        .planner(FixedPlan(proving_plan(dir.path())))
        .build();

    let job = dispatcher
        .submit(Submission::new("p1", 14, 1))
        .await
        .expect("stale lock should be reclaimed");
    let finished = wait_terminal(&dispatcher, &job.id).await;
    assert_eq!(finished.state, JobState::Completed);
}

#[tokio::test]
async fn invalid_submission_creates_no_job() {
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = dispatcher_with_plan(dir.path(), 24_480, proving_plan(dir.path()));

    for submission in [
        Submission::new("", 5, 1),
        Submission::new("p1", 5_000_000, 1),
        Submission::new("p1", 5, 0),
        Submission::new("p1", 5, 42),
    ] {
        match dispatcher.submit(submission).await {
            Err(SubmitError::Invalid(_)) => {}
            other => panic!("expected Invalid, got {other:?}"),
        }
    }
    assert!(dispatcher.jobs().await.is_empty());
}

#[tokio::test]
async fn unknown_job_id_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = dispatcher_with_plan(dir.path(), 24_490, proving_plan(dir.path()));

    let unknown = uuid::Uuid::new_v4();
    match dispatcher.get_status(&unknown).await {
        Err(StatusError::NotFound(id)) => assert_eq!(id, unknown),
        other => panic!("expected NotFound, got {other:?}"),
    }
}

#[tokio::test]
async fn concurrent_submissions_accept_exactly_one() {
    let dir = tempfile::tempdir().unwrap();
    let steps = vec![shell_step("slow", "sleep 0.4")];
    let dispatcher = dispatcher_with_plan(dir.path(), 24_500, steps);

    let mut handles = Vec::new();
    for i in 0..12u32 {
        let dispatcher = dispatcher.clone();
        handles.push(tokio::spawn(async move {
            dispatcher
                .submit(Submission::new(format!("player-{i}"), 100 + i, 1))
                .await
        }));
    }

    let mut accepted = Vec::new();
    let mut busy = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(job) => accepted.push(job),
            Err(SubmitError::Busy) => busy += 1,
            Err(other) => panic!("unexpected rejection: {other:?}"),
        }
    }

    assert_eq!(accepted.len(), 1, "exactly one submission may win the lock");
    assert_eq!(busy, 11);

    // The single accepted job is the only one ever in progress.
    let in_progress = dispatcher
        .jobs()
        .await
        .iter()
        .filter(|job| !job.state.is_terminal())
        .count();
    assert!(in_progress <= 1);

    wait_terminal(&dispatcher, &accepted[0].id).await;
}

#[tokio::test]
async fn handover_between_jobs_never_shows_two_in_progress() {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    let dir = tempfile::tempdir().unwrap();
    let steps = vec![shell_step("slow", "sleep 0.2")];
    let dispatcher = dispatcher_with_plan(dir.path(), 24_510, steps);

    // Sample the published job map continuously across the handover from
    // the first run to the second.
    let stop = Arc::new(AtomicBool::new(false));
    let max_in_progress = Arc::new(AtomicUsize::new(0));
    let sampler = {
        let dispatcher = dispatcher.clone();
        let stop = Arc::clone(&stop);
        let max_in_progress = Arc::clone(&max_in_progress);
        tokio::spawn(async move {
            while !stop.load(Ordering::Relaxed) {
                let in_progress = dispatcher
                    .jobs()
                    .await
                    .iter()
                    .filter(|job| job.state == JobState::InProgress)
                    .count();
                max_in_progress.fetch_max(in_progress, Ordering::Relaxed);
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
    };

    let first = dispatcher
        .submit(Submission::new("p1", 20, 1))
        .await
        .unwrap();
    let second = submit_when_idle(&dispatcher, Submission::new("p2", 21, 1)).await;
    wait_terminal(&dispatcher, &second.id).await;

    stop.store(true, Ordering::Relaxed);
    sampler.await.unwrap();

    let first = dispatcher.get_status(&first.id).await.unwrap();
    assert!(first.state.is_terminal());
    assert!(
        max_in_progress.load(Ordering::Relaxed) <= 1,
        "two jobs were observed in progress at once"
    );
}

//! End-to-end dispatcher tests over a temp state directory.

use async_trait::async_trait;
use chrono::Utc;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use drama_models::{Job, JobId, JobStatus, Stage};
use drama_recovery::{
    AlertSink, CircuitBreaker, Dispatcher, HandlerRegistry, RecoveryConfig, RecoveryError,
    StageError, StageHandler,
};

struct AlwaysFail;

#[async_trait]
impl StageHandler for AlwaysFail {
    async fn attempt(&self, _payload: &serde_json::Value) -> Result<(), StageError> {
        Err(StageError::transient("synthesis timed out"))
    }
}

struct AlwaysPermanent;

#[async_trait]
impl StageHandler for AlwaysPermanent {
    async fn attempt(&self, _payload: &serde_json::Value) -> Result<(), StageError> {
        Err(StageError::permanent("malformed payload"))
    }
}

struct Counting {
    calls: Arc<AtomicU32>,
    delay: Duration,
}

#[async_trait]
impl StageHandler for Counting {
    async fn attempt(&self, _payload: &serde_json::Value) -> Result<(), StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(())
    }
}

#[derive(Default)]
struct CollectingAlerts {
    messages: Mutex<Vec<String>>,
}

#[async_trait]
impl AlertSink for CollectingAlerts {
    async fn send(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
    }
}

fn test_config(dir: &Path) -> RecoveryConfig {
    RecoveryConfig {
        state_dir: dir.to_path_buf(),
        base_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
        max_attempts: 3,
        failure_threshold: 5,
        cooldown_base: Duration::from_secs(3600),
        cooldown_max: Duration::from_secs(3600),
        stage_timeout: Duration::from_secs(5),
        stale_flight_timeout: Duration::from_secs(600),
        ..Default::default()
    }
}

fn registry_for(stage: Stage, handler: impl StageHandler + 'static) -> HandlerRegistry {
    HandlerRegistry::builder()
        .register(stage, handler)
        .build_partial()
}

fn voiceover_job(id: &str) -> Job {
    Job::with_id(
        JobId::from_string(id),
        Stage::Voiceover,
        serde_json::json!({"script_id": id}),
    )
}

#[tokio::test]
async fn exhausted_job_is_dead_lettered() {
    let dir = tempfile::tempdir().unwrap();
    let alerts = Arc::new(CollectingAlerts::default());
    let dispatcher = Dispatcher::new(
        test_config(dir.path()),
        registry_for(Stage::Voiceover, AlwaysFail),
        alerts.clone(),
    )
    .unwrap();

    dispatcher.enqueue(voiceover_job("s-1")).unwrap();

    for pass in 1..=3 {
        let report = dispatcher.run_once().await.unwrap();
        assert_eq!(report.attempted, 1, "pass {pass}");
    }

    // Third failure exhausts max_attempts=3.
    let entries = dispatcher.dead_letter_store().list().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].job.id.as_str(), "s-1");
    assert_eq!(entries[0].job.status, JobStatus::DeadLettered);
    assert_eq!(entries[0].job.attempt_count, 3);
    assert_eq!(entries[0].job.next_retry_at, None);

    // Moved out of the stage file.
    assert!(dispatcher.job_store().load(Stage::Voiceover).unwrap().is_empty());

    // Fourth pass has nothing to do: dead-lettered jobs are never retried.
    let report = dispatcher.run_once().await.unwrap();
    assert_eq!(report.attempted, 0);

    let messages = alerts.messages.lock().unwrap();
    assert!(messages.iter().any(|m| m.contains("dead-lettered")));
}

#[tokio::test]
async fn permanent_failure_goes_straight_to_dlq() {
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = Dispatcher::new(
        test_config(dir.path()),
        registry_for(Stage::Handoff, AlwaysPermanent),
        Arc::new(CollectingAlerts::default()),
    )
    .unwrap();

    dispatcher
        .enqueue(Job::with_id(
            JobId::from_string("h-1"),
            Stage::Handoff,
            serde_json::Value::Null,
        ))
        .unwrap();
    dispatcher.run_once().await.unwrap();

    let entries = dispatcher.dead_letter_store().list().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].job.attempt_count, 1);
    assert!(entries[0].reason.contains("malformed payload"));
}

#[tokio::test]
async fn open_circuit_skips_jobs_without_penalty() {
    let dir = tempfile::tempdir().unwrap();
    let alerts = Arc::new(CollectingAlerts::default());
    let mut config = test_config(dir.path());
    config.max_attempts = 10; // keep the job alive past the breaker threshold
    let dispatcher = Dispatcher::new(
        config,
        registry_for(Stage::Upload, AlwaysFail),
        alerts.clone(),
    )
    .unwrap();

    dispatcher
        .enqueue(Job::with_id(
            JobId::from_string("u-1"),
            Stage::Upload,
            serde_json::Value::Null,
        ))
        .unwrap();

    // Five consecutive failures open the circuit.
    for _ in 0..5 {
        dispatcher.run_once().await.unwrap();
    }
    let record = dispatcher
        .circuit_breaker()
        .store()
        .load(Stage::Upload)
        .unwrap();
    assert!(record.is_open());

    // Before the cooldown, the job is skipped: unchanged attempt count,
    // still retrying.
    let report = dispatcher.run_once().await.unwrap();
    assert_eq!(report.attempted, 0);
    assert_eq!(report.skipped, 1);

    let jobs = dispatcher.job_store().load(Stage::Upload).unwrap();
    assert_eq!(jobs[0].attempt_count, 5);
    assert_eq!(jobs[0].status, JobStatus::Retrying);

    let messages = alerts.messages.lock().unwrap();
    assert!(messages.iter().any(|m| m.contains("OPEN for upload")));
}

#[tokio::test]
async fn unknown_stage_dead_letters_without_an_attempt() {
    let dir = tempfile::tempdir().unwrap();
    // Registry with no voiceover handler.
    let dispatcher = Dispatcher::new(
        test_config(dir.path()),
        registry_for(Stage::Upload, AlwaysFail),
        Arc::new(CollectingAlerts::default()),
    )
    .unwrap();

    dispatcher.enqueue(voiceover_job("s-2")).unwrap();
    let report = dispatcher.run_once().await.unwrap();
    assert_eq!(report.attempted, 0);
    assert_eq!(report.dead_lettered, 1);

    let entries = dispatcher.dead_letter_store().list().unwrap();
    assert_eq!(entries[0].job.attempt_count, 0);
    assert_eq!(entries[0].reason, "unknown stage");

    // The breaker was not penalized for a config error.
    let record = dispatcher
        .circuit_breaker()
        .store()
        .load(Stage::Voiceover)
        .unwrap();
    assert_eq!(record.failure_count, 0);
}

#[tokio::test]
async fn unknown_stage_never_claims_the_half_open_trial() {
    let dir = tempfile::tempdir().unwrap();
    let config = RecoveryConfig {
        cooldown_base: Duration::ZERO, // open breakers are trial-ready at once
        cooldown_max: Duration::ZERO,
        ..test_config(dir.path())
    };
    let breaker = CircuitBreaker::new(
        drama_store::BreakerStore::new(dir.path()).unwrap(),
        config.failure_threshold,
        Duration::ZERO,
        Duration::ZERO,
        config.stale_flight_timeout,
    );
    let now = Utc::now();
    for _ in 0..5 {
        breaker.record_failure(Stage::Upload, "timeout", now).unwrap();
    }

    // No upload handler registered: the job is dead-lettered as a config
    // error, and must not consume the single trial dispatch.
    let dispatcher = Dispatcher::new(
        config,
        registry_for(Stage::Voiceover, AlwaysFail),
        Arc::new(CollectingAlerts::default()),
    )
    .unwrap();
    dispatcher
        .enqueue(Job::with_id(
            JobId::from_string("u-3"),
            Stage::Upload,
            serde_json::Value::Null,
        ))
        .unwrap();

    let report = dispatcher.run_once().await.unwrap();
    assert_eq!(report.dead_lettered, 1);

    let record = dispatcher
        .circuit_breaker()
        .store()
        .load(Stage::Upload)
        .unwrap();
    assert!(!record.trial_in_flight);

    // The trial is still available to a real dispatch.
    assert!(dispatcher
        .circuit_breaker()
        .allow_dispatch(Stage::Upload, Utc::now())
        .unwrap());
}

#[tokio::test]
async fn requeued_job_is_eligible_on_next_pass() {
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(AtomicU32::new(0));

    // First exhaust the job against a failing handler.
    {
        let dispatcher = Dispatcher::new(
            test_config(dir.path()),
            registry_for(Stage::Voiceover, AlwaysFail),
            Arc::new(CollectingAlerts::default()),
        )
        .unwrap();
        dispatcher.enqueue(voiceover_job("s-3")).unwrap();
        for _ in 0..3 {
            dispatcher.run_once().await.unwrap();
        }
        assert_eq!(dispatcher.dead_letter_store().len().unwrap(), 1);
    }

    // Then requeue and let a healthy handler finish it.
    let dispatcher = Dispatcher::new(
        test_config(dir.path()),
        registry_for(
            Stage::Voiceover,
            Counting {
                calls: calls.clone(),
                delay: Duration::ZERO,
            },
        ),
        Arc::new(CollectingAlerts::default()),
    )
    .unwrap();

    let job = dispatcher.requeue(&JobId::from_string("s-3")).unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.attempt_count, 0);

    let report = dispatcher.run_once().await.unwrap();
    assert_eq!(report.succeeded, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(dispatcher.dead_letter_store().is_empty().unwrap());
}

#[tokio::test]
async fn single_flight_across_overlapping_passes() {
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(AtomicU32::new(0));
    let dispatcher = Arc::new(
        Dispatcher::new(
            test_config(dir.path()),
            registry_for(
                Stage::Voiceover,
                Counting {
                    calls: calls.clone(),
                    delay: Duration::from_millis(200),
                },
            ),
            Arc::new(CollectingAlerts::default()),
        )
        .unwrap(),
    );

    dispatcher.enqueue(voiceover_job("s-4")).unwrap();

    let a = tokio::spawn({
        let d = dispatcher.clone();
        async move { d.run_once().await.unwrap() }
    });
    let b = tokio::spawn({
        let d = dispatcher.clone();
        async move { d.run_once().await.unwrap() }
    });
    a.await.unwrap();
    b.await.unwrap();

    // Exactly one invocation despite two overlapping passes.
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let jobs = dispatcher.job_store().load(Stage::Voiceover).unwrap();
    assert_eq!(jobs[0].status, JobStatus::Succeeded);
}

#[tokio::test]
async fn stale_in_flight_job_is_reclaimed() {
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(AtomicU32::new(0));
    let dispatcher = Dispatcher::new(
        test_config(dir.path()),
        registry_for(
            Stage::Voiceover,
            Counting {
                calls: calls.clone(),
                delay: Duration::ZERO,
            },
        ),
        Arc::new(CollectingAlerts::default()),
    )
    .unwrap();

    // Simulate a crash mid-call: an in-flight marker older than the stale
    // timeout, two attempts already on the books.
    let mut job = voiceover_job("s-5");
    job.attempt_count = 2;
    job.status = JobStatus::Retrying;
    job.in_flight_since = Some(Utc::now() - chrono::Duration::hours(1));
    dispatcher.job_store().upsert(job).unwrap();

    let report = dispatcher.run_once().await.unwrap();
    assert_eq!(report.reclaimed, 1);
    assert_eq!(report.succeeded, 1);

    let jobs = dispatcher.job_store().load(Stage::Voiceover).unwrap();
    assert_eq!(jobs[0].status, JobStatus::Succeeded);
    // The reclaim itself did not consume an attempt.
    assert_eq!(jobs[0].attempt_count, 2);
}

#[tokio::test]
async fn half_open_trial_success_recloses_breaker() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let breaker = CircuitBreaker::new(
        drama_store::BreakerStore::new(dir.path()).unwrap(),
        config.failure_threshold,
        Duration::ZERO, // cooldown elapses immediately
        Duration::ZERO,
        config.stale_flight_timeout,
    );
    let now = Utc::now();
    for _ in 0..5 {
        breaker.record_failure(Stage::Upload, "timeout", now).unwrap();
    }

    let calls = Arc::new(AtomicU32::new(0));
    let dispatcher = Dispatcher::new(
        RecoveryConfig {
            cooldown_base: Duration::ZERO,
            cooldown_max: Duration::ZERO,
            ..config
        },
        registry_for(
            Stage::Upload,
            Counting {
                calls: calls.clone(),
                delay: Duration::ZERO,
            },
        ),
        Arc::new(CollectingAlerts::default()),
    )
    .unwrap();

    dispatcher
        .enqueue(Job::with_id(
            JobId::from_string("u-2"),
            Stage::Upload,
            serde_json::Value::Null,
        ))
        .unwrap();

    let report = dispatcher.run_once().await.unwrap();
    assert_eq!(report.succeeded, 1);

    let record = dispatcher
        .circuit_breaker()
        .store()
        .load(Stage::Upload)
        .unwrap();
    assert_eq!(record.failure_count, 0);
    assert!(!record.is_open());
}

#[tokio::test]
async fn corrupt_state_refuses_to_run() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("jobs")).unwrap();
    std::fs::write(dir.path().join("jobs/scout.json"), "{broken").unwrap();

    let result = Dispatcher::new(
        test_config(dir.path()),
        HandlerRegistry::builder().build_partial(),
        Arc::new(CollectingAlerts::default()),
    );
    assert!(matches!(result, Err(RecoveryError::Store(_))));
}

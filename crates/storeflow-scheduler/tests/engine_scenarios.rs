//! End-to-end batch scenarios.
//!
//! Drives `Engine::process_batch` with an instrumented processor and
//! checks the batch-level guarantees: every job ends in exactly one place,
//! retries stop at the ceiling, a job never runs twice at once, and the
//! number of jobs in flight never exceeds the chosen degree.

use std::collections::{HashMap, HashSet};
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};
use std::time::Duration;

use serde_json::{json, Value};
use storeflow_core::{
    EngineConfig, Job, JobStatus, ProcessOutcome, ResourceSnapshot, RetirementPolicy,
    StrategyThresholds,
};
use storeflow_monitor::ResourceSampler;
use storeflow_scheduler::{Engine, EngineError, Processor};

// ── Test processor ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum Behavior {
    Succeed,
    /// Fail the first `n` calls for a job, then succeed.
    FailTimes(u32),
    AlwaysFail,
    Hang,
    Panic,
}

struct TestProcessor {
    behavior: Behavior,
    overrides: HashMap<String, Behavior>,
    delay: Duration,
    /// Instance creations allowed before `create_instance` starts failing.
    instance_budget: Option<usize>,
    calls: Mutex<HashMap<String, u32>>,
    running: Mutex<HashSet<String>>,
    overlaps: AtomicUsize,
    active: AtomicUsize,
    peak_active: AtomicUsize,
    created: AtomicUsize,
    destroyed: AtomicUsize,
}

impl TestProcessor {
    fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            overrides: HashMap::new(),
            delay: Duration::ZERO,
            instance_budget: None,
            calls: Mutex::new(HashMap::new()),
            running: Mutex::new(HashSet::new()),
            overlaps: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            peak_active: AtomicUsize::new(0),
            created: AtomicUsize::new(0),
            destroyed: AtomicUsize::new(0),
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn with_override(mut self, job_id: &str, behavior: Behavior) -> Self {
        self.overrides.insert(job_id.to_string(), behavior);
        self
    }

    fn with_instance_budget(mut self, budget: usize) -> Self {
        self.instance_budget = Some(budget);
        self
    }

    fn calls_for(&self, job_id: &str) -> u32 {
        self.calls.lock().unwrap().get(job_id).copied().unwrap_or(0)
    }

    /// Ids of every job the processor was called for, sorted.
    fn called_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.calls.lock().unwrap().keys().cloned().collect();
        ids.sort();
        ids
    }
}

/// Marks a job as no longer running, even when the call is dropped on
/// timeout or unwinds from a panic.
struct Running<'a> {
    processor: &'a TestProcessor,
    job_id: String,
}

impl Drop for Running<'_> {
    fn drop(&mut self) {
        self.processor.active.fetch_sub(1, Ordering::SeqCst);
        self.processor.running.lock().unwrap().remove(&self.job_id);
    }
}

impl Processor for TestProcessor {
    type Instance = usize;

    async fn create_instance(&self) -> anyhow::Result<usize> {
        let n = self.created.fetch_add(1, Ordering::SeqCst);
        if let Some(budget) = self.instance_budget {
            if n >= budget {
                anyhow::bail!("browser launch failed");
            }
        }
        Ok(n)
    }

    async fn process(&self, _instance: &mut usize, job: &Job) -> anyhow::Result<ProcessOutcome> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            let count = calls.entry(job.id.clone()).or_default();
            *count += 1;
            *count
        };
        let fresh = self.running.lock().unwrap().insert(job.id.clone());
        if !fresh {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_active.fetch_max(now, Ordering::SeqCst);
        let _running = Running {
            processor: self,
            job_id: job.id.clone(),
        };

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let behavior = self.overrides.get(&job.id).copied().unwrap_or(self.behavior);
        match behavior {
            Behavior::Succeed => Ok(ProcessOutcome::success(Some(json!({ "store": job.id })))),
            Behavior::FailTimes(n) if call <= n => Ok(ProcessOutcome::failure(format!(
                "download button not found (call {call})"
            ))),
            Behavior::FailTimes(_) => Ok(ProcessOutcome::success(None)),
            Behavior::AlwaysFail => anyhow::bail!("login rejected"),
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(ProcessOutcome::success(None))
            }
            Behavior::Panic => panic!("element handle detached"),
        }
    }

    async fn destroy_instance(&self, _instance: usize) {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
    }
}

struct FixedSampler(f64);

impl ResourceSampler for FixedSampler {
    fn sample(&mut self) -> ResourceSnapshot {
        ResourceSnapshot::new(self.0, 10.0)
    }
}

// ── Helpers ────────────────────────────────────────────────────────

fn config() -> EngineConfig {
    EngineConfig {
        idle_poll_ms: 5,
        monitor_interval_ms: 60_000,
        ..EngineConfig::default()
    }
}

fn engine(config: EngineConfig, processor: Arc<TestProcessor>) -> Engine<TestProcessor> {
    engine_with_memory(config, processor, 100.0)
}

fn engine_with_memory(
    config: EngineConfig,
    processor: Arc<TestProcessor>,
    memory_mb: f64,
) -> Engine<TestProcessor> {
    Engine::new(config, processor)
        .unwrap()
        .with_sampler_factory(Box::new(move || {
            Box::new(FixedSampler(memory_mb)) as Box<dyn ResourceSampler>
        }))
}

fn jobs(n: usize) -> Vec<Job> {
    (0..n)
        .map(|i| Job::new(format!("store-{i:03}"), json!({ "store": i })))
        .collect()
}

// ── Scenarios ──────────────────────────────────────────────────────

#[tokio::test]
async fn small_batch_runs_sequentially() {
    let processor = Arc::new(TestProcessor::new(Behavior::Succeed));
    let engine = engine(config(), processor.clone());

    let summary = engine.process_batch(jobs(3)).await.unwrap();

    assert_eq!(summary.total_stores, 3);
    assert_eq!(summary.successful_stores, 3);
    assert_eq!(summary.failed_stores, 0);
    assert_eq!(summary.peak_concurrency, 1);
    assert_eq!(summary.strategy.unwrap().concurrency_degree, 1);
    assert!((summary.success_rate - 1.0).abs() < 1e-9);
    assert_eq!(processor.peak_active.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn job_succeeds_after_two_failures() {
    let processor = Arc::new(TestProcessor::new(Behavior::FailTimes(2)));
    let engine = engine(config(), processor.clone());

    let summary = engine.process_batch(jobs(1)).await.unwrap();
    assert_eq!(summary.successful_stores, 1);
    assert_eq!(summary.failed_stores, 0);
    assert_eq!(summary.retries, 2);

    let results = engine.results().await;
    let done = &results.completed[0];
    assert_eq!(done.job.status, JobStatus::Completed);
    assert_eq!(done.job.attempts, 3);
    assert!(done.job.last_error.is_none());
    assert_eq!(processor.calls_for("store-000"), 3);
}

#[tokio::test]
async fn job_fails_after_exhausting_retries() {
    let processor = Arc::new(TestProcessor::new(Behavior::AlwaysFail));
    let engine = engine(
        EngineConfig {
            retry_attempts: 3,
            ..config()
        },
        processor.clone(),
    );

    let summary = engine.process_batch(jobs(1)).await.unwrap();
    assert_eq!(summary.successful_stores, 0);
    assert_eq!(summary.failed_stores, 1);
    assert_eq!(summary.success_rate, 0.0);

    let results = engine.results().await;
    let failed = &results.failed[0];
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.attempts, 4);
    assert!(failed.last_error.as_deref().unwrap().contains("login rejected"));
    assert_eq!(processor.calls_for("store-000"), 4);
}

#[tokio::test]
async fn large_batch_uses_full_concurrency() {
    let processor = Arc::new(TestProcessor::new(Behavior::Succeed).with_delay(Duration::from_millis(5)));
    let engine = engine(
        EngineConfig {
            max_concurrent_stores: 10,
            ..config()
        },
        processor.clone(),
    );

    let summary = engine.process_batch(jobs(60)).await.unwrap();

    assert_eq!(summary.strategy.unwrap().concurrency_degree, 10);
    assert_eq!(summary.successful_stores, 60);
    assert!(summary.peak_concurrency <= 10);
    assert!(processor.peak_active.load(Ordering::SeqCst) <= 10);
}

// ── Properties ─────────────────────────────────────────────────────

#[tokio::test]
async fn every_job_ends_in_exactly_one_place() {
    let processor = Arc::new(
        TestProcessor::new(Behavior::Succeed)
            .with_delay(Duration::from_millis(2))
            .with_override("store-003", Behavior::AlwaysFail)
            .with_override("store-007", Behavior::FailTimes(1))
            .with_override("store-011", Behavior::Panic)
            .with_override("store-019", Behavior::FailTimes(3)),
    );
    let engine = engine(
        EngineConfig {
            retry_attempts: 2,
            ..config()
        },
        processor.clone(),
    );

    let summary = engine.process_batch(jobs(30)).await.unwrap();
    assert_eq!(summary.successful_stores + summary.failed_stores, 30);
    assert_eq!(summary.remaining_stores, 0);
    assert_eq!(summary.failed_stores, 3);

    let results = engine.results().await;
    let mut seen = HashSet::new();
    for id in results
        .completed
        .iter()
        .map(|c| &c.job.id)
        .chain(results.failed.iter().map(|j| &j.id))
    {
        assert!(seen.insert(id.clone()), "{id} reported twice");
    }
    assert_eq!(seen.len(), 30);
    assert!(results.remaining.is_empty());

    let failed: Vec<&str> = results.failed.iter().map(|j| j.id.as_str()).collect();
    assert_eq!(failed, vec!["store-003", "store-011", "store-019"]);
    for job in &results.failed {
        assert_eq!(job.attempts, 3);
    }
}

#[tokio::test]
async fn a_job_is_never_processed_twice_at_once() {
    let processor = Arc::new(
        TestProcessor::new(Behavior::FailTimes(2)).with_delay(Duration::from_millis(3)),
    );
    let engine = engine(config(), processor.clone());

    let summary = engine.process_batch(jobs(40)).await.unwrap();
    assert_eq!(summary.successful_stores, 40);
    assert_eq!(processor.overlaps.load(Ordering::SeqCst), 0);

    let degree = summary.strategy.unwrap().concurrency_degree;
    assert!(processor.peak_active.load(Ordering::SeqCst) <= degree);
    assert!(summary.peak_concurrency <= degree);
}

#[tokio::test]
async fn retries_never_exceed_the_ceiling() {
    let processor = Arc::new(TestProcessor::new(Behavior::AlwaysFail));
    let engine = engine(
        EngineConfig {
            retry_attempts: 1,
            ..config()
        },
        processor.clone(),
    );

    let summary = engine.process_batch(jobs(8)).await.unwrap();
    assert_eq!(summary.failed_stores, 8);
    assert_eq!(summary.retries, 8);
    for i in 0..8 {
        assert_eq!(processor.calls_for(&format!("store-{i:03}")), 2);
    }
}

#[tokio::test]
async fn zero_retries_fails_on_first_error() {
    let processor = Arc::new(TestProcessor::new(Behavior::AlwaysFail));
    let engine = engine(
        EngineConfig {
            retry_attempts: 0,
            ..config()
        },
        processor.clone(),
    );

    let summary = engine.process_batch(jobs(2)).await.unwrap();
    assert_eq!(summary.failed_stores, 2);
    assert_eq!(summary.retries, 0);
    assert_eq!(processor.calls_for("store-000"), 1);
}

#[tokio::test]
async fn panics_are_contained_to_the_job() {
    let processor = Arc::new(TestProcessor::new(Behavior::Succeed).with_override("store-001", Behavior::Panic));
    let engine = engine(
        EngineConfig {
            retry_attempts: 0,
            ..config()
        },
        processor.clone(),
    );

    let summary = engine.process_batch(jobs(4)).await.unwrap();
    assert_eq!(summary.successful_stores, 3);
    assert_eq!(summary.failed_stores, 1);

    let results = engine.results().await;
    let error = results.failed[0].last_error.as_deref().unwrap();
    assert!(error.contains("panicked"));
    assert!(error.contains("element handle detached"));
}

#[tokio::test]
async fn hung_calls_are_abandoned_and_retried() {
    let processor = Arc::new(TestProcessor::new(Behavior::Hang));
    let engine = engine(
        EngineConfig {
            queue_timeout_ms: 50,
            retry_attempts: 1,
            ..config()
        },
        processor.clone(),
    );

    let summary = engine.process_batch(jobs(1)).await.unwrap();
    assert_eq!(summary.failed_stores, 1);

    let results = engine.results().await;
    let job = &results.failed[0];
    assert_eq!(job.attempts, 2);
    assert!(job.last_error.as_deref().unwrap().contains("abandoned"));

    // Both timed-out instances were discarded, nothing is left running.
    assert_eq!(processor.created.load(Ordering::SeqCst), 2);
    assert_eq!(processor.destroyed.load(Ordering::SeqCst), 2);
    assert_eq!(processor.active.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn instances_are_released_when_the_batch_ends() {
    let processor = Arc::new(TestProcessor::new(Behavior::Succeed).with_delay(Duration::from_millis(1)));
    let engine = engine(config(), processor.clone());

    engine.process_batch(jobs(25)).await.unwrap();

    let created = processor.created.load(Ordering::SeqCst);
    assert!(created > 0);
    assert_eq!(processor.destroyed.load(Ordering::SeqCst), created);
}

// ── Aborts ─────────────────────────────────────────────────────────

#[tokio::test]
async fn aborts_when_no_instance_can_be_created() {
    let processor = Arc::new(TestProcessor::new(Behavior::Succeed).with_instance_budget(0));
    let engine = engine(config(), processor.clone());

    let err = engine.process_batch(jobs(3)).await.unwrap_err();
    match &err {
        EngineError::Aborted { remaining, .. } => assert_eq!(*remaining, 3),
        other => panic!("expected abort, got {other}"),
    }
    let summary = err.partial_summary().unwrap();
    assert_eq!(summary.successful_stores, 0);
    assert_eq!(summary.remaining_stores, 3);
    // Nothing ever reached the processor.
    assert_eq!(summary.peak_concurrency, 0);

    // Jobs that never reached the processor keep their attempt count.
    let results = engine.results().await;
    assert_eq!(results.remaining.len(), 3);
    assert!(results.remaining.iter().all(|j| j.attempts == 0));
    assert!(results.remaining.iter().all(|j| j.status == JobStatus::Queued));
}

#[tokio::test]
async fn abort_keeps_partial_results() {
    // One worker, one slot recycled after two uses, and only one instance
    // can ever be created: two jobs finish before the batch aborts.
    let processor = Arc::new(TestProcessor::new(Behavior::Succeed).with_instance_budget(1));
    let engine = engine(
        EngineConfig {
            max_processors_per_worker: 1,
            recycle_after_uses: 2,
            ..config()
        },
        processor.clone(),
    );

    let err = engine.process_batch(jobs(5)).await.unwrap_err();
    let summary = err.partial_summary().unwrap();
    assert_eq!(summary.successful_stores, 2);
    assert_eq!(summary.remaining_stores, 3);

    let results = engine.results().await;
    assert_eq!(results.completed.len(), 2);
    assert_eq!(results.remaining.len(), 3);
    assert_eq!(results.summary.as_ref(), Some(summary));
}

#[tokio::test]
async fn abort_accounts_for_jobs_finished_by_other_workers() {
    // Four workers each get one instance, recycle it after one job and then
    // cannot create another: the batch aborts as the first jobs complete.
    for _ in 0..10 {
        let processor = Arc::new(
            TestProcessor::new(Behavior::Succeed)
                .with_delay(Duration::from_millis(30))
                .with_instance_budget(4),
        );
        let engine = engine(
            EngineConfig {
                recycle_after_uses: 1,
                ..pressure_config(RetirementPolicy::Never)
            },
            processor.clone(),
        );

        let err = engine.process_batch(jobs(10)).await.unwrap_err();
        let summary = err.partial_summary().unwrap();
        assert_eq!(summary.successful_stores, 4);
        assert_eq!(summary.failed_stores, 0);
        assert_eq!(summary.remaining_stores, 6);
        assert!(summary.peak_concurrency <= 4);

        let results = engine.results().await;
        let completed: Vec<String> = results.completed.iter().map(|c| c.job.id.clone()).collect();
        assert_eq!(completed, processor.called_ids());
        assert!(results.completed.iter().all(|c| c.job.attempts == 1));
        assert!(results.remaining.iter().all(|j| j.attempts == 0));
    }
}

#[tokio::test]
async fn abort_waits_for_every_worker_to_fail() {
    let processor = Arc::new(TestProcessor::new(Behavior::Succeed).with_instance_budget(0));
    let engine = engine(config(), processor.clone());

    // Five workers, each must fail to get an instance before the abort.
    let err = engine.process_batch(jobs(10)).await.unwrap_err();
    assert!(matches!(err, EngineError::Aborted { remaining: 10, .. }));
    assert!(processor.created.load(Ordering::SeqCst) >= 5);
}

// ── Resource pressure ──────────────────────────────────────────────

fn pressure_config(retirement: RetirementPolicy) -> EngineConfig {
    EngineConfig {
        monitor_interval_ms: 10,
        retirement,
        strategy: StrategyThresholds {
            sequential_max_jobs: 0,
            small_batch_max_jobs: 100,
            small_batch_degree: 4,
            medium_batch_max_jobs: 100,
            medium_batch_degree: 4,
        },
        ..config()
    }
}

#[tokio::test]
async fn memory_pressure_retires_idle_workers() {
    let processor = Arc::new(TestProcessor::new(Behavior::Succeed).with_delay(Duration::from_millis(100)));
    let engine = engine_with_memory(
        pressure_config(RetirementPolicy::NoCheckedOutSlots),
        processor.clone(),
        4096.0,
    );

    let summary = engine.process_batch(jobs(2)).await.unwrap();
    assert_eq!(summary.successful_stores, 2);
    assert!(summary.workers_retired >= 1);
    assert!(summary.workers_retired <= 3);
    assert_eq!(summary.peak_memory_mb, Some(4096.0));
}

#[tokio::test]
async fn pressure_never_starves_the_batch() {
    let processor = Arc::new(TestProcessor::new(Behavior::Succeed).with_delay(Duration::from_millis(10)));
    let engine = engine_with_memory(
        pressure_config(RetirementPolicy::NoCheckedOutSlots),
        processor.clone(),
        4096.0,
    );

    let summary = engine.process_batch(jobs(12)).await.unwrap();
    assert_eq!(summary.successful_stores, 12);
    assert!(summary.workers_retired <= 3);
}

#[tokio::test]
async fn never_policy_still_releases_idle_instances() {
    let processor = Arc::new(TestProcessor::new(Behavior::Succeed).with_delay(Duration::from_millis(20)));
    let engine = engine_with_memory(pressure_config(RetirementPolicy::Never), processor.clone(), 4096.0);

    // Four workers, eight jobs: every worker serves a second job after a
    // pressure sample has asked it to drop its idle instance.
    let summary = engine.process_batch(jobs(8)).await.unwrap();
    assert_eq!(summary.successful_stores, 8);
    assert_eq!(summary.workers_retired, 0);

    // Without trimming each worker would reuse a single instance.
    let created = processor.created.load(Ordering::SeqCst);
    assert!(created > 4, "instances were never trimmed ({created} created)");
    assert_eq!(processor.destroyed.load(Ordering::SeqCst), created);
}

#[tokio::test]
async fn no_retirement_below_the_ceiling() {
    let processor = Arc::new(TestProcessor::new(Behavior::Succeed).with_delay(Duration::from_millis(30)));
    let engine = engine_with_memory(
        pressure_config(RetirementPolicy::NoCheckedOutSlots),
        processor.clone(),
        512.0,
    );

    let summary = engine.process_batch(jobs(2)).await.unwrap();
    assert_eq!(summary.workers_retired, 0);
    assert!(summary.resource_efficiency > 0.0);
}

// ── Lifecycle ──────────────────────────────────────────────────────

#[tokio::test]
async fn shutdown_reports_remaining_jobs() {
    let processor = Arc::new(TestProcessor::new(Behavior::Succeed).with_delay(Duration::from_millis(30)));
    let engine = engine(config(), processor.clone());

    let run = engine.process_batch(jobs(20));
    let stop = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        engine.shutdown();
    };
    let (result, ()) = tokio::join!(run, stop);

    let summary = result.unwrap();
    assert!(summary.remaining_stores > 0);
    assert_eq!(summary.failed_stores, 0);
    assert_eq!(summary.successful_stores + summary.remaining_stores, 20);

    let results = engine.results().await;
    assert_eq!(results.remaining.len(), summary.remaining_stores);
    assert_eq!(processor.active.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn shutdown_keeps_the_in_flight_result() {
    for _ in 0..40 {
        let processor = Arc::new(TestProcessor::new(Behavior::Succeed).with_delay(Duration::from_millis(40)));
        let engine = engine(config(), processor.clone());

        let run = engine.process_batch(jobs(1));
        let stop = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            engine.shutdown();
        };
        let (result, ()) = tokio::join!(run, stop);

        let summary = result.unwrap();
        assert_eq!(summary.successful_stores, 1);
        assert_eq!(summary.remaining_stores, 0);
        assert_eq!(summary.retries, 0);

        let results = engine.results().await;
        assert_eq!(results.completed[0].job.attempts, 1);
        assert!(results.completed[0].job.last_error.is_none());
    }
}

#[tokio::test]
async fn shutdown_counts_every_in_flight_job() {
    for _ in 0..20 {
        let processor = Arc::new(TestProcessor::new(Behavior::Succeed).with_delay(Duration::from_millis(60)));
        let engine = engine(config(), processor.clone());

        let run = engine.process_batch(jobs(8));
        let stop = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            engine.shutdown();
        };
        let (result, ()) = tokio::join!(run, stop);

        let summary = result.unwrap();
        let degree = summary.strategy.unwrap().concurrency_degree;
        assert_eq!(summary.successful_stores, degree);
        assert_eq!(summary.remaining_stores, 8 - degree);
        assert_eq!(summary.failed_stores, 0);

        // Every job the processor saw is reported as completed.
        let results = engine.results().await;
        let completed: Vec<String> = results.completed.iter().map(|c| c.job.id.clone()).collect();
        assert_eq!(completed, processor.called_ids());
        assert!(results.remaining.iter().all(|j| j.attempts == 0));
    }
}

#[tokio::test]
async fn engine_can_run_another_batch_after_shutdown() {
    let processor = Arc::new(TestProcessor::new(Behavior::Succeed));
    let engine = engine(config(), processor);

    engine.shutdown();
    let summary = engine.process_batch(jobs(4)).await.unwrap();
    assert_eq!(summary.successful_stores, 4);

    let summary = engine.process_batch(jobs(2)).await.unwrap();
    assert_eq!(summary.total_stores, 2);
    assert_eq!(engine.results().await.completed.len(), 2);
}

#[tokio::test]
async fn rejects_duplicate_job_ids() {
    let engine = engine(config(), Arc::new(TestProcessor::new(Behavior::Succeed)));
    let batch = vec![
        Job::new("store-a", Value::Null),
        Job::new("store-b", Value::Null),
        Job::new("store-a", Value::Null),
    ];

    let err = engine.process_batch(batch).await.unwrap_err();
    assert!(matches!(err, EngineError::DuplicateJob(ref id) if id == "store-a"));
}

#[tokio::test]
async fn empty_batch_yields_empty_summary() {
    let engine = engine(config(), Arc::new(TestProcessor::new(Behavior::Succeed)));
    let summary = engine.process_batch(Vec::new()).await.unwrap();
    assert_eq!(summary.total_stores, 0);
    assert_eq!(summary.successful_stores, 0);
    assert!(engine.results().await.summary.is_some());
}

#[tokio::test]
async fn one_batch_at_a_time() {
    let processor = Arc::new(TestProcessor::new(Behavior::Succeed).with_delay(Duration::from_millis(20)));
    let engine = engine(config(), processor);

    let (a, b) = tokio::join!(engine.process_batch(jobs(2)), engine.process_batch(jobs(2)));
    let rejected = [&a, &b]
        .iter()
        .filter(|r| matches!(r, Err(EngineError::AlreadyRunning)))
        .count();
    assert_eq!(rejected, 1);
    assert!(a.is_ok() || b.is_ok());
}

#[test]
fn invalid_config_is_rejected() {
    let result = Engine::new(
        EngineConfig {
            max_concurrent_stores: 0,
            ..EngineConfig::default()
        },
        Arc::new(TestProcessor::new(Behavior::Succeed)),
    );
    assert!(matches!(result, Err(EngineError::Config(_))));
}

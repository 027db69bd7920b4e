//! Engine — runs a batch of store jobs across a bounded set of workers.
//!
//! The engine is the control loop that:
//! - Picks a concurrency degree for the batch and spawns that many workers
//! - Owns the job queue and every job map through a single coordinator
//! - Turns completion records into retry-or-finalize decisions
//! - Throttles itself when the resource monitor reports memory pressure
//! - Produces the batch summary and keeps partial results after an abort

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch, RwLock};
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use storeflow_core::{
    EngineConfig, Job, JobId, JobStatus, ProcessOutcome, ProcessingStrategy, ResourceSnapshot,
    RetirementPolicy,
};
use storeflow_monitor::{ProcessSampler, ResourceHistory, ResourceMonitor, ResourceSampler};

use crate::error::{EngineError, EngineResult};
use crate::load_balancer::choose_strategy_with;
use crate::processor::Processor;
use crate::queue::JobQueue;
use crate::stats::{BatchStats, Summary};
use crate::worker::{
    Assignment, CompletionRecord, DequeueReply, Worker, WorkerId, WorkerMessage, WorkerOptions,
    WorkerState,
};

/// Builds a fresh resource sampler for each batch.
pub type SamplerFactory = Box<dyn Fn() -> Box<dyn ResourceSampler> + Send + Sync>;

/// A job that finished successfully, with whatever the processor returned.
#[derive(Debug, Clone, Serialize)]
pub struct CompletedJob {
    pub job: Job,
    pub data: Option<Value>,
    pub processing_time_ms: u64,
}

/// Where every job of the latest batch ended up.
///
/// During a run this is refreshed periodically; after a run (including an
/// aborted one) it is final and `remaining` holds the jobs that never
/// reached a terminal state.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchResults {
    pub completed: Vec<CompletedJob>,
    pub failed: Vec<Job>,
    pub remaining: Vec<Job>,
    pub summary: Option<Summary>,
}

pub struct Engine<P: Processor> {
    config: EngineConfig,
    processor: Arc<P>,
    sampler_factory: SamplerFactory,
    results: RwLock<BatchResults>,
    shutdown: watch::Sender<bool>,
    running: AtomicBool,
}

impl<P: Processor> Engine<P> {
    /// Create an engine. The configuration is validated up front.
    pub fn new(config: EngineConfig, processor: Arc<P>) -> EngineResult<Self> {
        config.validate()?;
        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            config,
            processor,
            sampler_factory: Box::new(|| Box::new(ProcessSampler::new()) as Box<dyn ResourceSampler>),
            results: RwLock::new(BatchResults::default()),
            shutdown,
            running: AtomicBool::new(false),
        })
    }

    /// Replace the process sampler (used to inject synthetic load).
    pub fn with_sampler_factory(mut self, factory: SamplerFactory) -> Self {
        self.sampler_factory = factory;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The strategy a batch of `job_count` jobs would run with.
    pub fn strategy_for(&self, job_count: usize) -> ProcessingStrategy {
        choose_strategy_with(
            job_count,
            self.config.max_concurrent_stores,
            &self.config.strategy,
        )
    }

    /// Results of the current or most recent batch.
    pub async fn results(&self) -> BatchResults {
        self.results.read().await.clone()
    }

    /// Ask the running batch to stop. Workers finish their current job;
    /// queued jobs are reported as remaining.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Run a batch to completion.
    ///
    /// Returns once the queue is drained and no job is in flight. Permanent
    /// job failures are part of a normal summary; only engine-level
    /// failures produce `EngineError::Aborted`, which still carries the
    /// partial summary (see also [`Engine::results`]).
    pub async fn process_batch(&self, jobs: Vec<Job>) -> EngineResult<Summary> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(EngineError::AlreadyRunning);
        }
        let _running = RunningGuard(&self.running);

        let mut seen = HashSet::with_capacity(jobs.len());
        for job in &jobs {
            if !seen.insert(job.id.as_str()) {
                return Err(EngineError::DuplicateJob(job.id.clone()));
            }
        }

        *self.results.write().await = BatchResults::default();
        self.shutdown.send_replace(false);

        if jobs.is_empty() {
            info!("empty batch, nothing to process");
            let summary = Summary::empty();
            self.results.write().await.summary = Some(summary.clone());
            return Ok(summary);
        }

        let strategy = self.strategy_for(jobs.len());
        info!(
            jobs = jobs.len(),
            degree = strategy.concurrency_degree,
            strategy = %strategy.label,
            "batch started"
        );

        // Resource monitor, on its own timer.
        let monitor = Arc::new(ResourceMonitor::new(
            self.config.monitor_interval(),
            self.config.history_limit,
        ));
        let (monitor_stop, monitor_stop_rx) = watch::channel(false);
        let sampler = (self.sampler_factory)();
        let m = monitor.clone();
        let monitor_handle = tokio::spawn(async move {
            m.run(sampler, monitor_stop_rx).await;
        });

        // Workers.
        let (tx, rx) = mpsc::channel(strategy.concurrency_degree * 2 + 1);
        let (worker_stop, worker_stop_rx) = watch::channel(false);
        let mut workers = JoinSet::new();
        let mut task_ids = HashMap::new();
        for idx in 0..strategy.concurrency_degree {
            let id = WorkerId(idx);
            let worker = Worker::new(
                id,
                self.processor.clone(),
                tx.clone(),
                worker_stop_rx.clone(),
                WorkerOptions {
                    pool_capacity: self.config.max_processors_per_worker,
                    recycle_after: self.config.recycle_after_uses,
                    idle_poll: self.config.idle_poll(),
                    timeout: self.config.queue_timeout(),
                },
            );
            let handle = workers.spawn(worker.run());
            task_ids.insert(handle.id(), id);
        }
        drop(tx);

        let mut coordinator = Coordinator::new(&self.config, strategy, jobs, worker_stop);
        coordinator
            .run(
                rx,
                &mut workers,
                &task_ids,
                monitor.subscribe(),
                self.shutdown.subscribe(),
                &self.results,
            )
            .await;

        monitor_stop.send_replace(true);
        if let Err(e) = monitor_handle.await {
            warn!(error = %e, "resource monitor task failed");
        }
        let history = monitor.history().await;

        let (summary, results, fatal) = coordinator.finish(&history);
        *self.results.write().await = results;

        info!(
            total = summary.total_stores,
            succeeded = summary.successful_stores,
            failed = summary.failed_stores,
            remaining = summary.remaining_stores,
            peak_concurrency = summary.peak_concurrency,
            elapsed_ms = summary.elapsed_ms,
            "batch finished"
        );

        match fatal {
            Some(reason) => Err(EngineError::Aborted {
                reason,
                remaining: summary.remaining_stores,
                summary: Box::new(summary),
            }),
            None => Ok(summary),
        }
    }
}

struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// ── Coordinator ─────────────────────────────────────────────────────

/// Coordinator's view of one worker.
struct WorkerEntry {
    state: WorkerState,
    current_job: Option<JobId>,
    /// `current_job` is inside the processor call.
    running: bool,
    pooled_slots: usize,
    retiring: bool,
    trim_requested: bool,
    slot_failed: bool,
}

impl WorkerEntry {
    fn new() -> Self {
        Self {
            state: WorkerState::Idle,
            current_job: None,
            running: false,
            pooled_slots: 0,
            retiring: false,
            trim_requested: false,
            slot_failed: false,
        }
    }

    fn is_live(&self) -> bool {
        self.state != WorkerState::Stopped
    }

    /// Live and not already marked for retirement.
    fn is_active(&self) -> bool {
        self.is_live() && !self.retiring
    }
}

/// Single owner of the queue, the job maps, the worker table and the
/// statistics. Workers reach it only through the engine channel, so every
/// dequeue and every completion is handled one at a time.
struct Coordinator<'a> {
    config: &'a EngineConfig,
    queue: JobQueue,
    in_flight: HashMap<JobId, Job>,
    completed: HashMap<JobId, CompletedJob>,
    failed: HashMap<JobId, Job>,
    workers: Vec<WorkerEntry>,
    worker_stop: watch::Sender<bool>,
    stats: BatchStats,
    finishing: bool,
    fatal: Option<String>,
    latest_sample: Option<ResourceSnapshot>,
}

impl<'a> Coordinator<'a> {
    fn new(
        config: &'a EngineConfig,
        strategy: ProcessingStrategy,
        jobs: Vec<Job>,
        worker_stop: watch::Sender<bool>,
    ) -> Self {
        let total = jobs.len();
        let mut queue = JobQueue::new();
        for job in jobs {
            queue.enqueue(job);
        }
        Self {
            config,
            queue,
            in_flight: HashMap::new(),
            completed: HashMap::new(),
            failed: HashMap::new(),
            workers: (0..strategy.concurrency_degree)
                .map(|_| WorkerEntry::new())
                .collect(),
            worker_stop,
            stats: BatchStats::new(total, strategy),
            finishing: false,
            fatal: None,
            latest_sample: None,
        }
    }

    async fn run(
        &mut self,
        mut rx: mpsc::Receiver<WorkerMessage>,
        workers: &mut JoinSet<WorkerId>,
        task_ids: &HashMap<tokio::task::Id, WorkerId>,
        mut samples: watch::Receiver<Option<ResourceSnapshot>>,
        mut shutdown: watch::Receiver<bool>,
        results: &RwLock<BatchResults>,
    ) {
        let every = self.config.progress_interval();
        let mut progress = tokio::time::interval_at(Instant::now() + every, every);

        while !workers.is_empty() {
            if !self.finishing && self.queue.is_empty() && self.in_flight.is_empty() {
                self.begin_finish("queue drained");
            }

            // Messages first: a worker's last report is queued before its exit.
            tokio::select! {
                biased;
                Some(message) = rx.recv() => self.handle_message(message),
                Some(joined) = workers.join_next_with_id() => self.handle_exit(joined, task_ids),
                Ok(()) = samples.changed() => {
                    let sample = *samples.borrow_and_update();
                    if let Some(sample) = sample {
                        self.handle_sample(sample);
                    }
                }
                Ok(()) = shutdown.changed() => {
                    if *shutdown.borrow_and_update() {
                        self.begin_finish("shutdown requested");
                    }
                }
                _ = progress.tick() => {
                    if self.config.debug_mode {
                        self.log_progress();
                    }
                    self.publish(results).await;
                }
            }
        }

        while let Ok(message) = rx.try_recv() {
            self.handle_message(message);
        }
    }

    fn handle_message(&mut self, message: WorkerMessage) {
        match message {
            WorkerMessage::Dequeue {
                worker,
                pooled_slots,
                reply,
            } => self.dispatch(worker, pooled_slots, reply),
            WorkerMessage::Started { worker, job_id } => self.record_start(worker, job_id),
            WorkerMessage::Completed(record) => self.record_completion(record),
            WorkerMessage::SlotUnavailable {
                worker,
                job_id,
                error,
            } => self.handle_slot_failure(worker, job_id, error),
        }
    }

    /// Answer a worker's request for work. This is the queue's only
    /// dequeue point.
    fn dispatch(&mut self, worker: WorkerId, pooled_slots: usize, reply: oneshot::Sender<DequeueReply>) {
        let Some(entry) = self.workers.get_mut(worker.0) else {
            warn!(worker = worker.0, "dequeue from unknown worker");
            return;
        };
        entry.pooled_slots = pooled_slots;
        let trim_idle_slots = std::mem::take(&mut entry.trim_requested);

        let assignment = if self.finishing || entry.retiring {
            Assignment::Stop
        } else if let Some(job) = self.queue.dequeue_next() {
            entry.state = WorkerState::Processing;
            entry.current_job = Some(job.id.clone());
            self.in_flight.insert(job.id.clone(), job.clone());
            debug!(
                worker = worker.0,
                job_id = %job.id,
                attempt = job.attempts,
                in_flight = self.in_flight.len(),
                "job dispatched"
            );
            Assignment::Job(job)
        } else {
            entry.state = WorkerState::Idle;
            Assignment::Empty
        };

        let response = DequeueReply {
            assignment,
            trim_idle_slots,
        };
        if let Err(DequeueReply {
            assignment: Assignment::Job(job),
            ..
        }) = reply.send(response)
        {
            // The worker vanished between asking and receiving.
            self.in_flight.remove(&job.id);
            if let Some(entry) = self.workers.get_mut(worker.0) {
                entry.current_job = None;
                entry.state = WorkerState::Idle;
            }
            self.queue.restore(job);
        }
    }

    /// The job reached the processor. Peak concurrency counts only these.
    fn record_start(&mut self, worker: WorkerId, job_id: JobId) {
        match self.workers.get_mut(worker.0) {
            Some(entry) if entry.current_job.as_ref() == Some(&job_id) => entry.running = true,
            _ => {
                warn!(worker = worker.0, job_id = %job_id, "start for a job not assigned to the worker");
                return;
            }
        }
        let running = self.workers.iter().filter(|w| w.running).count();
        self.stats.observe_concurrency(running);
    }

    fn record_completion(&mut self, record: CompletionRecord) {
        if let Some(entry) = self.workers.get_mut(record.worker.0) {
            entry.state = WorkerState::Idle;
            entry.current_job = None;
            entry.running = false;
        }

        let Some(mut job) = self.in_flight.remove(&record.job_id) else {
            warn!(job_id = %record.job_id, worker = record.worker.0, "completion for a job not in flight");
            return;
        };

        match record.outcome {
            ProcessOutcome::Success { data } => {
                job.status = JobStatus::Completed;
                job.last_error = None;
                self.stats.record_success(record.processing_time_ms);
                info!(
                    job_id = %job.id,
                    attempts = job.attempts,
                    processing_time_ms = record.processing_time_ms,
                    "job completed"
                );
                self.completed.insert(
                    job.id.clone(),
                    CompletedJob {
                        job,
                        data,
                        processing_time_ms: record.processing_time_ms,
                    },
                );
            }
            ProcessOutcome::Failure { error } => {
                if record.timed_out {
                    warn!(job_id = %job.id, attempt = record.attempt, "job abandoned after queue timeout");
                }
                self.retry_or_fail(job, error);
            }
        }
    }

    /// Requeue a failed job while it has retries left, otherwise fail it
    /// for good. A job is tried at most `retry_attempts + 1` times.
    fn retry_or_fail(&mut self, mut job: Job, error: String) {
        if job.attempts <= self.config.retry_attempts {
            self.stats.retries += 1;
            warn!(
                job_id = %job.id,
                attempts = job.attempts,
                error = %error,
                "job failed, requeueing"
            );
            job.last_error = Some(error);
            self.queue.enqueue(job);
        } else {
            error!(
                job_id = %job.id,
                attempts = job.attempts,
                error = %error,
                "job failed permanently"
            );
            job.status = JobStatus::Failed;
            job.last_error = Some(error);
            self.failed.insert(job.id.clone(), job);
        }
    }

    /// The job never ran: put it back untouched and retire the worker.
    fn handle_slot_failure(&mut self, worker: WorkerId, job_id: JobId, error: String) {
        if let Some(job) = self.in_flight.remove(&job_id) {
            self.queue.restore(job);
        }
        if let Some(entry) = self.workers.get_mut(worker.0) {
            entry.state = WorkerState::Idle;
            entry.current_job = None;
            entry.running = false;
            entry.retiring = true;
            entry.slot_failed = true;
        }
        warn!(worker = worker.0, error = %error, "worker cannot obtain a processor instance, retiring it");

        if self
            .workers
            .iter()
            .filter(|w| w.is_live())
            .all(|w| w.slot_failed)
        {
            self.abort(format!("no processor instance could be created: {error}"));
        }
    }

    fn handle_exit(
        &mut self,
        joined: Result<(tokio::task::Id, WorkerId), JoinError>,
        task_ids: &HashMap<tokio::task::Id, WorkerId>,
    ) {
        let worker = match joined {
            Ok((_, worker)) => worker,
            Err(e) => match task_ids.get(&e.id()) {
                Some(&worker) => {
                    error!(worker = worker.0, error = %e, "worker task failed");
                    worker
                }
                None => {
                    error!(error = %e, "unknown worker task failed");
                    return;
                }
            },
        };

        let orphan = self.workers.get_mut(worker.0).and_then(|entry| {
            entry.state = WorkerState::Stopped;
            entry.running = false;
            entry.current_job.take()
        });
        if let Some(job) = orphan.and_then(|id| self.in_flight.remove(&id)) {
            self.retry_or_fail(job, "worker exited while processing".to_string());
        }

        let live = self.live_workers();
        debug!(worker = worker.0, live, "worker exited");

        if !self.finishing && live == 0 && !(self.queue.is_empty() && self.in_flight.is_empty()) {
            self.abort("all workers stopped before the queue drained".to_string());
        }
    }

    fn handle_sample(&mut self, sample: ResourceSnapshot) {
        self.latest_sample = Some(sample);
        if !self.finishing && sample.memory_mb > self.config.resource_limits.max_memory_mb {
            self.optimize_resources(sample);
        }
    }

    /// Shed load under memory pressure: idle instances are released and a
    /// fraction of idle, eligible workers is retired. Jobs in flight are
    /// never touched.
    fn optimize_resources(&mut self, sample: ResourceSnapshot) {
        for entry in self.workers.iter_mut().filter(|w| w.is_active()) {
            entry.trim_requested = true;
        }

        let retirees = select_retirees(
            &self.workers,
            self.config.retirement,
            self.config.scale_down_fraction,
        );
        for id in &retirees {
            self.workers[id.0].retiring = true;
        }
        self.stats.workers_retired += retirees.len();

        warn!(
            memory_mb = sample.memory_mb,
            limit_mb = self.config.resource_limits.max_memory_mb,
            retired = retirees.len(),
            active = self.workers.iter().filter(|w| w.is_active()).count(),
            "memory ceiling exceeded, throttling"
        );
    }

    fn begin_finish(&mut self, reason: &str) {
        if !self.finishing {
            self.finishing = true;
            info!(reason, "stopping workers");
            self.worker_stop.send_replace(true);
        }
    }

    fn abort(&mut self, reason: String) {
        error!(reason = %reason, "aborting batch");
        self.begin_finish("aborted");
        self.fatal.get_or_insert(reason);
    }

    fn live_workers(&self) -> usize {
        self.workers.iter().filter(|w| w.is_live()).count()
    }

    fn log_progress(&self) {
        info!(
            queued = self.queue.len(),
            in_flight = self.in_flight.len(),
            completed = self.completed.len(),
            failed = self.failed.len(),
            live_workers = self.live_workers(),
            memory_mb = ?self.latest_sample.map(|s| s.memory_mb),
            elapsed_ms = self.stats.elapsed().as_millis() as u64,
            "batch progress"
        );
    }

    async fn publish(&self, results: &RwLock<BatchResults>) {
        let mut remaining = self.queue.snapshot();
        remaining.extend(self.in_flight.values().cloned());
        let snapshot = BatchResults {
            completed: sorted(self.completed.values().cloned().collect(), |c| &c.job.id),
            failed: sorted(self.failed.values().cloned().collect(), |j| &j.id),
            remaining,
            summary: None,
        };
        *results.write().await = snapshot;
    }

    fn finish(mut self, history: &ResourceHistory) -> (Summary, BatchResults, Option<String>) {
        let mut remaining = self.queue.drain();
        remaining.extend(self.in_flight.drain().map(|(_, mut job)| {
            job.status = JobStatus::Queued;
            job
        }));

        let summary = self.stats.summarize(
            self.completed.len(),
            self.failed.len(),
            history,
            &self.config.resource_limits,
        );
        let results = BatchResults {
            completed: sorted(self.completed.into_values().collect(), |c| &c.job.id),
            failed: sorted(self.failed.into_values().collect(), |j| &j.id),
            remaining,
            summary: Some(summary.clone()),
        };
        (summary, results, self.fatal)
    }
}

fn sorted<T>(mut items: Vec<T>, key: impl Fn(&T) -> &JobId) -> Vec<T> {
    items.sort_by(|a, b| key(a).cmp(key(b)));
    items
}

/// Pick the idle workers to retire under memory pressure.
///
/// Takes `fraction` of the idle, eligible workers (at least one when any
/// qualify), highest index first, and never retires the last active worker.
fn select_retirees(
    workers: &[WorkerEntry],
    policy: RetirementPolicy,
    fraction: f64,
) -> Vec<WorkerId> {
    if policy == RetirementPolicy::Never || fraction <= 0.0 {
        return Vec::new();
    }

    let active = workers.iter().filter(|w| w.is_active()).count();
    let candidates: Vec<WorkerId> = workers
        .iter()
        .enumerate()
        .rev()
        .filter(|(_, w)| {
            w.is_active()
                && w.state == WorkerState::Idle
                && w.current_job.is_none()
                && match policy {
                    RetirementPolicy::NoPooledSlots => w.pooled_slots == 0,
                    _ => true,
                }
        })
        .map(|(idx, _)| WorkerId(idx))
        .collect();

    if candidates.is_empty() {
        return Vec::new();
    }

    let wanted = ((candidates.len() as f64 * fraction).floor() as usize).max(1);
    let allowed = active.saturating_sub(1);
    candidates.into_iter().take(wanted.min(allowed)).collect()
}

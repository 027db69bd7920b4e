//! Worker — pulls jobs from the coordinator and runs them on pooled
//! processor instances.
//!
//! A worker never touches shared state. It asks the coordinator for work
//! over the engine channel, runs the processor on one of its own slots, and
//! reports a `CompletionRecord` back. Processor errors, panics and timeouts
//! are all converted into failure records here.
//!
//! ```text
//! Idle → Dequeuing → Processing → Reporting → Idle
//!                                    └──────→ Stopped
//! ```

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};

use storeflow_core::{Job, JobId, ProcessOutcome};

use crate::pool::SlotPool;
use crate::processor::Processor;

/// Index of a worker in the engine's worker table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct WorkerId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Idle,
    Dequeuing,
    Processing,
    Reporting,
    Stopped,
}

/// Result artifact for one processing attempt. Consumed exactly once by
/// the coordinator.
#[derive(Debug, Clone)]
pub struct CompletionRecord {
    pub worker: WorkerId,
    pub job_id: JobId,
    pub attempt: u32,
    pub outcome: ProcessOutcome,
    pub processing_time_ms: u64,
    /// The processor call was abandoned after the queue timeout.
    pub timed_out: bool,
}

/// Messages from workers to the coordinator.
pub(crate) enum WorkerMessage {
    Dequeue {
        worker: WorkerId,
        /// Live instances in the worker's pool, for retirement eligibility.
        pooled_slots: usize,
        reply: oneshot::Sender<DequeueReply>,
    },
    /// A slot was acquired and the processor is about to run the job.
    Started { worker: WorkerId, job_id: JobId },
    Completed(CompletionRecord),
    /// The job never reached the processor because no slot could be had.
    SlotUnavailable {
        worker: WorkerId,
        job_id: JobId,
        error: String,
    },
}

pub(crate) struct DequeueReply {
    pub assignment: Assignment,
    /// Drop idle instances before continuing (memory pressure).
    pub trim_idle_slots: bool,
}

pub(crate) enum Assignment {
    Job(Job),
    Empty,
    Stop,
}

pub(crate) struct WorkerOptions {
    pub pool_capacity: usize,
    pub recycle_after: u32,
    pub idle_poll: Duration,
    pub timeout: Option<Duration>,
}

pub(crate) struct Worker<P: Processor> {
    id: WorkerId,
    processor: Arc<P>,
    pool: SlotPool<P>,
    tx: mpsc::Sender<WorkerMessage>,
    stop: watch::Receiver<bool>,
    idle_poll: Duration,
    timeout: Option<Duration>,
    state: WorkerState,
}

impl<P: Processor> Worker<P> {
    pub fn new(
        id: WorkerId,
        processor: Arc<P>,
        tx: mpsc::Sender<WorkerMessage>,
        stop: watch::Receiver<bool>,
        options: WorkerOptions,
    ) -> Self {
        let pool = SlotPool::new(processor.clone(), options.pool_capacity, options.recycle_after);
        Self {
            id,
            processor,
            pool,
            tx,
            stop,
            idle_poll: options.idle_poll,
            timeout: options.timeout,
            state: WorkerState::Idle,
        }
    }

    /// Run until told to stop or the coordinator goes away. Always releases
    /// every processor instance before returning.
    pub async fn run(mut self) -> WorkerId {
        debug!(worker = self.id.0, "worker started");

        loop {
            if *self.stop.borrow() {
                break;
            }

            self.state = WorkerState::Dequeuing;
            let Some(reply) = self.request_job().await else {
                break;
            };
            if reply.trim_idle_slots {
                let trimmed = self.pool.trim_idle().await;
                if trimmed > 0 {
                    debug!(worker = self.id.0, trimmed, "released idle processor instances");
                }
            }

            match reply.assignment {
                Assignment::Stop => break,
                Assignment::Empty => {
                    self.state = WorkerState::Idle;
                    tokio::select! {
                        _ = tokio::time::sleep(self.idle_poll) => {}
                        changed = self.stop.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                    }
                }
                Assignment::Job(job) => {
                    self.state = WorkerState::Processing;
                    let message = self.process(job).await;
                    self.state = WorkerState::Reporting;
                    if self.tx.send(message).await.is_err() {
                        break;
                    }
                    self.state = WorkerState::Idle;
                }
            }
        }

        let released = self.pool.shutdown().await;
        self.state = WorkerState::Stopped;
        debug!(
            worker = self.id.0,
            released,
            created = self.pool.created(),
            state = ?self.state,
            "worker stopped"
        );
        self.id
    }

    async fn request_job(&mut self) -> Option<DequeueReply> {
        let (reply, rx) = oneshot::channel();
        let message = WorkerMessage::Dequeue {
            worker: self.id,
            pooled_slots: self.pool.live_count(),
            reply,
        };
        self.tx.send(message).await.ok()?;
        rx.await.ok()
    }

    async fn process(&mut self, job: Job) -> WorkerMessage {
        let slot = match self.pool.acquire().await {
            Ok(slot) => slot,
            Err(e) => {
                warn!(worker = self.id.0, job_id = %job.id, error = %e, "no processor slot");
                return WorkerMessage::SlotUnavailable {
                    worker: self.id,
                    job_id: job.id,
                    error: e.to_string(),
                };
            }
        };

        let notice = WorkerMessage::Started {
            worker: self.id,
            job_id: job.id.clone(),
        };
        if self.tx.send(notice).await.is_err() {
            debug!(worker = self.id.0, job_id = %job.id, "coordinator gone before job start");
        }

        let started = Instant::now();
        let timeout = self.timeout;
        let result = match self.pool.instance_mut(slot) {
            Some(instance) => {
                let call = AssertUnwindSafe(self.processor.process(instance, &job)).catch_unwind();
                match timeout {
                    Some(limit) => tokio::time::timeout(limit, call).await.ok(),
                    None => Some(call.await),
                }
            }
            None => Some(Ok(Err(anyhow::anyhow!("slot {} lost its instance", slot.index())))),
        };
        let processing_time_ms = started.elapsed().as_millis() as u64;

        // Instances that errored, panicked or hung are not trusted again.
        let (outcome, healthy, timed_out) = match result {
            Some(Ok(Ok(outcome))) => (outcome, true, false),
            Some(Ok(Err(e))) => (ProcessOutcome::failure(format!("{e:#}")), false, false),
            Some(Err(panic)) => (
                ProcessOutcome::failure(format!("processor panicked: {}", panic_message(&*panic))),
                false,
                false,
            ),
            None => (
                ProcessOutcome::failure(format!(
                    "abandoned after {} ms",
                    timeout.map(|t| t.as_millis()).unwrap_or_default()
                )),
                false,
                true,
            ),
        };

        if healthy {
            self.pool.release(slot).await;
        } else {
            self.pool.discard(slot).await;
        }

        debug!(
            worker = self.id.0,
            job_id = %job.id,
            attempt = job.attempts,
            success = outcome.is_success(),
            processing_time_ms,
            "job processed"
        );

        WorkerMessage::Completed(CompletionRecord {
            worker: self.id,
            job_id: job.id,
            attempt: job.attempts,
            outcome,
            processing_time_ms,
            timed_out,
        })
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

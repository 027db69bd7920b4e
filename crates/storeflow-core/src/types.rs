//! Shared types used across storeflow crates.
//!
//! These records describe jobs, processor outcomes, scheduling strategies
//! and resource samples. Jobs are only ever mutated by the scheduler's
//! coordinator; everything else is read-only once produced.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Unique identifier for a job (one store's extraction task).
pub type JobId = String;

// ── Job ───────────────────────────────────────────────────────────

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// Whether the job has reached `Completed` or `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// One independent unit of work submitted to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    /// Processing attempts so far. Incremented on every dequeue.
    pub attempts: u32,
    /// Caller-defined data handed to the processor untouched.
    pub payload: Value,
    /// Unix timestamp (milliseconds) when the job was created.
    pub created_at: u64,
    /// Unix timestamp (milliseconds) of the most recent dequeue.
    pub started_at: Option<u64>,
    /// Most recent failure reason.
    pub last_error: Option<String>,
}

impl Job {
    /// Create a queued job with a caller-supplied id.
    pub fn new(id: impl Into<JobId>, payload: Value) -> Self {
        Self {
            id: id.into(),
            status: JobStatus::Queued,
            attempts: 0,
            payload,
            created_at: epoch_millis(),
            started_at: None,
            last_error: None,
        }
    }

    /// Create a queued job with a generated v4 UUID id.
    pub fn with_generated_id(payload: Value) -> Self {
        Self::new(uuid::Uuid::new_v4().to_string(), payload)
    }
}

/// Wire form of a job as read from a job list: only the payload is required.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    #[serde(default)]
    pub id: Option<JobId>,
    #[serde(default)]
    pub payload: Value,
}

impl JobRequest {
    pub fn into_job(self) -> Job {
        match self.id {
            Some(id) => Job::new(id, self.payload),
            None => Job::with_generated_id(self.payload),
        }
    }
}

// ── Processor outcome ─────────────────────────────────────────────

/// Result reported by a processor for a single job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProcessOutcome {
    Success { data: Option<Value> },
    Failure { error: String },
}

impl ProcessOutcome {
    pub fn success(data: Option<Value>) -> Self {
        ProcessOutcome::Success { data }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        ProcessOutcome::Failure {
            error: error.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ProcessOutcome::Success { .. })
    }
}

// ── Strategy ──────────────────────────────────────────────────────

/// Name of the concurrency tier picked for a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyLabel {
    Sequential,
    SmallBatch,
    MediumBatch,
    LargeBatch,
}

impl StrategyLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            StrategyLabel::Sequential => "sequential",
            StrategyLabel::SmallBatch => "small_batch",
            StrategyLabel::MediumBatch => "medium_batch",
            StrategyLabel::LargeBatch => "large_batch",
        }
    }
}

impl fmt::Display for StrategyLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Concurrency decision for one batch. Chosen once, never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingStrategy {
    pub concurrency_degree: usize,
    pub label: StrategyLabel,
}

// ── Resources ─────────────────────────────────────────────────────

/// A point-in-time sample of process resource usage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    /// Unix timestamp (milliseconds) when the sample was taken.
    pub timestamp: u64,
    /// Resident memory in megabytes.
    pub memory_mb: f64,
    /// CPU usage in percent of one core.
    pub cpu_percent: f64,
}

impl ResourceSnapshot {
    pub fn new(memory_mb: f64, cpu_percent: f64) -> Self {
        Self {
            timestamp: epoch_millis(),
            memory_mb,
            cpu_percent,
        }
    }
}

/// Current Unix epoch in milliseconds.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

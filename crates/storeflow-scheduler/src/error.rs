//! Scheduler error types.

use thiserror::Error;

use storeflow_core::{ConfigError, JobId};

use crate::stats::Summary;

/// Errors that abort or reject a batch.
///
/// Job-level failures never surface here; they are recorded in the
/// batch results instead.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("a batch is already running on this engine")]
    AlreadyRunning,

    #[error("duplicate job id in batch: {0}")]
    DuplicateJob(JobId),

    #[error("batch aborted: {reason} ({remaining} jobs remaining)")]
    Aborted {
        reason: String,
        remaining: usize,
        summary: Box<Summary>,
    },
}

impl EngineError {
    /// Partial summary of an aborted batch.
    pub fn partial_summary(&self) -> Option<&Summary> {
        match self {
            EngineError::Aborted { summary, .. } => Some(summary),
            _ => None,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Errors from a worker's processor slot pool.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("all {capacity} processor slots are checked out")]
    Exhausted { capacity: usize },

    #[error("failed to create processor instance: {0}")]
    Create(String),
}

//! Batch statistics and the final summary.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use storeflow_core::{ProcessingStrategy, ResourceLimits};
use storeflow_monitor::ResourceHistory;

/// Aggregate result of one batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub total_stores: usize,
    pub successful_stores: usize,
    pub failed_stores: usize,
    /// Jobs neither completed nor failed (aborted or shut-down batches only).
    pub remaining_stores: usize,
    /// `successful / total`, in `0.0..=1.0`.
    pub success_rate: f64,
    /// Mean processing time of successful attempts, in milliseconds.
    pub average_processing_time: f64,
    pub peak_concurrency: usize,
    /// Successful jobs per second of wall-clock time.
    pub throughput: f64,
    /// Throughput divided by the mean resource utilization fraction.
    pub resource_efficiency: f64,
    pub elapsed_ms: u64,
    pub strategy: Option<ProcessingStrategy>,
    /// Failed attempts that were sent back to the queue.
    pub retries: u64,
    pub workers_retired: usize,
    pub peak_memory_mb: Option<f64>,
}

impl Summary {
    /// Summary of a batch with no jobs.
    pub fn empty() -> Self {
        Self {
            total_stores: 0,
            successful_stores: 0,
            failed_stores: 0,
            remaining_stores: 0,
            success_rate: 0.0,
            average_processing_time: 0.0,
            peak_concurrency: 0,
            throughput: 0.0,
            resource_efficiency: 0.0,
            elapsed_ms: 0,
            strategy: None,
            retries: 0,
            workers_retired: 0,
            peak_memory_mb: None,
        }
    }
}

/// Running aggregates, owned by the coordinator.
pub(crate) struct BatchStats {
    started: Instant,
    total: usize,
    strategy: ProcessingStrategy,
    success_time_ms: u64,
    peak_concurrency: usize,
    pub retries: u64,
    pub workers_retired: usize,
}

impl BatchStats {
    pub fn new(total: usize, strategy: ProcessingStrategy) -> Self {
        Self {
            started: Instant::now(),
            total,
            strategy,
            success_time_ms: 0,
            peak_concurrency: 0,
            retries: 0,
            workers_retired: 0,
        }
    }

    /// Record the number of jobs in flight after a dequeue.
    pub fn observe_concurrency(&mut self, in_flight: usize) {
        self.peak_concurrency = self.peak_concurrency.max(in_flight);
    }

    pub fn record_success(&mut self, processing_time_ms: u64) {
        self.success_time_ms += processing_time_ms;
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn summarize(
        &self,
        succeeded: usize,
        failed: usize,
        history: &ResourceHistory,
        limits: &ResourceLimits,
    ) -> Summary {
        let elapsed = self.elapsed();
        let remaining = self.total.saturating_sub(succeeded + failed);

        let success_rate = if self.total > 0 {
            succeeded as f64 / self.total as f64
        } else {
            0.0
        };
        let average_processing_time = if succeeded > 0 {
            self.success_time_ms as f64 / succeeded as f64
        } else {
            0.0
        };
        let throughput = throughput(succeeded, elapsed);

        Summary {
            total_stores: self.total,
            successful_stores: succeeded,
            failed_stores: failed,
            remaining_stores: remaining,
            success_rate,
            average_processing_time,
            peak_concurrency: self.peak_concurrency,
            throughput,
            resource_efficiency: resource_efficiency(
                throughput,
                history.average_utilization(limits),
            ),
            elapsed_ms: elapsed.as_millis() as u64,
            strategy: Some(self.strategy),
            retries: self.retries,
            workers_retired: self.workers_retired,
            peak_memory_mb: history.peak_memory_mb(),
        }
    }
}

fn throughput(succeeded: usize, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        succeeded as f64 / secs
    } else {
        0.0
    }
}

/// Throughput per unit of utilization. Without usable samples the
/// utilization is taken as 1, so efficiency equals throughput.
fn resource_efficiency(throughput: f64, utilization: Option<f64>) -> f64 {
    match utilization {
        Some(u) if u > 0.0 => throughput / u,
        _ => throughput,
    }
}

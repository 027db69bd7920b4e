//! Batch-size load balancer.
//!
//! Maps the size of a batch to a concurrency degree. Small batches run on
//! few workers since every worker brings its own processor instances and
//! the parallel overhead dominates; large batches use the configured cap.

use storeflow_core::{ProcessingStrategy, StrategyLabel, StrategyThresholds};

/// Choose a strategy using the default thresholds.
///
/// ≤5 jobs → 1 worker, ≤20 → `min(5, max)`, ≤50 → `min(10, max)`,
/// otherwise `max`.
pub fn choose_strategy(job_count: usize, max_concurrency: usize) -> ProcessingStrategy {
    choose_strategy_with(job_count, max_concurrency, &StrategyThresholds::default())
}

/// Choose a strategy using explicit thresholds. Pure and deterministic;
/// the degree is never below 1.
pub fn choose_strategy_with(
    job_count: usize,
    max_concurrency: usize,
    thresholds: &StrategyThresholds,
) -> ProcessingStrategy {
    let max = max_concurrency.max(1);

    let (degree, label) = if job_count <= thresholds.sequential_max_jobs {
        (1, StrategyLabel::Sequential)
    } else if job_count <= thresholds.small_batch_max_jobs {
        (thresholds.small_batch_degree.min(max), StrategyLabel::SmallBatch)
    } else if job_count <= thresholds.medium_batch_max_jobs {
        (thresholds.medium_batch_degree.min(max), StrategyLabel::MediumBatch)
    } else {
        (max, StrategyLabel::LargeBatch)
    };

    ProcessingStrategy {
        concurrency_degree: degree.max(1),
        label,
    }
}

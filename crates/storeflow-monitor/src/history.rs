//! Bounded history of resource snapshots.

use std::collections::VecDeque;

use storeflow_core::{ResourceLimits, ResourceSnapshot};

/// Keeps the most recent `limit` snapshots; older ones are dropped.
#[derive(Debug, Clone)]
pub struct ResourceHistory {
    samples: VecDeque<ResourceSnapshot>,
    limit: usize,
}

impl ResourceHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(limit.min(1024)),
            limit: limit.max(1),
        }
    }

    pub fn push(&mut self, snapshot: ResourceSnapshot) {
        if self.samples.len() == self.limit {
            self.samples.pop_front();
        }
        self.samples.push_back(snapshot);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn latest(&self) -> Option<&ResourceSnapshot> {
        self.samples.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResourceSnapshot> {
        self.samples.iter()
    }

    pub fn to_vec(&self) -> Vec<ResourceSnapshot> {
        self.samples.iter().copied().collect()
    }

    pub fn peak_memory_mb(&self) -> Option<f64> {
        self.samples.iter().map(|s| s.memory_mb).reduce(f64::max)
    }

    /// Mean utilization fraction across the history.
    ///
    /// Each sample contributes the average of `cpu / max_cpu` and
    /// `memory / max_memory`. Returns `None` when no samples exist.
    pub fn average_utilization(&self, limits: &ResourceLimits) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let total: f64 = self
            .samples
            .iter()
            .map(|s| utilization_fraction(s, limits))
            .sum();
        Some(total / self.samples.len() as f64)
    }
}

/// Utilization of a single sample, normalized against the configured ceilings.
pub fn utilization_fraction(snapshot: &ResourceSnapshot, limits: &ResourceLimits) -> f64 {
    let cpu = snapshot.cpu_percent / limits.max_cpu_percent;
    let memory = snapshot.memory_mb / limits.max_memory_mb;
    (cpu + memory) / 2.0
}

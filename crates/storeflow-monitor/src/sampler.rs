//! Resource samplers.

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::warn;

use storeflow_core::ResourceSnapshot;

/// Produces resource snapshots on demand.
///
/// Implementations must be cheap enough to call from the monitor's timer.
pub trait ResourceSampler: Send + 'static {
    fn sample(&mut self) -> ResourceSnapshot;
}

impl ResourceSampler for Box<dyn ResourceSampler> {
    fn sample(&mut self) -> ResourceSnapshot {
        (**self).sample()
    }
}

/// Samples the resident memory and CPU usage of the current process.
pub struct ProcessSampler {
    system: System,
    pid: Option<Pid>,
}

impl ProcessSampler {
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                warn!(error = %e, "cannot resolve current pid, samples will read zero");
                None
            }
        };
        Self {
            system: System::new(),
            pid,
        }
    }
}

impl Default for ProcessSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceSampler for ProcessSampler {
    fn sample(&mut self) -> ResourceSnapshot {
        let Some(pid) = self.pid else {
            return ResourceSnapshot::new(0.0, 0.0);
        };

        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::new().with_memory().with_cpu(),
        );

        match self.system.process(pid) {
            Some(process) => ResourceSnapshot::new(
                process.memory() as f64 / (1024.0 * 1024.0),
                f64::from(process.cpu_usage()),
            ),
            None => ResourceSnapshot::new(0.0, 0.0),
        }
    }
}

//! storeflow-monitor — process resource sampling.
//!
//! Samples the current process's memory and CPU usage on a fixed interval,
//! independently of job processing, and keeps a bounded history for
//! reporting. The engine subscribes to the latest sample and throttles
//! itself when the memory ceiling is exceeded.
//!
//! # Architecture
//!
//! ```text
//! ResourceMonitor
//!   ├── run() ← periodic sampling loop (own timer, never blocks workers)
//!   ├── subscribe() → watch::Receiver<Option<ResourceSnapshot>>
//!   └── ResourceHistory (bounded VecDeque of snapshots)
//!
//! ResourceSampler (trait)
//!   └── ProcessSampler (sysinfo, current pid)
//! ```

pub mod history;
pub mod monitor;
pub mod sampler;

pub use history::ResourceHistory;
pub use monitor::ResourceMonitor;
pub use sampler::{ProcessSampler, ResourceSampler};

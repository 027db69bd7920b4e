//! storeflow-scheduler — bounded-concurrency batch engine.
//!
//! Runs a batch of store jobs through a pool of workers. The engine:
//!
//! - Chooses a concurrency degree from the batch size (load balancer)
//! - Hands out jobs in priority order from a single-owner queue
//! - Retries failed jobs up to the configured attempt ceiling
//! - Sheds workers and idle processor instances under memory pressure
//! - Reports a summary, including after an abort or shutdown
//!
//! # Architecture
//!
//! ```text
//! Engine::process_batch
//!   ├── ResourceMonitor task (samples → watch channel)
//!   ├── Coordinator (owns JobQueue, job maps, worker table, stats)
//!   │     ▲ Dequeue / Completed / SlotUnavailable     │ Assignment
//!   │     │                                           ▼
//!   └── Worker × degree
//!         └── SlotPool (private processor instances)
//! ```

pub mod engine;
pub mod error;
pub mod load_balancer;
pub mod pool;
pub mod processor;
pub mod queue;
pub mod stats;
pub mod worker;

pub use engine::{BatchResults, CompletedJob, Engine, SamplerFactory};
pub use error::{EngineError, EngineResult, PoolError};
pub use load_balancer::{choose_strategy, choose_strategy_with};
pub use pool::{SlotId, SlotPool};
pub use processor::Processor;
pub use queue::JobQueue;
pub use stats::Summary;
pub use worker::{CompletionRecord, WorkerId, WorkerState};

pub mod config;
pub mod types;

pub use config::{ConfigError, EngineConfig, ResourceLimits, RetirementPolicy, StrategyThresholds};
pub use types::*;

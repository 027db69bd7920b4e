//! The processor boundary.
//!
//! Everything that actually touches a store (browser driving, element
//! lookup, downloads, uploads) lives behind this trait. The engine only
//! creates instances, hands them jobs, and tears them down.

use std::future::Future;

use storeflow_core::{Job, ProcessOutcome};

/// Performs the work of a single job.
///
/// Calls must be safe to repeat: a failed job is handed to `process` again,
/// possibly on a different instance, up to the configured retry ceiling.
/// No ordering relative to other jobs may be assumed.
pub trait Processor: Send + Sync + 'static {
    /// Expensive, poolable resource a job runs on (e.g. one browser context).
    type Instance: Send + 'static;

    fn create_instance(&self) -> impl Future<Output = anyhow::Result<Self::Instance>> + Send;

    /// Process one job. `Err` and panics are treated as failures and cause
    /// the instance to be discarded; `Ok(ProcessOutcome::Failure)` keeps it.
    fn process(
        &self,
        instance: &mut Self::Instance,
        job: &Job,
    ) -> impl Future<Output = anyhow::Result<ProcessOutcome>> + Send;

    fn destroy_instance(&self, instance: Self::Instance) -> impl Future<Output = ()> + Send {
        async move { drop(instance) }
    }
}

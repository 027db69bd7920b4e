//! Resource monitor — periodic sampling loop.
//!
//! Runs on its own timer, records each sample into a bounded history and
//! publishes it on a `watch` channel. Consumers never block the sampler and
//! the sampler never blocks consumers.

use std::time::Duration;

use tokio::sync::{watch, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use storeflow_core::ResourceSnapshot;

use crate::history::ResourceHistory;
use crate::sampler::ResourceSampler;

pub struct ResourceMonitor {
    interval: Duration,
    history: RwLock<ResourceHistory>,
    latest: watch::Sender<Option<ResourceSnapshot>>,
}

impl ResourceMonitor {
    /// Create a monitor sampling every `interval`, keeping `history_limit` samples.
    pub fn new(interval: Duration, history_limit: usize) -> Self {
        let (latest, _) = watch::channel(None);
        Self {
            interval,
            history: RwLock::new(ResourceHistory::new(history_limit)),
            latest,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Receive every new sample (latest value wins if the reader falls behind).
    pub fn subscribe(&self) -> watch::Receiver<Option<ResourceSnapshot>> {
        self.latest.subscribe()
    }

    /// Most recent sample, if any has been taken.
    pub fn latest(&self) -> Option<ResourceSnapshot> {
        *self.latest.borrow()
    }

    /// Copy of the retained history.
    pub async fn history(&self) -> ResourceHistory {
        self.history.read().await.clone()
    }

    /// Record a sample and publish it to subscribers.
    pub async fn record(&self, snapshot: ResourceSnapshot) {
        self.history.write().await.push(snapshot);
        self.latest.send_replace(Some(snapshot));
        debug!(
            memory_mb = snapshot.memory_mb,
            cpu_percent = snapshot.cpu_percent,
            "resource sample"
        );
    }

    /// Run the sampling loop until the shutdown signal flips.
    ///
    /// The first sample is taken immediately.
    pub async fn run<S: ResourceSampler>(
        &self,
        mut sampler: S,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(
            interval_ms = self.interval.as_millis() as u64,
            "resource monitor started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    let snapshot = sampler.sample();
                    self.record(snapshot).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("resource monitor shutting down");
    }
}

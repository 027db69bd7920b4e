//! Processor slot pool — a worker's private set of processor instances.
//!
//! Slots live in a fixed-capacity arena and are referenced by `SlotId`.
//! Instances are created on demand up to the capacity, reused across jobs,
//! and torn down once they reach the recycle threshold or after an error.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::PoolError;
use crate::processor::Processor;

/// Handle to a slot in a worker's pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(usize);

impl SlotId {
    pub fn index(self) -> usize {
        self.0
    }
}

struct Slot<I> {
    instance: I,
    uses: u32,
    checked_out: bool,
}

pub struct SlotPool<P: Processor> {
    processor: Arc<P>,
    slots: Vec<Option<Slot<P::Instance>>>,
    recycle_after: u32,
    created: u64,
    destroyed: u64,
}

impl<P: Processor> SlotPool<P> {
    /// Create an empty pool holding at most `capacity` instances.
    pub fn new(processor: Arc<P>, capacity: usize, recycle_after: u32) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity.max(1), || None);
        Self {
            processor,
            slots,
            recycle_after: recycle_after.max(1),
            created: 0,
            destroyed: 0,
        }
    }

    /// Check out a slot.
    ///
    /// Reuses an idle instance when one exists, otherwise creates a new one
    /// in a free arena cell. Fails if every slot is checked out or the
    /// processor cannot create an instance.
    pub async fn acquire(&mut self) -> Result<SlotId, PoolError> {
        if let Some(idx) = self
            .slots
            .iter()
            .position(|s| matches!(s, Some(slot) if !slot.checked_out))
        {
            if let Some(slot) = self.slots[idx].as_mut() {
                slot.checked_out = true;
            }
            return Ok(SlotId(idx));
        }

        let Some(idx) = self.slots.iter().position(Option::is_none) else {
            return Err(PoolError::Exhausted {
                capacity: self.slots.len(),
            });
        };

        let instance = self
            .processor
            .create_instance()
            .await
            .map_err(|e| PoolError::Create(format!("{e:#}")))?;
        self.created += 1;
        self.slots[idx] = Some(Slot {
            instance,
            uses: 0,
            checked_out: true,
        });
        debug!(slot = idx, "created processor instance");
        Ok(SlotId(idx))
    }

    /// Mutable access to a checked-out instance.
    pub fn instance_mut(&mut self, id: SlotId) -> Option<&mut P::Instance> {
        self.slots
            .get_mut(id.0)?
            .as_mut()
            .filter(|s| s.checked_out)
            .map(|s| &mut s.instance)
    }

    /// Return a slot after use. An instance serves at most `recycle_after`
    /// jobs: the release that brings its use count to the threshold tears it
    /// down, and the cell is refilled on the next acquire.
    pub async fn release(&mut self, id: SlotId) {
        let recycle = match self.slots.get_mut(id.0).and_then(Option::as_mut) {
            Some(slot) => {
                slot.uses += 1;
                slot.checked_out = false;
                slot.uses >= self.recycle_after
            }
            None => {
                warn!(slot = id.0, "release of unknown slot");
                return;
            }
        };

        if recycle {
            debug!(slot = id.0, uses = self.recycle_after, "recycling processor instance");
            self.destroy(id.0).await;
        }
    }

    /// Tear a slot down without returning it to the pool.
    pub async fn discard(&mut self, id: SlotId) {
        debug!(slot = id.0, "discarding processor instance");
        self.destroy(id.0).await;
    }

    /// Tear down every idle instance. Returns how many were released.
    pub async fn trim_idle(&mut self) -> usize {
        let idle: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, s)| matches!(s, Some(slot) if !slot.checked_out))
            .map(|(idx, _)| idx)
            .collect();
        for &idx in &idle {
            self.destroy(idx).await;
        }
        idle.len()
    }

    /// Tear down every instance, checked out or not.
    pub async fn shutdown(&mut self) -> usize {
        let mut released = 0;
        for idx in 0..self.slots.len() {
            if self.slots[idx].is_some() {
                self.destroy(idx).await;
                released += 1;
            }
        }
        released
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Instances currently alive (idle + checked out).
    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn checked_out_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| matches!(s, Some(slot) if slot.checked_out))
            .count()
    }

    /// Instances created over the pool's lifetime.
    pub fn created(&self) -> u64 {
        self.created
    }

    pub fn destroyed(&self) -> u64 {
        self.destroyed
    }

    async fn destroy(&mut self, idx: usize) {
        if let Some(slot) = self.slots.get_mut(idx).and_then(Option::take) {
            self.processor.destroy_instance(slot.instance).await;
            self.destroyed += 1;
        }
    }
}

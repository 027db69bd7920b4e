//! Priority job queue.
//!
//! Jobs that have been attempted fewer times come first; within the same
//! attempt count the oldest job wins, and submission order breaks any
//! remaining tie. The queue is owned by the engine's coordinator, which is
//! what makes `dequeue_next` atomic with respect to every worker.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use storeflow_core::{epoch_millis, Job, JobStatus};

/// Sort key: (attempts, created_at, submission sequence), smallest first.
type PriorityKey = (u32, u64, u64);

struct Entry {
    key: PriorityKey,
    job: Job,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // BinaryHeap is a max-heap; invert so the smallest key pops first.
    fn cmp(&self, other: &Self) -> Ordering {
        other.key.cmp(&self.key)
    }
}

#[derive(Default)]
pub struct JobQueue {
    heap: BinaryHeap<Entry>,
    next_seq: u64,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a job in `Queued` state. Its attempt count is kept as-is.
    pub fn enqueue(&mut self, mut job: Job) {
        job.status = JobStatus::Queued;
        let key = (job.attempts, job.created_at, self.next_seq);
        self.next_seq += 1;
        self.heap.push(Entry { key, job });
    }

    /// Remove the highest-priority job and mark it `Processing`.
    ///
    /// Increments `attempts` and stamps `started_at`.
    pub fn dequeue_next(&mut self) -> Option<Job> {
        let Entry { mut job, .. } = self.heap.pop()?;
        job.status = JobStatus::Processing;
        job.attempts += 1;
        job.started_at = Some(epoch_millis());
        Some(job)
    }

    /// Put back a job that was dequeued but never reached the processor.
    pub fn restore(&mut self, mut job: Job) {
        job.attempts = job.attempts.saturating_sub(1);
        self.enqueue(job);
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Copy of the queued jobs in dequeue order.
    pub fn snapshot(&self) -> Vec<Job> {
        let mut entries: Vec<&Entry> = self.heap.iter().collect();
        entries.sort_by_key(|e| e.key);
        entries.into_iter().map(|e| e.job.clone()).collect()
    }

    /// Remove every queued job, in dequeue order.
    pub fn drain(&mut self) -> Vec<Job> {
        let mut entries = std::mem::take(&mut self.heap).into_vec();
        entries.sort_by_key(|e| e.key);
        entries.into_iter().map(|e| e.job).collect()
    }
}

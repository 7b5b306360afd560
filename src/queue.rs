//! Precompute job queues.
//!
//! Saving an entity enqueues one job per eager spec instead of computing
//! derivatives on the caller's thread. Queueing is fire-and-forget: a job
//! that fails at execution time just leaves the derivative unresolved, and
//! the next access computes it lazily.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

/// Request to compute one derivative ahead of access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrecomputeJob {
    pub entity_id: String,
    pub spec_name: String,
}

/// Sink for precompute jobs.
pub trait TaskQueue: Send + Sync {
    fn enqueue(&self, job: PrecomputeJob);
}

impl<T: TaskQueue + ?Sized> TaskQueue for Arc<T> {
    fn enqueue(&self, job: PrecomputeJob) {
        (**self).enqueue(job)
    }
}

/// Runs each job on the calling thread as soon as it is enqueued.
pub struct InlineQueue<F: Fn(PrecomputeJob) + Send + Sync> {
    handler: F,
}

impl<F: Fn(PrecomputeJob) + Send + Sync> InlineQueue<F> {
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

impl<F: Fn(PrecomputeJob) + Send + Sync> TaskQueue for InlineQueue<F> {
    fn enqueue(&self, job: PrecomputeJob) {
        (self.handler)(job);
    }
}

/// Fans jobs out to rayon's global thread pool.
pub struct ThreadPoolQueue<F: Fn(PrecomputeJob) + Send + Sync + 'static> {
    handler: Arc<F>,
}

impl<F: Fn(PrecomputeJob) + Send + Sync + 'static> ThreadPoolQueue<F> {
    pub fn new(handler: F) -> Self {
        Self {
            handler: Arc::new(handler),
        }
    }
}

impl<F: Fn(PrecomputeJob) + Send + Sync + 'static> TaskQueue for ThreadPoolQueue<F> {
    fn enqueue(&self, job: PrecomputeJob) {
        let handler = Arc::clone(&self.handler);
        rayon::spawn(move || handler(job));
    }
}

/// Collects jobs without running them. Uses Mutex so it is Sync like any
/// other queue.
#[derive(Debug, Default)]
pub struct RecordingQueue {
    jobs: Mutex<Vec<PrecomputeJob>>,
}

impl RecordingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Jobs enqueued so far, in order.
    pub fn jobs(&self) -> Vec<PrecomputeJob> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl TaskQueue for RecordingQueue {
    fn enqueue(&self, job: PrecomputeJob) {
        self.jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(job);
    }
}

//! Worker pool dispatcher.
//!
//! Jobs are handed to a [`WorkerBackend`] in FIFO order. The backend owns the
//! slots; the pool keeps each job's completion on the main side and turns
//! finished jobs into poll-phase callbacks.

mod thread_workers;
mod virtual_workers;

pub use thread_workers::ThreadWorkers;
pub use virtual_workers::VirtualWorkers;

use crate::clock::Clock;
use crate::error::JobError;
use crate::scheduler::EventLoop;
use crate::task::TaskResult;
use serde::Serialize;
use slab::Slab;
use smallvec::SmallVec;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

pub type JobOutput = Box<dyn Any + Send>;
pub type Work = Box<dyn FnOnce() -> Result<JobOutput, JobError> + Send>;

/// A job on its way to a worker.
pub struct JobRequest {
    pub id: JobId,
    /// Slab key of the main-side completion.
    pub key: usize,
    /// Simulated running time. Real workers ignore it.
    pub cost: Duration,
    pub work: Work,
}

/// A job a worker has finished.
pub struct Completion {
    pub id: JobId,
    pub key: usize,
    pub slot: usize,
    pub started_at: Duration,
    pub finished_at: Duration,
    pub outcome: Result<JobOutput, JobError>,
}

pub type Completions = SmallVec<[Completion; 8]>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub size: usize,
    pub running: usize,
    pub queued: usize,
    pub completed: u64,
    pub max_concurrent: usize,
}

/// Where pool jobs actually execute.
pub trait WorkerBackend {
    fn size(&self) -> usize;

    fn submit(&mut self, job: JobRequest, now: Duration);

    /// Completions available at `now`, without blocking.
    fn collect(&mut self, now: Duration) -> Completions;

    /// Waits for at least one completion, giving up at `deadline`.
    fn wait(&mut self, clock: &dyn Clock, deadline: Option<Duration>) -> Completions;

    /// Jobs submitted but not yet collected.
    fn in_flight(&self) -> usize;

    fn stats(&self) -> PoolStats;
}

/// Runs a job body, turning a panic into a job failure.
pub(crate) fn run_work(work: Work) -> Result<JobOutput, JobError> {
    match panic::catch_unwind(AssertUnwindSafe(work)) {
        Ok(outcome) => outcome,
        Err(payload) => Err(JobError::Panicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

pub(crate) type Completer = Box<dyn FnOnce(&EventLoop, Result<JobOutput, JobError>) -> TaskResult>;

struct PendingJob {
    id: JobId,
    complete: Completer,
}

/// A finished job paired with its completion, ready for the poll phase.
pub(crate) struct ReadyJob {
    pub id: JobId,
    pub slot: usize,
    pub started_at: Duration,
    pub finished_at: Duration,
    pub outcome: Result<JobOutput, JobError>,
    pub complete: Completer,
}

pub struct WorkerPool {
    backend: Box<dyn WorkerBackend>,
    pending: Slab<PendingJob>,
    next_id: u64,
}

impl WorkerPool {
    pub fn new(backend: Box<dyn WorkerBackend>) -> Self {
        Self {
            backend,
            pending: Slab::new(),
            next_id: 1,
        }
    }

    pub(crate) fn submit(
        &mut self,
        cost: Duration,
        work: Work,
        complete: Completer,
        now: Duration,
    ) -> JobId {
        let id = JobId(self.next_id);
        self.next_id += 1;
        let key = self.pending.insert(PendingJob { id, complete });
        tracing::debug!(%id, ?cost, "job queued");
        self.backend.submit(JobRequest { id, key, cost, work }, now);
        id
    }

    pub(crate) fn collect(&mut self, now: Duration) -> Vec<ReadyJob> {
        let completions = self.backend.collect(now);
        self.resolve(completions)
    }

    pub(crate) fn wait(&mut self, clock: &dyn Clock, deadline: Option<Duration>) -> Vec<ReadyJob> {
        let completions = self.backend.wait(clock, deadline);
        self.resolve(completions)
    }

    fn resolve(&mut self, completions: Completions) -> Vec<ReadyJob> {
        let mut ready = Vec::with_capacity(completions.len());
        for completion in completions {
            let Some(pending) = self.pending.try_remove(completion.key) else {
                tracing::warn!(id = %completion.id, "completion for unknown job dropped");
                continue;
            };
            debug_assert_eq!(pending.id, completion.id);
            tracing::debug!(id = %completion.id, slot = completion.slot, "job finished");
            ready.push(ReadyJob {
                id: completion.id,
                slot: completion.slot,
                started_at: completion.started_at,
                finished_at: completion.finished_at,
                outcome: completion.outcome,
                complete: pending.complete,
            });
        }
        ready
    }

    /// Jobs whose completion has not been handed to the poll phase yet.
    pub fn has_work(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn in_flight(&self) -> usize {
        self.backend.in_flight()
    }

    pub fn size(&self) -> usize {
        self.backend.size()
    }

    pub fn stats(&self) -> PoolStats {
        self.backend.stats()
    }
}

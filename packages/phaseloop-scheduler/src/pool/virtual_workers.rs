use super::{Completion, Completions, JobOutput, JobRequest, PoolStats, WorkerBackend, run_work};
use crate::clock::Clock;
use crate::error::JobError;
use crate::pool::JobId;
use std::collections::VecDeque;
use std::time::Duration;

struct Running {
    id: JobId,
    key: usize,
    started_at: Duration,
    finish_at: Duration,
    outcome: Result<JobOutput, JobError>,
}

/// Simulated pool on virtual time.
///
/// A job started at `t` finishes at `t + cost`. At that instant its slot is
/// free again and the head of the queue starts on it, whether or not the
/// main context has looked yet. Job bodies run inline when they start.
pub struct VirtualWorkers {
    slots: Vec<Option<Running>>,
    queue: VecDeque<JobRequest>,
    finished: VecDeque<Completion>,
    completed: u64,
    max_concurrent: usize,
}

impl VirtualWorkers {
    pub fn new(size: usize) -> Self {
        Self {
            slots: (0..size.max(1)).map(|_| None).collect(),
            queue: VecDeque::new(),
            finished: VecDeque::new(),
            completed: 0,
            max_concurrent: 0,
        }
    }

    fn running(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Starts queued jobs on free slots, lowest slot first.
    fn fill(&mut self, at: Duration) {
        for slot in self.slots.iter_mut() {
            if slot.is_some() {
                continue;
            }
            let Some(job) = self.queue.pop_front() else {
                break;
            };
            let outcome = run_work(job.work);
            *slot = Some(Running {
                id: job.id,
                key: job.key,
                started_at: at,
                finish_at: at.saturating_add(job.cost),
                outcome,
            });
        }
        self.max_concurrent = self.max_concurrent.max(self.running());
    }

    /// Plays the pool forward to `now`, one finishing job at a time.
    fn advance(&mut self, now: Duration) {
        loop {
            let next = self
                .slots
                .iter()
                .enumerate()
                .filter_map(|(index, slot)| slot.as_ref().map(|job| (job.finish_at, index)))
                .filter(|&(finish_at, _)| finish_at <= now)
                .min();
            let Some((finish_at, index)) = next else {
                break;
            };
            if let Some(job) = self.slots[index].take() {
                self.finished.push_back(Completion {
                    id: job.id,
                    key: job.key,
                    slot: index,
                    started_at: job.started_at,
                    finished_at: job.finish_at,
                    outcome: job.outcome,
                });
            }
            self.fill(finish_at);
        }
    }

    fn next_finish(&self) -> Option<Duration> {
        self.slots
            .iter()
            .filter_map(|slot| slot.as_ref().map(|job| job.finish_at))
            .min()
    }

    fn take_finished(&mut self) -> Completions {
        let ready: Completions = self.finished.drain(..).collect();
        self.completed += ready.len() as u64;
        ready
    }
}

impl WorkerBackend for VirtualWorkers {
    fn size(&self) -> usize {
        self.slots.len()
    }

    fn submit(&mut self, job: JobRequest, now: Duration) {
        self.advance(now);
        self.queue.push_back(job);
        self.fill(now);
    }

    fn collect(&mut self, now: Duration) -> Completions {
        self.advance(now);
        self.take_finished()
    }

    fn wait(&mut self, clock: &dyn Clock, deadline: Option<Duration>) -> Completions {
        let target = match (self.next_finish(), deadline) {
            (Some(finish), Some(deadline)) => Some(finish.min(deadline)),
            (finish, deadline) => finish.or(deadline),
        };
        if let Some(target) = target {
            clock.sleep_until(target);
        }
        self.collect(clock.now())
    }

    fn in_flight(&self) -> usize {
        self.running() + self.queue.len() + self.finished.len()
    }

    fn stats(&self) -> PoolStats {
        PoolStats {
            size: self.slots.len(),
            running: self.running(),
            queued: self.queue.len(),
            completed: self.completed,
            max_concurrent: self.max_concurrent,
        }
    }
}

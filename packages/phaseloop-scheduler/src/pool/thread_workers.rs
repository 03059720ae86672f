use super::{Completion, Completions, JobRequest, PoolStats, WorkerBackend, run_work};
use crate::clock::Clock;
use crate::error::{LoopError, Result};
use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct Occupancy {
    running: usize,
    max_concurrent: usize,
}

/// Real worker threads pulling jobs from one FIFO channel.
///
/// Each thread is one slot, so at most `size` jobs run at once. Finished jobs
/// go back over a second channel and are picked up by the poll phase.
pub struct ThreadWorkers {
    size: usize,
    jobs: Option<Sender<JobRequest>>,
    results: Receiver<Completion>,
    handles: Vec<JoinHandle<()>>,
    occupancy: Arc<Mutex<Occupancy>>,
    queued_or_running: usize,
    completed: u64,
}

impl ThreadWorkers {
    /// Spawns `size` threads. Timestamps are measured from `origin`.
    pub fn spawn(size: usize, name_prefix: &str, origin: Instant) -> Result<Self> {
        if size == 0 {
            return Err(LoopError::config("worker pool needs at least one thread"));
        }

        let (job_tx, job_rx) = unbounded::<JobRequest>();
        let (done_tx, done_rx) = unbounded::<Completion>();
        let occupancy = Arc::new(Mutex::new(Occupancy::default()));

        let mut handles = Vec::with_capacity(size);
        for slot in 0..size {
            let jobs = job_rx.clone();
            let done = done_tx.clone();
            let occupancy = occupancy.clone();
            let handle = thread::Builder::new()
                .name(format!("{name_prefix}-{slot}"))
                .spawn(move || worker_main(slot, origin, jobs, done, occupancy))?;
            handles.push(handle);
        }
        tracing::debug!(size, "worker threads started");

        Ok(Self {
            size,
            jobs: Some(job_tx),
            results: done_rx,
            handles,
            occupancy,
            queued_or_running: 0,
            completed: 0,
        })
    }

    fn account(&mut self, ready: &Completions) {
        self.queued_or_running -= ready.len();
        self.completed += ready.len() as u64;
    }
}

fn worker_main(
    slot: usize,
    origin: Instant,
    jobs: Receiver<JobRequest>,
    done: Sender<Completion>,
    occupancy: Arc<Mutex<Occupancy>>,
) {
    for job in jobs.iter() {
        {
            let mut occ = occupancy.lock();
            occ.running += 1;
            occ.max_concurrent = occ.max_concurrent.max(occ.running);
        }
        let started_at = origin.elapsed();
        let outcome = run_work(job.work);
        let finished_at = origin.elapsed();
        occupancy.lock().running -= 1;

        let completion = Completion {
            id: job.id,
            key: job.key,
            slot,
            started_at,
            finished_at,
            outcome,
        };
        if done.send(completion).is_err() {
            break;
        }
    }
}

impl WorkerBackend for ThreadWorkers {
    fn size(&self) -> usize {
        self.size
    }

    fn submit(&mut self, job: JobRequest, _now: Duration) {
        let Some(jobs) = self.jobs.as_ref() else {
            return;
        };
        if jobs.send(job).is_ok() {
            self.queued_or_running += 1;
        } else {
            tracing::warn!("worker threads are gone, job dropped");
        }
    }

    fn collect(&mut self, _now: Duration) -> Completions {
        let ready: Completions = self.results.try_iter().collect();
        self.account(&ready);
        ready
    }

    fn wait(&mut self, clock: &dyn Clock, deadline: Option<Duration>) -> Completions {
        let mut ready = Completions::new();
        if self.queued_or_running == 0 {
            if let Some(deadline) = deadline {
                clock.sleep_until(deadline);
            }
            return ready;
        }

        let first = match deadline {
            Some(deadline) => self
                .results
                .recv_timeout(deadline.saturating_sub(clock.now()))
                .ok(),
            None => self.results.recv().ok(),
        };
        if let Some(completion) = first {
            ready.push(completion);
            ready.extend(self.results.try_iter());
        }
        self.account(&ready);
        ready
    }

    fn in_flight(&self) -> usize {
        self.queued_or_running
    }

    fn stats(&self) -> PoolStats {
        let occ = self.occupancy.lock();
        PoolStats {
            size: self.size,
            running: occ.running,
            queued: self.queued_or_running.saturating_sub(occ.running),
            completed: self.completed,
            max_concurrent: occ.max_concurrent,
        }
    }
}

impl Drop for ThreadWorkers {
    fn drop(&mut self) {
        // Closing the job channel lets every worker fall out of its loop.
        drop(self.jobs.take());
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

use crate::queue::TaskQueue;
use crate::task::{ExecContext, Task};

/// The two microtask queues: ticks (high priority) and normal microtasks.
#[derive(Default)]
pub struct MicrotaskQueues {
    ticks: TaskQueue,
    normal: TaskQueue,
}

impl MicrotaskQueues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_tick(&self, task: Task) {
        self.ticks.push(task);
    }

    pub fn push_microtask(&self, task: Task) {
        self.normal.push(task);
    }

    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty() && self.normal.is_empty()
    }

    /// Drains the tick queue completely, then the microtask queue completely,
    /// and repeats while microtasks keep queueing new ticks.
    pub fn drain(&self, mut run: impl FnMut(ExecContext, Task)) -> usize {
        let mut ran = 0;
        loop {
            ran += self.ticks.drain(|task| run(ExecContext::Tick, task));
            if self.normal.is_empty() {
                break;
            }
            ran += self.normal.drain(|task| run(ExecContext::Microtask, task));
        }
        ran
    }
}

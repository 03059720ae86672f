use crate::error::TaskError;
use crate::phase::Phase;
use crate::scheduler::EventLoop;
use serde::Serialize;
use std::fmt;

pub type TaskResult = Result<(), TaskError>;

/// A one-shot deferred callback. It gets the loop back so it can schedule more work.
pub type Callback = Box<dyn FnOnce(&EventLoop) -> TaskResult>;

/// A re-armable callback, used by interval timers.
pub type RepeatingCallback = Box<dyn FnMut(&EventLoop) -> TaskResult>;

/// Where a piece of code is currently running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecContext {
    /// Top-level synchronous code.
    Main,
    /// High-priority microtask (`next_tick`).
    Tick,
    /// Normal microtask (`queue_microtask`).
    Microtask,
    /// A macrotask callback inside the given phase.
    Phase(Phase),
}

impl fmt::Display for ExecContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecContext::Main => f.write_str("main"),
            ExecContext::Tick => f.write_str("tick queue"),
            ExecContext::Microtask => f.write_str("microtask queue"),
            ExecContext::Phase(phase) => write!(f, "{phase} phase"),
        }
    }
}

/// Lets callbacks return either `()` or a `TaskResult`.
pub trait IntoTaskResult {
    fn into_task_result(self) -> TaskResult;
}

impl IntoTaskResult for () {
    fn into_task_result(self) -> TaskResult {
        Ok(())
    }
}

impl IntoTaskResult for TaskResult {
    fn into_task_result(self) -> TaskResult {
        self
    }
}

/// A queued callback together with its registration order.
pub struct Task {
    pub seq: u64,
    callback: Callback,
}

impl Task {
    pub fn new<F, R>(seq: u64, f: F) -> Self
    where
        F: FnOnce(&EventLoop) -> R + 'static,
        R: IntoTaskResult,
    {
        Self {
            seq,
            callback: Box::new(move |lp: &EventLoop| f(lp).into_task_result()),
        }
    }

    pub fn from_callback(seq: u64, callback: Callback) -> Self {
        Self { seq, callback }
    }

    pub fn run(self, lp: &EventLoop) -> TaskResult {
        (self.callback)(lp)
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").field("seq", &self.seq).finish()
    }
}

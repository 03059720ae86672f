//! A discrete-event model of a single-threaded event loop.
//!
//! Synchronous code runs to completion, then the tick queue, then the
//! microtask queue, then the macrotask phases in a fixed cycle:
//! timers, pending callbacks, idle/prepare, poll, check, close callbacks.
//! CPU-bound work goes to a fixed-size worker pool whose completions come
//! back through the poll phase.
//!
//! Time and workers are injected, so the default loop is fully deterministic.

pub mod clock;
pub mod config;
pub mod error;
mod fs;
pub mod microtask;
pub mod phase;
pub mod pool;
pub mod queue;
pub mod scheduler;
pub mod task;
pub mod timers;
pub mod trace;

pub use clock::{Clock, SystemClock, VirtualClock};
pub use config::{ExecutionMode, LoopConfig, LoopConfigBuilder};
pub use error::{JobError, LoopError, Result, TaskError};
pub use phase::Phase;
pub use pool::{JobId, PoolStats, ThreadWorkers, VirtualWorkers, WorkerBackend};
pub use scheduler::{EventLoop, EventLoopBuilder, RunSummary};
pub use task::{ExecContext, TaskResult};
pub use timers::TimerId;
pub use trace::{JobRecord, StopReason, Trace, TraceEvent};

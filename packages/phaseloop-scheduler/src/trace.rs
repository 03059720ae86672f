use crate::phase::Phase;
use crate::pool::JobId;
use crate::task::ExecContext;
use serde::Serialize;
use std::time::Duration;

/// Why `EventLoop::run` returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Nothing kept the loop alive any more.
    Drained,
    /// `EventLoop::stop` was called.
    Stopped,
    /// `max_iterations` was reached.
    IterationLimit,
}

/// Everything the loop observed, in the order it was recorded.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TraceEvent {
    LoopStarted {
        at: Duration,
        startup_delay: Duration,
    },
    Output {
        at: Duration,
        context: ExecContext,
        line: String,
    },
    PhaseCompleted {
        iteration: u64,
        phase: Phase,
        callbacks: usize,
        at: Duration,
    },
    JobQueued {
        job: JobId,
        at: Duration,
    },
    JobCompleted {
        job: JobId,
        slot: usize,
        started_at: Duration,
        finished_at: Duration,
        ok: bool,
    },
    LoopBlocked {
        from: Duration,
        until: Duration,
    },
    BudgetExhausted {
        iteration: u64,
        phase: Phase,
        deferred: usize,
    },
    UnhandledRejection {
        context: ExecContext,
        message: String,
    },
    UncaughtException {
        context: ExecContext,
        message: String,
        handled: bool,
    },
    TimeoutOverflow {
        requested: Duration,
    },
    LoopFinished {
        at: Duration,
        iterations: u64,
        reason: StopReason,
    },
}

pub type TraceListener = Box<dyn FnMut(&TraceEvent)>;

/// A completed job as seen from the main context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobRecord {
    pub job: JobId,
    pub slot: usize,
    pub started_at: Duration,
    pub finished_at: Duration,
    pub ok: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Trace {
    events: Vec<TraceEvent>,
}

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: TraceEvent) {
        self.events.push(event);
    }

    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    pub fn last(&self) -> Option<&TraceEvent> {
        self.events.last()
    }

    /// Output lines in the order they were logged.
    pub fn output(&self) -> Vec<String> {
        self.events
            .iter()
            .filter_map(|event| match event {
                TraceEvent::Output { line, .. } => Some(line.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn jobs(&self) -> Vec<JobRecord> {
        self.events
            .iter()
            .filter_map(|event| match *event {
                TraceEvent::JobCompleted {
                    job,
                    slot,
                    started_at,
                    finished_at,
                    ok,
                } => Some(JobRecord {
                    job,
                    slot,
                    started_at,
                    finished_at,
                    ok,
                }),
                _ => None,
            })
            .collect()
    }

    pub fn unhandled_rejections(&self) -> Vec<String> {
        self.events
            .iter()
            .filter_map(|event| match event {
                TraceEvent::UnhandledRejection { message, .. } => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.events)
    }
}

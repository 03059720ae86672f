use serde::{Deserialize, Serialize};
use std::fmt;

/// Macrotask phases, in the order one loop iteration visits them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Expired `set_timeout` / `set_interval` callbacks.
    Timers,
    /// System callbacks deferred from the previous iteration.
    PendingCallbacks,
    /// Internal hooks run right before polling.
    IdlePrepare,
    /// I/O and worker pool completions.
    Poll,
    /// `set_immediate` callbacks.
    Check,
    /// Close handlers.
    CloseCallbacks,
}

impl Phase {
    pub const ALL: [Phase; 6] = [
        Phase::Timers,
        Phase::PendingCallbacks,
        Phase::IdlePrepare,
        Phase::Poll,
        Phase::Check,
        Phase::CloseCallbacks,
    ];

    /// The phase that follows this one; `CloseCallbacks` wraps to `Timers`.
    pub fn next(self) -> Phase {
        match self {
            Phase::Timers => Phase::PendingCallbacks,
            Phase::PendingCallbacks => Phase::IdlePrepare,
            Phase::IdlePrepare => Phase::Poll,
            Phase::Poll => Phase::Check,
            Phase::Check => Phase::CloseCallbacks,
            Phase::CloseCallbacks => Phase::Timers,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Phase::Timers => "timers",
            Phase::PendingCallbacks => "pending callbacks",
            Phase::IdlePrepare => "idle/prepare",
            Phase::Poll => "poll",
            Phase::Check => "check",
            Phase::CloseCallbacks => "close callbacks",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

use std::cell::Cell;
use std::time::{Duration, Instant};

/// Time source for the loop. Times are offsets from the loop's origin.
pub trait Clock {
    fn now(&self) -> Duration;

    /// Blocks until `deadline`. Returns immediately if it already passed.
    fn sleep_until(&self, deadline: Duration);

    /// Burns `duration` on the calling context without yielding.
    fn spin(&self, duration: Duration);

    fn is_virtual(&self) -> bool;
}

/// Deterministic clock that only moves when told to.
#[derive(Debug, Default)]
pub struct VirtualClock {
    now: Cell<Duration>,
}

impl VirtualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get().saturating_add(by));
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> Duration {
        self.now.get()
    }

    fn sleep_until(&self, deadline: Duration) {
        if deadline > self.now.get() {
            self.now.set(deadline);
        }
    }

    fn spin(&self, duration: Duration) {
        self.advance(duration);
    }

    fn is_virtual(&self) -> bool {
        true
    }
}

/// Wall clock backed by `Instant`.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    pub fn origin(&self) -> Instant {
        self.origin
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep_until(&self, deadline: Duration) {
        let now = self.now();
        if deadline > now {
            std::thread::sleep(deadline - now);
        }
    }

    fn spin(&self, duration: Duration) {
        let start = Instant::now();
        while start.elapsed() < duration {
            std::hint::spin_loop();
        }
    }

    fn is_virtual(&self) -> bool {
        false
    }
}

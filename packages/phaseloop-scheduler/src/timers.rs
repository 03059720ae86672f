use crate::task::{Callback, RepeatingCallback};
use slotmap::{SlotMap, new_key_type};
use std::collections::BTreeSet;
use std::time::Duration;

new_key_type! {
    pub struct TimerId;
}

/// Largest delay accepted as-is (2^31 - 1 ms). Longer delays fall back to 1 ms.
pub const TIMEOUT_MAX: Duration = Duration::from_millis(2_147_483_647);
pub const MIN_DELAY: Duration = Duration::from_millis(1);

pub enum TimerCallback {
    Once(Callback),
    Every(RepeatingCallback),
}

struct TimerEntry {
    deadline: Duration,
    seq: u64,
    interval: Option<Duration>,
    refed: bool,
    /// `None` while an interval callback is running.
    callback: Option<TimerCallback>,
}

/// Armed timers ordered by (deadline, registration order).
#[derive(Default)]
pub struct TimerList {
    timers: SlotMap<TimerId, TimerEntry>,
    order: BTreeSet<(Duration, u64, TimerId)>,
}

impl TimerList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        deadline: Duration,
        seq: u64,
        interval: Option<Duration>,
        callback: TimerCallback,
    ) -> TimerId {
        let id = self.timers.insert(TimerEntry {
            deadline,
            seq,
            interval,
            refed: true,
            callback: Some(callback),
        });
        self.order.insert((deadline, seq, id));
        id
    }

    /// Removes a timer that has not fired yet (or an interval, at any time).
    pub fn clear(&mut self, id: TimerId) -> bool {
        match self.timers.remove(id) {
            Some(entry) => {
                self.order.remove(&(entry.deadline, entry.seq, id));
                true
            }
            None => false,
        }
    }

    pub fn unref(&mut self, id: TimerId) -> bool {
        match self.timers.get_mut(id) {
            Some(entry) => {
                entry.refed = false;
                true
            }
            None => false,
        }
    }

    /// Takes the earliest timer whose deadline has passed.
    /// One-shot timers are removed; intervals stay registered until `rearm`.
    pub fn pop_due(&mut self, now: Duration) -> Option<(TimerId, TimerCallback)> {
        let &(deadline, seq, id) = self.order.first()?;
        if deadline > now {
            return None;
        }
        self.order.remove(&(deadline, seq, id));

        let entry = self.timers.get_mut(id)?;
        if entry.interval.is_some() {
            let callback = entry.callback.take()?;
            Some((id, callback))
        } else {
            let entry = self.timers.remove(id)?;
            entry.callback.map(|callback| (id, callback))
        }
    }

    /// Puts an interval back on the list after it ran, unless it was cleared meanwhile.
    pub fn rearm(&mut self, id: TimerId, callback: RepeatingCallback, now: Duration, seq: u64) {
        if let Some(entry) = self.timers.get_mut(id) {
            let interval = entry.interval.unwrap_or(MIN_DELAY);
            entry.deadline = now.saturating_add(interval);
            entry.seq = seq;
            entry.callback = Some(TimerCallback::Every(callback));
            self.order.insert((entry.deadline, seq, id));
        }
    }

    pub fn next_deadline(&self) -> Option<Duration> {
        self.order.first().map(|&(deadline, _, _)| deadline)
    }

    pub fn due_count(&self, now: Duration) -> usize {
        self.order
            .iter()
            .take_while(|&&(deadline, _, _)| deadline <= now)
            .count()
    }

    /// Whether any timer still keeps the loop alive.
    pub fn has_refed(&self) -> bool {
        self.timers.values().any(|entry| entry.refed)
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}

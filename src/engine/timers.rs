//! Deadline queue driven by the caller's clock.

use std::collections::BTreeMap;
use std::time::Instant;

/// Handle to a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId {
    deadline: Instant,
    seq: u64,
}

/// Ordered one-shot timers. Ties fire in scheduling order.
#[derive(Debug)]
pub struct TimerQueue<K> {
    timers: BTreeMap<TimerId, K>,
    next_seq: u64,
}

impl<K> Default for TimerQueue<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> TimerQueue<K> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            timers: BTreeMap::new(),
            next_seq: 0,
        }
    }

    /// Schedule `kind` to fire at `deadline`.
    pub fn schedule(&mut self, deadline: Instant, kind: K) -> TimerId {
        let id = TimerId {
            deadline,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.timers.insert(id, kind);
        id
    }

    /// Cancel a timer. Cancelling a fired or cancelled timer is a no-op.
    pub fn cancel(&mut self, id: TimerId) -> Option<K> {
        self.timers.remove(&id)
    }

    /// Earliest pending deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.keys().next().map(|id| id.deadline)
    }

    /// Remove and return the earliest timer due at or before `now`.
    pub fn pop_expired(&mut self, now: Instant) -> Option<(TimerId, K)> {
        let first = *self.timers.keys().next()?;
        if first.deadline > now {
            return None;
        }
        self.timers.remove(&first).map(|kind| (first, kind))
    }

    /// Number of scheduled timers.
    pub fn len(&self) -> usize {
        self.timers.len()
    }

    /// Whether no timers are scheduled.
    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}

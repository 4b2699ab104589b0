//! Outstanding request/reply correlation for one control connection.
//!
//! Every request that expects an answer leaves an entry here until the
//! answer arrives or its timer fires. Entries are matched by expected reply
//! type and channel; the oldest matching entry wins.

use std::time::Duration;

use super::arena::Index;
use super::timers::TimerId;
use crate::wire::MessageType;

/// Identifier of a pending reply, unique within its connection.
pub type PendingId = u64;

/// One request awaiting its reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingReply {
    /// Identifier carried by the reply timer.
    pub id: PendingId,
    /// Type of the request that was sent.
    pub sent: MessageType,
    /// Type of reply that satisfies the request.
    pub expect: MessageType,
    /// Channel the exchange belongs to, if any.
    pub channel: Option<Index>,
    /// Whether a timeout kills the whole connection.
    pub fatal: bool,
    /// Time allowed for the reply.
    pub timeout: Duration,
    /// Reply timer.
    pub timer: TimerId,
}

/// Pending replies of one control connection.
#[derive(Debug, Default)]
pub struct PendingReplies {
    entries: Vec<PendingReply>,
    next_id: PendingId,
}

impl PendingReplies {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Identifier the next registered entry will get.
    pub fn next_id(&self) -> PendingId {
        self.next_id
    }

    /// Record a request awaiting its reply.
    pub fn register(&mut self, entry: PendingReply) {
        debug_assert_eq!(entry.id, self.next_id);
        self.next_id += 1;
        self.entries.push(entry);
    }

    /// Remove the oldest entry satisfied by a `received` message on `channel`.
    pub fn take_match(&mut self, received: MessageType, channel: Option<Index>) -> Option<PendingReply> {
        let pos = self
            .entries
            .iter()
            .position(|p| p.expect == received && p.channel == channel)?;
        Some(self.entries.remove(pos))
    }

    /// Remove the entry with the given id (its timer fired).
    pub fn take(&mut self, id: PendingId) -> Option<PendingReply> {
        let pos = self.entries.iter().position(|p| p.id == id)?;
        Some(self.entries.remove(pos))
    }

    /// Remove every entry belonging to `channel`.
    pub fn take_channel(&mut self, channel: Index) -> Vec<PendingReply> {
        let (gone, kept) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|p| p.channel == Some(channel));
        self.entries = kept;
        gone
    }

    /// Remove every entry.
    pub fn take_all(&mut self) -> Vec<PendingReply> {
        std::mem::take(&mut self.entries)
    }

    /// Number of outstanding entries.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is outstanding.
    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate outstanding entries, oldest first.
    #[cfg(test)]
    pub fn iter(&self) -> impl Iterator<Item = &PendingReply> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::arena::Arena;
    use crate::engine::timers::TimerQueue;
    use std::time::Instant;

    fn entry(
        tracker: &PendingReplies,
        timers: &mut TimerQueue<()>,
        expect: MessageType,
        channel: Option<Index>,
    ) -> PendingReply {
        PendingReply {
            id: tracker.next_id(),
            sent: MessageType::OutCallRequest,
            expect,
            channel,
            fatal: true,
            timeout: Duration::from_secs(90),
            timer: timers.schedule(Instant::now(), ()),
        }
    }

    #[test]
    fn test_match_by_type_and_channel() {
        let mut chans = Arena::new();
        let a = chans.insert(());
        let b = chans.insert(());
        let mut timers = TimerQueue::new();
        let mut tracker = PendingReplies::new();

        let e = entry(&tracker, &mut timers, MessageType::OutCallReply, Some(a));
        tracker.register(e);
        let e = entry(&tracker, &mut timers, MessageType::OutCallReply, Some(b));
        tracker.register(e);

        let got = tracker.take_match(MessageType::OutCallReply, Some(b)).unwrap();
        assert_eq!(got.channel, Some(b));
        assert!(tracker.take_match(MessageType::OutCallReply, Some(b)).is_none());
        assert!(tracker.take_match(MessageType::OutCallReply, None).is_none());
        assert!(tracker.take_match(MessageType::InCallReply, Some(a)).is_none());
        assert_eq!(tracker.take_match(MessageType::OutCallReply, Some(a)).unwrap().channel, Some(a));
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_oldest_match_wins() {
        let mut timers = TimerQueue::new();
        let mut tracker = PendingReplies::new();
        for _ in 0..2 {
            let e = entry(&tracker, &mut timers, MessageType::EchoReply, None);
            tracker.register(e);
        }
        assert_eq!(tracker.take_match(MessageType::EchoReply, None).unwrap().id, 0);
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_take_channel_and_all() {
        let mut chans = Arena::new();
        let a = chans.insert(());
        let mut timers = TimerQueue::new();
        let mut tracker = PendingReplies::new();
        let e = entry(&tracker, &mut timers, MessageType::CallDiscNotify, Some(a));
        tracker.register(e);
        let e = entry(&tracker, &mut timers, MessageType::EchoReply, None);
        tracker.register(e);

        assert_eq!(tracker.take_channel(a).len(), 1);
        assert_eq!(tracker.iter().count(), 1);
        assert!(tracker.take(0).is_none());
        assert_eq!(tracker.take(1).unwrap().expect, MessageType::EchoReply);
        assert!(tracker.take_all().is_empty());
    }
}

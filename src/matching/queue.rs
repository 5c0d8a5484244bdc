//! # Waiting Queue
//!
//! Ordered set of participants that asked for a partner while nobody else was
//! available. The oldest entry is always the next one to be matched.
//!
//! ## Guarantees:
//! - **FIFO**: entries leave in the order they arrived
//! - **Set semantics**: a participant appears at most once
//! - **Total operations**: removing an absent participant is a no-op

use super::ParticipantId;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;

/// A participant waiting for a partner, stamped with its arrival time.
#[derive(Debug, Clone, PartialEq)]
pub struct WaitingEntry {
    pub participant_id: ParticipantId,
    pub enqueued_at: DateTime<Utc>,
}

/// FIFO queue of waiting participants.
///
/// ## Why VecDeque:
/// Matching pops from the front and new arrivals push to the back, both O(1).
/// Removal of an arbitrary participant (disconnect while waiting) is a linear scan,
/// which is fine because the queue only ever holds participants nobody has
/// matched yet.
#[derive(Debug, Default)]
pub struct WaitingQueue {
    entries: VecDeque<WaitingEntry>,
}

impl WaitingQueue {
    #[cfg(test)]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a participant unless it is already waiting.
    ///
    /// Returns `true` if the participant was added, `false` if it was already present.
    pub fn enqueue(&mut self, participant_id: ParticipantId) -> bool {
        if self.contains(&participant_id) {
            return false;
        }

        self.entries.push_back(WaitingEntry {
            participant_id,
            enqueued_at: Utc::now(),
        });
        true
    }

    /// Remove and return the participant that has been waiting the longest.
    pub fn dequeue_oldest(&mut self) -> Option<WaitingEntry> {
        self.entries.pop_front()
    }

    /// Remove a participant if it is waiting. Returns whether anything was removed.
    pub fn remove(&mut self, participant_id: &ParticipantId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| &entry.participant_id != participant_id);
        self.entries.len() != before
    }

    pub fn contains(&self, participant_id: &ParticipantId) -> bool {
        self.entries
            .iter()
            .any(|entry| &entry.participant_id == participant_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over waiting participants, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &WaitingEntry> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> ParticipantId {
        ParticipantId::from(s)
    }

    #[test]
    fn test_dequeue_follows_arrival_order() {
        let mut queue = WaitingQueue::new();
        queue.enqueue(id("a"));
        queue.enqueue(id("b"));
        queue.enqueue(id("c"));

        assert_eq!(queue.dequeue_oldest().unwrap().participant_id, id("a"));
        assert_eq!(queue.dequeue_oldest().unwrap().participant_id, id("b"));
        assert_eq!(queue.dequeue_oldest().unwrap().participant_id, id("c"));
        assert!(queue.dequeue_oldest().is_none());
    }

    #[test]
    fn test_enqueue_is_idempotent() {
        let mut queue = WaitingQueue::new();
        assert!(queue.enqueue(id("a")));
        assert!(queue.enqueue(id("b")));
        // Re-adding keeps the original position
        assert!(!queue.enqueue(id("a")));

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dequeue_oldest().unwrap().participant_id, id("a"));
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let mut queue = WaitingQueue::new();
        queue.enqueue(id("a"));

        assert!(!queue.remove(&id("ghost")));
        assert!(queue.remove(&id("a")));
        assert!(!queue.remove(&id("a")));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_remove_from_middle_preserves_order() {
        let mut queue = WaitingQueue::new();
        queue.enqueue(id("a"));
        queue.enqueue(id("b"));
        queue.enqueue(id("c"));

        queue.remove(&id("b"));

        let order: Vec<_> = queue.iter().map(|e| e.participant_id.clone()).collect();
        assert_eq!(order, vec![id("a"), id("c")]);
    }
}

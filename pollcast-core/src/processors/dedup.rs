//! Bounded window of recently-seen event ids.

use crate::config::DedupStrategy;
use crate::entities::{Event, EventId};
use std::collections::{HashSet, VecDeque};
use std::num::NonZeroUsize;

/// The last `capacity` event ids, most recent first.
///
/// Backed by a `VecDeque` for ordering and a `HashSet` for membership, so
/// record, evict and lookup are all O(1).
#[derive(Debug, Clone)]
pub struct DedupWindow {
    order: VecDeque<EventId>,
    members: HashSet<EventId>,
    capacity: NonZeroUsize,
}

impl DedupWindow {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity.get()),
            members: HashSet::with_capacity(capacity.get()),
            capacity,
        }
    }

    /// Reset the window to `ids`, given newest first.
    ///
    /// Only the newest `capacity` distinct ids are kept.
    pub fn seed<I>(&mut self, ids: I)
    where
        I: IntoIterator<Item = EventId>,
    {
        self.order.clear();
        self.members.clear();
        for id in ids {
            if self.order.len() == self.capacity.get() {
                break;
            }
            if self.members.insert(id.clone()) {
                self.order.push_back(id);
            }
        }
    }

    pub fn is_new(&self, id: &EventId) -> bool {
        !self.members.contains(id)
    }

    /// Prepend `id`, evicting the oldest id when over capacity.
    ///
    /// Returns `false` (and changes nothing) if `id` is already present.
    pub fn record(&mut self, id: EventId) -> bool {
        if !self.members.insert(id.clone()) {
            return false;
        }
        self.order.push_front(id);
        self.evict_overflow();
        true
    }

    /// The events of a newest-first `batch` that are not in the window,
    /// returned oldest first.
    ///
    /// Does not record anything; the caller records each event as it is
    /// dispatched.
    pub fn fresh_events(&self, batch: Vec<Event>, strategy: DedupStrategy) -> Vec<Event> {
        let mut seen_in_batch: HashSet<EventId> = HashSet::new();
        let mut fresh = Vec::new();
        for event in batch {
            if !self.is_new(event.id()) {
                match strategy {
                    DedupStrategy::StopAtFirstKnown => break,
                    DedupStrategy::FullScan => continue,
                }
            }
            if seen_in_batch.insert(event.id().clone()) {
                fresh.push(event);
            }
        }
        fresh.reverse();
        fresh
    }

    /// Change the bound, evicting the oldest ids if it shrinks.
    pub fn set_capacity(&mut self, capacity: NonZeroUsize) {
        self.capacity = capacity;
        self.evict_overflow();
    }

    pub fn capacity(&self) -> NonZeroUsize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Ids, most recent first.
    pub fn iter(&self) -> impl Iterator<Item = &EventId> {
        self.order.iter()
    }

    pub fn to_vec(&self) -> Vec<EventId> {
        self.order.iter().cloned().collect()
    }

    fn evict_overflow(&mut self) {
        while self.order.len() > self.capacity.get() {
            if let Some(oldest) = self.order.pop_back() {
                self.members.remove(&oldest);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cap(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    fn ids(window: &DedupWindow) -> Vec<&str> {
        window.iter().map(EventId::as_str).collect()
    }

    fn batch(ids: &[u64]) -> Vec<Event> {
        ids.iter()
            .map(|id| Event::new(*id, json!({ "id": id })))
            .collect()
    }

    #[test]
    fn test_window_bound_keeps_most_recent() {
        let mut window = DedupWindow::new(cap(3));
        for id in 1..=5u64 {
            assert!(window.record(id.into()));
        }
        assert_eq!(window.len(), 3);
        assert_eq!(ids(&window), ["5", "4", "3"]);
        assert!(window.is_new(&1u64.into()));
        assert!(window.is_new(&2u64.into()));
        assert!(!window.is_new(&3u64.into()));
    }

    #[test]
    fn test_record_existing_id_is_noop() {
        let mut window = DedupWindow::new(cap(3));
        window.record("a".into());
        window.record("b".into());
        assert!(!window.record("a".into()));
        assert_eq!(ids(&window), ["b", "a"]);
    }

    #[test]
    fn test_seed_truncates_to_newest() {
        let mut window = DedupWindow::new(cap(2));
        window.seed(["c", "b", "a"].map(EventId::from));
        assert_eq!(ids(&window), ["c", "b"]);

        window.seed(["x", "x"].map(EventId::from));
        assert_eq!(ids(&window), ["x"]);
    }

    #[test]
    fn test_seed_suppresses_replay() {
        let mut window = DedupWindow::new(cap(10));
        window.seed(["A", "B", "C"].map(EventId::from));
        let replay = vec![
            Event::new("A", json!({})),
            Event::new("B", json!({})),
            Event::new("C", json!({})),
        ];
        assert!(window.fresh_events(replay, DedupStrategy::FullScan).is_empty());
    }

    #[test]
    fn test_fresh_events_are_oldest_first() {
        let mut window = DedupWindow::new(cap(4));
        window.seed([5u64, 4, 3].map(EventId::from));

        let fresh = window.fresh_events(batch(&[7, 6, 5]), DedupStrategy::FullScan);
        let fresh_ids: Vec<&str> = fresh.iter().map(|e| e.id().as_str()).collect();
        assert_eq!(fresh_ids, ["6", "7"]);

        for event in &fresh {
            window.record(event.id().clone());
        }
        assert_eq!(ids(&window), ["7", "6", "5", "4"]);
    }

    #[test]
    fn test_strategies_differ_on_out_of_order_batches() {
        let mut window = DedupWindow::new(cap(10));
        window.seed([EventId::from(5u64)]);

        let full = window.fresh_events(batch(&[8, 5, 7]), DedupStrategy::FullScan);
        assert_eq!(full.len(), 2);

        let stop = window.fresh_events(batch(&[8, 5, 7]), DedupStrategy::StopAtFirstKnown);
        assert_eq!(stop.len(), 1);
        assert_eq!(stop[0].id().as_str(), "8");
    }

    #[test]
    fn test_duplicates_within_batch_are_collapsed() {
        let window = DedupWindow::new(cap(10));
        let fresh = window.fresh_events(batch(&[2, 2, 1]), DedupStrategy::FullScan);
        let fresh_ids: Vec<&str> = fresh.iter().map(|e| e.id().as_str()).collect();
        assert_eq!(fresh_ids, ["1", "2"]);
    }

    #[test]
    fn test_shrinking_capacity_evicts_oldest() {
        let mut window = DedupWindow::new(cap(5));
        window.seed((1..=5u64).rev().map(EventId::from));
        window.set_capacity(cap(2));
        assert_eq!(ids(&window), ["5", "4"]);
        assert!(window.is_new(&3u64.into()));
    }
}

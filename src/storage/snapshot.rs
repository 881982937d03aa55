//! Ordered buffer of observation batches awaiting persistence.

use std::collections::BTreeMap;
use std::collections::btree_map;

use crate::collector::Observation;

/// Observation batches keyed by cycle start time (epoch milliseconds).
///
/// Pure accumulation: no deduplication happens here. Iteration is always in
/// ascending timestamp order.
#[derive(Debug, Default)]
pub struct SnapshotStore {
    batches: BTreeMap<i64, Vec<Observation>>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a batch, extending the existing one if `timestamp` is already present.
    pub fn append(&mut self, timestamp: i64, observations: Vec<Observation>) {
        match self.batches.entry(timestamp) {
            btree_map::Entry::Vacant(slot) => {
                slot.insert(observations);
            }
            btree_map::Entry::Occupied(mut slot) => {
                slot.get_mut().extend(observations);
            }
        }
    }

    /// Takes every batch out of the store, oldest first.
    ///
    /// The store is empty as soon as this returns, whether or not the iterator
    /// is consumed.
    pub fn drain_in_order(&mut self) -> btree_map::IntoIter<i64, Vec<Observation>> {
        std::mem::take(&mut self.batches).into_iter()
    }

    /// Removes and returns the oldest batch.
    pub fn pop_first(&mut self) -> Option<(i64, Vec<Observation>)> {
        self.batches.pop_first()
    }

    /// Drops the oldest batches until at most `max_batches` remain.
    ///
    /// Returns the number of observations dropped.
    pub fn truncate_oldest(&mut self, max_batches: usize) -> usize {
        let mut dropped = 0;
        while self.batches.len() > max_batches {
            match self.batches.pop_first() {
                Some((_, batch)) => dropped += batch.len(),
                None => break,
            }
        }
        dropped
    }

    pub fn clear(&mut self) {
        self.batches.clear();
    }

    /// Number of batches (distinct timestamps).
    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Total observations across all batches.
    pub fn observation_count(&self) -> usize {
        self.batches.values().map(Vec::len).sum()
    }

    /// Timestamp of the oldest pending batch.
    pub fn oldest_timestamp(&self) -> Option<i64> {
        self.batches.keys().next().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(name: &str, calls: i64) -> Observation {
        Observation {
            schema: "app".to_string(),
            name: name.to_string(),
            calls,
            ..Observation::default()
        }
    }

    #[test]
    fn drains_in_timestamp_order() {
        let mut store = SnapshotStore::new();
        store.append(3_000, vec![obs("c", 1)]);
        store.append(1_000, vec![obs("a", 1)]);
        store.append(2_000, vec![obs("b", 1)]);

        let order: Vec<i64> = store.drain_in_order().map(|(ts, _)| ts).collect();
        assert_eq!(order, vec![1_000, 2_000, 3_000]);
        assert!(store.is_empty());
    }

    #[test]
    fn same_timestamp_extends_batch_in_order() {
        let mut store = SnapshotStore::new();
        store.append(1_000, vec![obs("a", 1), obs("b", 2)]);
        store.append(1_000, vec![obs("c", 3)]);

        assert_eq!(store.len(), 1);
        assert_eq!(store.observation_count(), 3);
        let (_, batch) = store.pop_first().unwrap();
        let names: Vec<&str> = batch.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn drain_clears_even_if_not_consumed() {
        let mut store = SnapshotStore::new();
        store.append(1_000, vec![obs("a", 1)]);
        drop(store.drain_in_order());
        assert!(store.is_empty());
    }

    #[test]
    fn truncate_oldest_keeps_newest() {
        let mut store = SnapshotStore::new();
        for ts in 1..=5 {
            store.append(ts * 1_000, vec![obs("a", ts), obs("b", ts)]);
        }
        let dropped = store.truncate_oldest(2);
        assert_eq!(dropped, 6);
        assert_eq!(store.len(), 2);
        assert_eq!(store.oldest_timestamp(), Some(4_000));
    }

    #[test]
    fn clear_empties_store() {
        let mut store = SnapshotStore::new();
        store.append(1_000, vec![obs("a", 1)]);
        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.observation_count(), 0);
        assert_eq!(store.oldest_timestamp(), None);
    }
}

//! Last persisted call count per function.

use std::collections::HashMap;

use crate::collector::FunctionId;

/// Returns true when `current` differs from the last persisted count.
///
/// A count lower than `previous` (statistics reset) also counts as new
/// activity.
pub fn has_new_activity(previous: Option<i64>, current: i64) -> bool {
    previous != Some(current)
}

/// In-memory cache of the last persisted cumulative call count per function.
///
/// Never evicted; it holds one entry per distinct function seen. Empty after
/// a restart, so the first cycle re-persists every current value.
#[derive(Debug, Default)]
pub struct DeltaFilter {
    last_calls: HashMap<FunctionId, i64>,
}

impl DeltaFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: FunctionId) -> Option<i64> {
        self.last_calls.get(&id).copied()
    }

    /// Records `calls` as persisted for `id`. Call only after the write succeeded.
    pub fn set(&mut self, id: FunctionId, calls: i64) {
        self.last_calls.insert(id, calls);
    }

    /// Returns true when `calls` is new activity for `id`.
    pub fn is_new(&self, id: FunctionId, calls: i64) -> bool {
        has_new_activity(self.get(id), calls)
    }

    pub fn len(&self) -> usize {
        self.last_calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_calls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: i32) -> FunctionId {
        FunctionId::new(n).unwrap()
    }

    #[test]
    fn first_sample_is_always_new() {
        assert!(has_new_activity(None, 0));
        assert!(has_new_activity(None, 10));
    }

    #[test]
    fn unchanged_count_is_not_new() {
        assert!(!has_new_activity(Some(10), 10));
        assert!(has_new_activity(Some(10), 15));
    }

    #[test]
    fn reset_counter_is_new() {
        assert!(has_new_activity(Some(10), 3));
    }

    #[test]
    fn filter_tracks_per_function() {
        let mut filter = DeltaFilter::new();
        assert!(filter.is_new(id(1), 10));

        filter.set(id(1), 10);
        assert_eq!(filter.get(id(1)), Some(10));
        assert!(!filter.is_new(id(1), 10));
        assert!(filter.is_new(id(2), 10));

        filter.set(id(1), 15);
        assert_eq!(filter.get(id(1)), Some(15));
        assert_eq!(filter.len(), 1);
    }
}

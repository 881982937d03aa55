//! In-memory monitoring store.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::collector::{FunctionId, FunctionKey, Sample};
use crate::error::CollectError;
use crate::storage::target::{IdentityBackend, MonitorStore, TargetSession};

/// (host_id, schema, stored name, arguments, argmodes), the store's unique key.
type IdentityKey = (i32, String, String, String, String);

fn identity_key(host_id: i32, key: &FunctionKey) -> IdentityKey {
    (
        host_id,
        key.schema.clone(),
        key.stored_name(),
        key.arguments.clone(),
        key.argmodes.clone(),
    )
}

#[derive(Debug, Default)]
struct MemoryStoreState {
    identities: HashMap<IdentityKey, i32>,
    samples: Vec<Sample>,
    open: usize,
    opens: usize,
    identity_lookups: usize,
    open_error: Option<CollectError>,
    /// Inserts allowed before the next insert fails; cleared once it fires.
    inserts_before_failure: Option<usize>,
    /// Function names whose identity lookup fails.
    unresolvable: HashSet<String>,
}

/// Monitoring store kept in memory.
///
/// Clones share state, so several pipelines can write to one store the same
/// way they would share a real one.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryStoreState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every sample written so far, in write order.
    pub fn samples(&self) -> Vec<Sample> {
        self.lock().samples.clone()
    }

    /// Samples written for one function, in write order.
    pub fn samples_for(&self, id: FunctionId) -> Vec<Sample> {
        self.lock()
            .samples
            .iter()
            .filter(|s| s.function_id == id)
            .copied()
            .collect()
    }

    /// Identity registered for `key` on `host_id`, if any.
    pub fn identity_of(&self, host_id: i32, key: &FunctionKey) -> Option<FunctionId> {
        self.lock()
            .identities
            .get(&identity_key(host_id, key))
            .copied()
            .and_then(FunctionId::new)
    }

    /// Sessions currently open.
    pub fn open_sessions(&self) -> usize {
        self.lock().open
    }

    /// Sessions opened so far.
    pub fn open_count(&self) -> usize {
        self.lock().opens
    }

    /// Identity round-trips served so far.
    pub fn identity_lookups(&self) -> usize {
        self.lock().identity_lookups
    }

    /// Makes the next `open` fail.
    pub fn fail_next_open(&self, error: CollectError) {
        self.lock().open_error = Some(error);
    }

    /// Lets `count` more inserts succeed, then fails the next one.
    pub fn fail_insert_after(&self, count: usize) {
        self.lock().inserts_before_failure = Some(count);
    }

    /// Makes identity lookups for `name` fail until [`MemoryStore::allow_identity`].
    pub fn fail_identity_for(&self, name: &str) {
        self.lock().unresolvable.insert(name.to_string());
    }

    /// Lets identity lookups for `name` succeed again.
    pub fn allow_identity(&self, name: &str) {
        self.lock().unresolvable.remove(name);
    }

    fn lock(&self) -> MutexGuard<'_, MemoryStoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MonitorStore for MemoryStore {
    type Session = MemorySession;

    fn open(&self) -> Result<MemorySession, CollectError> {
        let mut state = self.lock();
        if let Some(error) = state.open_error.take() {
            return Err(error);
        }
        state.open += 1;
        state.opens += 1;
        Ok(MemorySession {
            state: Arc::clone(&self.state),
        })
    }
}

/// Session handed out by [`MemoryStore`]; released on drop.
#[derive(Debug)]
pub struct MemorySession {
    state: Arc<Mutex<MemoryStoreState>>,
}

impl MemorySession {
    fn lock(&self) -> MutexGuard<'_, MemoryStoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl IdentityBackend for MemorySession {
    fn lookup_or_create(&mut self, host_id: i32, key: &FunctionKey) -> Result<i32, CollectError> {
        let mut state = self.lock();
        state.identity_lookups += 1;
        if state.unresolvable.contains(&key.name) {
            return Err(CollectError::TargetWrite(format!(
                "identity lookup rejected for {}",
                key
            )));
        }
        let next = state.identities.len() as i32 + 1;
        Ok(*state
            .identities
            .entry(identity_key(host_id, key))
            .or_insert(next))
    }
}

impl TargetSession for MemorySession {
    fn insert_sample(&mut self, sample: &Sample) -> Result<(), CollectError> {
        let mut state = self.lock();
        let remaining = state.inserts_before_failure;
        match remaining {
            Some(0) => {
                state.inserts_before_failure = None;
                return Err(CollectError::TargetWrite(
                    "connection reset by peer".to_string(),
                ));
            }
            Some(n) => state.inserts_before_failure = Some(n - 1),
            None => {}
        }
        state.samples.push(*sample);
        Ok(())
    }

    fn close(self) -> Result<(), CollectError> {
        Ok(())
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        let mut state = self.lock();
        state.open = state.open.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::mock::observation;

    #[test]
    fn identities_are_stable_per_host() {
        let store = MemoryStore::new();
        let key = observation("app", "f", 1, 1, 1).key();

        let mut session = store.open().unwrap();
        let a = session.lookup_or_create(1, &key).unwrap();
        let b = session.lookup_or_create(1, &key).unwrap();
        let other_host = session.lookup_or_create(2, &key).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, other_host);
        assert_eq!(store.identity_of(1, &key).map(FunctionId::get), Some(a));
    }

    #[test]
    fn argument_modes_are_part_of_the_identity() {
        let store = MemoryStore::new();
        let plain = observation("app", "f", 1, 1, 1).with_overloads("integer,text", 2);
        let with_out = plain.clone().with_argmodes("i,o");

        let mut session = store.open().unwrap();
        let a = session.lookup_or_create(1, &plain.key()).unwrap();
        let b = session.lookup_or_create(1, &with_out.key()).unwrap();
        assert_ne!(a, b);
        assert_eq!(store.identity_of(1, &with_out.key()).map(FunctionId::get), Some(b));
    }

    #[test]
    fn insert_failure_fires_once() {
        let store = MemoryStore::new();
        store.fail_insert_after(1);
        let id = FunctionId::new(1).unwrap();
        let sample = Sample::new(1_000, id, &observation("app", "f", 1, 1, 1));

        let mut session = store.open().unwrap();
        assert!(session.insert_sample(&sample).is_ok());
        assert!(session.insert_sample(&sample).is_err());
        assert!(session.insert_sample(&sample).is_ok());
        assert_eq!(store.samples().len(), 2);
    }

    #[test]
    fn sessions_release_on_drop() {
        let store = MemoryStore::new();
        let s1 = store.open().unwrap();
        let s2 = store.open().unwrap();
        assert_eq!(store.open_sessions(), 2);
        drop(s1);
        s2.close().unwrap();
        assert_eq!(store.open_sessions(), 0);
        assert_eq!(store.open_count(), 2);
    }
}

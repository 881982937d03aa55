//! Natural key to surrogate identity resolution.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::collector::{FunctionId, FunctionKey, Observation};
use crate::storage::target::IdentityBackend;

/// Maps an observation's natural key to a stable [`FunctionId`].
///
/// Never fails loudly: `None` means "skip this observation". The pipeline
/// treats it as a per-observation skip, not a cycle failure.
pub trait IdentityResolver {
    fn resolve(
        &mut self,
        backend: &mut dyn IdentityBackend,
        observation: &Observation,
    ) -> Option<FunctionId>;
}

/// Store-backed resolver with an in-process cache.
///
/// One instance per monitored host. The cache lives as long as the collector
/// and is never evicted; it only saves round-trips, the store remains the
/// source of truth.
#[derive(Debug)]
pub struct CachedIdentityResolver {
    host_id: i32,
    cache: HashMap<FunctionKey, FunctionId>,
}

impl CachedIdentityResolver {
    pub fn new(host_id: i32) -> Self {
        Self {
            host_id,
            cache: HashMap::new(),
        }
    }

    /// Number of cached identities.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

impl IdentityResolver for CachedIdentityResolver {
    fn resolve(
        &mut self,
        backend: &mut dyn IdentityBackend,
        observation: &Observation,
    ) -> Option<FunctionId> {
        let key = observation.key();
        if let Some(id) = self.cache.get(&key) {
            return Some(*id);
        }

        match backend.lookup_or_create(self.host_id, &key) {
            Ok(raw) => match FunctionId::new(raw) {
                Some(id) => {
                    debug!(
                        host_id = self.host_id,
                        function = %key,
                        id = id.get(),
                        "identity resolved"
                    );
                    self.cache.insert(key, id);
                    Some(id)
                }
                None => {
                    warn!(
                        host_id = self.host_id,
                        function = %key,
                        id = raw,
                        "store returned invalid identity"
                    );
                    None
                }
            },
            Err(e) => {
                warn!(
                    host_id = self.host_id,
                    function = %key,
                    error = %e,
                    "identity lookup failed"
                );
                None
            }
        }
    }
}

/// Resolver that assigns sequential identities in memory and ignores the backend.
#[derive(Debug)]
pub struct InMemoryIdentityResolver {
    next_id: i32,
    ids: HashMap<FunctionKey, FunctionId>,
}

impl Default for InMemoryIdentityResolver {
    fn default() -> Self {
        Self {
            next_id: 1,
            ids: HashMap::new(),
        }
    }
}

impl InMemoryIdentityResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the identity already assigned to `key`, if any.
    pub fn get(&self, key: &FunctionKey) -> Option<FunctionId> {
        self.ids.get(key).copied()
    }
}

impl IdentityResolver for InMemoryIdentityResolver {
    fn resolve(
        &mut self,
        _backend: &mut dyn IdentityBackend,
        observation: &Observation,
    ) -> Option<FunctionId> {
        let key = observation.key();
        if let Some(id) = self.ids.get(&key) {
            return Some(*id);
        }
        let id = FunctionId::new(self.next_id)?;
        self.next_id = self.next_id.checked_add(1)?;
        self.ids.insert(key, id);
        Some(id)
    }
}

//! Per-host collector state and the monitoring store.
//!
//! - `snapshot` — batches waiting to be persisted
//! - `delta` — last persisted call count per function
//! - `identity` — natural key to surrogate id resolution
//! - `target` — monitoring store traits and the postgres implementation

pub mod delta;
pub mod identity;
pub mod snapshot;
pub mod target;

pub use delta::{DeltaFilter, has_new_activity};
pub use identity::{CachedIdentityResolver, IdentityResolver, InMemoryIdentityResolver};
pub use snapshot::SnapshotStore;
pub use target::{IdentityBackend, MonitorStore, PgMonitorStore, PgTargetSession, TargetSession};

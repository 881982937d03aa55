//! In-memory source and store doubles for testing.
//!
//! This module provides `MockSource` and `MemoryStore` so the collection
//! pipeline can be exercised without a PostgreSQL server. Both track open
//! connections, which lets tests check that failed cycles leak nothing.

mod scenarios;
mod source;
mod store;

pub use scenarios::observation;
pub use source::{MockSource, MockSourceConnection};
pub use store::{MemorySession, MemoryStore};

//! sprocstat - stored procedure statistics collector.
//!
//! Periodically snapshots `pg_stat_user_functions` on a monitored PostgreSQL
//! instance and writes every function whose call count changed into a
//! central monitoring store.
//!
//! - `collector` — the collection pipeline, sources, and test doubles
//! - `storage` — snapshot buffer, delta filter, identity resolution, monitoring store
//! - `config` — per-source and per-pipeline settings
//! - `error` — `CollectError`
//! - `util` — helper utilities

pub mod collector;
pub mod config;
pub mod error;
pub mod storage;
pub mod util;

pub use error::CollectError;

//! Function statistics collection.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                    CollectionPipeline                      │
//! │                                                            │
//! │  StatsSource ─► SnapshotStore ─► IdentityResolver          │
//! │                  (ts → batch)          │                   │
//! │                                        ▼                   │
//! │                              DeltaFilter ─► MonitorStore   │
//! └────────────────────────────────────────────────────────────┘
//!        │                                               │
//!  ┌─────▼─────────┐                             ┌───────▼────────┐
//!  │ PgStatsSource │                             │ PgMonitorStore │
//!  │ MockSource    │                             │ MemoryStore    │
//!  └───────────────┘                             └────────────────┘
//! ```
//!
//! # Usage
//!
//! ```
//! use sprocstat::collector::mock::{MemoryStore, MockSource, observation};
//! use sprocstat::collector::CollectionPipeline;
//! use sprocstat::config::CollectorConfig;
//! use sprocstat::storage::CachedIdentityResolver;
//!
//! let source = MockSource::new("db1");
//! let store = MemoryStore::new();
//! let mut pipeline = CollectionPipeline::new(
//!     source.clone(),
//!     store.clone(),
//!     CachedIdentityResolver::new(1),
//!     CollectorConfig::default(),
//! );
//!
//! source.push_rows(vec![observation("app", "f", 10, 100, 80)]);
//! assert!(pipeline.run_cycle());
//! assert_eq!(store.samples().len(), 1);
//! ```

pub mod mock;
mod observation;
mod pipeline;
pub(crate) mod queries;
mod source;

pub use observation::{FunctionId, FunctionKey, Observation, Sample};
pub use pipeline::{CollectionPipeline, CycleReport, CycleState};
pub use source::{PgSourceConnection, PgStatsSource, SourceConnection, StatsSource};

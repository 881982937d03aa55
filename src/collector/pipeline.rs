//! One collection cycle: snapshot the source, then persist new activity.
//!
//! ```text
//! Idle ─► SourceConnected ─► Snapshotting ─► SourceClosed
//!                                                 │
//!  Idle ◄─ TargetClosed ◄─ Draining ◄─ TargetConnected
//! ```
//!
//! Any error before `TargetClosed` jumps straight back to `Idle`; whichever
//! connection is open at that point is dropped, which closes it.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, trace, warn};

use super::observation::{Observation, Sample};
use super::source::{SourceConnection, StatsSource};
use crate::config::{CollectorConfig, PendingPolicy};
use crate::error::CollectError;
use crate::storage::delta::DeltaFilter;
use crate::storage::identity::IdentityResolver;
use crate::storage::snapshot::SnapshotStore;
use crate::storage::target::{MonitorStore, TargetSession};

/// Position of a pipeline within its current cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CycleState {
    #[default]
    Idle,
    SourceConnected,
    Snapshotting,
    SourceClosed,
    TargetConnected,
    Draining,
    TargetClosed,
}

/// Outcome of a successful cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Cycle start, epoch milliseconds.
    pub timestamp: i64,
    /// Observations drained from the snapshot store (including retried batches).
    pub read: usize,
    /// Samples written to the monitoring store.
    pub written: usize,
    /// Skipped because the call count had not changed.
    pub unchanged: usize,
    /// Skipped because no identity could be resolved.
    pub unresolved: usize,
    /// Batches drained in this cycle.
    pub batches: usize,
    pub duration: Duration,
}

/// Collects function statistics from one monitored database.
///
/// Owns all per-host state: pending snapshots, the delta filter, and the
/// identity resolver. Not reentrant; the caller runs at most one cycle at a
/// time per pipeline.
pub struct CollectionPipeline<S, T, R>
where
    S: StatsSource,
    T: MonitorStore,
    R: IdentityResolver,
{
    source: S,
    store: T,
    resolver: R,
    snapshots: SnapshotStore,
    deltas: DeltaFilter,
    config: CollectorConfig,
    state: CycleState,
    last_report: Option<CycleReport>,
}

impl<S, T, R> CollectionPipeline<S, T, R>
where
    S: StatsSource,
    T: MonitorStore,
    R: IdentityResolver,
{
    pub fn new(source: S, store: T, resolver: R, config: CollectorConfig) -> Self {
        Self {
            source,
            store,
            resolver,
            snapshots: SnapshotStore::new(),
            deltas: DeltaFilter::new(),
            config,
            state: CycleState::Idle,
            last_report: None,
        }
    }

    /// Runs one cycle stamped with the current time.
    ///
    /// Returns false only for source or monitoring store failures; skipped
    /// observations do not fail the cycle.
    pub fn run_cycle(&mut self) -> bool {
        let timestamp = Utc::now().timestamp_millis();
        match self.collect_at(timestamp) {
            Ok(report) => {
                info!(
                    host = self.source.name(),
                    read = report.read,
                    written = report.written,
                    unchanged = report.unchanged,
                    unresolved = report.unresolved,
                    duration_ms = report.duration.as_millis() as u64,
                    "functions read / written"
                );
                true
            }
            Err(e) => {
                error!(
                    host = self.source.name(),
                    error = %e,
                    pending = self.snapshots.len(),
                    "collection cycle failed"
                );
                false
            }
        }
    }

    /// Runs one cycle whose snapshot is keyed by `timestamp` (epoch milliseconds).
    pub fn collect_at(&mut self, timestamp: i64) -> Result<CycleReport, CollectError> {
        let started = Instant::now();
        let result = self
            .snapshot(timestamp)
            .and_then(|()| self.persist_pending(timestamp));
        self.transition(CycleState::Idle);

        match result {
            Ok(mut report) => {
                self.snapshots.clear();
                report.duration = started.elapsed();
                self.last_report = Some(report.clone());
                Ok(report)
            }
            Err(e) => {
                self.discard_or_retain();
                Err(e)
            }
        }
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    /// Batches waiting to be persisted.
    pub fn pending_batches(&self) -> usize {
        self.snapshots.len()
    }

    pub fn delta_filter(&self) -> &DeltaFilter {
        &self.deltas
    }

    pub fn resolver(&self) -> &R {
        &self.resolver
    }

    pub fn last_report(&self) -> Option<&CycleReport> {
        self.last_report.as_ref()
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    /// Reads the source and appends one batch keyed by `timestamp`.
    fn snapshot(&mut self, timestamp: i64) -> Result<(), CollectError> {
        let mut conn = self.source.connect()?;
        self.transition(CycleState::SourceConnected);

        self.transition(CycleState::Snapshotting);
        let observations = conn.read_functions()?;

        // Rows are already in memory; a close failure loses nothing.
        if let Err(e) = conn.close() {
            warn!(
                host = self.source.name(),
                error = %e,
                "source connection did not close cleanly"
            );
        }
        self.transition(CycleState::SourceClosed);

        info!(
            host = self.source.name(),
            functions = observations.len(),
            "finished reading function stats"
        );
        self.snapshots.append(timestamp, observations);
        Ok(())
    }

    /// Drains every pending batch into the monitoring store, oldest first.
    fn persist_pending(&mut self, timestamp: i64) -> Result<CycleReport, CollectError> {
        let mut session = self.store.open()?;
        self.transition(CycleState::TargetConnected);

        self.transition(CycleState::Draining);
        let mut report = CycleReport {
            timestamp,
            ..CycleReport::default()
        };

        match self.config.pending_policy {
            PendingPolicy::RetainOnFailure => {
                while let Some((batch_ts, batch)) = self.snapshots.pop_first() {
                    let result = self.persist_batch(&mut session, batch_ts, &batch, &mut report);
                    if let Err(e) = result {
                        // Already-written rows are skipped on retry by the delta filter.
                        self.snapshots.append(batch_ts, batch);
                        return Err(e);
                    }
                }
            }
            PendingPolicy::DiscardOnFailure => {
                for (batch_ts, batch) in self.snapshots.drain_in_order() {
                    self.persist_batch(&mut session, batch_ts, &batch, &mut report)?;
                }
            }
        }

        if let Err(e) = session.close() {
            warn!(
                host = self.source.name(),
                error = %e,
                "monitoring store connection did not close cleanly"
            );
        }
        self.transition(CycleState::TargetClosed);
        Ok(report)
    }

    fn persist_batch(
        &mut self,
        session: &mut T::Session,
        timestamp: i64,
        batch: &[Observation],
        report: &mut CycleReport,
    ) -> Result<(), CollectError> {
        trace!(
            host = self.source.name(),
            at = %format_timestamp(timestamp),
            observations = batch.len(),
            "draining batch"
        );
        report.batches += 1;

        for observation in batch {
            report.read += 1;

            let Some(id) = self.resolver.resolve(session, observation) else {
                error!(
                    host = self.source.name(),
                    schema = %observation.schema,
                    function = %observation.name,
                    arguments = %observation.arguments,
                    "could not retrieve function identity, skipping"
                );
                report.unresolved += 1;
                continue;
            };

            if !self.deltas.is_new(id, observation.calls) {
                report.unchanged += 1;
                continue;
            }
            if let Some(previous) = self.deltas.get(id)
                && observation.calls < previous
            {
                debug!(
                    host = self.source.name(),
                    function = %observation.key(),
                    previous,
                    current = observation.calls,
                    "call counter went backwards, treating as reset"
                );
            }

            session.insert_sample(&Sample::new(timestamp, id, observation))?;
            self.deltas.set(id, observation.calls);
            report.written += 1;
        }
        Ok(())
    }

    fn discard_or_retain(&mut self) {
        match self.config.pending_policy {
            PendingPolicy::DiscardOnFailure => {
                let dropped = self.snapshots.observation_count();
                self.snapshots.clear();
                if dropped > 0 {
                    warn!(
                        host = self.source.name(),
                        dropped,
                        "discarded snapshots of failed cycle"
                    );
                }
            }
            PendingPolicy::RetainOnFailure => {
                let dropped = self
                    .snapshots
                    .truncate_oldest(self.config.max_pending_batches);
                if dropped > 0 {
                    warn!(
                        host = self.source.name(),
                        dropped,
                        max_pending = self.config.max_pending_batches,
                        "pending snapshot limit reached, dropped oldest observations"
                    );
                }
                if !self.snapshots.is_empty() {
                    debug!(
                        host = self.source.name(),
                        pending = self.snapshots.len(),
                        oldest = %self
                            .snapshots
                            .oldest_timestamp()
                            .map(format_timestamp)
                            .unwrap_or_default(),
                        "retaining snapshots for next cycle"
                    );
                }
            }
        }
    }

    fn transition(&mut self, next: CycleState) {
        trace!(host = self.source.name(), from = ?self.state, to = ?next, "cycle state");
        self.state = next;
    }
}

fn format_timestamp(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
        .unwrap_or_else(|| millis.to_string())
}

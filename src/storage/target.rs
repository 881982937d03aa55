//! Monitoring store: where identities live and samples are written.
//!
//! The pipeline talks to the store only through [`MonitorStore`] and
//! [`TargetSession`], so tests can swap in [`crate::collector::mock::MemoryStore`].
//!
//! The postgres implementation expects:
//!
//! ```text
//! monitor_data.sprocs (
//!     sproc_id        serial PRIMARY KEY,
//!     sproc_host_id   int    NOT NULL,
//!     sproc_schema    text   NOT NULL,
//!     sproc_name      text   NOT NULL,
//!     sproc_arguments text   NOT NULL DEFAULT '',
//!     sproc_argmodes  text   NOT NULL DEFAULT '',
//!     UNIQUE (sproc_host_id, sproc_schema, sproc_name, sproc_arguments, sproc_argmodes)
//! )
//! monitor_data.sproc_performance_data (
//!     sp_timestamp    timestamp NOT NULL,
//!     sp_sproc_id     int       NOT NULL,
//!     sp_calls        bigint,
//!     sp_total_time   bigint,
//!     sp_self_time    bigint
//! )
//! ```

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use postgres::types::ToSql;
use postgres::{Client, NoTls, Statement};
use tracing::debug;

use crate::collector::queries::{INSERT_SAMPLE, RESOLVE_FUNCTION_ID, SELECT_FUNCTION_ID};
use crate::collector::{FunctionKey, Sample};
use crate::config::redact_password;
use crate::error::CollectError;
use crate::util::format_postgres_error;

/// Store-side identity lookup used by [`crate::storage::CachedIdentityResolver`].
pub trait IdentityBackend {
    /// Returns the identity for `key` on `host_id`, creating it on first sight.
    ///
    /// Repeated calls with the same key must return the same value.
    fn lookup_or_create(&mut self, host_id: i32, key: &FunctionKey) -> Result<i32, CollectError>;
}

/// An open connection to the monitoring store.
///
/// Dropping a session without calling [`TargetSession::close`] must still
/// release the connection.
pub trait TargetSession: IdentityBackend {
    /// Writes one sample row.
    fn insert_sample(&mut self, sample: &Sample) -> Result<(), CollectError>;

    /// Closes the connection.
    fn close(self) -> Result<(), CollectError>
    where
        Self: Sized;
}

/// Factory for [`TargetSession`]s. Shared by every collector writing to the same store.
pub trait MonitorStore {
    type Session: TargetSession;

    fn open(&self) -> Result<Self::Session, CollectError>;
}

impl<M: MonitorStore + ?Sized> MonitorStore for Arc<M> {
    type Session = M::Session;

    fn open(&self) -> Result<Self::Session, CollectError> {
        (**self).open()
    }
}

/// PostgreSQL monitoring store.
///
/// Opens a fresh connection per cycle; safe to share across collector threads.
#[derive(Debug, Clone)]
pub struct PgMonitorStore {
    connection_string: String,
}

impl PgMonitorStore {
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
        }
    }

    /// Connection string with the password hidden.
    pub fn describe(&self) -> String {
        redact_password(&self.connection_string)
    }
}

impl MonitorStore for PgMonitorStore {
    type Session = PgTargetSession;

    fn open(&self) -> Result<PgTargetSession, CollectError> {
        let mut client = Client::connect(&self.connection_string, NoTls)
            .map_err(|e| CollectError::TargetConnect(format_postgres_error(&e)))?;
        let insert = client
            .prepare(INSERT_SAMPLE)
            .map_err(|e| CollectError::TargetWrite(format_postgres_error(&e)))?;
        debug!(store = %self.describe(), "monitoring store connection opened");
        Ok(PgTargetSession { client, insert })
    }
}

/// Connection to the PostgreSQL monitoring store with the sample insert prepared.
pub struct PgTargetSession {
    client: Client,
    insert: Statement,
}

impl IdentityBackend for PgTargetSession {
    fn lookup_or_create(&mut self, host_id: i32, key: &FunctionKey) -> Result<i32, CollectError> {
        let stored_name = key.stored_name();
        let params: [&(dyn ToSql + Sync); 5] = [
            &host_id,
            &key.schema,
            &stored_name,
            &key.arguments,
            &key.argmodes,
        ];
        let row = self
            .client
            .query_opt(RESOLVE_FUNCTION_ID, &params)
            .map_err(|e| CollectError::TargetWrite(format_postgres_error(&e)))?;

        // A concurrent insert of the same key leaves both CTE branches empty.
        let row = match row {
            Some(row) => row,
            None => self
                .client
                .query_opt(SELECT_FUNCTION_ID, &params)
                .map_err(|e| CollectError::TargetWrite(format_postgres_error(&e)))?
                .ok_or_else(|| {
                    CollectError::TargetWrite(format!("no identity created for {}", key))
                })?,
        };

        row.try_get::<_, i32>(0)
            .map_err(|e| CollectError::TargetWrite(format_postgres_error(&e)))
    }
}

impl TargetSession for PgTargetSession {
    fn insert_sample(&mut self, sample: &Sample) -> Result<(), CollectError> {
        let timestamp = epoch_millis_to_system_time(sample.timestamp);
        self.client
            .execute(
                &self.insert,
                &[
                    &timestamp,
                    &sample.function_id.get(),
                    &sample.calls,
                    &sample.total_time,
                    &sample.self_time,
                ],
            )
            .map(|_| ())
            .map_err(|e| CollectError::TargetWrite(format_postgres_error(&e)))
    }

    fn close(self) -> Result<(), CollectError> {
        self.client
            .close()
            .map_err(|e| CollectError::TargetConnect(format_postgres_error(&e)))
    }
}

fn epoch_millis_to_system_time(millis: i64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(millis.max(0) as u64)
}

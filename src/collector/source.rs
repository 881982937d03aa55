//! Monitored database: where function statistics are read from.

use postgres::{Client, NoTls, Row};
use tracing::debug;

use super::observation::Observation;
use super::queries::{build_function_stats_query, build_statement_timeout};
use crate::config::{SourceConfig, redact_password};
use crate::error::CollectError;
use crate::util::format_postgres_error;

/// A database whose function statistics are collected.
pub trait StatsSource {
    type Connection: SourceConnection;

    /// Name used in log lines.
    fn name(&self) -> &str;

    /// Opens a connection, ready to run the statistics query.
    fn connect(&self) -> Result<Self::Connection, CollectError>;
}

/// An open connection to the monitored database.
///
/// Dropping the connection without calling [`SourceConnection::close`] must
/// still release it.
pub trait SourceConnection {
    /// Runs the statistics query and materializes every row.
    fn read_functions(&mut self) -> Result<Vec<Observation>, CollectError>;

    fn close(self) -> Result<(), CollectError>
    where
        Self: Sized;
}

/// PostgreSQL source reading `pg_stat_user_functions`.
///
/// Holds no connection between cycles so that the monitored database's
/// connection budget is only used while the query runs.
#[derive(Debug, Clone)]
pub struct PgStatsSource {
    config: SourceConfig,
    name: String,
    query: String,
}

impl PgStatsSource {
    pub fn new(config: SourceConfig) -> Self {
        let name = config.display_name();
        let query = build_function_stats_query(&config.schema_filter);
        Self {
            config,
            name,
            query,
        }
    }

    pub fn config(&self) -> &SourceConfig {
        &self.config
    }
}

impl StatsSource for PgStatsSource {
    type Connection = PgSourceConnection;

    fn name(&self) -> &str {
        &self.name
    }

    fn connect(&self) -> Result<PgSourceConnection, CollectError> {
        let mut client = Client::connect(&self.config.connection_string, NoTls)
            .map_err(|e| CollectError::SourceConnect(format_postgres_error(&e)))?;

        client
            .batch_execute(&build_statement_timeout(self.config.statement_timeout))
            .map_err(|e| CollectError::SourceQuery(format_postgres_error(&e)))?;

        debug!(
            source = %redact_password(&self.config.connection_string),
            "source connection opened"
        );
        Ok(PgSourceConnection {
            client,
            query: self.query.clone(),
        })
    }
}

pub struct PgSourceConnection {
    client: Client,
    query: String,
}

impl SourceConnection for PgSourceConnection {
    fn read_functions(&mut self) -> Result<Vec<Observation>, CollectError> {
        let rows = self
            .client
            .query(self.query.as_str(), &[])
            .map_err(|e| CollectError::SourceQuery(format_postgres_error(&e)))?;

        rows.iter().map(row_to_observation).collect()
    }

    fn close(self) -> Result<(), CollectError> {
        self.client
            .close()
            .map_err(|e| CollectError::SourceConnect(format_postgres_error(&e)))
    }
}

fn row_to_observation(row: &Row) -> Result<Observation, CollectError> {
    let get_err = |e: postgres::Error| CollectError::SourceQuery(format_postgres_error(&e));
    let observation = Observation {
        schema: row.try_get("schema_name").map_err(get_err)?,
        name: row.try_get("function_name").map_err(get_err)?,
        arguments: row.try_get("func_arguments").map_err(get_err)?,
        argmodes: row.try_get("func_argmodes").map_err(get_err)?,
        calls: row.try_get("calls").map_err(get_err)?,
        self_time: row.try_get("self_time").map_err(get_err)?,
        total_time: row.try_get("total_time").map_err(get_err)?,
        collisions: row.try_get("count_collisions").map_err(get_err)?,
    };
    debug!(function = %observation, "function stats read");
    Ok(observation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn source_name_comes_from_conninfo() {
        let source = PgStatsSource::new(SourceConfig::new(4, "host=db4 dbname=shop"));
        assert_eq!(source.name(), "db4/shop");
    }

    #[test]
    fn query_carries_schema_filter() {
        let config = SourceConfig::new(1, "host=db1")
            .with_statement_timeout(Duration::from_secs(5))
            .with_schema_filter("AND schemaname LIKE '%_api'")
            .unwrap();
        let source = PgStatsSource::new(config);
        assert!(source.query.contains("AND schemaname LIKE '%_api'"));
        assert_eq!(source.config().statement_timeout, Duration::from_secs(5));
    }
}

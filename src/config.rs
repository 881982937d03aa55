//! Collector configuration.
//!
//! A collector instance is fixed at construction: which database it reads,
//! how long a statement may run there, which schemas are scanned, and what
//! happens to buffered snapshots when a cycle fails.

use std::time::Duration;

use crate::error::CollectError;

/// Default statement timeout on the monitored database.
pub const DEFAULT_STATEMENT_TIMEOUT: Duration = Duration::from_secs(15);
/// Default interval between collection cycles.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);
/// Default cap on snapshot batches kept across failed cycles.
pub const DEFAULT_MAX_PENDING_BATCHES: usize = 60;

/// What to do with buffered snapshots when a cycle fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PendingPolicy {
    /// Keep undrained batches and retry them on the next cycle.
    #[default]
    RetainOnFailure,
    /// Drop everything collected so far, success or not.
    DiscardOnFailure,
}

/// Connection settings for one monitored database.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Host id used as part of every function's natural key.
    pub host_id: i32,
    /// libpq key=value connection string.
    pub connection_string: String,
    pub statement_timeout: Duration,
    /// Clause appended to the statistics query (e.g. `AND schemaname LIKE '%_api'`).
    pub schema_filter: String,
}

impl SourceConfig {
    /// Creates a source config with default timeout and no schema filter.
    pub fn new(host_id: i32, connection_string: impl Into<String>) -> Self {
        Self {
            host_id,
            connection_string: connection_string.into(),
            statement_timeout: DEFAULT_STATEMENT_TIMEOUT,
            schema_filter: String::new(),
        }
    }

    /// Builds a source config from the standard libpq environment variables.
    ///
    /// Uses $USER as default if PGUSER is not set:
    /// - PGHOST (default: localhost)
    /// - PGPORT (default: 5432)
    /// - PGUSER (default: $USER)
    /// - PGPASSWORD (default: empty)
    /// - PGDATABASE (default: same as PGUSER)
    pub fn from_env(host_id: i32) -> Result<Self, CollectError> {
        let user = std::env::var("PGUSER")
            .or_else(|_| std::env::var("USER"))
            .map_err(|_| CollectError::EnvNotSet("PGUSER or USER".to_string()))?;

        let host = std::env::var("PGHOST").unwrap_or_else(|_| "localhost".to_string());
        let port = std::env::var("PGPORT").unwrap_or_else(|_| "5432".to_string());
        let password = std::env::var("PGPASSWORD").unwrap_or_default();
        let database = std::env::var("PGDATABASE").unwrap_or_else(|_| user.clone());

        let connection_string = if password.is_empty() {
            format!(
                "host={} port={} user={} dbname={}",
                host, port, user, database
            )
        } else {
            format!(
                "host={} port={} user={} password={} dbname={}",
                host, port, user, password, database
            )
        };

        Ok(Self::new(host_id, connection_string))
    }

    /// Parses `ID=CONNINFO`, e.g. `3=host=db3 dbname=shop`.
    pub fn from_arg(arg: &str) -> Result<Self, CollectError> {
        let (id, conninfo) = arg.split_once('=').ok_or_else(|| {
            CollectError::InvalidConfig(format!("source '{}' is not ID=CONNINFO", arg))
        })?;
        let host_id = id.trim().parse::<i32>().map_err(|e| {
            CollectError::InvalidConfig(format!("source host id '{}': {}", id.trim(), e))
        })?;
        if host_id <= 0 {
            return Err(CollectError::InvalidConfig(format!(
                "source host id must be positive, got {}",
                host_id
            )));
        }
        let conninfo = conninfo.trim();
        if conninfo.is_empty() {
            return Err(CollectError::InvalidConfig(format!(
                "source {} has an empty connection string",
                host_id
            )));
        }
        Ok(Self::new(host_id, conninfo))
    }

    pub fn with_statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = timeout;
        self
    }

    /// Sets the schema filter clause.
    ///
    /// The clause is appended verbatim after the built-in schema exclusions, so it
    /// must be empty or start with `AND`/`OR`.
    pub fn with_schema_filter(mut self, filter: impl Into<String>) -> Result<Self, CollectError> {
        let filter = filter.into();
        validate_schema_filter(&filter)?;
        self.schema_filter = filter;
        Ok(self)
    }

    /// Host name for log lines, falling back to the host id.
    pub fn display_name(&self) -> String {
        match conninfo_value(&self.connection_string, "host") {
            Some(host) => {
                let dbname = conninfo_value(&self.connection_string, "dbname");
                match dbname {
                    Some(db) => format!("{}/{}", host, db),
                    None => host.to_string(),
                }
            }
            None => format!("host#{}", self.host_id),
        }
    }
}

/// Pipeline behavior that does not depend on the source.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Scheduling interval; only reported in logs.
    pub interval: Duration,
    pub pending_policy: PendingPolicy,
    pub max_pending_batches: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            pending_policy: PendingPolicy::default(),
            max_pending_batches: DEFAULT_MAX_PENDING_BATCHES,
        }
    }
}

fn validate_schema_filter(filter: &str) -> Result<(), CollectError> {
    let trimmed = filter.trim_start();
    if trimmed.is_empty() {
        return Ok(());
    }
    let head = trimmed
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase();
    if head == "AND" || head == "OR" {
        Ok(())
    } else {
        Err(CollectError::InvalidConfig(format!(
            "schema filter must start with AND or OR: '{}'",
            filter
        )))
    }
}

/// Returns the value of `key` in a libpq key=value connection string.
pub fn conninfo_value<'a>(connection_string: &'a str, key: &str) -> Option<&'a str> {
    connection_string.split_whitespace().find_map(|token| {
        token
            .split_once('=')
            .filter(|(k, _)| *k == key)
            .map(|(_, v)| v)
    })
}

/// Replaces the password in a libpq-style connection string so it can be logged.
pub fn redact_password(connection_string: &str) -> String {
    connection_string
        .split_whitespace()
        .map(|token| {
            if token.starts_with("password=") {
                "password=***".to_string()
            } else {
                token.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_arg_splits_on_first_equals() {
        let cfg = SourceConfig::from_arg("3=host=db3 port=5433 dbname=shop").unwrap();
        assert_eq!(cfg.host_id, 3);
        assert_eq!(cfg.connection_string, "host=db3 port=5433 dbname=shop");
        assert_eq!(cfg.statement_timeout, DEFAULT_STATEMENT_TIMEOUT);
        assert!(cfg.schema_filter.is_empty());
    }

    #[test]
    fn from_arg_rejects_bad_input() {
        assert!(matches!(
            SourceConfig::from_arg("host=db3"),
            Err(CollectError::InvalidConfig(_))
        ));
        assert!(matches!(
            SourceConfig::from_arg("0=host=db3"),
            Err(CollectError::InvalidConfig(_))
        ));
        assert!(matches!(
            SourceConfig::from_arg("7="),
            Err(CollectError::InvalidConfig(_))
        ));
        assert!(SourceConfig::from_arg("no-equals-sign").is_err());
    }

    #[test]
    fn schema_filter_must_be_a_continuation() {
        let cfg = SourceConfig::new(1, "host=a");
        assert!(
            cfg.clone()
                .with_schema_filter(" AND schemaname LIKE '%_api'")
                .is_ok()
        );
        assert!(cfg.clone().with_schema_filter("or schemaname = 'x'").is_ok());
        assert!(cfg.clone().with_schema_filter("").is_ok());
        assert!(matches!(
            cfg.with_schema_filter("; DROP TABLE x"),
            Err(CollectError::InvalidConfig(_))
        ));
    }

    #[test]
    fn conninfo_value_finds_keys() {
        let conn = "host=db1 port=5432 user=app dbname=shop";
        assert_eq!(conninfo_value(conn, "host"), Some("db1"));
        assert_eq!(conninfo_value(conn, "dbname"), Some("shop"));
        assert_eq!(conninfo_value(conn, "password"), None);
    }

    #[test]
    fn redact_password_hides_secret() {
        let conn = "host=db1 user=app password=s3cret dbname=shop";
        assert_eq!(
            redact_password(conn),
            "host=db1 user=app password=*** dbname=shop"
        );
        assert_eq!(redact_password("host=db1"), "host=db1");
    }

    #[test]
    fn display_name_prefers_host_and_db() {
        assert_eq!(
            SourceConfig::new(2, "host=db1 dbname=shop").display_name(),
            "db1/shop"
        );
        assert_eq!(SourceConfig::new(2, "host=db1").display_name(), "db1");
        assert_eq!(SourceConfig::new(2, "dbname=shop").display_name(), "host#2");
    }

    #[test]
    fn collector_config_defaults() {
        let cfg = CollectorConfig::default();
        assert_eq!(cfg.pending_policy, PendingPolicy::RetainOnFailure);
        assert_eq!(cfg.max_pending_batches, DEFAULT_MAX_PENDING_BATCHES);
        assert_eq!(cfg.interval, DEFAULT_INTERVAL);
    }
}

//! Error type shared by the collection pipeline and its backends.

/// Error type for a collection cycle.
///
/// Source and target failures are fatal to the cycle they occur in. Identity
/// resolution failures never surface as a `CollectError`; the resolver logs them
/// and the observation is skipped.
#[derive(Debug, Clone, PartialEq)]
pub enum CollectError {
    /// Environment variable not set.
    EnvNotSet(String),
    /// Configuration value rejected.
    InvalidConfig(String),
    /// Connection to the monitored database failed.
    SourceConnect(String),
    /// Statistics query against the monitored database failed.
    SourceQuery(String),
    /// Connection to the monitoring store failed.
    TargetConnect(String),
    /// Writing to the monitoring store failed.
    TargetWrite(String),
}

impl CollectError {
    /// Returns true for errors raised while talking to the monitored database.
    pub fn is_source(&self) -> bool {
        matches!(
            self,
            CollectError::SourceConnect(_) | CollectError::SourceQuery(_)
        )
    }
}

impl std::fmt::Display for CollectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollectError::EnvNotSet(var) => write!(f, "{} not set", var),
            CollectError::InvalidConfig(msg) => write!(f, "invalid configuration: {}", msg),
            CollectError::SourceConnect(msg) => write!(f, "source: {}", msg),
            CollectError::SourceQuery(msg) => write!(f, "source query error: {}", msg),
            CollectError::TargetConnect(msg) => write!(f, "monitoring store: {}", msg),
            CollectError::TargetWrite(msg) => write!(f, "monitoring store write error: {}", msg),
        }
    }
}

impl std::error::Error for CollectError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_side() {
        let e = CollectError::SourceConnect("connection refused".to_string());
        assert_eq!(e.to_string(), "source: connection refused");

        let e = CollectError::TargetWrite("ERROR: relation does not exist".to_string());
        assert_eq!(
            e.to_string(),
            "monitoring store write error: ERROR: relation does not exist"
        );
    }

    #[test]
    fn is_source_classifies_variants() {
        assert!(CollectError::SourceQuery(String::new()).is_source());
        assert!(!CollectError::TargetConnect(String::new()).is_source());
        assert!(!CollectError::EnvNotSet("PGUSER".to_string()).is_source());
    }
}

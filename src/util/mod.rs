//! Small helpers shared by the postgres-backed source and store.

/// Formats PostgreSQL error message for display.
pub fn format_postgres_error(e: &postgres::Error) -> String {
    if let Some(db_error) = e.as_db_error() {
        format!("{}: {}", db_error.severity(), db_error.message())
    } else {
        shorten_client_error(&e.to_string())
    }
}

/// Collapses noisy client-side connection errors into a short reason.
fn shorten_client_error(msg: &str) -> String {
    if msg.contains("Connection refused") {
        "connection refused".to_string()
    } else if msg.contains("password authentication failed") {
        "password authentication failed".to_string()
    } else if msg.contains("does not exist") {
        msg.split("FATAL:").last().unwrap_or(msg).trim().to_string()
    } else if msg.contains("canceling statement due to statement timeout") {
        "statement timeout".to_string()
    } else {
        msg.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shortens_connection_refused() {
        let msg = "error connecting to server: Connection refused (os error 111)";
        assert_eq!(shorten_client_error(msg), "connection refused");
    }

    #[test]
    fn keeps_fatal_tail_for_missing_database() {
        let msg = "db error: FATAL: database \"monitor\" does not exist";
        assert_eq!(
            shorten_client_error(msg),
            "database \"monitor\" does not exist"
        );
    }

    #[test]
    fn passes_unknown_messages_through() {
        assert_eq!(shorten_client_error("unexpected EOF"), "unexpected EOF");
    }
}

//! SQL text for the monitored database and the monitoring store.

use std::time::Duration;

/// Builds the `pg_stat_user_functions` query.
///
/// `schema_filter` is appended after the built-in exclusion of system schemas.
pub(crate) fn build_function_stats_query(schema_filter: &str) -> String {
    format!(
        r#"
            SELECT
                f.schemaname AS schema_name,
                f.funcname AS function_name,
                COALESCE(array_to_string(ARRAY(
                    SELECT format_type(t, NULL)
                    FROM unnest(COALESCE(p.proallargtypes, p.proargtypes::oid[])) tt (t)
                ), ','), '') AS func_arguments,
                COALESCE(array_to_string(p.proargmodes, ','), '') AS func_argmodes,
                f.calls::bigint AS calls,
                f.self_time::bigint AS self_time,
                f.total_time::bigint AS total_time,
                (
                    SELECT count(1)
                    FROM pg_stat_user_functions ff
                    WHERE ff.funcname = f.funcname AND ff.schemaname = f.schemaname
                )::int AS count_collisions
            FROM pg_stat_user_functions f
            JOIN pg_proc p ON p.oid = f.funcid
            WHERE NOT f.schemaname LIKE ANY (ARRAY['pg%', 'information_schema'])
            {schema_filter}
        "#
    )
}

/// Builds the session-level statement timeout command.
pub(crate) fn build_statement_timeout(timeout: Duration) -> String {
    format!("SET statement_timeout TO '{}ms'", timeout.as_millis())
}

/// Selects or creates the identity for
/// `(host_id, schema, stored_name, arguments, argmodes)`.
///
/// Parameters: `$1` host id, `$2` schema, `$3` stored name, `$4` argument
/// types, `$5` argument modes. Returns no row when a concurrent insert won the
/// conflict race.
pub(crate) const RESOLVE_FUNCTION_ID: &str = r#"
    WITH existing AS (
        SELECT sproc_id
        FROM monitor_data.sprocs
        WHERE sproc_host_id = $1
          AND sproc_schema = $2
          AND sproc_name = $3
          AND sproc_arguments = $4
          AND sproc_argmodes = $5
    ), inserted AS (
        INSERT INTO monitor_data.sprocs
            (sproc_host_id, sproc_schema, sproc_name, sproc_arguments, sproc_argmodes)
        SELECT $1, $2, $3, $4, $5
        WHERE NOT EXISTS (SELECT 1 FROM existing)
        ON CONFLICT (sproc_host_id, sproc_schema, sproc_name, sproc_arguments, sproc_argmodes)
            DO NOTHING
        RETURNING sproc_id
    )
    SELECT sproc_id FROM existing
    UNION ALL
    SELECT sproc_id FROM inserted
"#;

/// Looks up an identity without creating it. Same parameters as [`RESOLVE_FUNCTION_ID`].
pub(crate) const SELECT_FUNCTION_ID: &str = r#"
    SELECT sproc_id
    FROM monitor_data.sprocs
    WHERE sproc_host_id = $1
      AND sproc_schema = $2
      AND sproc_name = $3
      AND sproc_arguments = $4
      AND sproc_argmodes = $5
"#;

pub(crate) const INSERT_SAMPLE: &str = r#"
    INSERT INTO monitor_data.sproc_performance_data
        (sp_timestamp, sp_sproc_id, sp_calls, sp_total_time, sp_self_time)
    VALUES ($1, $2, $3, $4, $5)
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_query_appends_filter_last() {
        let q = build_function_stats_query("AND schemaname LIKE '%_api'");
        assert!(q.contains("FROM pg_stat_user_functions f"));
        assert!(q.contains("'information_schema'"));
        assert!(q.trim_end().ends_with("AND schemaname LIKE '%_api'"));
    }

    #[test]
    fn stats_query_without_filter_selects_all_columns() {
        let q = build_function_stats_query("");
        for column in [
            "schema_name",
            "function_name",
            "func_arguments",
            "func_argmodes",
            "calls",
            "self_time",
            "total_time",
            "count_collisions",
        ] {
            assert!(q.contains(column), "missing column {column}");
        }
    }

    #[test]
    fn statement_timeout_in_millis() {
        assert_eq!(
            build_statement_timeout(Duration::from_secs(15)),
            "SET statement_timeout TO '15000ms'"
        );
    }

    #[test]
    fn resolve_query_is_conflict_safe() {
        assert!(RESOLVE_FUNCTION_ID.contains("ON CONFLICT"));
        assert!(RESOLVE_FUNCTION_ID.contains("UNION ALL"));
    }

    #[test]
    fn identity_queries_match_the_full_signature() {
        for query in [RESOLVE_FUNCTION_ID, SELECT_FUNCTION_ID] {
            assert!(query.contains("sproc_arguments = $4"));
            assert!(query.contains("sproc_argmodes = $5"));
        }
        assert!(RESOLVE_FUNCTION_ID.contains(
            "ON CONFLICT (sproc_host_id, sproc_schema, sproc_name, sproc_arguments, sproc_argmodes)"
        ));
    }
}

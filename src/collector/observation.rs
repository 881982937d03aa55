//! Per-function statistics read from `pg_stat_user_functions`.
//!
//! An [`Observation`] is one row of the statistics query. It is produced fresh
//! each cycle and never mutated. Its [`FunctionKey`] is the natural key that the
//! monitoring store maps to a stable [`FunctionId`].

use std::fmt;

/// One row of function statistics as read from the monitored database.
///
/// All counters are cumulative since the last statistics reset.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Observation {
    /// Source: `pg_stat_user_functions.schemaname`
    pub schema: String,
    /// Source: `pg_stat_user_functions.funcname`
    pub name: String,
    /// Comma-joined argument types, e.g. `integer,text`.
    /// Source: `format_type` over `pg_proc.proallargtypes` / `proargtypes`
    pub arguments: String,
    /// Comma-joined argument modes (`i`, `o`, `b`, `v`, `t`); empty when all are IN.
    /// Source: `pg_proc.proargmodes`
    pub argmodes: String,
    /// Number of times the function has been called.
    /// Source: `pg_stat_user_functions.calls`
    pub calls: i64,
    /// Time spent in the function itself, excluding callees (ms).
    /// Source: `pg_stat_user_functions.self_time`
    pub self_time: i64,
    /// Time spent in the function and everything it called (ms).
    /// Source: `pg_stat_user_functions.total_time`
    pub total_time: i64,
    /// Number of functions in the same schema sharing this name.
    pub collisions: i32,
}

impl Observation {
    /// Returns the natural key this observation resolves through.
    pub fn key(&self) -> FunctionKey {
        FunctionKey {
            schema: self.schema.clone(),
            name: self.name.clone(),
            arguments: self.arguments.clone(),
            argmodes: self.argmodes.clone(),
            overloaded: self.collisions > 1,
        }
    }
}

impl fmt::Display for Observation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}({}) calls={} total={} self={}",
            self.schema, self.name, self.arguments, self.calls, self.total_time, self.self_time
        )
    }
}

/// Natural key of a monitored function.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FunctionKey {
    pub schema: String,
    pub name: String,
    pub arguments: String,
    pub argmodes: String,
    /// More than one function in the schema carries this name.
    pub overloaded: bool,
}

impl FunctionKey {
    /// Name under which the function is registered in the monitoring store.
    ///
    /// Overloaded functions carry their argument list so that each overload
    /// gets its own identity.
    pub fn stored_name(&self) -> String {
        if self.overloaded {
            format!("{}({})", self.name, self.arguments)
        } else {
            self.name.clone()
        }
    }
}

impl fmt::Display for FunctionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.stored_name())
    }
}

/// Surrogate identity assigned to a [`FunctionKey`] by the monitoring store.
///
/// Always positive; construct through [`FunctionId::new`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId(i32);

impl FunctionId {
    /// Returns `None` for non-positive values, which the store never assigns.
    pub fn new(id: i32) -> Option<Self> {
        (id > 0).then_some(Self(id))
    }

    pub fn get(self) -> i32 {
        self.0
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Row written to the monitoring store for one new observation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Sample {
    /// Cycle start, epoch milliseconds.
    pub timestamp: i64,
    pub function_id: FunctionId,
    pub calls: i64,
    pub total_time: i64,
    pub self_time: i64,
}

impl Sample {
    pub fn new(timestamp: i64, function_id: FunctionId, observation: &Observation) -> Self {
        Self {
            timestamp,
            function_id,
            calls: observation.calls,
            total_time: observation.total_time,
            self_time: observation.self_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(schema: &str, name: &str, args: &str, collisions: i32) -> Observation {
        Observation {
            schema: schema.to_string(),
            name: name.to_string(),
            arguments: args.to_string(),
            collisions,
            ..Observation::default()
        }
    }

    #[test]
    fn stored_name_disambiguates_overloads() {
        let single = obs("app", "f", "integer", 1).key();
        assert!(!single.overloaded);
        assert_eq!(single.stored_name(), "f");

        let overloaded = obs("app", "f", "integer,text", 2).key();
        assert!(overloaded.overloaded);
        assert_eq!(overloaded.stored_name(), "f(integer,text)");
        assert_eq!(overloaded.to_string(), "app.f(integer,text)");
    }

    #[test]
    fn same_name_in_different_schemas_has_distinct_keys() {
        assert_ne!(obs("app", "f", "", 1).key(), obs("billing", "f", "", 1).key());
    }

    #[test]
    fn function_id_rejects_non_positive() {
        assert_eq!(FunctionId::new(0), None);
        assert_eq!(FunctionId::new(-1), None);
        assert_eq!(FunctionId::new(42).map(FunctionId::get), Some(42));
    }

    #[test]
    fn sample_copies_counters() {
        let mut o = obs("app", "f", "", 1);
        o.calls = 10;
        o.total_time = 100;
        o.self_time = 80;
        let id = FunctionId::new(5).unwrap();
        let s = Sample::new(1_000, id, &o);
        assert_eq!(
            s,
            Sample {
                timestamp: 1_000,
                function_id: id,
                calls: 10,
                total_time: 100,
                self_time: 80,
            }
        );
    }
}

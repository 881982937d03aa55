//! Pre-built observations for testing.

use crate::collector::Observation;

/// Builds a non-overloaded observation with the given cumulative counters.
pub fn observation(
    schema: &str,
    name: &str,
    calls: i64,
    total_time: i64,
    self_time: i64,
) -> Observation {
    Observation {
        schema: schema.to_string(),
        name: name.to_string(),
        arguments: String::new(),
        argmodes: String::new(),
        calls,
        self_time,
        total_time,
        collisions: 1,
    }
}

impl Observation {
    /// Marks the observation as one of `collisions` overloads taking `arguments`.
    pub fn with_overloads(mut self, arguments: &str, collisions: i32) -> Self {
        self.arguments = arguments.to_string();
        self.collisions = collisions;
        self
    }

    /// Sets the argument modes, e.g. `i,o` for one IN and one OUT argument.
    pub fn with_argmodes(mut self, argmodes: &str) -> Self {
        self.argmodes = argmodes.to_string();
        self
    }

    /// Replaces the cumulative call count.
    pub fn with_calls(mut self, calls: i64) -> Self {
        self.calls = calls;
        self
    }
}

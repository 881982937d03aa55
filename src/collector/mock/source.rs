//! Scripted statistics source.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::collector::Observation;
use crate::collector::source::{SourceConnection, StatsSource};
use crate::error::CollectError;

#[derive(Debug, Default)]
struct MockSourceState {
    /// Responses returned by successive `read_functions` calls.
    responses: VecDeque<Result<Vec<Observation>, CollectError>>,
    /// Error returned by the next `connect`.
    connect_error: Option<CollectError>,
    open: usize,
    connects: usize,
}

/// Source that replays queued responses.
///
/// Clones share state, so a test can keep a handle after moving the source
/// into a pipeline. When the queue is empty the source returns no rows.
#[derive(Debug, Clone)]
pub struct MockSource {
    name: String,
    state: Arc<Mutex<MockSourceState>>,
}

impl MockSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::default(),
        }
    }

    /// Queues the rows returned by the next query.
    pub fn push_rows(&self, rows: Vec<Observation>) {
        self.lock().responses.push_back(Ok(rows));
    }

    /// Queues a query failure.
    pub fn push_error(&self, error: CollectError) {
        self.lock().responses.push_back(Err(error));
    }

    /// Makes the next `connect` fail.
    pub fn fail_next_connect(&self, error: CollectError) {
        self.lock().connect_error = Some(error);
    }

    /// Connections currently open.
    pub fn open_connections(&self) -> usize {
        self.lock().open
    }

    /// Successful connects so far.
    pub fn connect_count(&self) -> usize {
        self.lock().connects
    }

    fn lock(&self) -> MutexGuard<'_, MockSourceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl StatsSource for MockSource {
    type Connection = MockSourceConnection;

    fn name(&self) -> &str {
        &self.name
    }

    fn connect(&self) -> Result<MockSourceConnection, CollectError> {
        let mut state = self.lock();
        if let Some(error) = state.connect_error.take() {
            return Err(error);
        }
        state.open += 1;
        state.connects += 1;
        Ok(MockSourceConnection {
            state: Arc::clone(&self.state),
        })
    }
}

/// Connection handed out by [`MockSource`]; released on drop.
#[derive(Debug)]
pub struct MockSourceConnection {
    state: Arc<Mutex<MockSourceState>>,
}

impl SourceConnection for MockSourceConnection {
    fn read_functions(&mut self) -> Result<Vec<Observation>, CollectError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.responses.pop_front().unwrap_or_else(|| Ok(Vec::new()))
    }

    fn close(self) -> Result<(), CollectError> {
        Ok(())
    }
}

impl Drop for MockSourceConnection {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.open = state.open.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::mock::observation;

    #[test]
    fn replays_responses_in_order() {
        let source = MockSource::new("db1");
        source.push_rows(vec![observation("app", "f", 1, 1, 1)]);
        source.push_error(CollectError::SourceQuery("timeout".to_string()));

        let mut conn = source.connect().unwrap();
        assert_eq!(conn.read_functions().unwrap().len(), 1);
        assert!(conn.read_functions().is_err());
        assert!(conn.read_functions().unwrap().is_empty());
    }

    #[test]
    fn tracks_open_connections() {
        let source = MockSource::new("db1");
        let conn = source.connect().unwrap();
        assert_eq!(source.open_connections(), 1);
        conn.close().unwrap();
        assert_eq!(source.open_connections(), 0);

        let conn = source.connect().unwrap();
        drop(conn);
        assert_eq!(source.open_connections(), 0);
        assert_eq!(source.connect_count(), 2);
    }

    #[test]
    fn connect_failure_is_one_shot() {
        let source = MockSource::new("db1");
        source.fail_next_connect(CollectError::SourceConnect("refused".to_string()));
        assert!(source.connect().is_err());
        assert!(source.connect().is_ok());
    }
}

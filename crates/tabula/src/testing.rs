//! Testing utilities
//!
//! Mock driver and connection for exercising the engine without a real
//! database: scripted query results, counted fault injection for connect and
//! execute, capability toggles for the bulk paths, and full recording of
//! everything the engine sent.
//!
//! # Example
//!
//! ```rust,ignore
//! use tabula::testing::*;
//!
//! #[test]
//! fn test_retries_until_connected() {
//!     let driver = MockDriver::new().fail_connects(2, "broken pipe");
//!
//!     let db = Database::with_driver(Arc::new(driver.clone()), config).unwrap();
//!     db.execute("SELECT 1", &[]).unwrap();
//!
//!     assert_eq!(driver.connect_count(), 3);
//! }
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::connection::{Capabilities, Connection, DatabaseConfig, Driver, IsolationLevel, QueryOutput};
use crate::error::{Error, Result};
use crate::reader::RowSource;
use crate::types::Value;

/// Error shapes the mock can raise
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFault {
    /// Dropped connection (transient)
    Connection,
    /// Timeout (transient)
    Timeout,
    /// Deadlock (transient)
    Deadlock,
    /// Constraint violation (recoverable only in insert-or-update flows)
    Constraint,
    /// Plain query failure (not transient)
    Query,
}

impl MockFault {
    fn raise(self, message: &str) -> Error {
        match self {
            Self::Connection => Error::connection(message),
            Self::Timeout => Error::timeout(message),
            Self::Deadlock => Error::Deadlock,
            Self::Constraint => Error::constraint("mock_constraint", message),
            Self::Query => Error::query(message),
        }
    }
}

#[derive(Debug)]
struct MockState {
    connects: AtomicUsize,
    failing_connects: AtomicUsize,
    connect_fail_message: Mutex<String>,

    executes: AtomicUsize,
    failing_executes: AtomicUsize,
    execute_fault: Mutex<MockFault>,
    execute_fail_message: Mutex<String>,

    capabilities: Mutex<Capabilities>,
    valid: AtomicBool,
    last_insert_id: AtomicI64,

    executed: Mutex<Vec<(String, Vec<Value>)>>,
    queried: Mutex<Vec<(String, Vec<Value>)>>,
    query_results: Mutex<VecDeque<QueryOutput>>,

    begun: AtomicUsize,
    committed: AtomicUsize,
    rolled_back: AtomicUsize,
    copied: Mutex<Vec<(String, u64)>>,
    direct_inserted: Mutex<Vec<(String, u64)>>,
    affected_rows: AtomicU64,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            connects: AtomicUsize::new(0),
            failing_connects: AtomicUsize::new(0),
            connect_fail_message: Mutex::new("mock connect failure".to_string()),
            executes: AtomicUsize::new(0),
            failing_executes: AtomicUsize::new(0),
            execute_fault: Mutex::new(MockFault::Query),
            execute_fail_message: Mutex::new("mock execute failure".to_string()),
            capabilities: Mutex::new(Capabilities::default()),
            valid: AtomicBool::new(true),
            last_insert_id: AtomicI64::new(1),
            executed: Mutex::new(Vec::new()),
            queried: Mutex::new(Vec::new()),
            query_results: Mutex::new(VecDeque::new()),
            begun: AtomicUsize::new(0),
            committed: AtomicUsize::new(0),
            rolled_back: AtomicUsize::new(0),
            copied: Mutex::new(Vec::new()),
            direct_inserted: Mutex::new(Vec::new()),
            affected_rows: AtomicU64::new(1),
        }
    }
}

/// A scriptable driver for tests; clones share one recording
#[derive(Debug, Clone, Default)]
pub struct MockDriver {
    state: Arc<MockState>,
}

impl MockDriver {
    /// Create a mock driver that succeeds at everything
    pub fn new() -> Self {
        Self::default()
    }

    /// Advertise bulk capabilities on opened connections
    pub fn with_capabilities(self, capabilities: Capabilities) -> Self {
        *self.state.capabilities.lock() = capabilities;
        self
    }

    /// Fail the next `n` connect attempts
    pub fn fail_connects(self, n: usize, message: impl Into<String>) -> Self {
        self.state.failing_connects.store(n, Ordering::SeqCst);
        *self.state.connect_fail_message.lock() = message.into();
        self
    }

    /// Fail the next `n` executes with the given fault
    pub fn fail_executes(self, n: usize, fault: MockFault, message: impl Into<String>) -> Self {
        self.state.failing_executes.store(n, Ordering::SeqCst);
        *self.state.execute_fault.lock() = fault;
        *self.state.execute_fail_message.lock() = message.into();
        self
    }

    /// Queue a result for the next query; an empty queue yields empty output
    pub fn with_query_result(self, output: QueryOutput) -> Self {
        self.push_query_result(output);
        self
    }

    /// Report `id` from `last_insert_id`
    pub fn with_last_insert_id(self, id: i64) -> Self {
        self.state.last_insert_id.store(id, Ordering::SeqCst);
        self
    }

    /// Report `n` affected rows from every execute
    pub fn with_affected_rows(self, n: u64) -> Self {
        self.state.affected_rows.store(n, Ordering::SeqCst);
        self
    }

    /// Queue a further query result after construction
    pub fn push_query_result(&self, output: QueryOutput) {
        self.state.query_results.lock().push_back(output);
    }

    /// Mark open connections invalid, as after a dropped socket
    pub fn invalidate_connections(&self) {
        self.state.valid.store(false, Ordering::SeqCst);
    }

    /// Connections opened so far
    pub fn connect_count(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    /// Execute calls so far, including failed ones
    pub fn execute_count(&self) -> usize {
        self.state.executes.load(Ordering::SeqCst)
    }

    /// Every executed statement with its arguments
    pub fn executed(&self) -> Vec<(String, Vec<Value>)> {
        self.state.executed.lock().clone()
    }

    /// Every query with its arguments
    pub fn queried(&self) -> Vec<(String, Vec<Value>)> {
        self.state.queried.lock().clone()
    }

    /// Transactions begun / committed / rolled back
    pub fn transaction_counts(&self) -> (usize, usize, usize) {
        (
            self.state.begun.load(Ordering::SeqCst),
            self.state.committed.load(Ordering::SeqCst),
            self.state.rolled_back.load(Ordering::SeqCst),
        )
    }

    /// Bulk-copy invocations as (table, rows)
    pub fn copied(&self) -> Vec<(String, u64)> {
        self.state.copied.lock().clone()
    }

    /// Table-direct invocations as (table, rows)
    pub fn direct_inserted(&self) -> Vec<(String, u64)> {
        self.state.direct_inserted.lock().clone()
    }
}

impl Driver for MockDriver {
    fn connect(&self, _config: &DatabaseConfig) -> Result<Box<dyn Connection>> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        if decrement_if_positive(&self.state.failing_connects) {
            return Err(Error::connection(
                self.state.connect_fail_message.lock().clone(),
            ));
        }
        self.state.valid.store(true, Ordering::SeqCst);
        Ok(Box::new(MockConnection {
            state: Arc::clone(&self.state),
        }))
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

fn decrement_if_positive(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

struct MockConnection {
    state: Arc<MockState>,
}

impl MockConnection {
    fn execute_fault(&self) -> Option<Error> {
        if decrement_if_positive(&self.state.failing_executes) {
            let fault = *self.state.execute_fault.lock();
            Some(fault.raise(&self.state.execute_fail_message.lock()))
        } else {
            None
        }
    }
}

impl Connection for MockConnection {
    fn execute(&mut self, sql: &str, args: &[Value]) -> Result<u64> {
        self.state.executes.fetch_add(1, Ordering::SeqCst);
        if let Some(fault) = self.execute_fault() {
            return Err(fault);
        }
        self.state
            .executed
            .lock()
            .push((sql.to_string(), args.to_vec()));
        Ok(self.state.affected_rows.load(Ordering::SeqCst))
    }

    fn query(&mut self, sql: &str, args: &[Value]) -> Result<QueryOutput> {
        self.state.executes.fetch_add(1, Ordering::SeqCst);
        if let Some(fault) = self.execute_fault() {
            return Err(fault);
        }
        self.state
            .queried
            .lock()
            .push((sql.to_string(), args.to_vec()));
        Ok(self
            .state
            .query_results
            .lock()
            .pop_front()
            .unwrap_or_else(QueryOutput::empty))
    }

    fn begin(&mut self, _level: IsolationLevel) -> Result<()> {
        self.state.begun.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.state.committed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.state.rolled_back.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn last_insert_id(&mut self) -> Result<i64> {
        Ok(self.state.last_insert_id.load(Ordering::SeqCst))
    }

    fn set_command_timeout(&mut self, _timeout: Duration) -> Result<()> {
        Ok(())
    }

    fn capabilities(&self) -> Capabilities {
        *self.state.capabilities.lock()
    }

    fn bulk_copy(
        &mut self,
        table: &str,
        mappings: &[(String, String)],
        source: &mut dyn RowSource,
    ) -> Result<u64> {
        if mappings.is_empty() {
            return Err(Error::parameter("bulk copy requires column mappings"));
        }
        if let Some(fault) = self.execute_fault() {
            return Err(fault);
        }
        let mut rows = 0;
        while source.advance()? {
            for column in 0..source.schema().len() {
                source.get(column)?;
            }
            rows += 1;
        }
        self.state.copied.lock().push((table.to_string(), rows));
        Ok(rows)
    }

    fn table_direct_insert(&mut self, table: &str, source: &mut dyn RowSource) -> Result<u64> {
        if let Some(fault) = self.execute_fault() {
            return Err(fault);
        }
        let mut rows = 0;
        while source.advance()? {
            rows += 1;
        }
        self.state
            .direct_inserted
            .lock()
            .push((table.to_string(), rows));
        Ok(rows)
    }

    fn is_valid(&mut self) -> bool {
        self.state.valid.load(Ordering::SeqCst)
    }
}

/// Build a [`QueryOutput`] from column names and rows
pub fn query_output(columns: &[&str], rows: Vec<Vec<Value>>) -> QueryOutput {
    QueryOutput {
        columns: Arc::new(columns.iter().map(|c| c.to_string()).collect()),
        rows,
    }
}

/// A single-cell result, as COUNT and identity queries produce
pub fn scalar_output(value: Value) -> QueryOutput {
    query_output(&["value"], vec![vec![value]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fail_connects_counts_down() {
        let driver = MockDriver::new().fail_connects(2, "refused");
        let config = DatabaseConfig::new(":memory:", "sqlite");

        assert!(driver.connect(&config).is_err());
        assert!(driver.connect(&config).is_err());
        assert!(driver.connect(&config).is_ok());
        assert_eq!(driver.connect_count(), 3);
    }

    #[test]
    fn test_fail_executes_raises_chosen_fault() {
        let driver = MockDriver::new().fail_executes(1, MockFault::Timeout, "slow");
        let mut conn = driver.connect(&DatabaseConfig::new(":memory:", "sqlite")).unwrap();

        let err = conn.execute("UPDATE t SET a = 1", &[]).unwrap_err();
        assert!(err.is_transient());
        assert!(conn.execute("UPDATE t SET a = 1", &[]).is_ok());
        assert_eq!(driver.execute_count(), 2);
        assert_eq!(driver.executed().len(), 1);
    }

    #[test]
    fn test_scripted_query_results_pop_in_order() {
        let driver = MockDriver::new()
            .with_query_result(scalar_output(Value::Int64(7)))
            .with_query_result(scalar_output(Value::Int64(8)));
        let mut conn = driver.connect(&DatabaseConfig::new(":memory:", "sqlite")).unwrap();

        let first = conn.query("SELECT 1", &[]).unwrap();
        assert_eq!(first.rows[0][0], Value::Int64(7));
        let second = conn.query("SELECT 1", &[]).unwrap();
        assert_eq!(second.rows[0][0], Value::Int64(8));
        let empty = conn.query("SELECT 1", &[]).unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_invalidate_marks_connections_stale() {
        let driver = MockDriver::new();
        let mut conn = driver.connect(&DatabaseConfig::new(":memory:", "sqlite")).unwrap();
        assert!(conn.is_valid());

        driver.invalidate_connections();
        assert!(!conn.is_valid());
    }
}

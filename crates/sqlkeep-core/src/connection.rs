//! Driver-facing connection, statement and cursor traits

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::{
    IsolationLevel, QueryResult, Result, Row, SessionSettings, StatementKey, StatementResult, Value,
};

/// A physical database connection supplied by a driver.
///
/// Every method that may touch the network is async. [`Connection::abort`]
/// is the exception: it must tear the connection down without waiting for
/// in-flight I/O, so a hung driver call can never block reclamation.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Get the driver name (e.g., "sqlite", "postgresql", "mysql")
    fn driver_name(&self) -> &str;

    /// Execute a statement that modifies data (INSERT/UPDATE/DELETE)
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult>;

    /// Execute a query that returns rows (SELECT)
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult>;

    /// Prepare a statement described by `key`
    async fn prepare(&self, key: &StatementKey) -> Result<Arc<dyn PreparedStatement>>;

    /// Native liveness check
    ///
    /// The default implementation only reports whether the connection was
    /// closed locally.
    async fn is_valid(&self, _timeout: Duration) -> Result<bool> {
        Ok(!self.is_closed())
    }

    /// Read the current session attributes
    async fn session_settings(&self) -> Result<SessionSettings>;

    async fn set_auto_commit(&self, auto_commit: bool) -> Result<()>;

    async fn set_read_only(&self, read_only: bool) -> Result<()>;

    async fn set_catalog(&self, catalog: Option<&str>) -> Result<()>;

    async fn set_schema(&self, schema: Option<&str>) -> Result<()>;

    async fn set_isolation(&self, isolation: IsolationLevel) -> Result<()>;

    async fn commit(&self) -> Result<()>;

    async fn rollback(&self) -> Result<()>;

    /// Clear warnings latched on the connection
    async fn clear_warnings(&self) -> Result<()> {
        Ok(())
    }

    /// Close the connection, waiting for the driver to finish
    async fn close(&self) -> Result<()>;

    /// Tear the connection down immediately without waiting on I/O
    fn abort(&self);

    /// Check if the connection is closed
    fn is_closed(&self) -> bool;
}

/// A prepared or callable statement handle
#[async_trait]
pub trait PreparedStatement: Send + Sync {
    /// Execute the prepared statement with parameters
    async fn execute(&self, params: &[Value]) -> Result<StatementResult>;

    /// Query the prepared statement with parameters
    async fn query(&self, params: &[Value]) -> Result<QueryResult>;

    /// Run the statement and stream its rows through a cursor
    async fn open_cursor(&self, params: &[Value]) -> Result<Arc<dyn RowCursor>>;

    /// Close/deallocate the prepared statement
    async fn close(&self) -> Result<()>;

    fn is_closed(&self) -> bool;
}

/// An open result set
#[async_trait]
pub trait RowCursor: Send + Sync {
    /// Fetch up to `max_rows` rows; an empty batch means the cursor is exhausted
    async fn fetch(&self, max_rows: usize) -> Result<Vec<Row>>;

    async fn close(&self) -> Result<()>;

    fn is_closed(&self) -> bool;
}

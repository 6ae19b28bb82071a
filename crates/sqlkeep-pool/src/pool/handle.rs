//! Caller-facing handle to a borrowed connection

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use sqlkeep_core::{
    Connection, DbError, IsolationLevel, QueryResult, Result, SessionSettings, StatementKey,
    StatementResult, Value,
};

use super::pool::PoolInner;
use crate::connection::{ConnectionId, PooledConnection};
use crate::statement::PooledStatement;

/// A connection borrowed from the pool
///
/// Valid for exactly one borrow. Once it is closed, or the connection is
/// reclaimed as abandoned, every operation fails with [`DbError::Closed`]
/// while the pool keeps using the connection underneath. Dropping the
/// handle without closing it returns the connection in the background.
pub struct ConnectionHandle {
    pool: Arc<PoolInner>,
    conn: Arc<PooledConnection>,
    lease: u64,
    released: AtomicBool,
}

impl ConnectionHandle {
    pub(crate) fn new(pool: Arc<PoolInner>, conn: Arc<PooledConnection>, lease: u64) -> Self {
        Self {
            pool,
            conn,
            lease,
            released: AtomicBool::new(false),
        }
    }

    fn checked(&self) -> Result<&Arc<PooledConnection>> {
        if self.released.load(Ordering::Acquire) {
            return Err(DbError::closed("connection"));
        }
        self.conn.check_lease(self.lease)?;
        self.conn.touch();
        Ok(&self.conn)
    }

    /// Classify a failure and report `Closed` if the borrow ended meanwhile.
    fn map_error(&self, error: DbError) -> DbError {
        let error = self.conn.record_error(error);
        self.closed_if_ended(error)
    }

    fn closed_if_ended(&self, error: DbError) -> DbError {
        if self.conn.check_lease(self.lease).is_err() {
            DbError::closed("connection")
        } else {
            error
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.conn.id()
    }

    /// Execute a statement that modifies data (INSERT/UPDATE/DELETE)
    pub async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        let conn = self.checked()?;
        conn.delegate()
            .execute(sql, params)
            .await
            .map_err(|e| self.map_error(e))
    }

    /// Execute a query that returns rows (SELECT)
    pub async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let conn = self.checked()?;
        conn.delegate()
            .query(sql, params)
            .await
            .map_err(|e| self.map_error(e))
    }

    /// Prepare `sql` against the current catalog and schema
    pub async fn prepare(&self, sql: &str) -> Result<PooledStatement> {
        let key = self.session_key(StatementKey::prepared(sql))?;
        self.prepare_with(key).await
    }

    /// Prepare a stored procedure call against the current catalog and schema
    pub async fn prepare_call(&self, sql: &str) -> Result<PooledStatement> {
        let key = self.session_key(StatementKey::callable(sql))?;
        self.prepare_with(key).await
    }

    /// Prepare the statement described by `key`
    pub async fn prepare_with(&self, key: StatementKey) -> Result<PooledStatement> {
        let conn = self.checked()?;
        conn.prepare_statement(key)
            .await
            .map_err(|e| self.closed_if_ended(e))
    }

    fn session_key(&self, key: StatementKey) -> Result<StatementKey> {
        let session = self.checked()?.session();
        Ok(key
            .with_catalog(session.catalog.as_deref())
            .with_schema(session.schema.as_deref()))
    }

    /// Session attributes as last set through the pool
    pub fn session_settings(&self) -> Result<SessionSettings> {
        Ok(self.checked()?.session())
    }

    pub async fn set_auto_commit(&self, auto_commit: bool) -> Result<()> {
        let conn = self.checked()?;
        conn.delegate()
            .set_auto_commit(auto_commit)
            .await
            .map_err(|e| self.map_error(e))?;
        conn.update_session(|session| session.auto_commit = auto_commit);
        Ok(())
    }

    pub async fn set_read_only(&self, read_only: bool) -> Result<()> {
        let conn = self.checked()?;
        conn.delegate()
            .set_read_only(read_only)
            .await
            .map_err(|e| self.map_error(e))?;
        conn.update_session(|session| session.read_only = read_only);
        Ok(())
    }

    pub async fn set_catalog(&self, catalog: Option<&str>) -> Result<()> {
        let conn = self.checked()?;
        conn.delegate()
            .set_catalog(catalog)
            .await
            .map_err(|e| self.map_error(e))?;
        conn.update_session(|session| session.catalog = catalog.map(str::to_string));
        Ok(())
    }

    pub async fn set_schema(&self, schema: Option<&str>) -> Result<()> {
        let conn = self.checked()?;
        conn.delegate()
            .set_schema(schema)
            .await
            .map_err(|e| self.map_error(e))?;
        conn.update_session(|session| session.schema = schema.map(str::to_string));
        Ok(())
    }

    pub async fn set_isolation(&self, isolation: IsolationLevel) -> Result<()> {
        let conn = self.checked()?;
        conn.delegate()
            .set_isolation(isolation)
            .await
            .map_err(|e| self.map_error(e))?;
        conn.update_session(|session| session.isolation = Some(isolation));
        Ok(())
    }

    pub async fn commit(&self) -> Result<()> {
        let conn = self.checked()?;
        conn.delegate().commit().await.map_err(|e| self.map_error(e))
    }

    pub async fn rollback(&self) -> Result<()> {
        let conn = self.checked()?;
        conn.delegate().rollback().await.map_err(|e| self.map_error(e))
    }

    /// Return the connection to the pool. Closing twice is a no-op.
    ///
    /// Statements and cursors left open are closed first; their failures are
    /// reported together as [`DbError::AggregatedClose`].
    pub async fn close(&self) -> Result<()> {
        if self.released.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.pool.return_connection(&self.conn, self.lease).await
    }

    /// Destroy the connection instead of returning it to the pool.
    pub async fn invalidate(&self) -> Result<()> {
        if self.released.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.pool.invalidate_connection(&self.conn, self.lease).await
    }

    /// Whether this handle can no longer be used
    pub fn is_closed(&self) -> bool {
        self.released.load(Ordering::Acquire) || self.conn.check_lease(self.lease).is_err()
    }

    /// The pooled connection behind this handle
    pub fn delegate(&self) -> &Arc<PooledConnection> {
        &self.conn
    }

    /// The driver's physical connection
    pub fn innermost(&self) -> &Arc<dyn Connection> {
        self.conn.delegate()
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let pool = self.pool.clone();
                let conn = self.conn.clone();
                let lease = self.lease;
                runtime.spawn(async move {
                    if let Err(e) = pool.return_connection(&conn, lease).await {
                        tracing::debug!(connection_id = %conn.id(), error = %e, "failed to return dropped connection");
                    }
                });
            }
            Err(_) => {
                tracing::warn!(
                    connection_id = %self.conn.id(),
                    "connection handle dropped outside a runtime, left for abandoned tracking"
                );
            }
        }
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("connection", &self.conn.id())
            .field("lease", &self.lease)
            .field("closed", &self.is_closed())
            .finish()
    }
}

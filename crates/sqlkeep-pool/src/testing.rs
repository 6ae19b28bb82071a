//! Mock driver shared by the unit tests

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sqlkeep_core::{
    Connection, ConnectionOpener, ConnectionTarget, Credentials, DbError, IsolationLevel,
    PreparedStatement, QueryResult, Result, Row, RowCursor, SessionSettings, StatementKey,
    StatementResult, Value,
};

use crate::connection::{ConnectionPolicy, PooledConnection, PooledConnectionManager};
use crate::pool::{ConnectionPool, PoolConfig};

pub(crate) fn init_test_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive("sqlkeep_pool=debug".parse().unwrap()),
            )
            .with_test_writer()
            .finish();

        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

/// Mock physical connection that records what the pool does to it
pub(crate) struct MockConnection {
    pub id: usize,
    pub closed: AtomicBool,
    pub aborted: AtomicBool,
    /// Native validity checks and probe queries
    pub probes: AtomicUsize,
    pub prepares: AtomicUsize,
    pub rollbacks: AtomicUsize,
    pub commits: AtomicUsize,
    pub executed: Mutex<Vec<String>>,
    pub session: Mutex<SessionSettings>,
    /// Every operation fails with this vendor code
    pub fail_code: Mutex<Option<String>>,
    /// Validity checks fail with this vendor code
    pub probe_fail_code: Mutex<Option<String>>,
    pub fail_statement_close: AtomicBool,
    pub fail_cursor_close: AtomicBool,
    pub fail_close: AtomicBool,
    /// Suspend `execute` until aborted
    pub hang_execute: AtomicBool,
    /// Report the native validity check as unsupported
    pub native_unsupported: AtomicBool,
    /// Never answer validity checks
    pub hang_probes: AtomicBool,
    /// Validity checks take this long to answer
    pub probe_delay: Mutex<Option<Duration>>,
    pub statements: Mutex<Vec<Arc<MockStatement>>>,
}

impl MockConnection {
    pub fn new(id: usize) -> Arc<Self> {
        Arc::new(Self {
            id,
            closed: AtomicBool::new(false),
            aborted: AtomicBool::new(false),
            probes: AtomicUsize::new(0),
            prepares: AtomicUsize::new(0),
            rollbacks: AtomicUsize::new(0),
            commits: AtomicUsize::new(0),
            executed: Mutex::new(Vec::new()),
            session: Mutex::new(SessionSettings::default()),
            fail_code: Mutex::new(None),
            probe_fail_code: Mutex::new(None),
            fail_statement_close: AtomicBool::new(false),
            fail_cursor_close: AtomicBool::new(false),
            fail_close: AtomicBool::new(false),
            hang_execute: AtomicBool::new(false),
            native_unsupported: AtomicBool::new(false),
            hang_probes: AtomicBool::new(false),
            probe_delay: Mutex::new(None),
            statements: Mutex::new(Vec::new()),
        })
    }

    pub fn fail_with(&self, code: &str) {
        *self.fail_code.lock() = Some(code.to_string());
    }

    pub fn fail_probes_with(&self, code: &str) {
        *self.probe_fail_code.lock() = Some(code.to_string());
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn prepare_count(&self) -> usize {
        self.prepares.load(Ordering::SeqCst)
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    pub fn statement(&self, index: usize) -> Arc<MockStatement> {
        self.statements.lock()[index].clone()
    }

    fn check(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DbError::driver("08003", "connection does not exist"));
        }
        match self.fail_code.lock().clone() {
            Some(code) => Err(DbError::driver(code, "injected failure")),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn driver_name(&self) -> &str {
        "mock"
    }

    async fn execute(&self, sql: &str, _params: &[Value]) -> Result<StatementResult> {
        self.check()?;
        if self.hang_execute.load(Ordering::SeqCst) {
            while !self.aborted.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            return Err(DbError::driver("08006", "connection aborted"));
        }
        self.executed.lock().push(sql.to_string());
        Ok(StatementResult::affected(1))
    }

    async fn query(&self, sql: &str, _params: &[Value]) -> Result<QueryResult> {
        self.check()?;
        if sql == "SELECT 1" {
            self.probes.fetch_add(1, Ordering::SeqCst);
        }
        self.executed.lock().push(sql.to_string());
        Ok(QueryResult::empty())
    }

    async fn prepare(&self, key: &StatementKey) -> Result<Arc<dyn PreparedStatement>> {
        self.check()?;
        let id = self.prepares.fetch_add(1, Ordering::SeqCst);
        let statement = Arc::new(MockStatement::new(
            id,
            key.sql(),
            self.fail_statement_close.load(Ordering::SeqCst),
            self.fail_cursor_close.load(Ordering::SeqCst),
        ));
        self.statements.lock().push(statement.clone());
        Ok(statement as Arc<dyn PreparedStatement>)
    }

    async fn is_valid(&self, _timeout: Duration) -> Result<bool> {
        if self.native_unsupported.load(Ordering::SeqCst) {
            return Err(DbError::NotSupported("native validity check".into()));
        }
        self.probes.fetch_add(1, Ordering::SeqCst);
        if self.hang_probes.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let delay = *self.probe_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(code) = self.probe_fail_code.lock().clone() {
            return Err(DbError::driver(code, "probe failed"));
        }
        Ok(!self.closed.load(Ordering::SeqCst))
    }

    async fn session_settings(&self) -> Result<SessionSettings> {
        Ok(self.session.lock().clone())
    }

    async fn set_auto_commit(&self, auto_commit: bool) -> Result<()> {
        self.check()?;
        self.session.lock().auto_commit = auto_commit;
        Ok(())
    }

    async fn set_read_only(&self, read_only: bool) -> Result<()> {
        self.check()?;
        self.session.lock().read_only = read_only;
        Ok(())
    }

    async fn set_catalog(&self, catalog: Option<&str>) -> Result<()> {
        self.check()?;
        self.session.lock().catalog = catalog.map(str::to_string);
        Ok(())
    }

    async fn set_schema(&self, schema: Option<&str>) -> Result<()> {
        self.check()?;
        self.session.lock().schema = schema.map(str::to_string);
        Ok(())
    }

    async fn set_isolation(&self, isolation: IsolationLevel) -> Result<()> {
        self.check()?;
        self.session.lock().isolation = Some(isolation);
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        self.check()?;
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        self.check()?;
        self.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(DbError::driver("08006", "close failed"));
        }
        Ok(())
    }

    fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

pub(crate) struct MockStatement {
    pub id: usize,
    pub sql: String,
    pub closed: AtomicBool,
    pub close_calls: AtomicUsize,
    pub executions: AtomicUsize,
    fail_close: bool,
    fail_cursor_close: bool,
    pub cursors: Mutex<Vec<Arc<MockCursor>>>,
}

impl MockStatement {
    pub fn new(id: usize, sql: &str, fail_close: bool, fail_cursor_close: bool) -> Self {
        Self {
            id,
            sql: sql.to_string(),
            closed: AtomicBool::new(false),
            close_calls: AtomicUsize::new(0),
            executions: AtomicUsize::new(0),
            fail_close,
            fail_cursor_close,
            cursors: Mutex::new(Vec::new()),
        }
    }

    pub fn close_count(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn cursor(&self, index: usize) -> Arc<MockCursor> {
        self.cursors.lock()[index].clone()
    }
}

#[async_trait]
impl PreparedStatement for MockStatement {
    async fn execute(&self, _params: &[Value]) -> Result<StatementResult> {
        if self.is_closed() {
            return Err(DbError::Other("statement is closed".into()));
        }
        self.executions.fetch_add(1, Ordering::SeqCst);
        Ok(StatementResult::affected(1))
    }

    async fn query(&self, _params: &[Value]) -> Result<QueryResult> {
        if self.is_closed() {
            return Err(DbError::Other("statement is closed".into()));
        }
        self.executions.fetch_add(1, Ordering::SeqCst);
        Ok(QueryResult::empty())
    }

    async fn open_cursor(&self, _params: &[Value]) -> Result<Arc<dyn RowCursor>> {
        if self.is_closed() {
            return Err(DbError::Other("statement is closed".into()));
        }
        let rows = (0..3)
            .map(|i| Row::new(vec!["n".into()], vec![Value::Int64(i)]))
            .collect();
        let cursor = Arc::new(MockCursor::new(rows, self.fail_cursor_close));
        self.cursors.lock().push(cursor.clone());
        Ok(cursor as Arc<dyn RowCursor>)
    }

    async fn close(&self) -> Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        if self.fail_close {
            return Err(DbError::Other(format!("failed to close statement {}", self.id)));
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

pub(crate) struct MockCursor {
    rows: Mutex<Vec<Row>>,
    pub closed: AtomicBool,
    fail_close: bool,
}

impl MockCursor {
    fn new(rows: Vec<Row>, fail_close: bool) -> Self {
        Self {
            rows: Mutex::new(rows),
            closed: AtomicBool::new(false),
            fail_close,
        }
    }
}

#[async_trait]
impl RowCursor for MockCursor {
    async fn fetch(&self, max_rows: usize) -> Result<Vec<Row>> {
        if self.is_closed() {
            return Err(DbError::Other("cursor is closed".into()));
        }
        let mut rows = self.rows.lock();
        let take = max_rows.min(rows.len());
        Ok(rows.drain(..take).collect())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        if self.fail_close {
            return Err(DbError::Other("failed to close cursor".into()));
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Mock opener that hands out fresh [`MockConnection`]s and keeps them for
/// inspection
pub(crate) struct MockOpener {
    pub connections: Mutex<Vec<Arc<MockConnection>>>,
    pub fail: AtomicBool,
    pub fail_statement_close: AtomicBool,
    /// Opened connections fail every operation with this code
    pub fail_code: Mutex<Option<String>>,
    /// Opened connections answer validity checks this slowly
    pub probe_delay: Mutex<Option<Duration>>,
    pub initial_session: Mutex<SessionSettings>,
}

impl MockOpener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            connections: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
            fail_statement_close: AtomicBool::new(false),
            fail_code: Mutex::new(None),
            probe_delay: Mutex::new(None),
            initial_session: Mutex::new(SessionSettings::default()),
        })
    }

    pub fn opened(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn connection(&self, index: usize) -> Arc<MockConnection> {
        self.connections.lock()[index].clone()
    }
}

#[async_trait]
impl ConnectionOpener for MockOpener {
    async fn open(
        &self,
        _target: &ConnectionTarget,
        _credentials: &Credentials,
    ) -> Result<Arc<dyn Connection>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(DbError::Connection("connection refused".into()));
        }
        let mut connections = self.connections.lock();
        let conn = MockConnection::new(connections.len());
        *conn.session.lock() = self.initial_session.lock().clone();
        *conn.fail_code.lock() = self.fail_code.lock().clone();
        *conn.probe_delay.lock() = *self.probe_delay.lock();
        conn.fail_statement_close
            .store(self.fail_statement_close.load(Ordering::SeqCst), Ordering::SeqCst);
        connections.push(conn.clone());
        Ok(conn as Arc<dyn Connection>)
    }
}

/// Wrap a mock in a pooled connection configured by `config`
pub(crate) fn pooled(conn: &Arc<MockConnection>, config: &PoolConfig) -> Arc<PooledConnection> {
    let classifier = Arc::new(config.classifier().unwrap());
    let session = conn.session.lock().clone();
    PooledConnection::new(
        conn.clone(),
        classifier,
        ConnectionPolicy::from_config(config),
        session.clone(),
        session,
    )
}

/// A pool over mock connections
pub(crate) fn mock_pool(config: PoolConfig) -> (ConnectionPool, Arc<MockOpener>) {
    let opener = MockOpener::new();
    let manager = PooledConnectionManager::new(
        opener.clone(),
        ConnectionTarget::new("mock://localhost/test"),
        Credentials::anonymous(),
        &config,
    )
    .unwrap();
    (ConnectionPool::new(config, manager).unwrap(), opener)
}

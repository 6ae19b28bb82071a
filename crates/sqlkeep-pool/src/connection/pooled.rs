//! A physical connection wrapped with pool bookkeeping

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sqlkeep_core::{
    AggregatedCloseError, Connection, DbError, Result, RowCursor, SessionSettings, StatementKey,
};
use tokio::time::Instant;
use uuid::Uuid;

use super::children::{ChildId, ChildRegistry, ChildResource, TrackedChild};
use crate::abandoned::CallSite;
use crate::classifier::FailureClassifier;
use crate::metrics::ConnectionSnapshot;
use crate::pool::PoolConfig;
use crate::statement::{CacheFullPolicy, CacheLease, PooledCursor, PooledStatement, StatementCache};
use crate::validation::{ProbeError, ProbeResult, ValidationProbe, run_probe};

/// Unique identifier of a pooled connection
pub type ConnectionId = Uuid;

/// Lifecycle state of a pooled connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Sitting in the pool, ready to be borrowed
    Idle,
    /// Checked out by a caller
    Active,
    /// Failed validation or saw a fatal error; will be destroyed
    Invalid,
    /// Physically closed, either destroyed or reclaimed
    Closed,
}

/// Per-connection settings derived from the pool configuration
#[derive(Debug, Clone)]
pub struct ConnectionPolicy {
    pub(crate) probe: ValidationProbe,
    pub(crate) validation_timeout: Duration,
    pub(crate) max_lifetime: Option<Duration>,
    pub(crate) fast_fail_validation: bool,
    pub(crate) rollback_on_return: bool,
    pub(crate) auto_commit_on_return: bool,
    pub(crate) clear_statements_on_return: bool,
    pub(crate) statement_pool: Option<(Option<usize>, CacheFullPolicy)>,
    pub(crate) usage_tracking: bool,
}

impl ConnectionPolicy {
    pub fn from_config(config: &PoolConfig) -> Self {
        Self {
            probe: ValidationProbe::from_query(config.validation_query()),
            validation_timeout: config.validation_timeout(),
            max_lifetime: config.max_conn_lifetime(),
            fast_fail_validation: config.fast_fail_validation(),
            rollback_on_return: config.rollback_on_return(),
            auto_commit_on_return: config.auto_commit_on_return(),
            clear_statements_on_return: config.clear_statement_pool_on_return(),
            statement_pool: config
                .pool_prepared_statements()
                .then(|| (config.max_open_prepared_statements(), config.cache_full_policy())),
            usage_tracking: config.abandoned().usage_tracking(),
        }
    }

    pub fn probe(&self) -> &ValidationProbe {
        &self.probe
    }

    pub fn validation_timeout(&self) -> Duration {
        self.validation_timeout
    }
}

impl Default for ConnectionPolicy {
    fn default() -> Self {
        Self::from_config(&PoolConfig::default())
    }
}

/// A physical connection plus everything the pool tracks about it.
///
/// Owns the physical connection, its open statements and cursors, and its
/// statement cache. Callers never hold it directly: they receive a
/// [`crate::ConnectionHandle`] bound to one lease, and every borrow, return
/// or reclamation bumps the lease so stale handles fail with
/// [`DbError::Closed`].
pub struct PooledConnection {
    id: ConnectionId,
    physical: Arc<dyn Connection>,
    classifier: Arc<FailureClassifier>,
    policy: ConnectionPolicy,
    state: Mutex<ConnectionState>,
    lease: AtomicU64,
    created_at: Instant,
    created_at_utc: DateTime<Utc>,
    /// Nanoseconds after `created_at`; only moves forward
    last_used_nanos: AtomicU64,
    fatal_error_seen: AtomicBool,
    destroyed: AtomicBool,
    defaults: SessionSettings,
    session: Mutex<SessionSettings>,
    children: ChildRegistry,
    statements: Option<StatementCache>,
    borrow_site: Mutex<Option<CallSite>>,
    last_use_site: Mutex<Option<CallSite>>,
}

impl PooledConnection {
    /// Wrap a freshly opened physical connection.
    ///
    /// `current` is the session as the driver reported it; the first
    /// [`PooledConnection::activate`] brings it in line with `defaults`.
    pub fn new(
        physical: Arc<dyn Connection>,
        classifier: Arc<FailureClassifier>,
        policy: ConnectionPolicy,
        defaults: SessionSettings,
        current: SessionSettings,
    ) -> Arc<Self> {
        let statements = policy.statement_pool.map(|(max_open, full_policy)| {
            StatementCache::new(max_open, full_policy, policy.clear_statements_on_return)
        });
        Arc::new(Self {
            id: Uuid::new_v4(),
            physical,
            classifier,
            policy,
            state: Mutex::new(ConnectionState::Idle),
            lease: AtomicU64::new(0),
            created_at: Instant::now(),
            created_at_utc: Utc::now(),
            last_used_nanos: AtomicU64::new(0),
            fatal_error_seen: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            session: Mutex::new(current),
            defaults,
            children: ChildRegistry::default(),
            statements,
            borrow_site: Mutex::new(None),
            last_use_site: Mutex::new(None),
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub fn is_active(&self) -> bool {
        self.state() == ConnectionState::Active
    }

    pub fn fatal_error_seen(&self) -> bool {
        self.fatal_error_seen.load(Ordering::Acquire)
    }

    /// Whether the physical connection has been closed or torn down
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire) || self.physical.is_closed()
    }

    /// Session attributes restored on every activation
    pub fn defaults(&self) -> &SessionSettings {
        &self.defaults
    }

    /// Session attributes as last set through the pool
    pub fn session(&self) -> SessionSettings {
        self.session.lock().clone()
    }

    pub fn policy(&self) -> &ConnectionPolicy {
        &self.policy
    }

    pub fn classifier(&self) -> &FailureClassifier {
        &self.classifier
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn created_at_utc(&self) -> DateTime<Utc> {
        self.created_at_utc
    }

    pub fn last_used(&self) -> Instant {
        self.created_at + Duration::from_nanos(self.last_used_nanos.load(Ordering::Acquire))
    }

    pub fn last_used_utc(&self) -> DateTime<Utc> {
        let offset = Duration::from_nanos(self.last_used_nanos.load(Ordering::Acquire));
        self.created_at_utc
            + chrono::Duration::from_std(offset).unwrap_or_else(|_| chrono::Duration::zero())
    }

    /// Time since the connection was last used, as seen at `now`
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_used())
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created_at)
    }

    /// Whether the connection outlived the configured maximum lifetime
    pub fn is_expired(&self, now: Instant) -> bool {
        self.policy
            .max_lifetime
            .is_some_and(|max| self.age(now) >= max)
    }

    /// Number of statements and cursors opened and not yet closed
    pub fn open_children(&self) -> usize {
        self.children.len()
    }

    pub fn statement_cache(&self) -> Option<&StatementCache> {
        self.statements.as_ref()
    }

    /// The wrapped physical connection
    pub fn delegate(&self) -> &Arc<dyn Connection> {
        &self.physical
    }

    pub fn borrow_site(&self) -> Option<CallSite> {
        self.borrow_site.lock().clone()
    }

    pub fn last_use_site(&self) -> Option<CallSite> {
        self.last_use_site.lock().clone()
    }

    /// Record a use of the connection now.
    pub fn touch(&self) {
        self.stamp();
        if self.policy.usage_tracking {
            *self.last_use_site.lock() = Some(CallSite::capture());
        }
    }

    fn stamp(&self) {
        let offset = Instant::now().saturating_duration_since(self.created_at);
        let nanos = u64::try_from(offset.as_nanos()).unwrap_or(u64::MAX);
        self.last_used_nanos.fetch_max(nanos, Ordering::AcqRel);
    }

    /// Classify an error raised through this connection.
    ///
    /// A fatal verdict is latched and the connection is never pooled again.
    /// Returns the error rewritten into the pool's taxonomy.
    pub fn record_error(&self, error: DbError) -> DbError {
        if self.classifier.is_fatal(&error) {
            if !self.fatal_error_seen.swap(true, Ordering::AcqRel) {
                tracing::warn!(
                    connection_id = %self.id,
                    code = error.code().unwrap_or("none"),
                    error = %error,
                    "fatal error recorded, connection will be discarded"
                );
            }
        }
        self.classifier.reclassify(error)
    }

    /// Prepare the connection for a new borrower by restoring the default
    /// session attributes.
    #[tracing::instrument(skip(self), fields(connection_id = %self.id))]
    pub async fn activate(&self) -> Result<()> {
        if self.is_destroyed() {
            return Err(DbError::closed("connection"));
        }

        let current = self.session();
        let defaults = &self.defaults;
        let mut restored = current.clone();

        if current.auto_commit != defaults.auto_commit {
            self.physical
                .set_auto_commit(defaults.auto_commit)
                .await
                .map_err(|e| self.reset_failed("auto_commit", e))?;
            restored.auto_commit = defaults.auto_commit;
        }
        if current.read_only != defaults.read_only {
            self.physical
                .set_read_only(defaults.read_only)
                .await
                .map_err(|e| self.reset_failed("read_only", e))?;
            restored.read_only = defaults.read_only;
        }
        if let Some(isolation) = defaults.isolation {
            if current.isolation != Some(isolation) {
                self.physical
                    .set_isolation(isolation)
                    .await
                    .map_err(|e| self.reset_failed("isolation", e))?;
                restored.isolation = Some(isolation);
            }
        }
        if current.catalog != defaults.catalog {
            self.physical
                .set_catalog(defaults.catalog.as_deref())
                .await
                .map_err(|e| self.reset_failed("catalog", e))?;
            restored.catalog = defaults.catalog.clone();
        }
        if current.schema != defaults.schema {
            self.physical
                .set_schema(defaults.schema.as_deref())
                .await
                .map_err(|e| self.reset_failed("schema", e))?;
            restored.schema = defaults.schema.clone();
        }

        *self.session.lock() = restored;

        if let Err(e) = self.physical.clear_warnings().await {
            tracing::debug!(error = %e, "failed to clear warnings on activation");
        }
        Ok(())
    }

    fn reset_failed(&self, attribute: &str, error: DbError) -> DbError {
        let error = self.record_error(error);
        DbError::SessionReset(format!("failed to restore {}: {}", attribute, error))
    }

    /// Clean the connection up after a borrower returned it.
    ///
    /// Closes every statement and cursor the borrower left open (cached
    /// statements go back to the cache), rolls back an open transaction and
    /// restores auto-commit. Every step runs even if an earlier one fails;
    /// all failures are reported together as [`DbError::AggregatedClose`].
    #[tracing::instrument(skip(self), fields(connection_id = %self.id))]
    pub async fn passivate(&self) -> Result<()> {
        let mut failures = self.close_children(self.children.drain()).await;

        let session = self.session();
        if !session.auto_commit {
            if self.policy.rollback_on_return && !session.read_only {
                if let Err(e) = self.physical.rollback().await {
                    failures.push(self.record_error(e));
                }
            }
            if self.policy.auto_commit_on_return {
                match self.physical.set_auto_commit(true).await {
                    Ok(()) => self.session.lock().auto_commit = true,
                    Err(e) => failures.push(self.record_error(e)),
                }
            }
        }

        if let Err(e) = self.physical.clear_warnings().await {
            failures.push(self.record_error(e));
        }

        if self.policy.clear_statements_on_return {
            if let Some(cache) = &self.statements {
                failures.extend(cache.clear().await);
            }
        }

        match AggregatedCloseError::from_causes(failures) {
            Some(aggregated) => Err(aggregated.into()),
            None => Ok(()),
        }
    }

    /// Check whether the connection is still usable.
    ///
    /// With fast-fail validation enabled it fails immediately, without
    /// running the probe, once a fatal error has been seen. A probe failure
    /// with a fatal code latches the connection as fatal.
    pub async fn validate(&self, probe: &ValidationProbe, timeout: Duration) -> ProbeResult {
        if self.policy.fast_fail_validation && self.fatal_error_seen() {
            return Err(ProbeError::FailFast);
        }
        if self.destroyed.load(Ordering::Acquire) {
            return Err(ProbeError::ConnectionClosed);
        }
        if let Some(max) = self.policy.max_lifetime {
            let age = self.age(Instant::now());
            if age >= max {
                return Err(ProbeError::Expired { age, max });
            }
        }

        match run_probe(self.physical.as_ref(), probe, timeout).await {
            Ok(latency) => {
                tracing::trace!(connection_id = %self.id, ?latency, "validation succeeded");
                Ok(latency)
            }
            Err(ProbeError::QueryFailed(e)) => {
                if self.classifier.is_fatal(&e) {
                    self.fatal_error_seen.store(true, Ordering::Release);
                }
                Err(ProbeError::QueryFailed(self.classifier.reclassify(e)))
            }
            Err(e) => Err(e),
        }
    }

    /// Close the cache, every child and the physical connection.
    ///
    /// Failures are logged, never returned. Calling it again is a no-op.
    pub async fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        *self.state.lock() = ConnectionState::Closed;

        let mut failures = self.release_resources().await;
        if let Err(e) = self.physical.close().await {
            failures.push(e);
        }
        for error in &failures {
            tracing::warn!(connection_id = %self.id, error = %error, "error while destroying connection");
        }
        tracing::debug!(connection_id = %self.id, "destroyed connection");
    }

    /// Tear down a connection taken from its borrower.
    ///
    /// Aborts the physical connection first so a borrower stuck in driver
    /// I/O is unblocked, then closes the children and the cache. Returns the
    /// close failures for the caller to log.
    pub(crate) async fn reclaim(&self) -> Vec<DbError> {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return Vec::new();
        }
        self.physical.abort();
        self.release_resources().await
    }

    async fn release_resources(&self) -> Vec<DbError> {
        let mut failures = match &self.statements {
            Some(cache) => cache.invalidate_all().await,
            None => Vec::new(),
        };
        failures.extend(self.close_children(self.children.seal()).await);
        failures
    }

    /// Hand the connection to a new borrower and return the lease number.
    pub(crate) fn begin_lease(&self) -> u64 {
        self.stamp();
        if self.policy.usage_tracking {
            *self.borrow_site.lock() = Some(CallSite::capture());
        }
        let mut state = self.state.lock();
        *state = ConnectionState::Active;
        self.lease.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// End `lease` if it is still current. Only one of a return and a
    /// reclamation can win.
    pub(crate) fn end_lease(&self, lease: u64) -> bool {
        let state = self.state.lock();
        if *state != ConnectionState::Active || self.lease.load(Ordering::Acquire) != lease {
            return false;
        }
        self.lease.fetch_add(1, Ordering::AcqRel);
        true
    }

    /// Claim the connection for reclamation if `lease` is still current and
    /// the borrower has been idle for at least `timeout`.
    pub(crate) fn try_begin_reclaim(&self, lease: u64, now: Instant, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        if *state != ConnectionState::Active
            || self.lease.load(Ordering::Acquire) != lease
            || self.idle_for(now) < timeout
        {
            return false;
        }
        *state = ConnectionState::Closed;
        self.lease.fetch_add(1, Ordering::AcqRel);
        true
    }

    /// Move a returned connection to idle. Refused once a fatal error was
    /// latched or the connection was torn down.
    pub(crate) fn mark_idle(&self) -> bool {
        let mut state = self.state.lock();
        if self.fatal_error_seen() || self.is_destroyed() {
            *state = ConnectionState::Invalid;
            return false;
        }
        *state = ConnectionState::Idle;
        drop(state);
        self.stamp();
        true
    }

    pub(crate) fn mark_invalid(&self) {
        let mut state = self.state.lock();
        if *state != ConnectionState::Closed {
            *state = ConnectionState::Invalid;
        }
    }

    pub(crate) fn lease(&self) -> u64 {
        self.lease.load(Ordering::Acquire)
    }

    /// Fail with [`DbError::Closed`] unless `lease` is the current borrow.
    pub(crate) fn check_lease(&self, lease: u64) -> Result<()> {
        let state = self.state.lock();
        if *state == ConnectionState::Active && self.lease.load(Ordering::Acquire) == lease {
            Ok(())
        } else {
            Err(DbError::closed("connection"))
        }
    }

    pub(crate) fn update_session(&self, update: impl FnOnce(&mut SessionSettings)) {
        update(&mut self.session.lock());
    }

    /// Prepare a statement through the cache, if enabled, and track it.
    pub(crate) async fn prepare_statement(self: &Arc<Self>, key: StatementKey) -> Result<PooledStatement> {
        self.touch();
        let lease = match &self.statements {
            Some(cache) => {
                let physical = self.physical.clone();
                let prepare_key = key.clone();
                cache
                    .get_or_prepare(&key, move || async move { physical.prepare(&prepare_key).await })
                    .await
            }
            None => self.physical.prepare(&key).await.map(CacheLease::uncached),
        }
        .map_err(|e| self.record_error(e))?;

        let cached = lease.is_cached();
        let handle = lease.into_handle();
        let resource = ChildResource::Statement {
            handle: handle.clone(),
            key: key.clone(),
            cached,
        };
        match self.children.register(resource, self.capture_site()) {
            Ok((id, closed)) => Ok(PooledStatement::new(
                id,
                Arc::downgrade(self),
                handle,
                key,
                cached,
                closed,
            )),
            Err(resource) => {
                let _ = self.close_resource(resource).await;
                Err(DbError::closed("connection"))
            }
        }
    }

    pub(crate) async fn track_cursor(self: &Arc<Self>, cursor: Arc<dyn RowCursor>) -> Result<PooledCursor> {
        let resource = ChildResource::Cursor {
            cursor: cursor.clone(),
        };
        match self.children.register(resource, self.capture_site()) {
            Ok((id, closed)) => Ok(PooledCursor::new(id, Arc::downgrade(self), cursor, closed)),
            Err(resource) => {
                let _ = self.close_resource(resource).await;
                Err(DbError::closed("connection"))
            }
        }
    }

    /// Close a child its caller closed explicitly. A child already removed
    /// by a forced close is left alone.
    pub(crate) async fn close_child(&self, id: ChildId) -> Result<()> {
        match self.children.unregister(id) {
            Some(child) => self
                .close_resource(child.resource)
                .await
                .map_err(|e| self.record_error(e)),
            None => Ok(()),
        }
    }

    async fn close_children(&self, children: Vec<TrackedChild>) -> Vec<DbError> {
        if children.is_empty() {
            return Vec::new();
        }
        let (cursors, statements): (Vec<_>, Vec<_>) = children
            .into_iter()
            .partition(|child| matches!(child.resource, ChildResource::Cursor { .. }));

        let mut failures = Vec::new();
        for batch in [cursors, statements] {
            let results = join_all(batch.into_iter().map(|child| async move {
                tracing::trace!(
                    connection_id = %self.id,
                    kind = child.kind(),
                    opened_at = ?child.call_site().map(CallSite::captured_at),
                    "closing child left open by borrower"
                );
                self.close_resource(child.resource).await
            }))
            .await;
            failures.extend(
                results
                    .into_iter()
                    .filter_map(|r| r.err())
                    .map(|e| self.record_error(e)),
            );
        }
        failures
    }

    async fn close_resource(&self, resource: ChildResource) -> Result<()> {
        match resource {
            ChildResource::Cursor { cursor } => cursor.close().await,
            ChildResource::Statement {
                handle,
                key,
                cached: true,
            } => match &self.statements {
                Some(cache) => cache.release(&key, handle).await,
                None => handle.close().await,
            },
            ChildResource::Statement { handle, .. } => handle.close().await,
        }
    }

    fn capture_site(&self) -> Option<CallSite> {
        self.policy.usage_tracking.then(CallSite::capture)
    }

    /// Point-in-time view for monitoring
    pub fn snapshot(&self) -> ConnectionSnapshot {
        let idle = self.idle_for(Instant::now());
        ConnectionSnapshot {
            id: self.id,
            state: self.state(),
            created_at: self.created_at_utc,
            last_used_at: self.last_used_utc(),
            idle_ms: u64::try_from(idle.as_millis()).unwrap_or(u64::MAX),
            open_children: self.open_children(),
            fatal_error_seen: self.fatal_error_seen(),
            statements: self.statements.as_ref().map(StatementCache::stats),
        }
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("driver", &self.physical.driver_name())
            .field("state", &self.state())
            .field("lease", &self.lease())
            .field("fatal_error_seen", &self.fatal_error_seen())
            .field("open_children", &self.open_children())
            .finish()
    }
}

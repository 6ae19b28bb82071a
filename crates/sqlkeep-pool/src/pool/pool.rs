//! Connection pool implementation

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use sqlkeep_core::{ConnectionOpener, ConnectionTarget, Credentials, DbError, Result};
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

use super::config::PoolConfig;
use super::handle::ConnectionHandle;
use super::hooks::{LifecycleHooks, ResourcePool};
use super::maintenance::{MaintenanceHandle, MaintenanceReport};
use super::stats::PoolStats;
use crate::abandoned::{AbandonedTracker, SweepCandidate, SweepReport};
use crate::connection::{ConnectionId, PooledConnection, PooledConnectionManager};
use crate::metrics::PoolMetrics;
use crate::statement::CacheStats;

/// One unit of `max_total` capacity. Every live connection holds one,
/// whether it is idle, borrowed or being created or validated.
struct Slot {
    permit: Option<OwnedSemaphorePermit>,
    available: Arc<Notify>,
}

impl Drop for Slot {
    fn drop(&mut self) {
        drop(self.permit.take());
        self.available.notify_one();
    }
}

/// A borrowed connection and the capacity it holds
struct ActiveEntry {
    conn: Arc<PooledConnection>,
    lease: u64,
    seq: u64,
    slot: Slot,
}

struct IdleEntry {
    conn: Arc<PooledConnection>,
    slot: Slot,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum IdleOrigin {
    Returned,
    Created,
    Validated,
}

/// What a borrower got once it stopped waiting
enum Candidate {
    Idle(IdleEntry),
    Fresh(Slot),
}

/// Destroys a connection that is dropped half way through a borrow.
struct PendingBorrow {
    pool: Arc<PoolInner>,
    conn: Option<Arc<PooledConnection>>,
}

impl PendingBorrow {
    fn disarm(mut self) {
        self.conn = None;
    }
}

impl Drop for PendingBorrow {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        conn.mark_invalid();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let pool = self.pool.clone();
                runtime.spawn(async move {
                    tracing::debug!(connection_id = %conn.id(), "destroying connection of a cancelled borrow");
                    pool.discard(&conn).await;
                });
            }
            Err(_) => {
                tracing::warn!(connection_id = %conn.id(), "borrow cancelled outside a runtime, connection not closed");
            }
        }
    }
}

struct Waiting<'a>(&'a AtomicUsize);

impl<'a> Waiting<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for Waiting<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub(crate) struct PoolInner {
    config: PoolConfig,
    hooks: Arc<dyn LifecycleHooks>,
    tracker: AbandonedTracker,
    /// Idle connections, most recently returned first
    idle: Mutex<VecDeque<IdleEntry>>,
    active: Mutex<HashMap<ConnectionId, ActiveEntry>>,
    /// Bounds the number of live connections to `max_total`
    semaphore: Arc<Semaphore>,
    /// Signalled when a connection turns idle or a slot is freed
    available: Arc<Notify>,
    borrow_seq: AtomicU64,
    waiting: AtomicUsize,
    created: AtomicU64,
    destroyed: AtomicU64,
    closed: AtomicBool,
}

/// A connection pool that manages a set of database connections
///
/// Hands out [`ConnectionHandle`]s bound to one borrow. At most `max_total`
/// connections exist at once, idle and borrowed together; returned
/// connections are passivated and kept idle up to `max_idle`. Cloning the
/// pool is cheap and every clone shares the same connections.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Create a pool with the given configuration and lifecycle hooks.
    ///
    /// No connection is opened until the first borrow, or until
    /// [`ConnectionPool::fill_initial`] runs.
    pub fn new<H: LifecycleHooks>(config: PoolConfig, hooks: H) -> Result<Self> {
        config.validate()?;
        let semaphore = Arc::new(Semaphore::new(config.max_total()));
        let tracker = AbandonedTracker::new(config.abandoned().clone());
        Ok(Self {
            inner: Arc::new(PoolInner {
                config,
                hooks: Arc::new(hooks),
                tracker,
                idle: Mutex::new(VecDeque::new()),
                active: Mutex::new(HashMap::new()),
                semaphore,
                available: Arc::new(Notify::new()),
                borrow_seq: AtomicU64::new(0),
                waiting: AtomicUsize::new(0),
                created: AtomicU64::new(0),
                destroyed: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Build a pool of connections opened through `opener` and create its
    /// `initial_size` connections.
    pub async fn connect<O: ConnectionOpener>(
        config: PoolConfig,
        opener: O,
        target: ConnectionTarget,
        credentials: Credentials,
    ) -> Result<Self> {
        let manager = PooledConnectionManager::new(opener, target, credentials, &config)?;
        let pool = Self::new(config, manager)?;
        pool.fill_initial().await?;
        Ok(pool)
    }

    /// Create idle connections until `initial_size` are available.
    pub async fn fill_initial(&self) -> Result<usize> {
        let target = self.inner.config.initial_size();
        self.inner.fill_idle(target).await
    }

    /// Borrow a connection
    ///
    /// This will:
    /// 1. Sweep abandoned connections if the pool is close to exhaustion
    /// 2. Wait up to `max_wait` for an idle connection or a free slot
    /// 3. Reuse the idle connection if it activates and validates, or create one
    pub async fn acquire(&self) -> Result<ConnectionHandle> {
        self.inner.acquire().await
    }

    /// Sweep checked-out connections and reclaim the abandoned ones.
    pub async fn remove_abandoned(&self) -> SweepReport {
        self.inner.remove_abandoned().await
    }

    /// Destroy idle connections that are expired, idle for too long or fail
    /// validation. Returns how many were destroyed.
    pub async fn evict(&self) -> usize {
        self.inner.evict().await
    }

    /// Run one maintenance cycle: eviction, min-idle top up and, when
    /// enabled, an abandoned sweep.
    pub async fn run_maintenance(&self) -> MaintenanceReport {
        self.inner.run_maintenance().await
    }

    /// Run maintenance in the background every `time_between_eviction_runs`.
    ///
    /// Returns `None` when no interval is configured. The task stops when
    /// the handle is stopped or dropped, or the pool is closed.
    pub fn start_maintenance(&self) -> Option<MaintenanceHandle> {
        let interval = self.inner.config.time_between_eviction_runs()?;
        Some(MaintenanceHandle::spawn(Arc::downgrade(&self.inner), interval))
    }

    /// Get current pool statistics
    pub fn stats(&self) -> PoolStats {
        self.inner.stats()
    }

    /// Monitoring snapshot of the pool and every connection in it
    pub fn metrics(&self) -> PoolMetrics {
        self.inner.metrics()
    }

    /// Get the pool configuration
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn tracker(&self) -> &AbandonedTracker {
        &self.inner.tracker
    }

    /// Close the pool.
    ///
    /// Idle connections are destroyed now; borrowed ones are destroyed when
    /// returned. Pending and future borrows fail.
    pub async fn close(&self) {
        self.inner.close().await
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

#[async_trait]
impl ResourcePool for ConnectionPool {
    async fn acquire(&self) -> Result<ConnectionHandle> {
        self.inner.acquire().await
    }

    async fn release(&self, handle: ConnectionHandle) -> Result<()> {
        handle.close().await
    }

    async fn invalidate(&self, handle: ConnectionHandle) -> Result<()> {
        handle.invalidate().await
    }

    fn num_active(&self) -> usize {
        self.inner.num_active()
    }

    fn num_idle(&self) -> usize {
        self.inner.num_idle()
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("stats", &self.stats())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl PoolInner {
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn num_active(&self) -> usize {
        self.active.lock().len()
    }

    fn num_idle(&self) -> usize {
        self.idle.lock().len()
    }

    fn stats(&self) -> PoolStats {
        PoolStats::new(
            self.num_idle(),
            self.num_active(),
            self.waiting.load(Ordering::SeqCst),
            self.config.max_total(),
        )
    }

    #[tracing::instrument(skip(self))]
    async fn acquire(self: &Arc<Self>) -> Result<ConnectionHandle> {
        if self.is_closed() {
            return Err(DbError::closed("connection pool"));
        }

        if self.tracker.should_sweep_on_borrow(
            self.num_idle(),
            self.num_active(),
            self.config.max_total(),
        ) {
            self.remove_abandoned().await;
        }

        let deadline = Instant::now().checked_add(self.config.max_wait());
        let (conn, slot) = loop {
            let candidate = self.wait_for_candidate(deadline).await?;
            if let Some(ready) = self.prepare_candidate(candidate).await? {
                break ready;
            }
        };

        let lease = conn.begin_lease();
        let seq = self.borrow_seq.fetch_add(1, Ordering::Relaxed);
        self.active.lock().insert(
            conn.id(),
            ActiveEntry {
                conn: conn.clone(),
                lease,
                seq,
                slot,
            },
        );
        tracing::trace!(connection_id = %conn.id(), lease, "connection borrowed");
        Ok(ConnectionHandle::new(self.clone(), conn, lease))
    }

    /// Wait for an idle connection or a free slot.
    ///
    /// Only this wait is bounded by `max_wait`; activation, validation and
    /// creation of the candidate run to completion.
    async fn wait_for_candidate(&self, deadline: Option<Instant>) -> Result<Candidate> {
        let _waiting = Waiting::enter(&self.waiting);
        loop {
            let mut notified = std::pin::pin!(self.available.notified());
            notified.as_mut().enable();

            if self.is_closed() {
                return Err(DbError::closed("connection pool"));
            }
            if let Some(entry) = self.pop_idle() {
                return Ok(Candidate::Idle(entry));
            }
            if let Some(slot) = self.try_reserve() {
                return Ok(Candidate::Fresh(slot));
            }

            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return Err(DbError::Timeout(format!(
                            "Timed out waiting for connection (timeout: {:?})",
                            self.config.max_wait()
                        )));
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Turn a candidate into a borrowable connection. `None` means the idle
    /// connection was discarded and the borrower should wait again.
    async fn prepare_candidate(
        self: &Arc<Self>,
        candidate: Candidate,
    ) -> Result<Option<(Arc<PooledConnection>, Slot)>> {
        match candidate {
            Candidate::Idle(IdleEntry { conn, slot }) => {
                let pending = PendingBorrow {
                    pool: self.clone(),
                    conn: Some(conn.clone()),
                };
                let usable = self.reactivate(&conn).await;
                pending.disarm();
                if usable {
                    Ok(Some((conn, slot)))
                } else {
                    self.discard(&conn).await;
                    Ok(None)
                }
            }
            Candidate::Fresh(slot) => {
                let conn = self.create().await?;
                let pending = PendingBorrow {
                    pool: self.clone(),
                    conn: Some(conn.clone()),
                };
                let validated = if self.config.test_on_create() || self.config.test_on_borrow() {
                    self.hooks.on_validate(&conn).await.map(|_| ())
                } else {
                    Ok(())
                };
                pending.disarm();
                match validated {
                    Ok(()) => Ok(Some((conn, slot))),
                    Err(e) => {
                        self.discard(&conn).await;
                        Err(DbError::Connection(format!(
                            "new connection failed validation: {}",
                            e
                        )))
                    }
                }
            }
        }
    }

    /// Activate and, when configured, validate an idle connection.
    async fn reactivate(&self, conn: &Arc<PooledConnection>) -> bool {
        if conn.is_expired(Instant::now()) {
            tracing::debug!(connection_id = %conn.id(), "idle connection expired");
            return false;
        }
        if let Err(e) = self.hooks.on_activate(conn).await {
            tracing::warn!(connection_id = %conn.id(), error = %e, "failed to activate idle connection");
            return false;
        }
        if self.config.test_on_borrow() {
            if let Err(e) = self.hooks.on_validate(conn).await {
                tracing::debug!(connection_id = %conn.id(), error = %e, "idle connection failed validation");
                return false;
            }
        }
        true
    }

    fn pop_idle(&self) -> Option<IdleEntry> {
        let mut idle = self.idle.lock();
        if self.config.lifo() {
            idle.pop_front()
        } else {
            idle.pop_back()
        }
    }

    fn try_reserve(&self) -> Option<Slot> {
        let permit = self.semaphore.clone().try_acquire_owned().ok()?;
        Some(Slot {
            permit: Some(permit),
            available: self.available.clone(),
        })
    }

    /// Queue `conn` as idle unless the pool is closed, `max_idle` is
    /// reached or the connection refuses to go idle. Hands it back otherwise.
    fn push_idle(&self, conn: Arc<PooledConnection>, slot: Slot, origin: IdleOrigin) -> Option<Arc<PooledConnection>> {
        {
            let mut idle = self.idle.lock();
            let accepted = match origin {
                IdleOrigin::Returned | IdleOrigin::Created => conn.mark_idle(),
                // Keeps its idle time
                IdleOrigin::Validated => !conn.fatal_error_seen() && !conn.is_destroyed(),
            };
            if !self.is_closed() && idle.len() < self.config.max_idle() && accepted {
                let entry = IdleEntry { conn, slot };
                if origin == IdleOrigin::Returned {
                    idle.push_front(entry);
                } else {
                    idle.push_back(entry);
                }
                drop(idle);
                self.available.notify_one();
                return None;
            }
        }
        Some(conn)
    }

    async fn create(&self) -> Result<Arc<PooledConnection>> {
        let conn = self.hooks.on_create().await?;
        self.created.fetch_add(1, Ordering::Relaxed);
        Ok(conn)
    }

    /// Return a borrowed connection, unless its lease already ended.
    pub(crate) async fn return_connection(&self, conn: &Arc<PooledConnection>, lease: u64) -> Result<()> {
        if !conn.end_lease(lease) {
            tracing::trace!(connection_id = %conn.id(), lease, "lease already ended");
            return Ok(());
        }
        // The slot travels with the connection into the idle queue
        let entry = self.active.lock().remove(&conn.id());
        match entry {
            Some(entry) => self.recycle(conn, entry.slot).await,
            None => {
                self.discard(conn).await;
                Ok(())
            }
        }
    }

    /// Destroy a borrowed connection instead of returning it.
    pub(crate) async fn invalidate_connection(&self, conn: &Arc<PooledConnection>, lease: u64) -> Result<()> {
        if !conn.end_lease(lease) {
            return Ok(());
        }
        let entry = self.active.lock().remove(&conn.id());
        tracing::debug!(connection_id = %conn.id(), "connection invalidated by borrower");
        self.discard(conn).await;
        drop(entry);
        Ok(())
    }

    async fn recycle(&self, conn: &Arc<PooledConnection>, slot: Slot) -> Result<()> {
        if conn.fatal_error_seen() || conn.is_destroyed() {
            tracing::debug!(connection_id = %conn.id(), "discarding broken connection on return");
            self.discard(conn).await;
            return Ok(());
        }

        if let Err(e) = self.hooks.on_passivate(conn).await {
            tracing::warn!(connection_id = %conn.id(), error = %e, "failed to passivate connection");
            self.discard(conn).await;
            return Err(e);
        }

        if self.config.test_on_return() {
            if let Err(e) = self.hooks.on_validate(conn).await {
                tracing::debug!(connection_id = %conn.id(), error = %e, "returned connection failed validation");
                self.discard(conn).await;
                return Ok(());
            }
        }

        if let Some(rejected) = self.push_idle(conn.clone(), slot, IdleOrigin::Returned) {
            self.discard(&rejected).await;
        }
        Ok(())
    }

    async fn discard(&self, conn: &PooledConnection) {
        conn.mark_invalid();
        self.hooks.on_destroy(conn).await;
        self.destroyed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) async fn remove_abandoned(&self) -> SweepReport {
        let candidates: Vec<SweepCandidate> = {
            let active = self.active.lock();
            let mut entries: Vec<_> = active.values().collect();
            entries.sort_by_key(|entry| entry.seq);
            entries
                .into_iter()
                .map(|entry| (entry.conn.clone(), entry.lease))
                .collect()
        };

        let report = self
            .tracker
            .sweep(Instant::now(), candidates, |conn| {
                self.active.lock().remove(&conn.id());
            })
            .await;
        self.destroyed
            .fetch_add(report.reclaimed.len() as u64, Ordering::Relaxed);
        report
    }

    pub(crate) async fn evict(&self) -> usize {
        let now = Instant::now();
        let candidates: Vec<_> = self.idle.lock().iter().map(|entry| entry.conn.clone()).collect();
        let mut evicted = 0;

        for conn in candidates {
            let idle_too_long = conn.idle_for(now) >= self.config.min_evictable_idle_time()
                && self.num_idle() > self.config.min_idle();
            if conn.is_expired(now) || idle_too_long {
                if let Some(entry) = self.take_idle(&conn) {
                    tracing::debug!(connection_id = %conn.id(), "evicting idle connection");
                    self.discard(&entry.conn).await;
                    evicted += 1;
                }
                continue;
            }

            if !self.config.test_while_idle() {
                continue;
            }
            // The slot stays held while validating so borrowers can't overshoot
            let Some(IdleEntry { conn, slot }) = self.take_idle(&conn) else {
                continue;
            };
            match self.hooks.on_validate(&conn).await {
                Ok(_) => {
                    if let Some(rejected) = self.push_idle(conn, slot, IdleOrigin::Validated) {
                        self.discard(&rejected).await;
                    }
                }
                Err(e) => {
                    tracing::debug!(connection_id = %conn.id(), error = %e, "idle connection failed validation");
                    self.discard(&conn).await;
                    evicted += 1;
                }
            }
        }
        evicted
    }

    /// Remove `conn` from the idle queue if it is still there.
    fn take_idle(&self, conn: &Arc<PooledConnection>) -> Option<IdleEntry> {
        let mut idle = self.idle.lock();
        let index = idle.iter().position(|entry| Arc::ptr_eq(&entry.conn, conn))?;
        idle.remove(index)
    }

    /// Create idle connections until `target` are idle or the pool is full.
    async fn fill_idle(&self, target: usize) -> Result<usize> {
        let mut created = 0;
        while !self.is_closed() && self.num_idle() < target {
            let Some(slot) = self.try_reserve() else {
                break;
            };

            let conn = self.create().await?;
            match self.push_idle(conn, slot, IdleOrigin::Created) {
                None => created += 1,
                Some(rejected) => {
                    self.discard(&rejected).await;
                    break;
                }
            }
        }
        Ok(created)
    }

    pub(crate) async fn run_maintenance(&self) -> MaintenanceReport {
        let evicted = self.evict().await;
        let created = match self.fill_idle(self.config.min_idle()).await {
            Ok(created) => created,
            Err(e) => {
                tracing::warn!(error = %e, "failed to create idle connections");
                0
            }
        };
        let abandoned = if self.config.abandoned().remove_on_maintenance() {
            Some(self.remove_abandoned().await)
        } else {
            None
        };

        tracing::trace!(evicted, created, "pool maintenance finished");
        MaintenanceReport {
            evicted,
            created,
            abandoned,
        }
    }

    fn metrics(&self) -> PoolMetrics {
        let mut connections: Vec<Arc<PooledConnection>> =
            self.idle.lock().iter().map(|entry| entry.conn.clone()).collect();
        {
            let active = self.active.lock();
            let mut entries: Vec<_> = active.values().collect();
            entries.sort_by_key(|entry| entry.seq);
            connections.extend(entries.into_iter().map(|entry| entry.conn.clone()));
        }

        let connections: Vec<_> = connections.iter().map(|conn| conn.snapshot()).collect();
        let statements = connections
            .iter()
            .filter_map(|snapshot| snapshot.statements)
            .fold(CacheStats::default(), |mut total, stats| {
                total.hits += stats.hits;
                total.misses += stats.misses;
                total.evictions += stats.evictions;
                total.idle += stats.idle;
                total.outstanding += stats.outstanding;
                total
            });

        PoolMetrics {
            stats: self.stats(),
            created: self.created.load(Ordering::Relaxed),
            destroyed: self.destroyed.load(Ordering::Relaxed),
            abandoned_reclaimed: self.tracker.reclaimed_count(),
            statements,
            connections,
        }
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.semaphore.close();
        self.available.notify_waiters();

        let idle: Vec<_> = self.idle.lock().drain(..).collect();
        for entry in &idle {
            self.discard(&entry.conn).await;
        }
        tracing::info!(
            destroyed_idle = idle.len(),
            still_active = self.num_active(),
            "connection pool closed"
        );
    }
}

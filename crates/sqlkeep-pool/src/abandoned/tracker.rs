//! Detection and reclamation of abandoned connections

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use sqlkeep_core::DbError;
use tokio::time::Instant;

use super::config::AbandonedConfig;
use crate::connection::{ConnectionId, PooledConnection};

/// A checked-out connection considered by a sweep, with the lease it was
/// observed under.
pub type SweepCandidate = (Arc<PooledConnection>, u64);

/// Outcome of one abandoned-connection sweep
#[derive(Debug, Default)]
pub struct SweepReport {
    /// Connections looked at
    pub examined: usize,
    /// Connections reclaimed, in sweep order
    pub reclaimed: Vec<ConnectionId>,
    /// Close failures hit while tearing reclaimed connections down
    pub failures: Vec<(ConnectionId, DbError)>,
}

impl SweepReport {
    pub fn reclaimed_count(&self) -> usize {
        self.reclaimed.len()
    }
}

/// Finds checked-out connections whose borrower has gone quiet for longer
/// than the configured timeout and takes them back.
pub struct AbandonedTracker {
    config: AbandonedConfig,
    reclaimed: AtomicU64,
}

impl AbandonedTracker {
    pub fn new(config: AbandonedConfig) -> Self {
        Self {
            config,
            reclaimed: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &AbandonedConfig {
        &self.config
    }

    /// Whether a borrow should sweep first: only when the pool is close to
    /// exhaustion.
    pub fn should_sweep_on_borrow(&self, num_idle: usize, num_active: usize, max_total: usize) -> bool {
        self.config.remove_on_borrow()
            && num_idle < 2
            && num_active + 3 > max_total
    }

    /// Whether `conn` is checked out and has not been used for at least the
    /// abandonment timeout.
    pub fn is_abandoned(&self, conn: &PooledConnection, now: Instant) -> bool {
        conn.is_active() && conn.idle_for(now) >= self.config.timeout()
    }

    /// Total connections reclaimed by this tracker
    pub fn reclaimed_count(&self) -> u64 {
        self.reclaimed.load(Ordering::Relaxed)
    }

    /// Reclaim every abandoned connection among `candidates`.
    ///
    /// Each connection is re-checked under its own state lock, so one that
    /// was returned or touched since the snapshot is skipped. For every
    /// reclaimed connection `release_slot` is called before the teardown
    /// starts, so the pool can hand its capacity to a waiting borrower.
    /// Teardown failures are logged and collected, never returned as errors.
    pub async fn sweep<F>(&self, now: Instant, candidates: Vec<SweepCandidate>, release_slot: F) -> SweepReport
    where
        F: Fn(&PooledConnection),
    {
        let timeout = self.config.timeout();
        let mut report = SweepReport {
            examined: candidates.len(),
            ..Default::default()
        };

        for (conn, lease) in candidates {
            if !conn.try_begin_reclaim(lease, now, timeout) {
                continue;
            }
            let idle = conn.idle_for(now);
            release_slot(&conn);

            let failures = conn.reclaim().await;
            self.reclaimed.fetch_add(1, Ordering::Relaxed);
            self.log_reclaimed(&conn, idle);

            for error in failures {
                tracing::warn!(
                    connection_id = %conn.id(),
                    error = %error,
                    "error while closing abandoned connection"
                );
                report.failures.push((conn.id(), error));
            }
            report.reclaimed.push(conn.id());
        }

        if !report.reclaimed.is_empty() {
            tracing::info!(
                examined = report.examined,
                reclaimed = report.reclaimed.len(),
                "abandoned connection sweep finished"
            );
        }
        report
    }

    fn log_reclaimed(&self, conn: &PooledConnection, idle: std::time::Duration) {
        if !self.config.log_abandoned() {
            tracing::warn!(
                connection_id = %conn.id(),
                idle_ms = u64::try_from(idle.as_millis()).unwrap_or(u64::MAX),
                "reclaimed abandoned connection"
            );
            return;
        }

        let borrow_site = conn
            .borrow_site()
            .map(|site| site.to_string())
            .unwrap_or_else(|| "not tracked".to_string());
        let last_use_site = conn
            .last_use_site()
            .map(|site| site.to_string())
            .unwrap_or_else(|| "not tracked".to_string());
        tracing::warn!(
            connection_id = %conn.id(),
            idle_ms = u64::try_from(idle.as_millis()).unwrap_or(u64::MAX),
            last_used_at = %conn.last_used_utc(),
            borrowed = %borrow_site,
            last_used = %last_use_site,
            "reclaimed abandoned connection"
        );
    }
}

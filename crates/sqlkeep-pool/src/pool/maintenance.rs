//! Background pool maintenance

use std::sync::Weak;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::pool::PoolInner;
use crate::abandoned::SweepReport;

/// Outcome of one maintenance cycle
#[derive(Debug, Default)]
pub struct MaintenanceReport {
    /// Idle connections destroyed by eviction
    pub evicted: usize,
    /// Idle connections created to reach `min_idle`
    pub created: usize,
    /// Abandoned sweep result, when sweeping on maintenance is enabled
    pub abandoned: Option<SweepReport>,
}

/// Handle to the background maintenance task. Dropping it stops the task.
#[derive(Debug)]
pub struct MaintenanceHandle {
    task: JoinHandle<()>,
}

impl MaintenanceHandle {
    pub(crate) fn spawn(pool: Weak<PoolInner>, interval: Duration) -> Self {
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(pool) = pool.upgrade() else {
                    break;
                };
                if pool.is_closed() {
                    break;
                }
                let report = pool.run_maintenance().await;
                tracing::debug!(
                    evicted = report.evicted,
                    created = report.created,
                    reclaimed = report.abandoned.as_ref().map_or(0, SweepReport::reclaimed_count),
                    "maintenance run finished"
                );
            }
            tracing::debug!("maintenance task stopped");
        });
        Self { task }
    }

    /// Stop the maintenance task.
    pub fn stop(self) {
        drop(self);
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for MaintenanceHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

//! Pool statistics types

use serde::{Deserialize, Serialize};

/// Statistics about a connection pool's current state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Number of idle connections available in the pool
    idle: usize,
    /// Number of connections currently borrowed
    active: usize,
    /// Number of borrowers waiting for a connection
    waiting: usize,
    /// Configured upper bound on idle + active
    max_total: usize,
}

impl PoolStats {
    pub fn new(idle: usize, active: usize, waiting: usize, max_total: usize) -> Self {
        Self {
            idle,
            active,
            waiting,
            max_total,
        }
    }

    /// Get the total number of live connections (idle + active)
    pub fn total(&self) -> usize {
        self.idle + self.active
    }

    pub fn idle(&self) -> usize {
        self.idle
    }

    pub fn active(&self) -> usize {
        self.active
    }

    pub fn waiting(&self) -> usize {
        self.waiting
    }

    pub fn max_total(&self) -> usize {
        self.max_total
    }

    /// Share of the capacity currently borrowed, from 0.0 to 1.0
    ///
    /// Returns 0.0 for a pool without capacity.
    pub fn utilization(&self) -> f64 {
        if self.max_total == 0 {
            0.0
        } else {
            self.active as f64 / self.max_total as f64
        }
    }

    /// Check whether every connection slot is borrowed
    pub fn is_exhausted(&self) -> bool {
        self.max_total > 0 && self.active >= self.max_total
    }
}

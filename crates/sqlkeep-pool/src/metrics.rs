//! Read-only monitoring snapshots

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::connection::{ConnectionId, ConnectionState};
use crate::pool::PoolStats;
use crate::statement::CacheStats;

/// Point-in-time view of a single pooled connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSnapshot {
    pub id: ConnectionId,
    pub state: ConnectionState,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    /// Milliseconds since last use when the snapshot was taken
    pub idle_ms: u64,
    /// Statements and cursors opened and not yet closed
    pub open_children: usize,
    pub fatal_error_seen: bool,
    /// Statement cache counters, when statement pooling is enabled
    pub statements: Option<CacheStats>,
}

/// Point-in-time view of a pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolMetrics {
    pub stats: PoolStats,
    /// Connections created since the pool was built
    pub created: u64,
    /// Connections destroyed or reclaimed since the pool was built
    pub destroyed: u64,
    /// Connections reclaimed as abandoned since the pool was built
    pub abandoned_reclaimed: u64,
    /// Statement cache counters summed over every live connection
    pub statements: CacheStats,
    /// Idle connections first, then borrowed ones in borrow order
    pub connections: Vec<ConnectionSnapshot>,
}

impl PoolMetrics {
    /// Statement cache hit ratio from 0.0 to 1.0; 0.0 before any lookup
    pub fn statement_hit_ratio(&self) -> f64 {
        let lookups = self.statements.hits + self.statements.misses;
        if lookups == 0 {
            0.0
        } else {
            self.statements.hits as f64 / lookups as f64
        }
    }
}

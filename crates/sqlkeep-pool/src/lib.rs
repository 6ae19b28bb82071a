//! sqlkeep pool - Pooled connection lifecycle management
//!
//! This crate wraps physical database connections so they can be reused
//! safely: session state is reset between borrowers, statements and cursors
//! left open are closed on return, prepared statements are cached per
//! connection, fatal driver errors retire a connection, and connections held
//! too long by an idle borrower are reclaimed.

pub mod abandoned;
pub mod classifier;
pub mod connection;
mod metrics;
pub mod pool;
pub mod statement;
pub mod validation;

#[cfg(test)]
mod testing;

pub use abandoned::{AbandonedConfig, AbandonedTracker, CallSite, SweepReport};
pub use classifier::{FailureClassifier, FailureKind};
pub use connection::{
    ConnectionId, ConnectionPolicy, ConnectionState, PooledConnection, PooledConnectionManager,
};
pub use metrics::{ConnectionSnapshot, PoolMetrics};
pub use pool::{
    ConnectionHandle, ConnectionPool, LifecycleHooks, MaintenanceHandle, MaintenanceReport,
    PoolConfig, PoolStats, ResourcePool,
};
pub use statement::{
    CacheFullPolicy, CacheLease, CacheStats, PooledCursor, PooledStatement, StatementCache,
};
pub use validation::{ProbeError, ProbeResult, ValidationProbe};

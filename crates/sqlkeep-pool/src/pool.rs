//! Connection pooling
//!
//! [`ConnectionPool`] implements the [`ResourcePool`] contract on top of
//! [`LifecycleHooks`]: bounded borrowing with a wait timeout, a LIFO or FIFO
//! idle queue, idle eviction and abandoned-connection sweeps.
//!
//! # Example
//!
//! ```ignore
//! use sqlkeep_pool::{ConnectionPool, PoolConfig};
//!
//! let config = PoolConfig::new(2, 20)
//!     .with_max_wait_ms(5000)
//!     .with_statement_pool(Some(50));
//!
//! let pool = ConnectionPool::connect(config, opener, target, credentials).await?;
//! let conn = pool.acquire().await?;
//! let stmt = conn.prepare("SELECT name FROM users WHERE id = ?").await?;
//! // Use the statement...
//! conn.close().await?;
//! ```

mod config;
mod handle;
mod hooks;
mod maintenance;
#[allow(clippy::module_inception)]
mod pool;
mod stats;


pub use config::PoolConfig;
pub use handle::ConnectionHandle;
pub use hooks::{LifecycleHooks, ResourcePool};
pub use maintenance::{MaintenanceHandle, MaintenanceReport};
pub use pool::ConnectionPool;
pub use stats::PoolStats;

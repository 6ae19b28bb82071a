//! Pooled connection lifecycle
//!
//! [`PooledConnection`] wraps one physical connection with the bookkeeping
//! the pool needs: lifecycle state, last-use time, fatal-error latch, session
//! defaults, open children and the statement cache.
//! [`PooledConnectionManager`] implements the pool's lifecycle hooks on top
//! of it.

mod children;
mod manager;
mod pooled;


pub use children::ChildId;
pub use manager::*;
pub use pooled::*;

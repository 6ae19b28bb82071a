//! Prepared statement caching and tracking
//!
//! [`StatementCache`] keeps prepared statements per connection keyed by
//! [`sqlkeep_core::StatementKey`]; [`PooledStatement`] and [`PooledCursor`]
//! are the handles callers use, tracked by their connection so anything left
//! open is closed when the connection goes back to the pool.

mod cache;
mod wrapper;


pub use cache::*;
pub use wrapper::*;

//! Contracts between the pool and the objects it manages

use std::sync::Arc;

use async_trait::async_trait;
use sqlkeep_core::Result;

use super::handle::ConnectionHandle;
use crate::connection::PooledConnection;
use crate::validation::ProbeResult;

/// Lifecycle callbacks the pool invokes on the connections it manages
#[async_trait]
pub trait LifecycleHooks: Send + Sync + 'static {
    /// Open and wrap a new connection, ready to hand out
    async fn on_create(&self) -> Result<Arc<PooledConnection>>;

    /// Prepare an idle connection for a borrower
    async fn on_activate(&self, conn: &PooledConnection) -> Result<()>;

    /// Clean up a connection its borrower returned
    async fn on_passivate(&self, conn: &PooledConnection) -> Result<()>;

    /// Check that a connection is still usable
    async fn on_validate(&self, conn: &PooledConnection) -> ProbeResult;

    /// Tear a connection down. Must not fail.
    async fn on_destroy(&self, conn: &PooledConnection);
}

#[async_trait]
impl<T: LifecycleHooks> LifecycleHooks for Arc<T> {
    async fn on_create(&self) -> Result<Arc<PooledConnection>> {
        (**self).on_create().await
    }

    async fn on_activate(&self, conn: &PooledConnection) -> Result<()> {
        (**self).on_activate(conn).await
    }

    async fn on_passivate(&self, conn: &PooledConnection) -> Result<()> {
        (**self).on_passivate(conn).await
    }

    async fn on_validate(&self, conn: &PooledConnection) -> ProbeResult {
        (**self).on_validate(conn).await
    }

    async fn on_destroy(&self, conn: &PooledConnection) {
        (**self).on_destroy(conn).await
    }
}

/// A bounded pool of reusable connections
#[async_trait]
pub trait ResourcePool: Send + Sync {
    /// Borrow a connection, waiting for capacity if needed
    async fn acquire(&self) -> Result<ConnectionHandle>;

    /// Return a borrowed connection
    async fn release(&self, handle: ConnectionHandle) -> Result<()>;

    /// Destroy a borrowed connection instead of returning it
    async fn invalidate(&self, handle: ConnectionHandle) -> Result<()>;

    fn num_active(&self) -> usize;

    fn num_idle(&self) -> usize;
}

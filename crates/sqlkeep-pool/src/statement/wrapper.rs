//! Caller-facing statement and cursor wrappers

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use sqlkeep_core::{
    DbError, PreparedStatement, QueryResult, Result, Row, RowCursor, StatementKey, StatementResult,
    Value,
};

use crate::connection::{ChildId, PooledConnection};

/// A statement prepared through a pooled connection.
///
/// Stays usable until it is closed, its connection is returned to the pool,
/// or the connection is reclaimed; after that every operation fails with
/// [`DbError::Closed`]. Closing twice is a no-op.
pub struct PooledStatement {
    id: ChildId,
    owner: Weak<PooledConnection>,
    handle: Arc<dyn PreparedStatement>,
    key: StatementKey,
    cached: bool,
    closed: Arc<AtomicBool>,
}

impl PooledStatement {
    pub(crate) fn new(
        id: ChildId,
        owner: Weak<PooledConnection>,
        handle: Arc<dyn PreparedStatement>,
        key: StatementKey,
        cached: bool,
        closed: Arc<AtomicBool>,
    ) -> Self {
        Self {
            id,
            owner,
            handle,
            key,
            cached,
            closed,
        }
    }

    fn owner(&self) -> Result<Arc<PooledConnection>> {
        if self.is_closed() {
            return Err(DbError::closed("statement"));
        }
        let owner = self
            .owner
            .upgrade()
            .ok_or_else(|| DbError::closed("statement"))?;
        owner.touch();
        Ok(owner)
    }

    fn map_error(&self, owner: &PooledConnection, error: DbError) -> DbError {
        let error = owner.record_error(error);
        if self.is_closed() {
            DbError::closed("statement")
        } else {
            error
        }
    }

    pub async fn execute(&self, params: &[Value]) -> Result<StatementResult> {
        let owner = self.owner()?;
        self.handle
            .execute(params)
            .await
            .map_err(|e| self.map_error(&owner, e))
    }

    pub async fn query(&self, params: &[Value]) -> Result<QueryResult> {
        let owner = self.owner()?;
        self.handle
            .query(params)
            .await
            .map_err(|e| self.map_error(&owner, e))
    }

    /// Run the statement and return a tracked cursor over its rows
    pub async fn open_cursor(&self, params: &[Value]) -> Result<PooledCursor> {
        let owner = self.owner()?;
        let cursor = self
            .handle
            .open_cursor(params)
            .await
            .map_err(|e| self.map_error(&owner, e))?;
        owner.track_cursor(cursor).await
    }

    /// Close the statement. A cached statement goes back to the cache.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        match self.owner.upgrade() {
            Some(owner) => owner.close_child(self.id).await,
            None => Ok(()),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn id(&self) -> ChildId {
        self.id
    }

    pub fn key(&self) -> &StatementKey {
        &self.key
    }

    /// Whether the statement came from, and returns to, the statement cache
    pub fn is_cached(&self) -> bool {
        self.cached
    }

    /// The driver's statement handle
    pub fn delegate(&self) -> &Arc<dyn PreparedStatement> {
        &self.handle
    }
}

impl std::fmt::Debug for PooledStatement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledStatement")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("cached", &self.cached)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// An open result set tracked by its pooled connection
pub struct PooledCursor {
    id: ChildId,
    owner: Weak<PooledConnection>,
    cursor: Arc<dyn RowCursor>,
    closed: Arc<AtomicBool>,
}

impl PooledCursor {
    pub(crate) fn new(
        id: ChildId,
        owner: Weak<PooledConnection>,
        cursor: Arc<dyn RowCursor>,
        closed: Arc<AtomicBool>,
    ) -> Self {
        Self {
            id,
            owner,
            cursor,
            closed,
        }
    }

    /// Fetch up to `max_rows` rows; an empty batch means the cursor is exhausted
    pub async fn fetch(&self, max_rows: usize) -> Result<Vec<Row>> {
        if self.is_closed() {
            return Err(DbError::closed("cursor"));
        }
        let owner = self
            .owner
            .upgrade()
            .ok_or_else(|| DbError::closed("cursor"))?;
        owner.touch();
        self.cursor.fetch(max_rows).await.map_err(|e| {
            let e = owner.record_error(e);
            if self.is_closed() {
                DbError::closed("cursor")
            } else {
                e
            }
        })
    }

    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        match self.owner.upgrade() {
            Some(owner) => owner.close_child(self.id).await,
            None => Ok(()),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn delegate(&self) -> &Arc<dyn RowCursor> {
        &self.cursor
    }
}

impl std::fmt::Debug for PooledCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledCursor")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

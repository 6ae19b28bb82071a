//! Per-connection prepared statement cache

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sqlkeep_core::{DbError, PreparedStatement, Result, StatementKey};
use tokio::time::Instant;

/// What to do when the cache is at capacity and every entry is checked out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheFullPolicy {
    /// Fail the prepare with [`DbError::CacheFull`]
    #[default]
    Fail,
    /// Prepare an uncached statement that is closed when released
    Bypass,
}

/// A statement handed out by [`StatementCache::get_or_prepare`].
pub struct CacheLease {
    handle: Arc<dyn PreparedStatement>,
    cached: bool,
    hit: bool,
}

impl CacheLease {
    /// Wrap a statement prepared outside any cache
    pub(crate) fn uncached(handle: Arc<dyn PreparedStatement>) -> Self {
        Self {
            handle,
            cached: false,
            hit: false,
        }
    }

    pub fn handle(&self) -> &Arc<dyn PreparedStatement> {
        &self.handle
    }

    pub fn into_handle(self) -> Arc<dyn PreparedStatement> {
        self.handle
    }

    /// Whether the handle counts against the cache and must be released to it
    pub fn is_cached(&self) -> bool {
        self.cached
    }

    /// Whether the handle was reused from the idle set
    pub fn is_hit(&self) -> bool {
        self.hit
    }
}

/// Counters and occupancy of a statement cache
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub idle: usize,
    pub outstanding: usize,
}

struct IdleEntry {
    handle: Arc<dyn PreparedStatement>,
    last_returned: Instant,
    seq: u64,
}

#[derive(Default)]
struct CacheState {
    /// Idle handles per key, most recently returned last
    idle: HashMap<StatementKey, Vec<IdleEntry>>,
    idle_count: usize,
    outstanding: usize,
    next_seq: u64,
    closed: bool,
}

impl CacheState {
    fn take_idle(&mut self, key: &StatementKey) -> Option<Arc<dyn PreparedStatement>> {
        let entries = self.idle.get_mut(key)?;
        let mut found = None;
        while let Some(entry) = entries.pop() {
            self.idle_count -= 1;
            if !entry.handle.is_closed() {
                found = Some(entry.handle);
                break;
            }
        }
        if entries.is_empty() {
            self.idle.remove(key);
        }
        found
    }

    fn take_oldest_idle(&mut self) -> Option<(StatementKey, IdleEntry)> {
        let (key, index) = self
            .idle
            .iter()
            .flat_map(|(key, entries)| {
                entries
                    .iter()
                    .enumerate()
                    .map(move |(index, entry)| ((entry.last_returned, entry.seq), key, index))
            })
            .min_by_key(|(order, _, _)| *order)
            .map(|(_, key, index)| (key.clone(), index))?;

        let entries = self.idle.get_mut(&key)?;
        let entry = entries.remove(index);
        if entries.is_empty() {
            self.idle.remove(&key);
        }
        self.idle_count -= 1;
        Some((key, entry))
    }

    fn push_idle(&mut self, key: StatementKey, handle: Arc<dyn PreparedStatement>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.idle.entry(key).or_default().push(IdleEntry {
            handle,
            last_returned: Instant::now(),
            seq,
        });
        self.idle_count += 1;
    }

    /// Reinsert an entry taken by `take_oldest_idle`, keeping its age.
    fn restore_idle(&mut self, key: StatementKey, entry: IdleEntry) {
        let entries = self.idle.entry(key).or_default();
        let order = (entry.last_returned, entry.seq);
        let index = entries.partition_point(|e| (e.last_returned, e.seq) < order);
        entries.insert(index, entry);
        self.idle_count += 1;
    }

    fn drain_idle(&mut self) -> Vec<Arc<dyn PreparedStatement>> {
        self.idle_count = 0;
        self.idle
            .drain()
            .flat_map(|(_, entries)| entries.into_iter().map(|e| e.handle))
            .collect()
    }
}

enum Plan {
    Hit(Arc<dyn PreparedStatement>),
    Prepare {
        cached: bool,
        victim: Option<(StatementKey, IdleEntry)>,
    },
}

/// Keyed cache of prepared statements for a single connection.
///
/// Counts idle and checked-out handles against `max_open`. When the bound is
/// reached the idle handle returned longest ago is closed to make room;
/// checked-out handles are never evicted. All mutation goes through one
/// internal lock, which the owner's release path and a concurrent
/// reclamation share.
pub struct StatementCache {
    max_open: Option<usize>,
    policy: CacheFullPolicy,
    clear_on_release: bool,
    state: Mutex<CacheState>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl StatementCache {
    pub fn new(max_open: Option<usize>, policy: CacheFullPolicy, clear_on_release: bool) -> Self {
        Self {
            max_open,
            policy,
            clear_on_release,
            state: Mutex::new(CacheState::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Return an idle handle for `key`, or prepare a new one with `prepare`.
    pub async fn get_or_prepare<F, Fut>(&self, key: &StatementKey, prepare: F) -> Result<CacheLease>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<dyn PreparedStatement>>>,
    {
        let plan = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(DbError::closed("statement cache"));
            }
            match state.take_idle(key) {
                Some(handle) => {
                    state.outstanding += 1;
                    Plan::Hit(handle)
                }
                None => {
                    let total = state.outstanding + state.idle_count;
                    match self.max_open {
                        Some(max) if total >= max => match state.take_oldest_idle() {
                            Some(victim) => {
                                state.outstanding += 1;
                                Plan::Prepare {
                                    cached: true,
                                    victim: Some(victim),
                                }
                            }
                            None => match self.policy {
                                CacheFullPolicy::Fail => {
                                    return Err(DbError::CacheFull { max });
                                }
                                CacheFullPolicy::Bypass => Plan::Prepare {
                                    cached: false,
                                    victim: None,
                                },
                            },
                        },
                        _ => {
                            state.outstanding += 1;
                            Plan::Prepare {
                                cached: true,
                                victim: None,
                            }
                        }
                    }
                }
            }
        };

        match plan {
            Plan::Hit(handle) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(statement = %key, "statement cache hit");
                Ok(CacheLease {
                    handle,
                    cached: true,
                    hit: true,
                })
            }
            Plan::Prepare { cached, victim } => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                match prepare().await {
                    Ok(handle) => {
                        if let Some((victim_key, entry)) = victim {
                            self.evictions.fetch_add(1, Ordering::Relaxed);
                            tracing::debug!(statement = %victim_key, "evicting oldest idle statement");
                            if let Err(e) = entry.handle.close().await {
                                tracing::warn!(statement = %victim_key, error = %e, "failed to close evicted statement");
                            }
                        }
                        Ok(CacheLease {
                            handle,
                            cached,
                            hit: false,
                        })
                    }
                    Err(e) => {
                        // The victim is still usable, put it back
                        let orphan = {
                            let mut state = self.state.lock();
                            if cached {
                                state.outstanding -= 1;
                            }
                            match victim {
                                Some((victim_key, entry)) if !state.closed => {
                                    state.restore_idle(victim_key, entry);
                                    None
                                }
                                other => other,
                            }
                        };
                        if let Some((victim_key, entry)) = orphan {
                            if let Err(e) = entry.handle.close().await {
                                tracing::warn!(statement = %victim_key, error = %e, "failed to close evicted statement");
                            }
                        }
                        Err(e)
                    }
                }
            }
        }
    }

    /// Return a checked-out handle to the idle set.
    ///
    /// The handle is closed instead when the cache clears on release, has
    /// been invalidated, or the handle itself is already closed.
    pub async fn release(&self, key: &StatementKey, handle: Arc<dyn PreparedStatement>) -> Result<()> {
        let discard = {
            let mut state = self.state.lock();
            state.outstanding = state.outstanding.saturating_sub(1);
            if state.closed || self.clear_on_release || handle.is_closed() {
                true
            } else {
                state.push_idle(key.clone(), handle.clone());
                false
            }
        };

        if discard && !handle.is_closed() {
            handle.close().await?;
        }
        Ok(())
    }

    /// Close every idle handle, keeping the cache usable.
    pub async fn clear(&self) -> Vec<DbError> {
        let handles = self.state.lock().drain_idle();
        close_all(handles).await
    }

    /// Close every idle handle and refuse further use. Handles still checked
    /// out are closed when released.
    pub async fn invalidate_all(&self) -> Vec<DbError> {
        let handles = {
            let mut state = self.state.lock();
            state.closed = true;
            state.drain_idle()
        };
        close_all(handles).await
    }

    /// Idle plus checked-out handles
    pub fn len(&self) -> usize {
        let state = self.state.lock();
        state.idle_count + state.outstanding
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn idle_len(&self) -> usize {
        self.state.lock().idle_count
    }

    pub fn outstanding(&self) -> usize {
        self.state.lock().outstanding
    }

    pub fn is_invalidated(&self) -> bool {
        self.state.lock().closed
    }

    pub fn max_open(&self) -> Option<usize> {
        self.max_open
    }

    pub fn stats(&self) -> CacheStats {
        let (idle, outstanding) = {
            let state = self.state.lock();
            (state.idle_count, state.outstanding)
        };
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            idle,
            outstanding,
        }
    }
}

async fn close_all(handles: Vec<Arc<dyn PreparedStatement>>) -> Vec<DbError> {
    join_all(handles.iter().map(|h| h.close()))
        .await
        .into_iter()
        .filter_map(|r| r.err())
        .collect()
}

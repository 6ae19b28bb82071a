//! Registry of the open child resources of a pooled connection
//!
//! The connection owns its children by value in a map keyed by [`ChildId`];
//! caller-facing wrappers hold only the id, a weak reference to the owner and
//! a shared closed flag. Whoever removes an entry from the registry is the one
//! that closes it, which makes closing exactly-once even when a caller's
//! `close()` races a forced close.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use sqlkeep_core::{PreparedStatement, RowCursor, StatementKey};

use crate::abandoned::CallSite;

/// Identifier of a child resource, unique within its owning connection
pub type ChildId = u64;

pub(crate) enum ChildResource {
    Statement {
        handle: Arc<dyn PreparedStatement>,
        key: StatementKey,
        cached: bool,
    },
    Cursor {
        cursor: Arc<dyn RowCursor>,
    },
}

impl ChildResource {
    fn kind(&self) -> &'static str {
        match self {
            ChildResource::Statement { .. } => "statement",
            ChildResource::Cursor { .. } => "cursor",
        }
    }
}

pub(crate) struct TrackedChild {
    pub(crate) resource: ChildResource,
    closed: Arc<AtomicBool>,
    call_site: Option<CallSite>,
}

impl TrackedChild {
    pub(crate) fn kind(&self) -> &'static str {
        self.resource.kind()
    }

    pub(crate) fn call_site(&self) -> Option<&CallSite> {
        self.call_site.as_ref()
    }
}

#[derive(Default)]
struct RegistryState {
    children: BTreeMap<ChildId, TrackedChild>,
    sealed: bool,
}

#[derive(Default)]
pub(crate) struct ChildRegistry {
    next_id: AtomicU64,
    state: Mutex<RegistryState>,
}

impl ChildRegistry {
    /// Register a newly opened child.
    ///
    /// Hands the resource back once the registry is sealed by a destroy or
    /// reclamation; the caller must close it itself.
    pub(crate) fn register(
        &self,
        resource: ChildResource,
        call_site: Option<CallSite>,
    ) -> Result<(ChildId, Arc<AtomicBool>), ChildResource> {
        let mut state = self.state.lock();
        if state.sealed {
            return Err(resource);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let closed = Arc::new(AtomicBool::new(false));
        state.children.insert(
            id,
            TrackedChild {
                resource,
                closed: closed.clone(),
                call_site,
            },
        );
        Ok((id, closed))
    }

    /// Remove a child explicitly closed by its caller.
    pub(crate) fn unregister(&self, id: ChildId) -> Option<TrackedChild> {
        self.state.lock().children.remove(&id)
    }

    /// Remove every child, marking each closed, newest first.
    pub(crate) fn drain(&self) -> Vec<TrackedChild> {
        let mut state = self.state.lock();
        take_all(&mut state)
    }

    /// Remove every child and refuse further registrations.
    pub(crate) fn seal(&self) -> Vec<TrackedChild> {
        let mut state = self.state.lock();
        state.sealed = true;
        take_all(&mut state)
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().children.len()
    }
}

fn take_all(state: &mut RegistryState) -> Vec<TrackedChild> {
    let children = std::mem::take(&mut state.children);
    children
        .into_values()
        .rev()
        .inspect(|child| child.closed.store(true, Ordering::Release))
        .collect()
}

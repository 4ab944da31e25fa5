//! The status surface (spec section 4.9).
//!
//! Holds the current [`FileStatus`] for every item and broadcasts change
//! events to external observers (the IPC status bus, spec section 6).
//! Callers publish a status change from inside the same critical section
//! that performed the underlying state change, so observers never see a
//! stale `(path, status)` pair.

use dashmap::DashMap;
use onemount_core::domain::ids::ItemId;
use onemount_core::domain::status::FileStatus;
use tokio::sync::broadcast;

/// A single status change, broadcast to anything watching the bus.
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub path: String,
    pub status: FileStatus,
}

/// The in-memory status table plus a broadcast channel of changes.
pub struct StatusSurface {
    by_id: DashMap<ItemId, (String, FileStatus)>,
    changes: broadcast::Sender<StatusChange>,
}

impl Default for StatusSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusSurface {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(256);
        Self { by_id: DashMap::new(), changes: tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusChange> {
        self.changes.subscribe()
    }

    /// Records the new status for `id` at `path` and broadcasts the
    /// change. Silently drops the broadcast if there are no subscribers.
    pub fn publish(&self, id: ItemId, path: impl Into<String>, status: FileStatus) {
        let path = path.into();
        self.by_id.insert(id, (path.clone(), status));
        let _ = self.changes.send(StatusChange { path, status });
    }

    #[must_use]
    pub fn status_for_id(&self, id: &ItemId) -> Option<FileStatus> {
        self.by_id.get(id).map(|entry| entry.1)
    }

    /// Linear scan by path — the table is sized to the number of items
    /// currently known to the graph, which is small enough that a
    /// reverse index isn't worth the bookkeeping.
    #[must_use]
    pub fn status_for_path(&self, path: &str) -> Option<FileStatus> {
        self.by_id.iter().find(|entry| entry.value().0 == path).map(|entry| entry.value().1)
    }

    pub fn remove(&self, id: &ItemId) {
        self.by_id.remove(id);
    }
}

//! The offline-change journal and sync manager (spec section 4.8).
//!
//! While offline, foreground operations append a record here instead of
//! enqueueing an upload. On reconnection the sync manager runs one delta
//! pass, then replays the journal in timestamp order.

use std::sync::Arc;

use chrono::Utc;
use onemount_core::domain::ids::ItemId;
use onemount_core::ports::persistent_store::{Bucket, PersistentStore};
use onemount_core::ports::remote_client::RemoteClient;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::audit::{AuditLog, CorrelationId};
use crate::delta::DeltaEngine;
use crate::graph::InodeGraph;
use crate::upload::{UploadManager, UploadPriority};

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("store error: {0}")]
    Store(#[from] onemount_core::ports::persistent_store::StoreError),
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// The kind of local change recorded while offline (spec section 4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Create,
    Modify,
    Delete,
    Rename,
}

/// A single journal entry. Stored under key `{id}|{nanosecond_ts}` in
/// [`Bucket::OfflineChanges`] so `range` returns entries pre-sorted by
/// timestamp (spec section 4.8, "Journal record format").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: ItemId,
    pub kind: ChangeKind,
    pub timestamp_nanos: i64,
    pub path: String,
    pub old_path: Option<String>,
    pub new_path: Option<String>,
}

impl JournalEntry {
    fn key(&self) -> Vec<u8> {
        format!("{}|{:020}", self.id.as_str(), self.timestamp_nanos).into_bytes()
    }
}

/// Appends offline-change records and, on reconnection, replays them
/// against the remote client (spec section 4.8).
pub struct JournalManager {
    store: Arc<dyn PersistentStore>,
    graph: Arc<InodeGraph>,
    remote: Arc<dyn RemoteClient>,
    upload: Arc<UploadManager>,
}

impl JournalManager {
    pub fn new(
        store: Arc<dyn PersistentStore>,
        graph: Arc<InodeGraph>,
        remote: Arc<dyn RemoteClient>,
        upload: Arc<UploadManager>,
    ) -> Self {
        Self { store, graph, remote, upload }
    }

    /// Appends an entry to the journal. Called by foreground operations
    /// while [`InodeGraph::is_offline`] is true, in place of enqueueing an
    /// upload (spec section 4.8, "While offline").
    pub async fn append(
        &self,
        id: ItemId,
        kind: ChangeKind,
        path: impl Into<String>,
        old_path: Option<String>,
        new_path: Option<String>,
    ) -> Result<(), JournalError> {
        let entry = JournalEntry {
            id,
            kind,
            timestamp_nanos: Utc::now().timestamp_nanos_opt().unwrap_or_default(),
            path: path.into(),
            old_path,
            new_path,
        };
        let bytes = serde_json::to_vec(&entry).map_err(|e| JournalError::Serialization(e.to_string()))?;
        self.store.put(Bucket::OfflineChanges, &entry.key(), &bytes).await?;
        Ok(())
    }

    /// Spawns the task that watches [`DeltaEngine::subscribe_reconnected`]
    /// and runs [`Self::replay`] on every transition back online (spec
    /// section 4.8, "On reconnection").
    pub fn spawn_reconnect_watcher(
        self: &Arc<Self>,
        delta: &Arc<DeltaEngine>,
        cancellation: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let journal = Arc::clone(self);
        let mut reconnected = delta.subscribe_reconnected();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = cancellation.cancelled() => {
                        debug!("journal reconnect watcher stopping");
                        return;
                    }
                    result = reconnected.recv() => {
                        match result {
                            Ok(()) => {
                                if let Err(e) = journal.replay().await {
                                    warn!(error = %e, "offline-change journal replay failed");
                                }
                            }
                            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                            Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                        }
                    }
                }
            }
        })
    }

    /// Reads every journal entry in timestamp order and dispatches it:
    /// create/modify enter the upload manager, delete/rename go straight
    /// to the remote client. Entries whose target no longer exists
    /// locally are skipped. Each entry is removed as soon as it succeeds
    /// or fails permanently (spec section 4.8, "Reconnection sequence").
    pub async fn replay(&self) -> Result<(), JournalError> {
        let entries = self.load_entries().await?;
        let correlation_id = CorrelationId::new();
        AuditLog::journal_replay_started(correlation_id, entries.len());

        let mut applied = 0;
        let mut skipped = 0;
        for entry in entries {
            match self.replay_one(&entry).await {
                ReplayOutcome::Applied => applied += 1,
                ReplayOutcome::Skipped => skipped += 1,
            }
            if let Err(e) = self.remove_entry(&entry).await {
                warn!(item_id = %entry.id, error = %e, "failed to remove replayed journal entry");
            }
        }

        AuditLog::journal_replay_completed(correlation_id, applied, skipped);
        Ok(())
    }

    async fn load_entries(&self) -> Result<Vec<JournalEntry>, JournalError> {
        let raw = self.store.range(Bucket::OfflineChanges, b"").await?;
        let mut entries: Vec<JournalEntry> = raw
            .into_iter()
            .filter_map(|(_, value)| serde_json::from_slice(&value).ok())
            .collect();
        entries.sort_by_key(|e| e.timestamp_nanos);
        Ok(entries)
    }

    async fn replay_one(&self, entry: &JournalEntry) -> ReplayOutcome {
        match entry.kind {
            ChangeKind::Create | ChangeKind::Modify => {
                if self.graph.resolve_by_id(&entry.id).await.ok().flatten().is_none() {
                    debug!(item_id = %entry.id, "journal entry target no longer exists, skipping");
                    return ReplayOutcome::Skipped;
                }
                match self.upload.enqueue_and_wait(entry.id.clone(), UploadPriority::Low).await {
                    Ok(_) => ReplayOutcome::Applied,
                    Err(e) => {
                        warn!(item_id = %entry.id, error = %e, "journal replay upload failed");
                        ReplayOutcome::Skipped
                    }
                }
            }
            ChangeKind::Delete => match self.remote.delete(&entry.id).await {
                Ok(()) => ReplayOutcome::Applied,
                Err(e) => {
                    warn!(item_id = %entry.id, error = %e, "journal replay delete failed");
                    ReplayOutcome::Skipped
                }
            },
            ChangeKind::Rename => {
                let Some(new_path) = entry.new_path.as_deref() else {
                    return ReplayOutcome::Skipped;
                };
                let Some(item) = self.graph.resolve_by_id(&entry.id).await.ok().flatten() else {
                    debug!(item_id = %entry.id, "journal rename target no longer exists, skipping");
                    return ReplayOutcome::Skipped;
                };
                let Some(parent_id) = item.parent_id else {
                    return ReplayOutcome::Skipped;
                };
                let name = new_path.rsplit('/').next().unwrap_or(new_path);
                match self.remote.rename(&entry.id, &parent_id, name).await {
                    Ok(_) => ReplayOutcome::Applied,
                    Err(e) => {
                        warn!(item_id = %entry.id, error = %e, "journal replay rename failed");
                        ReplayOutcome::Skipped
                    }
                }
            }
        }
    }

    async fn remove_entry(&self, entry: &JournalEntry) -> Result<(), JournalError> {
        self.store.delete(Bucket::OfflineChanges, &entry.key()).await?;
        Ok(())
    }
}

enum ReplayOutcome {
    Applied,
    Skipped,
}

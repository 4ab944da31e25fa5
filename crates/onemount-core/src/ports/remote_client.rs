//! Remote client port (spec section 4.4).
//!
//! A stateless adapter translating core requests into cloud API calls.
//! Modelled the way the teacher models its cloud provider port: a narrow
//! `#[async_trait]` capability interface returning port-level DTOs, with a
//! typed error enum instead of a single opaque failure.

use std::ops::Range;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::domain::ids::ItemId;

/// Typed failures a [`RemoteClient`] call can return (spec section 4.4 and
/// section 7, "Error handling design").
#[derive(Debug, Error, Clone)]
pub enum RemoteError {
    #[error("network absent")]
    Offline,
    #[error("credentials invalid or expired")]
    AuthRequired,
    #[error("remote item not found")]
    NotFound,
    #[error("remote and local versions diverge")]
    Conflict,
    #[error("rate limited, retry after {retry_after_secs:?}s")]
    RateLimited { retry_after_secs: Option<u64> },
    #[error("transient server error: {0}")]
    TransientServer(String),
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("request timed out")]
    Timeout,
}

impl RemoteError {
    /// Whether the issuing subsystem should retry with backoff (spec
    /// section 7's policy table).
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RemoteError::RateLimited { .. } | RemoteError::TransientServer(_) | RemoteError::Timeout
        )
    }
}

/// Port-level DTO for item metadata returned by `get_item`/`get_item_by_path`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemMetadataDto {
    pub id: ItemId,
    pub name: String,
    pub parent_id: Option<ItemId>,
    pub is_directory: bool,
    pub size: u64,
    pub etag: String,
    pub modified_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// A single changed item from a delta page (spec section 4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangedItem {
    pub metadata: ItemMetadataDto,
    pub is_deleted: bool,
}

/// Result of a `delta(cursor)` call. May be paginated; `next_cursor` is
/// always present so the engine can persist it once the page is fully
/// applied (spec section 4.7, "After a page, persist the new cursor
/// atomically").
#[derive(Debug, Clone)]
pub struct ChangeSet {
    pub items: Vec<ChangedItem>,
    pub next_cursor: String,
    /// True when more pages follow for the same logical sync pass.
    pub has_more: bool,
}

/// A handle describing an in-progress chunked upload, returned by
/// `start_upload_session` and threaded through subsequent `upload_chunk`
/// calls (spec section 4.6).
#[derive(Debug, Clone)]
pub struct UploadSession {
    pub session_id: String,
    pub upload_url: String,
}

/// The narrow capability set the core requires from the cloud provider
/// (spec section 4.4). A mock implementation backs tests; an HTTP
/// implementation backs production (spec section 9).
#[async_trait::async_trait]
pub trait RemoteClient: Send + Sync {
    async fn get_item(&self, id: &ItemId) -> Result<ItemMetadataDto, RemoteError>;

    async fn get_item_by_path(&self, path: &str) -> Result<ItemMetadataDto, RemoteError>;

    async fn list_children(&self, id: &ItemId) -> Result<Vec<ItemMetadataDto>, RemoteError>;

    /// Downloads a byte range of an item's content. `range.end` may exceed
    /// the item's size; implementations clamp to the actual length.
    async fn download_content(
        &self,
        id: &ItemId,
        range: Range<u64>,
    ) -> Result<Vec<u8>, RemoteError>;

    async fn start_upload_session(
        &self,
        parent: &ItemId,
        name: &str,
        size: u64,
    ) -> Result<UploadSession, RemoteError>;

    async fn upload_chunk(
        &self,
        session: &UploadSession,
        range: Range<u64>,
        bytes: &[u8],
    ) -> Result<(), RemoteError>;

    async fn commit_upload(&self, session: &UploadSession) -> Result<ItemMetadataDto, RemoteError>;

    /// Single-request upload for files under the small-file threshold
    /// (spec section 4.6).
    async fn upload_small(
        &self,
        parent: &ItemId,
        name: &str,
        bytes: &[u8],
    ) -> Result<ItemMetadataDto, RemoteError>;

    async fn create_directory(&self, parent: &ItemId, name: &str) -> Result<ItemMetadataDto, RemoteError>;

    async fn rename(
        &self,
        id: &ItemId,
        new_parent: &ItemId,
        new_name: &str,
    ) -> Result<ItemMetadataDto, RemoteError>;

    /// Deletion is treated as idempotent: a `NotFound` result is success
    /// from the caller's point of view (spec section 7).
    async fn delete(&self, id: &ItemId) -> Result<(), RemoteError>;

    /// Fetches a changeset since `cursor`. `cursor` of `None` means
    /// "latest" (spec section 4.7, first-start behaviour).
    async fn delta(&self, cursor: Option<&str>) -> Result<ChangeSet, RemoteError>;

    /// Subscribes to the out-of-band push channel (spec section 4.4,
    /// `subscribe_changes`). Each received token means "new changes may
    /// exist"; the delta engine's only obligation is to call `delta`
    /// again. Token contents are opaque and never interpreted.
    ///
    /// The default implementation returns a channel whose sender is
    /// dropped immediately, so `recv` always yields `None` — the correct
    /// behaviour for a provider with no push support: the delta engine
    /// falls back to polling alone.
    async fn subscribe_changes(&self) -> Result<mpsc::Receiver<String>, RemoteError> {
        let (_tx, rx) = mpsc::channel(1);
        Ok(rx)
    }
}

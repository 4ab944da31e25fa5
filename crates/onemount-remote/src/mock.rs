//! In-memory [`RemoteClient`] for tests (spec section 9).
//!
//! Backs a tree of [`ItemMetadataDto`] and a parallel content map in a
//! `Mutex`, so tests can drive sync behaviour without a network.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use onemount_core::domain::ids::ItemId;
use onemount_core::ports::remote_client::{
    ChangeSet, ChangedItem, ItemMetadataDto, RemoteClient, RemoteError, UploadSession,
};

struct MockState {
    items: HashMap<ItemId, ItemMetadataDto>,
    content: HashMap<ItemId, Vec<u8>>,
    pending_uploads: HashMap<String, Vec<u8>>,
    history: Vec<ChangedItem>,
}

/// In-memory double for [`RemoteClient`]. `push_change`/`remove_item` let
/// tests script what the next `delta` call observes.
pub struct MockRemoteClient {
    state: Mutex<MockState>,
    cursor_counter: AtomicU64,
    pub fail_next: Mutex<Option<RemoteError>>,
    /// Unlike `fail_next`, not consumed on read — every `upload_chunk`
    /// call fails with this error until cleared. Used to exercise
    /// retry/restart exhaustion.
    pub fail_chunks: Mutex<Option<RemoteError>>,
    push_tx: Mutex<Option<tokio::sync::mpsc::Sender<String>>>,
}

impl Default for MockRemoteClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRemoteClient {
    #[must_use]
    pub fn new() -> Self {
        let root = ItemMetadataDto {
            id: ItemId::root(),
            name: String::new(),
            parent_id: None,
            is_directory: true,
            size: 0,
            etag: "root-etag".to_string(),
            modified_at: Utc::now(),
            created_at: Utc::now(),
        };
        let mut items = HashMap::new();
        items.insert(ItemId::root(), root);
        Self {
            state: Mutex::new(MockState {
                items,
                content: HashMap::new(),
                pending_uploads: HashMap::new(),
                history: Vec::new(),
            }),
            cursor_counter: AtomicU64::new(0),
            fail_next: Mutex::new(None),
            fail_chunks: Mutex::new(None),
            push_tx: Mutex::new(None),
        }
    }

    /// Makes every subsequent `upload_chunk` call fail with `err` until
    /// cleared with `clear_fail_chunks`.
    pub fn fail_all_chunks(&self, err: RemoteError) {
        *self.fail_chunks.lock().unwrap() = Some(err);
    }

    pub fn clear_fail_chunks(&self) {
        *self.fail_chunks.lock().unwrap() = None;
    }

    /// Sends an opaque push token to whatever subscriber called
    /// `subscribe_changes`, as if the provider had observed a remote
    /// change out-of-band. No-op if nobody has subscribed.
    pub fn trigger_push(&self, token: impl Into<String>) {
        if let Some(tx) = self.push_tx.lock().unwrap().as_ref() {
            let _ = tx.try_send(token.into());
        }
    }

    /// Seeds an item directly, bypassing `create_directory`/`upload_small`.
    pub fn seed_item(&self, item: ItemMetadataDto) {
        self.state.lock().unwrap().items.insert(item.id.clone(), item);
    }

    /// Seeds content for an already-seeded item.
    pub fn seed_content(&self, id: &ItemId, bytes: Vec<u8>) {
        self.state.lock().unwrap().content.insert(id.clone(), bytes);
    }

    /// Records a change for the next `delta` call to surface, as if it
    /// happened on the server out-of-band (another client's edit).
    pub fn push_change(&self, metadata: ItemMetadataDto, is_deleted: bool) {
        self.state.lock().unwrap().history.push(ChangedItem { metadata, is_deleted });
    }

    fn next_cursor(&self) -> String {
        format!("cursor-{}", self.cursor_counter.fetch_add(1, Ordering::SeqCst))
    }

    fn take_failure(&self) -> Option<RemoteError> {
        self.fail_next.lock().unwrap().take()
    }
}

#[async_trait]
impl RemoteClient for MockRemoteClient {
    async fn get_item(&self, id: &ItemId) -> Result<ItemMetadataDto, RemoteError> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        self.state.lock().unwrap().items.get(id).cloned().ok_or(RemoteError::NotFound)
    }

    async fn get_item_by_path(&self, path: &str) -> Result<ItemMetadataDto, RemoteError> {
        let trimmed = path.trim_start_matches('/');
        if trimmed.is_empty() {
            return self.get_item(&ItemId::root()).await;
        }
        let guard = self.state.lock().unwrap();
        guard
            .items
            .values()
            .find(|item| item.name == trimmed)
            .cloned()
            .ok_or(RemoteError::NotFound)
    }

    async fn list_children(&self, id: &ItemId) -> Result<Vec<ItemMetadataDto>, RemoteError> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        let guard = self.state.lock().unwrap();
        Ok(guard
            .items
            .values()
            .filter(|item| item.parent_id.as_ref() == Some(id))
            .cloned()
            .collect())
    }

    async fn download_content(&self, id: &ItemId, range: Range<u64>) -> Result<Vec<u8>, RemoteError> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        let guard = self.state.lock().unwrap();
        let bytes = guard.content.get(id).ok_or(RemoteError::NotFound)?;
        let start = range.start.min(bytes.len() as u64) as usize;
        let end = range.end.min(bytes.len() as u64) as usize;
        Ok(bytes[start..end].to_vec())
    }

    async fn start_upload_session(&self, parent: &ItemId, name: &str, _size: u64) -> Result<UploadSession, RemoteError> {
        let session_id = format!("{}:{name}:{}", parent.as_str(), uuid::Uuid::new_v4());
        self.state.lock().unwrap().pending_uploads.insert(session_id.clone(), Vec::new());
        Ok(UploadSession { session_id: session_id.clone(), upload_url: session_id })
    }

    async fn upload_chunk(&self, session: &UploadSession, range: Range<u64>, bytes: &[u8]) -> Result<(), RemoteError> {
        if let Some(err) = self.fail_chunks.lock().unwrap().clone() {
            return Err(err);
        }
        let mut guard = self.state.lock().unwrap();
        let buf = guard
            .pending_uploads
            .get_mut(&session.session_id)
            .ok_or(RemoteError::NotFound)?;
        let end = range.end as usize;
        if buf.len() < end {
            buf.resize(end, 0);
        }
        buf[range.start as usize..end].copy_from_slice(bytes);
        Ok(())
    }

    async fn commit_upload(&self, session: &UploadSession) -> Result<ItemMetadataDto, RemoteError> {
        let mut parts = session.session_id.splitn(3, ':');
        let parent_str = parts.next().ok_or_else(|| RemoteError::Validation("bad session".into()))?;
        let name = parts.next().ok_or_else(|| RemoteError::Validation("bad session".into()))?;

        let bytes = {
            let mut guard = self.state.lock().unwrap();
            guard
                .pending_uploads
                .remove(&session.session_id)
                .ok_or(RemoteError::NotFound)?
        };
        self.upload_small(&ItemId::from_remote(parent_str), name, &bytes).await
    }

    async fn upload_small(&self, parent: &ItemId, name: &str, bytes: &[u8]) -> Result<ItemMetadataDto, RemoteError> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        let id = ItemId::from_remote(format!("mock-{}", uuid::Uuid::new_v4()));
        let item = ItemMetadataDto {
            id: id.clone(),
            name: name.to_string(),
            parent_id: Some(parent.clone()),
            is_directory: false,
            size: bytes.len() as u64,
            etag: format!("etag-{}", uuid::Uuid::new_v4()),
            modified_at: Utc::now(),
            created_at: Utc::now(),
        };
        let mut guard = self.state.lock().unwrap();
        guard.items.insert(id.clone(), item.clone());
        guard.content.insert(id, bytes.to_vec());
        Ok(item)
    }

    async fn create_directory(&self, parent: &ItemId, name: &str) -> Result<ItemMetadataDto, RemoteError> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        let id = ItemId::from_remote(format!("mock-dir-{}", uuid::Uuid::new_v4()));
        let item = ItemMetadataDto {
            id: id.clone(),
            name: name.to_string(),
            parent_id: Some(parent.clone()),
            is_directory: true,
            size: 0,
            etag: format!("etag-{}", uuid::Uuid::new_v4()),
            modified_at: Utc::now(),
            created_at: Utc::now(),
        };
        self.state.lock().unwrap().items.insert(id, item.clone());
        Ok(item)
    }

    async fn rename(&self, id: &ItemId, new_parent: &ItemId, new_name: &str) -> Result<ItemMetadataDto, RemoteError> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        let mut guard = self.state.lock().unwrap();
        let item = guard.items.get_mut(id).ok_or(RemoteError::NotFound)?;
        item.name = new_name.to_string();
        item.parent_id = Some(new_parent.clone());
        item.modified_at = Utc::now();
        Ok(item.clone())
    }

    async fn delete(&self, id: &ItemId) -> Result<(), RemoteError> {
        let mut guard = self.state.lock().unwrap();
        guard.items.remove(id);
        guard.content.remove(id);
        Ok(())
    }

    async fn delta(&self, _cursor: Option<&str>) -> Result<ChangeSet, RemoteError> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        let mut guard = self.state.lock().unwrap();
        let items = std::mem::take(&mut guard.history);
        drop(guard);
        Ok(ChangeSet {
            items,
            next_cursor: self.next_cursor(),
            has_more: false,
        })
    }

    async fn subscribe_changes(&self) -> Result<tokio::sync::mpsc::Receiver<String>, RemoteError> {
        let (tx, rx) = tokio::sync::mpsc::channel(16);
        *self.push_tx.lock().unwrap() = Some(tx);
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upload_small_then_get_item_round_trips() {
        let mock = MockRemoteClient::new();
        let item = mock.upload_small(&ItemId::root(), "hello.txt", b"hi").await.unwrap();
        let fetched = mock.get_item(&item.id).await.unwrap();
        assert_eq!(fetched.name, "hello.txt");
        assert_eq!(fetched.size, 2);
    }

    #[tokio::test]
    async fn chunked_upload_assembles_full_content() {
        let mock = MockRemoteClient::new();
        let session = mock.start_upload_session(&ItemId::root(), "big.bin", 10).await.unwrap();
        mock.upload_chunk(&session, 0..5, b"hello").await.unwrap();
        mock.upload_chunk(&session, 5..10, b"world").await.unwrap();
        let item = mock.commit_upload(&session).await.unwrap();
        let content = mock.download_content(&item.id, 0..10).await.unwrap();
        assert_eq!(content, b"helloworld");
    }

    #[tokio::test]
    async fn delta_drains_pushed_changes_once() {
        let mock = MockRemoteClient::new();
        let item = mock.upload_small(&ItemId::root(), "a.txt", b"x").await.unwrap();
        mock.push_change(item, false);

        let first = mock.delta(None).await.unwrap();
        assert_eq!(first.items.len(), 1);
        let second = mock.delta(Some(&first.next_cursor)).await.unwrap();
        assert!(second.items.is_empty());
    }

    #[tokio::test]
    async fn fail_next_injects_one_error() {
        let mock = MockRemoteClient::new();
        *mock.fail_next.lock().unwrap() = Some(RemoteError::Offline);
        assert!(matches!(mock.get_item(&ItemId::root()).await, Err(RemoteError::Offline)));
        assert!(mock.get_item(&ItemId::root()).await.is_ok());
    }
}

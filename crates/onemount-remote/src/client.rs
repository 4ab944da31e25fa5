//! Microsoft Graph API HTTP client.
//!
//! Wraps `reqwest::Client` with bearer-token auth, base-URL construction, and
//! adaptive rate limiting, and implements the [`RemoteClient`] capability
//! interface (spec section 4.4) against the OneDrive v1.0 API.

use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use onemount_core::domain::ids::ItemId;
use onemount_core::ports::remote_client::{
    ChangeSet, ItemMetadataDto, RemoteClient, RemoteError, UploadSession,
};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;

use crate::rate_limit::AdaptiveRateLimiter;

const GRAPH_BASE_URL: &str = "https://graph.microsoft.com/v1.0";
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(30);

/// A DriveItem response from the Microsoft Graph API, as returned by item
/// fetch, children listing, upload commit, and delta endpoints.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GraphDriveItem {
    pub(crate) id: String,
    pub(crate) name: Option<String>,
    pub(crate) size: Option<u64>,
    #[serde(rename = "eTag")]
    pub(crate) etag: Option<String>,
    pub(crate) last_modified_date_time: Option<DateTime<Utc>>,
    pub(crate) created_date_time: Option<DateTime<Utc>>,
    pub(crate) parent_reference: Option<GraphParentRef>,
    pub(crate) folder: Option<serde_json::Value>,
    pub(crate) deleted: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GraphParentRef {
    pub(crate) id: Option<String>,
}

impl GraphDriveItem {
    pub(crate) fn into_dto(self) -> ItemMetadataDto {
        let now = Utc::now();
        ItemMetadataDto {
            id: ItemId::from_remote(self.id),
            name: self.name.unwrap_or_default(),
            parent_id: self.parent_reference.and_then(|p| p.id).map(ItemId::from_remote),
            is_directory: self.folder.is_some(),
            size: self.size.unwrap_or(0),
            etag: self.etag.unwrap_or_default(),
            modified_at: self.last_modified_date_time.unwrap_or(now),
            created_at: self.created_date_time.unwrap_or(now),
        }
    }

    pub(crate) fn is_deleted(&self) -> bool {
        self.deleted.is_some()
    }
}

#[derive(Debug, Deserialize)]
struct GraphChildrenResponse {
    #[serde(default)]
    value: Vec<GraphDriveItem>,
}

#[derive(Debug, Deserialize)]
struct GraphErrorEnvelope {
    error: GraphErrorBody,
}

#[derive(Debug, Deserialize)]
struct GraphErrorBody {
    code: Option<String>,
    message: Option<String>,
}

/// HTTP client for the Microsoft Graph API, implementing [`RemoteClient`].
pub struct GraphRemoteClient {
    client: Client,
    base_url: String,
    access_token: String,
    rate_limiter: Arc<AdaptiveRateLimiter>,
}

impl GraphRemoteClient {
    #[must_use]
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: GRAPH_BASE_URL.to_string(),
            access_token: access_token.into(),
            rate_limiter: Arc::new(AdaptiveRateLimiter::with_defaults()),
        }
    }

    /// Used by tests to point the client at a local mock server.
    #[must_use]
    pub fn with_base_url(access_token: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::new(access_token)
        }
    }

    pub fn set_access_token(&mut self, token: impl Into<String>) {
        self.access_token = token.into();
    }

    pub(crate) fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        self.client.request(method, url).bearer_auth(&self.access_token)
    }

    pub(crate) fn http_client(&self) -> &Client {
        &self.client
    }

    /// Sends a request, applying rate-limiting and 429 retry, and maps the
    /// outcome to the typed failure set from spec section 4.4.
    pub(crate) async fn send(
        &self,
        endpoint_category: &str,
        build: impl Fn() -> RequestBuilder,
    ) -> Result<Response, RemoteError> {
        let max_retries = self.rate_limiter.max_retries();

        for attempt in 0..=max_retries {
            let _guard = self.rate_limiter.acquire(endpoint_category).await;

            let response = build()
                .send()
                .await
                .map_err(Self::map_transport_error)?;

            if response.status() == StatusCode::TOO_MANY_REQUESTS {
                self.rate_limiter.on_throttle(endpoint_category);
                if attempt >= max_retries {
                    return Err(RemoteError::RateLimited { retry_after_secs: None });
                }
                let retry_after = response
                    .headers()
                    .get("Retry-After")
                    .and_then(|v| v.to_str().ok())
                    .map(|v| crate::rate_limit::parse_retry_after(v, DEFAULT_RETRY_AFTER))
                    .unwrap_or(DEFAULT_RETRY_AFTER);
                tracing::info!(endpoint_category, attempt, retry_after_secs = retry_after.as_secs(), "graph API throttled, backing off");
                tokio::time::sleep(retry_after).await;
                continue;
            }

            if response.status().is_success() {
                self.rate_limiter.on_success(endpoint_category);
                return Ok(response);
            }

            return Err(Self::map_status_error(response).await);
        }

        Err(RemoteError::TransientServer("retry loop exhausted".to_string()))
    }

    fn map_transport_error(err: reqwest::Error) -> RemoteError {
        if err.is_timeout() {
            RemoteError::Timeout
        } else if err.is_connect() {
            RemoteError::Offline
        } else {
            RemoteError::TransientServer(err.to_string())
        }
    }

    async fn map_status_error(response: Response) -> RemoteError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<GraphErrorEnvelope>(&body)
            .ok()
            .and_then(|e| e.error.message.or(e.error.code))
            .unwrap_or(body);

        match status {
            StatusCode::UNAUTHORIZED => RemoteError::AuthRequired,
            StatusCode::NOT_FOUND => RemoteError::NotFound,
            StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => RemoteError::Conflict,
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                RemoteError::Validation(message)
            }
            s if s.is_server_error() => RemoteError::TransientServer(message),
            _ => RemoteError::TransientServer(message),
        }
    }
}

#[async_trait]
impl RemoteClient for GraphRemoteClient {
    async fn get_item(&self, id: &ItemId) -> Result<ItemMetadataDto, RemoteError> {
        let path = format!("/me/drive/items/{}", id.as_str());
        let response = self
            .send("metadata", || self.request(Method::GET, &path))
            .await?;
        let item: GraphDriveItem = response
            .json()
            .await
            .map_err(|e| RemoteError::Validation(e.to_string()))?;
        Ok(item.into_dto())
    }

    async fn get_item_by_path(&self, path: &str) -> Result<ItemMetadataDto, RemoteError> {
        let trimmed = path.trim_start_matches('/');
        let api_path = if trimmed.is_empty() {
            "/me/drive/root".to_string()
        } else {
            format!("/me/drive/root:/{trimmed}")
        };
        let response = self
            .send("metadata", || self.request(Method::GET, &api_path))
            .await?;
        let item: GraphDriveItem = response
            .json()
            .await
            .map_err(|e| RemoteError::Validation(e.to_string()))?;
        Ok(item.into_dto())
    }

    async fn list_children(&self, id: &ItemId) -> Result<Vec<ItemMetadataDto>, RemoteError> {
        let path = format!("/me/drive/items/{}/children", id.as_str());
        let response = self
            .send("metadata", || self.request(Method::GET, &path))
            .await?;
        let children: GraphChildrenResponse = response
            .json()
            .await
            .map_err(|e| RemoteError::Validation(e.to_string()))?;
        Ok(children.value.into_iter().map(GraphDriveItem::into_dto).collect())
    }

    async fn download_content(&self, id: &ItemId, range: Range<u64>) -> Result<Vec<u8>, RemoteError> {
        let path = format!("/me/drive/items/{}/content", id.as_str());
        let header = format!("bytes={}-{}", range.start, range.end.saturating_sub(1));
        let response = self
            .send("download", || {
                self.request(Method::GET, &path).header(reqwest::header::RANGE, &header)
            })
            .await?;
        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| RemoteError::TransientServer(e.to_string()))
    }

    async fn start_upload_session(
        &self,
        parent: &ItemId,
        name: &str,
        size: u64,
    ) -> Result<UploadSession, RemoteError> {
        crate::upload::create_upload_session(self, parent, name, size).await
    }

    async fn upload_chunk(
        &self,
        session: &UploadSession,
        range: Range<u64>,
        bytes: &[u8],
    ) -> Result<(), RemoteError> {
        crate::upload::upload_chunk(self, session, range, bytes).await
    }

    async fn commit_upload(&self, session: &UploadSession) -> Result<ItemMetadataDto, RemoteError> {
        crate::upload::finalize(self, session).await
    }

    async fn upload_small(
        &self,
        parent: &ItemId,
        name: &str,
        bytes: &[u8],
    ) -> Result<ItemMetadataDto, RemoteError> {
        crate::upload::upload_small(self, parent, name, bytes).await
    }

    async fn create_directory(&self, parent: &ItemId, name: &str) -> Result<ItemMetadataDto, RemoteError> {
        let path = format!("/me/drive/items/{}/children", parent.as_str());
        let body = serde_json::json!({
            "name": name,
            "folder": {},
            "@microsoft.graph.conflictBehavior": "rename",
        });
        let response = self
            .send("metadata", || self.request(Method::POST, &path).json(&body))
            .await?;
        let item: GraphDriveItem = response
            .json()
            .await
            .map_err(|e| RemoteError::Validation(e.to_string()))?;
        Ok(item.into_dto())
    }

    async fn rename(&self, id: &ItemId, new_parent: &ItemId, new_name: &str) -> Result<ItemMetadataDto, RemoteError> {
        let path = format!("/me/drive/items/{}", id.as_str());
        let body = serde_json::json!({
            "name": new_name,
            "parentReference": { "id": new_parent.as_str() },
        });
        let response = self
            .send("metadata", || self.request(Method::PATCH, &path).json(&body))
            .await?;
        let item: GraphDriveItem = response
            .json()
            .await
            .map_err(|e| RemoteError::Validation(e.to_string()))?;
        Ok(item.into_dto())
    }

    async fn delete(&self, id: &ItemId) -> Result<(), RemoteError> {
        let path = format!("/me/drive/items/{}", id.as_str());
        match self.send("metadata", || self.request(Method::DELETE, &path)).await {
            Ok(_) => Ok(()),
            Err(RemoteError::NotFound) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn delta(&self, cursor: Option<&str>) -> Result<ChangeSet, RemoteError> {
        crate::delta::get_delta(self, cursor).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_sets_bearer_auth_and_base_url() {
        let client = GraphRemoteClient::new("test-token");
        let request = client.request(Method::GET, "/me/drive/root").build().unwrap();
        assert_eq!(request.url().as_str(), "https://graph.microsoft.com/v1.0/me/drive/root");
        let auth = request.headers().get("authorization").unwrap().to_str().unwrap();
        assert_eq!(auth, "Bearer test-token");
    }

    #[test]
    fn with_base_url_overrides_for_tests() {
        let client = GraphRemoteClient::with_base_url("tok", "http://localhost:1234");
        let request = client.request(Method::GET, "/me").build().unwrap();
        assert_eq!(request.url().as_str(), "http://localhost:1234/me");
    }

    #[test]
    fn drive_item_without_folder_facet_is_a_file() {
        let json = r#"{"id": "abc", "name": "a.txt", "size": 10}"#;
        let item: GraphDriveItem = serde_json::from_str(json).unwrap();
        assert!(!item.into_dto().is_directory);
    }

    #[test]
    fn drive_item_with_folder_facet_is_a_directory() {
        let json = r#"{"id": "abc", "name": "docs", "folder": {"childCount": 3}}"#;
        let item: GraphDriveItem = serde_json::from_str(json).unwrap();
        assert!(item.into_dto().is_directory);
    }

    #[test]
    fn deleted_facet_is_detected() {
        let json = r#"{"id": "abc", "name": "x", "deleted": {"state": "softdeleted"}}"#;
        let item: GraphDriveItem = serde_json::from_str(json).unwrap();
        assert!(item.is_deleted());
    }
}

//! Small and chunked upload session plumbing (spec section 4.6).
//!
//! Chunked uploads go through Microsoft's resumable-upload protocol:
//! `createUploadSession` returns an `uploadUrl` good for ~15 minutes, and
//! each chunk is a `PUT` carrying a `Content-Range` header. The session's
//! parent, name, and total size are folded into [`UploadSession::session_id`]
//! (`parent_id:name:size`) since the port-level type carries nothing else,
//! letting `commit_upload` look the finished item up without extra state.

use onemount_core::domain::ids::ItemId;
use onemount_core::ports::remote_client::{ItemMetadataDto, RemoteClient, RemoteError, UploadSession};
use reqwest::Method;
use serde::Deserialize;

use crate::client::GraphRemoteClient;

/// Threshold above which the upload manager should use a chunked session
/// instead of `upload_small` (spec section 4.6).
pub const CHUNK_SIZE: u64 = 10 * 1024 * 1024;

#[derive(Debug, Deserialize)]
struct CreateSessionResponse {
    #[serde(rename = "uploadUrl")]
    upload_url: String,
}

fn encode_session_id(parent: &ItemId, name: &str, size: u64) -> String {
    format!("{}:{name}:{size}", parent.as_str())
}

fn decode_session_id(session_id: &str) -> Result<(ItemId, String, u64), RemoteError> {
    let mut parts = session_id.rsplitn(3, ':');
    let size = parts
        .next()
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| RemoteError::Validation("malformed upload session id".to_string()))?;
    let name = parts
        .next()
        .ok_or_else(|| RemoteError::Validation("malformed upload session id".to_string()))?
        .to_string();
    let parent = parts
        .next()
        .ok_or_else(|| RemoteError::Validation("malformed upload session id".to_string()))?;
    Ok((ItemId::from_remote(parent), name, size))
}

pub(crate) async fn create_upload_session(
    client: &GraphRemoteClient,
    parent: &ItemId,
    name: &str,
    size: u64,
) -> Result<UploadSession, RemoteError> {
    let path = format!("/me/drive/items/{}:/{name}:/createUploadSession", parent.as_str());
    let body = serde_json::json!({
        "item": { "@microsoft.graph.conflictBehavior": "replace" },
    });
    let response = client
        .send("upload", || client.request(Method::POST, &path).json(&body))
        .await?;
    let session: CreateSessionResponse = response
        .json()
        .await
        .map_err(|e| RemoteError::Validation(e.to_string()))?;

    Ok(UploadSession {
        session_id: encode_session_id(parent, name, size),
        upload_url: session.upload_url,
    })
}

pub(crate) async fn upload_chunk(
    client: &GraphRemoteClient,
    session: &UploadSession,
    range: std::ops::Range<u64>,
    bytes: &[u8],
) -> Result<(), RemoteError> {
    let (_, _, total_size) = decode_session_id(&session.session_id)?;
    let content_range = format!("bytes {}-{}/{total_size}", range.start, range.end.saturating_sub(1));

    client
        .send("upload", || {
            client
                .http_client()
                .put(&session.upload_url)
                .header(reqwest::header::CONTENT_RANGE, &content_range)
                .header(reqwest::header::CONTENT_LENGTH, bytes.len())
                .body(bytes.to_vec())
        })
        .await?;
    Ok(())
}

pub(crate) async fn finalize(
    client: &GraphRemoteClient,
    session: &UploadSession,
) -> Result<ItemMetadataDto, RemoteError> {
    let (parent, name, _) = decode_session_id(&session.session_id)?;
    let children = client.list_children(&parent).await?;
    children
        .into_iter()
        .find(|item| item.name == name)
        .ok_or(RemoteError::NotFound)
}

pub(crate) async fn upload_small(
    client: &GraphRemoteClient,
    parent: &ItemId,
    name: &str,
    bytes: &[u8],
) -> Result<ItemMetadataDto, RemoteError> {
    let path = format!("/me/drive/items/{}:/{name}:/content", parent.as_str());
    let response = client
        .send("upload", || {
            client.request(Method::PUT, &path).body(bytes.to_vec())
        })
        .await?;
    let item: crate::client::GraphDriveItem = response
        .json()
        .await
        .map_err(|e| RemoteError::Validation(e.to_string()))?;
    Ok(item.into_dto())
}

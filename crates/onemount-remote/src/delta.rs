//! Delta-query pagination against `/me/drive/root/delta` (spec section 4.7).

use onemount_core::ports::remote_client::{ChangeSet, ChangedItem, RemoteError};
use reqwest::Method;
use serde::Deserialize;

use crate::client::GraphRemoteClient;

const DELTA_PATH: &str = "/me/drive/root/delta";

#[derive(Debug, Deserialize)]
struct GraphDeltaResponse {
    #[serde(default)]
    value: Vec<crate::client::GraphDriveItem>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
    #[serde(rename = "@odata.deltaLink")]
    delta_link: Option<String>,
}

/// Extracts the opaque `token=` query parameter Graph embeds in both
/// `@odata.nextLink` and `@odata.deltaLink`, which is what we persist and
/// hand back as `cursor` on the next call.
fn cursor_from_link(link: &str) -> String {
    link.split("token=")
        .nth(1)
        .map(|rest| rest.split('&').next().unwrap_or(rest).to_string())
        .unwrap_or_else(|| link.to_string())
}

pub(crate) async fn get_delta(
    client: &GraphRemoteClient,
    cursor: Option<&str>,
) -> Result<ChangeSet, RemoteError> {
    let path = match cursor {
        Some(token) => format!("{DELTA_PATH}?token={token}"),
        None => DELTA_PATH.to_string(),
    };

    let response = client
        .send("delta", || client.request(Method::GET, &path))
        .await?;
    let page: GraphDeltaResponse = response
        .json()
        .await
        .map_err(|e| RemoteError::Validation(e.to_string()))?;

    let items = page
        .value
        .into_iter()
        .map(|item| ChangedItem {
            is_deleted: item.is_deleted(),
            metadata: item.into_dto(),
        })
        .collect();

    let (next_cursor, has_more) = match (page.next_link, page.delta_link) {
        (Some(next), _) => (cursor_from_link(&next), true),
        (None, Some(delta)) => (cursor_from_link(&delta), false),
        (None, None) => (cursor.unwrap_or_default().to_string(), false),
    };

    Ok(ChangeSet { items, next_cursor, has_more })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_from_link_extracts_token_param() {
        let link = "https://graph.microsoft.com/v1.0/me/drive/root/delta?token=abc123&foo=bar";
        assert_eq!(cursor_from_link(link), "abc123");
    }

    #[test]
    fn cursor_from_link_handles_token_as_last_param() {
        let link = "https://graph.microsoft.com/v1.0/me/drive/root/delta?token=xyz";
        assert_eq!(cursor_from_link(link), "xyz");
    }
}

//! Credentials file location and loading.
//!
//! The OAuth2 handshake itself is an external collaborator (spec section
//! 2, "Out of scope"): this module only knows the on-disk contract a
//! provisioning step must satisfy before the daemon can start — the
//! per-account file under `accounts/{hash16}/auth_tokens.json` (spec
//! section 6, "Persistent state layout").

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::Write as _;

/// On-disk shape of `auth_tokens.json`. Only the access token is required
/// to drive [`onemount_core::ports::remote_client::RemoteClient`]; refresh
/// is the external OAuth collaborator's responsibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredCredentials {
    pub access_token: String,
}

/// First 16 hex characters of SHA-256 over the lower-cased, trimmed
/// account identifier (spec section 6).
#[must_use]
pub fn account_hash16(account: &str) -> String {
    let normalized = account.trim().to_lowercase();
    let digest = Sha256::digest(normalized.as_bytes());
    let mut hex = String::with_capacity(16);
    for byte in &digest[..8] {
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}

/// Path to the credentials file for `account` under `cache_dir`.
#[must_use]
pub fn credentials_path(cache_dir: &Path, account: &str) -> PathBuf {
    cache_dir.join("accounts").join(account_hash16(account)).join("auth_tokens.json")
}

/// Loads credentials from `path` (or the `ONEMOUNT_AUTH_PATH` override
/// when set — spec section 6, "Environment": "an auth-path override
/// points to an alternative credentials file for tests").
pub async fn load_access_token(path: &Path) -> Result<String> {
    let path = std::env::var("ONEMOUNT_AUTH_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| path.to_path_buf());
    let bytes = tokio::fs::read(&path)
        .await
        .with_context(|| format!("reading credentials file {}", path.display()))?;
    let creds: StoredCredentials =
        serde_json::from_slice(&bytes).with_context(|| format!("parsing credentials file {}", path.display()))?;
    Ok(creds.access_token)
}

//! Identifier newtypes.
//!
//! `ItemId` deliberately wraps a `String` rather than a UUID: remote ids are
//! opaque strings assigned by the cloud provider, and locally created items
//! need an id before one exists. [`ItemId::new_local`] prefixes a freshly
//! generated UUID with `local-` so [`ItemId::is_local`] can tell the two
//! apart without a side table, matching spec section 3's "opaque remote
//! identifier, or a locally generated id prefixed to indicate 'not yet
//! uploaded'".

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::DomainError;

const LOCAL_PREFIX: &str = "local-";

/// Identifier for an [`Item`](super::item::Item), remote or locally minted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    /// Wraps an id string returned by the remote client.
    #[must_use]
    pub fn from_remote(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mints a new id for an item created locally while offline or before
    /// the create request round-trips to the server.
    #[must_use]
    pub fn new_local() -> Self {
        Self(format!("{LOCAL_PREFIX}{}", Uuid::new_v4()))
    }

    /// The well-known id of the root item.
    #[must_use]
    pub fn root() -> Self {
        Self("root".to_string())
    }

    /// True if this id was minted locally and has not yet been swapped for
    /// a server-assigned id via `change_id` (spec section 4.1).
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.0.starts_with(LOCAL_PREFIX)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ItemId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ItemId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(DomainError::InvalidId("item id is empty".to_string()));
        }
        Ok(Self(s.to_string()))
    }
}

impl From<String> for ItemId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Monotonically assigned 64-bit handle the kernel adapter uses to refer to
/// an item for the life of the process (spec section 3).
///
/// Node ids are dense and start at 1, the root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(u64);

impl NodeId {
    pub const ROOT: NodeId = NodeId(1);

    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier for a resumable upload or download session record (spec
/// sections 4.5/4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| DomainError::InvalidId(format!("invalid session id: {e}")))
    }
}

//! The [`Item`] entity — a node in the filesystem tree (spec section 3).
//!
//! ## State machine
//!
//! ```text
//!   Ghost ──(open)──► Hydrating ──(complete)──► Hydrated
//!     ▲                                            │
//!     │                                     (write)│
//!     └──────────────(eviction)────────────────────┤
//!                                                   ▼
//!                                              DirtyLocal
//!                                     (upload ok) │   │ (remote changed)
//!                                                 ▼   ▼
//!                                            Hydrated  Conflict
//!
//!   any state ──(failure)──► Error
//! ```
//!
//! Virtual items (synthetic entries such as volume-info) never leave
//! `Hydrated`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::errors::DomainError;
use super::ids::{ItemId, NodeId};

/// Whether an item is a file or a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    File,
    Directory,
}

impl ItemKind {
    #[must_use]
    pub fn is_directory(self) -> bool {
        matches!(self, ItemKind::Directory)
    }
}

/// Lifecycle state of an [`Item`] (spec section 3, "Lifecycle").
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    /// Metadata known locally; no content body cached.
    #[default]
    Ghost,
    /// A download is in progress.
    Hydrating,
    /// Content cached locally and consistent with `etag`.
    Hydrated,
    /// Local content diverges from `etag`; pending upload.
    DirtyLocal,
    /// Deleted locally; pending the remote delete acknowledgement.
    DeletedLocal,
    /// Local and remote both changed since the last agreement.
    Conflict,
    /// Terminal failure; `last_error` on the item records the reason.
    Error,
}

impl ItemState {
    /// True when the invariant "`state` implies a cached body" applies
    /// (spec section 3 invariants).
    #[must_use]
    pub fn requires_cached_body(&self) -> bool {
        matches!(self, ItemState::Hydrated | ItemState::DirtyLocal)
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ItemState::Ghost => "Ghost",
            ItemState::Hydrating => "Hydrating",
            ItemState::Hydrated => "Hydrated",
            ItemState::DirtyLocal => "DirtyLocal",
            ItemState::DeletedLocal => "DeletedLocal",
            ItemState::Conflict => "Conflict",
            ItemState::Error => "Error",
        }
    }
}

impl fmt::Display for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A node in the filesystem tree: either a file or a directory (spec
/// section 3, "Item (Inode)").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub node_id: NodeId,
    pub name: String,
    /// Empty only for the root.
    pub parent_id: Option<ItemId>,
    pub kind: ItemKind,
    pub size: u64,
    pub etag: Option<String>,
    /// Locally computed digest over cached content, when present.
    pub content_hash: Option<String>,
    pub modified_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub state: ItemState,
    /// For directories: ordered list of child ids, lazily populated.
    /// `None` means "not yet fetched from the remote"; `Some(vec![])`
    /// means "fetched, and empty".
    pub children: Option<Vec<ItemId>>,
    /// True if local content diverges from `etag`.
    pub has_changes: bool,
    /// True for synthetic entries that never leave `Hydrated`.
    pub is_virtual: bool,
    /// Set when `state == Error`; the reason recorded for the status
    /// surface and logs (spec section 7).
    pub last_error: Option<String>,
}

impl Item {
    /// Builds a new directory item in `Hydrated` state with no children
    /// fetched yet.
    #[must_use]
    pub fn new_directory(id: ItemId, node_id: NodeId, name: String, parent_id: Option<ItemId>) -> Self {
        let now = Utc::now();
        Self {
            id,
            node_id,
            name,
            parent_id,
            kind: ItemKind::Directory,
            size: 0,
            etag: None,
            content_hash: None,
            modified_at: now,
            created_at: now,
            state: ItemState::Ghost,
            children: None,
            has_changes: false,
            is_virtual: false,
            last_error: None,
        }
    }

    /// Builds a new file item in `Ghost` state (metadata known, body not
    /// yet cached).
    #[must_use]
    pub fn new_file(id: ItemId, node_id: NodeId, name: String, parent_id: Option<ItemId>, size: u64) -> Self {
        let now = Utc::now();
        Self {
            id,
            node_id,
            name,
            parent_id,
            kind: ItemKind::File,
            size,
            etag: None,
            content_hash: None,
            modified_at: now,
            created_at: now,
            state: ItemState::Ghost,
            children: None,
            has_changes: false,
            is_virtual: false,
            last_error: None,
        }
    }

    #[must_use]
    pub fn is_directory(&self) -> bool {
        self.kind.is_directory()
    }

    /// Case-insensitive name comparison, per spec section 3's uniqueness
    /// invariant over `(parent_id, lower-case name)`.
    #[must_use]
    pub fn name_key(&self) -> String {
        self.name.to_lowercase()
    }

    /// Validates the invariant `has_changes ⇒ state ∈ {DirtyLocal,
    /// Conflict, Error}` before a caller persists the item.
    pub fn check_invariants(&self) -> Result<(), DomainError> {
        if self.has_changes
            && !matches!(
                self.state,
                ItemState::DirtyLocal | ItemState::Conflict | ItemState::Error
            )
        {
            return Err(DomainError::InvalidState {
                from: self.state.name().to_string(),
                to: "has_changes requires DirtyLocal, Conflict, or Error".to_string(),
            });
        }
        Ok(())
    }

    /// Transitions to `DirtyLocal`, e.g. on a foreground write (spec
    /// section 4.10, `write`).
    pub fn mark_dirty(&mut self) {
        self.state = ItemState::DirtyLocal;
        self.has_changes = true;
    }

    /// Transitions to `Error`, recording `reason` (spec section 7).
    pub fn mark_error(&mut self, reason: impl Into<String>) {
        self.state = ItemState::Error;
        self.last_error = Some(reason.into());
    }
}

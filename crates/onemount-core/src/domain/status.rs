//! Status surface values (spec section 4.9 and section 6, "Status bus").

use serde::{Deserialize, Serialize};
use std::fmt;

use super::item::ItemState;

/// The observable status of an item, derived from its [`ItemState`] plus
/// transfer progress. Distinct from `ItemState` because a `Hydrating` item
/// reports as `Downloading` and an in-flight upload reports as `Uploading`
/// even though the underlying state is still `DirtyLocal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Cloud,
    Downloading,
    Local,
    LocalModified,
    Uploading,
    OutOfSync,
    Error,
    Conflict,
}

impl FileStatus {
    /// Derives the status from an item's state. `uploading` is passed
    /// separately because it is tracked by the upload manager, not the
    /// item's own state.
    #[must_use]
    pub fn from_state(state: &ItemState, uploading: bool) -> Self {
        match state {
            ItemState::Ghost => FileStatus::Cloud,
            ItemState::Hydrating => FileStatus::Downloading,
            ItemState::Hydrated => FileStatus::Local,
            ItemState::DirtyLocal if uploading => FileStatus::Uploading,
            ItemState::DirtyLocal => FileStatus::LocalModified,
            ItemState::DeletedLocal => FileStatus::OutOfSync,
            ItemState::Conflict => FileStatus::Conflict,
            ItemState::Error => FileStatus::Error,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Cloud => "Cloud",
            FileStatus::Downloading => "Downloading",
            FileStatus::Local => "Local",
            FileStatus::LocalModified => "LocalModified",
            FileStatus::Uploading => "Uploading",
            FileStatus::OutOfSync => "OutOfSync",
            FileStatus::Error => "Error",
            FileStatus::Conflict => "Conflict",
        }
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

//! Domain error types
//!
//! This module defines error types specific to domain operations,
//! including validation failures, invalid state transitions, and path errors.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid path format or content
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Invalid state transition attempt
    #[error("Invalid state transition from {from} to {to}")]
    InvalidState {
        /// The current state
        from: String,
        /// The attempted target state
        to: String,
    },

    /// Generic validation failure
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// (parent_id, lower-case name) is already taken by another non-deleted child
    #[error("name {name:?} already exists under parent {parent}")]
    DuplicateName {
        /// The parent item id
        parent: String,
        /// The conflicting child name
        name: String,
    },

    /// A referenced parent item does not exist in the graph
    #[error("parent item not found: {0}")]
    ParentNotFound(String),

    /// ID parsing error
    #[error("Invalid ID format: {0}")]
    InvalidId(String),
}

//! Orchestration layer: the inode graph, download/upload managers, delta
//! engine, offline-change journal, and status surface (spec sections
//! 4.1, 4.5-4.9). This crate is the core of the system.

pub mod audit;
pub mod delta;
pub mod download;
pub mod graph;
pub mod journal;
pub mod status;
pub mod upload;

pub use graph::{GraphError, InodeGraph};
pub use status::StatusSurface;

//! Correlation / audit trail for sync-lifecycle events.
//!
//! A thin wrapper over `tracing` rather than its own persisted log: every
//! method stamps a correlation id so a hydration, upload, delta page, or
//! journal replay can be traced end to end across subsystems (spec
//! section 7, "User-visible failure" — "logs carry a correlation id per
//! operation").

use uuid::Uuid;

/// A correlation id for one logical operation (a hydration, an upload, a
/// delta page, a journal replay).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Structured, non-fatal logging for the sync lifecycle. Every method is
/// `tracing`-only: audit logging can never fail the operation it
/// describes.
pub struct AuditLog;

impl AuditLog {
    pub fn hydration_started(correlation_id: CorrelationId, id: &str) {
        tracing::info!(correlation_id = %correlation_id, item_id = id, "hydration started");
    }

    pub fn hydration_completed(correlation_id: CorrelationId, id: &str, bytes: u64) {
        tracing::info!(correlation_id = %correlation_id, item_id = id, bytes, "hydration completed");
    }

    pub fn hydration_failed(correlation_id: CorrelationId, id: &str, reason: &str) {
        tracing::warn!(correlation_id = %correlation_id, item_id = id, reason, "hydration failed");
    }

    pub fn upload_started(correlation_id: CorrelationId, id: &str, size: u64) {
        tracing::info!(correlation_id = %correlation_id, item_id = id, size, "upload started");
    }

    pub fn upload_committed(correlation_id: CorrelationId, id: &str, new_id: &str) {
        tracing::info!(correlation_id = %correlation_id, item_id = id, new_id, "upload committed");
    }

    pub fn upload_failed(correlation_id: CorrelationId, id: &str, reason: &str) {
        tracing::warn!(correlation_id = %correlation_id, item_id = id, reason, "upload failed");
    }

    pub fn delta_page_applied(correlation_id: CorrelationId, changes: usize, cursor: &str) {
        tracing::info!(correlation_id = %correlation_id, changes, cursor, "delta page applied");
    }

    pub fn journal_replay_started(correlation_id: CorrelationId, entries: usize) {
        tracing::info!(correlation_id = %correlation_id, entries, "offline journal replay started");
    }

    pub fn journal_replay_completed(correlation_id: CorrelationId, applied: usize, skipped: usize) {
        tracing::info!(correlation_id = %correlation_id, applied, skipped, "offline journal replay completed");
    }

    pub fn conflict_detected(correlation_id: CorrelationId, id: &str, conflict_copy_name: &str) {
        tracing::warn!(correlation_id = %correlation_id, item_id = id, conflict_copy_name, "conflict detected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correlation_ids_are_unique() {
        assert_ne!(CorrelationId::new(), CorrelationId::new());
    }

    #[test]
    fn logging_calls_do_not_panic() {
        let id = CorrelationId::new();
        AuditLog::hydration_started(id, "abc");
        AuditLog::hydration_completed(id, "abc", 10);
        AuditLog::upload_failed(id, "abc", "timeout");
        AuditLog::conflict_detected(id, "abc", "abc (conflicted copy 1234abcd).txt");
    }
}

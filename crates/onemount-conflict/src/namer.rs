//! Conflict-copy naming (spec section 8, "Boundary behaviours", Conflict row,
//! and the source journal's ambiguous "conflict-suffix naming convention"
//! open question).
//!
//! Generates `{stem} (conflicted copy {id8}){ext}` for the sibling copy
//! created when an item transitions to `Conflict`. The id is eight hex
//! characters of a freshly generated UUIDv4 rather than a timestamp: item
//! metadata already carries `modified_at`, and a bare UUID avoids
//! same-second collisions when a journal replay produces several
//! conflicts in one batch.

use uuid::Uuid;

/// Generates unique conflict-copy file names.
pub struct ConflictNamer;

impl ConflictNamer {
    /// Given "report.docx", produces "report (conflicted copy a1b2c3d4).docx".
    #[must_use]
    pub fn generate(original_name: &str) -> String {
        let short_id = &Uuid::new_v4().to_string()[..8];

        if let Some(dot_pos) = original_name.rfind('.') {
            let stem = &original_name[..dot_pos];
            let ext = &original_name[dot_pos..];
            format!("{stem} (conflicted copy {short_id}){ext}")
        } else {
            format!("{original_name} (conflicted copy {short_id})")
        }
    }

    /// Regenerates until `exists` reports no collision. A fresh UUID is
    /// drawn each attempt, so this terminates with overwhelming
    /// probability on the first call.
    pub fn generate_unique<F>(original_name: &str, mut exists: F) -> String
    where
        F: FnMut(&str) -> bool,
    {
        for _ in 0..8 {
            let candidate = Self::generate(original_name);
            if !exists(&candidate) {
                return candidate;
            }
        }
        format!("{original_name}.conflict-{}", Uuid::new_v4())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_with_extension_inserts_before_dot() {
        let name = ConflictNamer::generate("report.docx");
        assert!(name.starts_with("report (conflicted copy "));
        assert!(name.ends_with(").docx"));
    }

    #[test]
    fn generate_without_extension_appends_at_end() {
        let name = ConflictNamer::generate("Makefile");
        assert!(name.starts_with("Makefile (conflicted copy "));
        assert!(name.ends_with(')'));
    }

    #[test]
    fn generate_with_multiple_dots_splits_on_last() {
        let name = ConflictNamer::generate("archive.tar.gz");
        assert!(name.starts_with("archive.tar (conflicted copy"));
        assert!(name.ends_with(").gz"));
    }

    #[test]
    fn generate_is_not_deterministic() {
        assert_ne!(ConflictNamer::generate("test.txt"), ConflictNamer::generate("test.txt"));
    }

    #[test]
    fn generate_unique_retries_on_collision() {
        let mut seen = 0;
        let name = ConflictNamer::generate_unique("test.txt", |_| {
            seen += 1;
            seen <= 2
        });
        assert!(name.contains("conflicted copy"));
        assert_eq!(seen, 3);
    }

    #[test]
    fn generate_unique_with_no_collision_uses_first_candidate() {
        let name = ConflictNamer::generate_unique("test.txt", |_| false);
        assert!(name.contains("conflicted copy"));
    }
}

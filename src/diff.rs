//! Per-file change records collected from the working tree
//!
//! A `ChangeRecord` is one file's line-level change description. Records are
//! produced by `git_ops`, validated once on entry to the pipeline, and
//! consumed read-only from then on.

use crate::error::GenerateError;
use std::path::PathBuf;

/// Hard cap on raw diff text accepted into the pipeline, in characters.
pub const MAX_DIFF_CHARS: usize = 100_000;

/// One changed file's diff, as reported by git.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
    /// Repo-relative path of the file.
    pub path: PathBuf,
    pub additions: usize,
    pub deletions: usize,
    /// Raw unified diff text for this file.
    pub content: String,
    pub is_new: bool,
    pub is_deleted: bool,
    pub is_renamed: bool,
    /// Previous path, set only when `is_renamed`.
    pub old_path: Option<PathBuf>,
}

impl ChangeRecord {
    pub fn new(
        path: impl Into<PathBuf>,
        additions: usize,
        deletions: usize,
        content: String,
    ) -> Self {
        Self {
            path: path.into(),
            additions,
            deletions,
            content,
            is_new: false,
            is_deleted: false,
            is_renamed: false,
            old_path: None,
        }
    }

    /// Fraction of this file's changed lines that are additions.
    /// Returns 0.0 for an empty change.
    pub fn addition_ratio(&self) -> f64 {
        let total = self.additions + self.deletions;
        if total == 0 {
            0.0
        } else {
            self.additions as f64 / total as f64
        }
    }

    /// File name component for display and fallback messages.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// Validate a batch of records before they enter the pipeline.
///
/// Checks the things the rest of the core assumes: a non-empty set and
/// bounded per-file diff text. Violations are terminal `Validation` errors
/// and must never reach the retry layer.
pub fn validate_records(records: &[ChangeRecord]) -> Result<(), GenerateError> {
    if records.is_empty() {
        return Err(GenerateError::Validation("no changed files".to_string()));
    }
    for record in records {
        let chars = record.content.chars().count();
        if chars > MAX_DIFF_CHARS {
            return Err(GenerateError::Validation(format!(
                "diff for {} is {} characters (limit {})",
                record.path.display(),
                chars,
                MAX_DIFF_CHARS
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(path: &str, adds: usize, dels: usize) -> ChangeRecord {
        ChangeRecord::new(path, adds, dels, format!("+{} -{}", adds, dels))
    }

    #[test]
    fn test_addition_ratio() {
        assert_eq!(record("a.rs", 3, 1).addition_ratio(), 0.75);
        assert_eq!(record("a.rs", 0, 0).addition_ratio(), 0.0);
    }

    #[test]
    fn test_validate_rejects_empty_set() {
        let err = validate_records(&[]).unwrap_err();
        assert!(matches!(err, GenerateError::Validation(_)));
    }

    #[test]
    fn test_validate_rejects_oversized_diff() {
        let mut r = record("big.rs", 1, 0);
        r.content = "x".repeat(MAX_DIFF_CHARS + 1);
        let err = validate_records(&[r]).unwrap_err();
        assert!(matches!(err, GenerateError::Validation(_)));
    }

    #[test]
    fn test_validate_accepts_normal_records() {
        assert!(validate_records(&[record("a.rs", 1, 2), record("b.rs", 0, 4)]).is_ok());
    }

    #[test]
    fn test_file_name() {
        assert_eq!(record("src/cache/mod.rs", 1, 0).file_name(), "mod.rs");
    }
}

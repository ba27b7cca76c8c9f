//! Git operations for the commit workflow
//!
//! Reads per-file diffs out of the repository and applies accepted groups
//! (stage + commit). The generation core only ever consumes the
//! `ChangeRecord`s produced here; it never mutates git state.

use crate::diff::ChangeRecord;
use anyhow::{Context, Result};
use git2::{Delta, DiffFindOptions, DiffOptions, Patch, Repository, Signature};
use std::path::{Path, PathBuf};

/// Collect one `ChangeRecord` per changed file.
///
/// With `include_unstaged` the diff runs HEAD → working tree (through the
/// index, untracked files included); otherwise HEAD → index, i.e. staged
/// changes only. An unborn HEAD (fresh repo) diffs against an empty tree.
pub fn collect_changes(repo_path: &Path, include_unstaged: bool) -> Result<Vec<ChangeRecord>> {
    let repo = Repository::open(repo_path).context("Failed to open repository")?;
    let head_tree = repo.head().ok().and_then(|h| h.peel_to_tree().ok());

    let mut opts = DiffOptions::new();
    opts.include_untracked(true)
        .show_untracked_content(true)
        .recurse_untracked_dirs(true);

    let mut diff = if include_unstaged {
        repo.diff_tree_to_workdir_with_index(head_tree.as_ref(), Some(&mut opts))?
    } else {
        repo.diff_tree_to_index(head_tree.as_ref(), None, Some(&mut opts))?
    };
    diff.find_similar(Some(&mut DiffFindOptions::new()))?;

    let mut records = Vec::new();
    for (idx, delta) in diff.deltas().enumerate() {
        let Some(path) = delta
            .new_file()
            .path()
            .or_else(|| delta.old_file().path())
            .map(Path::to_path_buf)
        else {
            continue;
        };

        let mut content = String::new();
        let mut additions = 0;
        let mut deletions = 0;
        if let Ok(Some(mut patch)) = Patch::from_diff(&diff, idx) {
            if let Ok((_context, adds, dels)) = patch.line_stats() {
                additions = adds;
                deletions = dels;
            }
            if let Ok(buf) = patch.to_buf() {
                content = buf.as_str().unwrap_or("").to_string();
            }
        }

        let mut record = ChangeRecord::new(path, additions, deletions, content);
        match delta.status() {
            Delta::Added | Delta::Untracked => record.is_new = true,
            Delta::Deleted => record.is_deleted = true,
            Delta::Renamed => {
                record.is_renamed = true;
                record.old_path = delta.old_file().path().map(Path::to_path_buf);
            }
            _ => {}
        }
        records.push(record);
    }

    Ok(records)
}

/// Stage a specific set of files.
pub fn stage_files(repo_path: &Path, files: &[PathBuf]) -> Result<()> {
    let repo = Repository::open(repo_path)?;
    let mut index = repo.index()?;
    for file in files {
        // Deleted files need remove_path; add_path fails on them.
        if repo_path.join(file).exists() {
            index.add_path(file)?;
        } else {
            index.remove_path(file)?;
        }
    }
    index.write()?;
    Ok(())
}

/// Commit staged changes. Handles the unborn-HEAD case for fresh repos.
pub fn commit(repo_path: &Path, message: &str) -> Result<String> {
    let repo = Repository::open(repo_path)?;
    let mut index = repo.index()?;

    let tree_id = index.write_tree()?;
    let tree = repo.find_tree(tree_id)?;

    let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
    let parents: Vec<&git2::Commit> = parent.iter().collect();

    let config = repo.config()?;
    let name = config
        .get_string("user.name")
        .unwrap_or_else(|_| "comet".to_string());
    let email = config
        .get_string("user.email")
        .unwrap_or_else(|_| "comet@local".to_string());
    let sig = Signature::now(&name, &email)?;

    let oid = repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)?;
    Ok(oid.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn init_repo() -> TempDir {
        let dir = TempDir::new().unwrap();
        Repository::init(dir.path()).unwrap();
        dir
    }

    #[test]
    fn test_untracked_file_is_a_new_record() {
        let dir = init_repo();
        fs::write(dir.path().join("new.txt"), "hello\nworld\n").unwrap();

        let records = collect_changes(dir.path(), true).unwrap();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.path, PathBuf::from("new.txt"));
        assert!(record.is_new);
        assert_eq!(record.additions, 2);
        assert_eq!(record.deletions, 0);
        assert!(record.content.contains("+hello"));
    }

    #[test]
    fn test_staged_only_excludes_working_tree_edits() {
        let dir = init_repo();
        fs::write(dir.path().join("a.txt"), "one\n").unwrap();
        stage_files(dir.path(), &[PathBuf::from("a.txt")]).unwrap();
        fs::write(dir.path().join("b.txt"), "two\n").unwrap();

        let staged = collect_changes(dir.path(), false).unwrap();
        assert_eq!(staged.len(), 1);
        assert_eq!(staged[0].path, PathBuf::from("a.txt"));

        let all = collect_changes(dir.path(), true).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_stage_and_commit_round_trip() {
        let dir = init_repo();
        fs::write(dir.path().join("a.txt"), "one\n").unwrap();
        stage_files(dir.path(), &[PathBuf::from("a.txt")]).unwrap();
        let oid = commit(dir.path(), "Add the first file to the repo").unwrap();
        assert!(!oid.is_empty());

        // Clean tree after committing.
        let records = collect_changes(dir.path(), true).unwrap();
        assert!(records.is_empty());

        // A modification shows up with both counts populated.
        fs::write(dir.path().join("a.txt"), "uno\n").unwrap();
        let records = collect_changes(dir.path(), true).unwrap();
        assert_eq!(records.len(), 1);
        assert!(!records[0].is_new);
        assert_eq!(records[0].additions, 1);
        assert_eq!(records[0].deletions, 1);
    }
}

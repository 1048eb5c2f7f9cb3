//! Commit metadata lookup via libgit2

use std::path::Path;

use chrono::{DateTime, Utc};
use git2::{DiffOptions, Repository};
use libtally_core::export::{CommitMeta, MetadataSource};
use libtally_core::TallyError;

use crate::GitError;

/// Reads author, message, parents and diff stats from the recorded
/// repository's object database
#[derive(Debug, Default, Clone, Copy)]
pub struct GitMetadataSource;

impl GitMetadataSource {
    pub fn read(&self, repo_path: &Path, commit_hash: &str) -> Result<CommitMeta, GitError> {
        let repo = Repository::open(repo_path)?;
        let commit = repo.revparse_single(commit_hash)?.peel_to_commit()?;

        let author = commit.author();
        let parent_hashes: Vec<String> = commit.parent_ids().map(|id| id.to_string()).collect();

        let tree = commit.tree()?;
        let parent_tree = match commit.parent_count() {
            0 => None,
            _ => Some(commit.parent(0)?.tree()?),
        };
        let mut opts = DiffOptions::new();
        let diff = repo.diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), Some(&mut opts))?;
        let stats = diff.stats()?;

        Ok(CommitMeta {
            author_name: author.name().unwrap_or_default().to_string(),
            author_email: author.email().unwrap_or_default().to_string(),
            subject: commit.summary().unwrap_or_default().to_string(),
            body: commit.body().unwrap_or_default().to_string(),
            files_changed: clamp(stats.files_changed()),
            insertions: clamp(stats.insertions()),
            deletions: clamp(stats.deletions()),
            parent_hashes,
            authored_at: DateTime::<Utc>::from_timestamp(author.when().seconds(), 0),
        })
    }
}

impl MetadataSource for GitMetadataSource {
    fn lookup(&self, repo_path: &Path, commit_hash: &str) -> Result<CommitMeta, TallyError> {
        self.read(repo_path, commit_hash).map_err(|e| {
            TallyError::NotFound(format!(
                "commit {} in {}: {}",
                commit_hash,
                repo_path.display(),
                e
            ))
        })
    }
}

fn clamp(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

use libtally_core::TallyError;
use thiserror::Error;

/// Errors that can occur during Git operations
#[derive(Debug, Error)]
pub enum GitError {
    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("git {args} exited with {status}: {stderr}")]
    Command {
        args: String,
        status: String,
        stderr: String,
    },

    #[error("merge conflict in non-ledger files: {}", paths.join(", "))]
    UnresolvableConflict { paths: Vec<String> },

    #[error("neither side of the conflict in {path} could be read")]
    MissingConflictVersions { path: String },

    #[error(transparent)]
    Core(#[from] TallyError),

    #[error("Not a git repository")]
    NotARepo,
}

impl GitError {
    /// Conflicts need a human; everything else may clear up on retry
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            GitError::UnresolvableConflict { .. } | GitError::MissingConflictVersions { .. }
        )
    }
}

impl From<GitError> for TallyError {
    fn from(err: GitError) -> Self {
        match err {
            GitError::Core(inner) => inner,
            GitError::Io(inner) => TallyError::Io(inner),
            GitError::NotARepo => TallyError::NotFound("git repository".to_string()),
            e if e.is_conflict() => TallyError::Conflict(e.to_string()),
            e => TallyError::Sync(e.to_string()),
        }
    }
}

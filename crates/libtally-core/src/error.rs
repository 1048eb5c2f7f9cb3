use thiserror::Error;

use crate::types::repo_id::RepoIdError;

/// Main error type for tally operations
#[derive(Debug, Error)]
pub enum TallyError {
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("database busy: {0}")]
    DbBusy(String),

    #[error("invalid repository id: {0}")]
    InvalidRepoId(#[from] RepoIdError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("invalid timestamp '{value}': {source}")]
    Timestamp {
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("sync error: {0}")]
    Sync(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl TallyError {
    /// Get the error code for JSON output
    pub fn error_code(&self) -> &'static str {
        match self {
            TallyError::InvalidArgs(_) => "invalid_args",
            TallyError::NotFound(_) => "not_found",
            TallyError::Conflict(_) => "conflict",
            TallyError::DbBusy(_) => "db_busy",
            TallyError::InvalidRepoId(_) => "invalid_args",
            TallyError::Io(_) => "io_error",
            TallyError::Sqlite(_) => "db_error",
            TallyError::Csv(_) => "ledger_error",
            TallyError::Json(_) => "internal_error",
            TallyError::TomlParse(_) => "invalid_config",
            TallyError::TomlSerialize(_) => "internal_error",
            TallyError::Timestamp { .. } => "invalid_args",
            TallyError::Sync(_) => "sync_error",
            TallyError::Internal(_) => "internal_error",
        }
    }

    /// Get the exit code for CLI
    pub fn exit_code(&self) -> i32 {
        match self {
            TallyError::InvalidArgs(_) => 2,
            TallyError::InvalidRepoId(_) => 2,
            TallyError::Timestamp { .. } => 2,
            TallyError::TomlParse(_) => 2,
            TallyError::NotFound(_) => 3,
            TallyError::Conflict(_) => 4,
            TallyError::DbBusy(_) => 5,
            TallyError::Io(_) => 5,
            TallyError::Sqlite(_) => 5,
            TallyError::Sync(_) => 6,
            _ => 1,
        }
    }

    /// Get actionable suggestions for fixing the error
    pub fn suggestions(&self) -> Vec<&'static str> {
        match self {
            TallyError::NotFound(msg) => {
                if msg.contains("config") {
                    vec!["Run 'tally init --export-repo <path>' first"]
                } else if msg.contains("repository") {
                    vec!["Run the command from inside a git working tree, or pass --repo"]
                } else {
                    vec![]
                }
            }
            TallyError::DbBusy(_) => vec![
                "Another tally process is exporting; retry once it finishes",
            ],
            TallyError::Sqlite(_) => vec![
                "Check disk space and permissions of the tally data directory",
            ],
            TallyError::Conflict(_) => vec![
                "Resolve the conflict by hand inside the export repository",
                "Then run 'tally export --force'",
            ],
            TallyError::Sync(_) => vec![
                "Pending events stay queued; the next export retries them",
            ],
            TallyError::TomlParse(_) => vec![
                "Fix or remove config.toml in the tally data directory",
            ],
            _ => vec![],
        }
    }

    pub(crate) fn timestamp(value: &str, source: chrono::ParseError) -> Self {
        TallyError::Timestamp {
            value: value.to_string(),
            source,
        }
    }
}

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TallyError;
use crate::types::repo_id::RepoId;

/// Lifecycle of a recorded event.
///
/// `Pending` is the only state with outgoing transitions; everything else is
/// terminal until the row is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Pending,
    Exported,
    Orphaned,
    Skipped,
}

impl EventStatus {
    pub const ALL: [EventStatus; 4] = [
        EventStatus::Pending,
        EventStatus::Exported,
        EventStatus::Orphaned,
        EventStatus::Skipped,
    ];

    /// Small integer code stored in `repo_events.status_id`
    pub fn code(self) -> i64 {
        match self {
            EventStatus::Pending => 1,
            EventStatus::Exported => 2,
            EventStatus::Orphaned => 3,
            EventStatus::Skipped => 4,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.code() == code)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventStatus::Pending => "pending",
            EventStatus::Exported => "exported",
            EventStatus::Orphaned => "orphaned",
            EventStatus::Skipped => "skipped",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, EventStatus::Pending)
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventStatus {
    type Err = TallyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| TallyError::InvalidArgs(format!("unknown status '{}'", s)))
    }
}

/// Observation channel that produced an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventSource {
    PostCommit,
    PostRewrite,
    PostCheckout,
    PostMerge,
    PrePush,
    Manual,
    Backfill,
}

impl EventSource {
    pub const ALL: [EventSource; 7] = [
        EventSource::PostCommit,
        EventSource::PostRewrite,
        EventSource::PostCheckout,
        EventSource::PostMerge,
        EventSource::PrePush,
        EventSource::Manual,
        EventSource::Backfill,
    ];

    /// Small integer code stored in `repo_events.source_id`
    pub fn code(self) -> i64 {
        match self {
            EventSource::PostCommit => 1,
            EventSource::PostRewrite => 2,
            EventSource::PostCheckout => 3,
            EventSource::PostMerge => 4,
            EventSource::PrePush => 5,
            EventSource::Manual => 6,
            EventSource::Backfill => 7,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.code() == code)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventSource::PostCommit => "post-commit",
            EventSource::PostRewrite => "post-rewrite",
            EventSource::PostCheckout => "post-checkout",
            EventSource::PostMerge => "post-merge",
            EventSource::PrePush => "pre-push",
            EventSource::Manual => "manual",
            EventSource::Backfill => "backfill",
        }
    }
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventSource {
    type Err = TallyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|source| source.as_str() == s)
            .ok_or_else(|| TallyError::InvalidArgs(format!("unknown source '{}'", s)))
    }
}

/// A recorded commit observation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Store-assigned id; 0 until inserted
    pub id: i64,
    pub repo_id: RepoId,
    /// Absolute path of the working tree at record time
    pub repo_path: String,
    pub commit_hash: String,
    pub branch: String,
    pub timestamp: DateTime<Utc>,
    pub status: EventStatus,
    pub source: EventSource,
}

impl Event {
    /// Create a new pending event, not yet stored
    pub fn new(
        repo_id: RepoId,
        repo_path: impl Into<String>,
        commit_hash: impl Into<String>,
        branch: impl Into<String>,
        timestamp: DateTime<Utc>,
        source: EventSource,
    ) -> Self {
        Self {
            id: 0,
            repo_id,
            repo_path: repo_path.into(),
            commit_hash: commit_hash.into(),
            branch: branch.into(),
            timestamp,
            status: EventStatus::Pending,
            source,
        }
    }

    /// Natural key of the exported record: `repo_id:commit_hash`
    pub fn ledger_key(&self) -> String {
        crate::export::ledger_key(self.repo_id.as_str(), &self.commit_hash)
    }
}

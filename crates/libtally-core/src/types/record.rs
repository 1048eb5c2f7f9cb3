use std::fmt;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TallyError;

/// Version of the CSV ledger layout below. Bump when columns change.
pub const CSV_SCHEMA_VERSION: u32 = 1;

/// Fixed header row of every ledger partition
pub const CSV_HEADER: [&str; 16] = [
    "event_id",
    "event_type",
    "timestamp",
    "repo_id",
    "repo_name",
    "author_id",
    "author_name",
    "author_email",
    "branch",
    "commit_hash",
    "parent_hashes",
    "message",
    "files_changed",
    "insertions",
    "deletions",
    "device",
];

pub(crate) const COL_EVENT_ID: usize = 0;
pub(crate) const COL_TIMESTAMP: usize = 2;
pub(crate) const COL_REPO_ID: usize = 3;
pub(crate) const COL_COMMIT_HASH: usize = 9;

/// Length of the abbreviated commit hash shown to humans
pub const SHORT_HASH_LEN: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitKind {
    Commit,
    Merge,
}

impl CommitKind {
    /// Merges are commits with more than one parent
    pub fn from_parent_count(parents: usize) -> Self {
        if parents > 1 {
            CommitKind::Merge
        } else {
            CommitKind::Commit
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CommitKind::Commit => "commit",
            CommitKind::Merge => "merge",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "commit" => Some(CommitKind::Commit),
            "merge" => Some(CommitKind::Merge),
            _ => None,
        }
    }
}

impl fmt::Display for CommitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One enriched, denormalized ledger row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportRecord {
    pub event_id: String,
    pub event_type: CommitKind,
    pub timestamp: DateTime<Utc>,
    pub repo_id: String,
    pub repo_name: String,
    pub author_id: String,
    pub author_name: String,
    pub author_email: String,
    pub branch: String,
    pub commit_hash: String,
    pub parent_hashes: Vec<String>,
    pub message: String,
    pub files_changed: u32,
    pub insertions: u32,
    pub deletions: u32,
    pub device: String,
}

impl ExportRecord {
    pub fn key(&self) -> String {
        crate::export::ledger_key(&self.repo_id, &self.commit_hash)
    }

    /// Render as CSV fields in [`CSV_HEADER`] order
    pub fn to_fields(&self) -> Vec<String> {
        vec![
            self.event_id.clone(),
            self.event_type.as_str().to_string(),
            format_timestamp(&self.timestamp),
            self.repo_id.clone(),
            self.repo_name.clone(),
            self.author_id.clone(),
            self.author_name.clone(),
            self.author_email.clone(),
            self.branch.clone(),
            self.commit_hash.clone(),
            self.parent_hashes.join(" "),
            self.message.clone(),
            self.files_changed.to_string(),
            self.insertions.to_string(),
            self.deletions.to_string(),
            self.device.clone(),
        ]
    }

    /// Parse CSV fields back into a record. `None` for short or malformed rows.
    pub fn from_fields(fields: &[String]) -> Option<Self> {
        if fields.len() < CSV_HEADER.len() {
            return None;
        }
        Some(Self {
            event_id: fields[0].clone(),
            event_type: CommitKind::parse(&fields[1])?,
            timestamp: parse_timestamp(&fields[2])?,
            repo_id: fields[3].clone(),
            repo_name: fields[4].clone(),
            author_id: fields[5].clone(),
            author_name: fields[6].clone(),
            author_email: fields[7].clone(),
            branch: fields[8].clone(),
            commit_hash: fields[9].clone(),
            parent_hashes: fields[10].split_whitespace().map(str::to_string).collect(),
            message: fields[11].clone(),
            files_changed: fields[12].parse().ok()?,
            insertions: fields[13].parse().ok()?,
            deletions: fields[14].parse().ok()?,
            device: fields[15].clone(),
        })
    }
}

/// RFC 3339, second precision, `Z` suffix
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parse a user-supplied time bound: RFC 3339, or a bare `YYYY-MM-DD`
/// meaning midnight UTC
pub fn parse_time_arg(value: &str) -> Result<DateTime<Utc>, TallyError> {
    let value = value.trim();
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(midnight.and_utc());
        }
    }
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| TallyError::timestamp(value, e))
}

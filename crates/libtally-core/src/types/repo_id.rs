//! Repository identity
//!
//! A [`RepoId`] names a tracked repository independently of where it is
//! checked out. Repositories with a remote are keyed by their normalized
//! remote URL so every clone on every machine agrees on the id; repositories
//! without a remote fall back to `local:<path>`.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Prefix for ids derived from a local filesystem path
pub const LOCAL_PREFIX: &str = "local:";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepoIdError {
    #[error("repository id source is empty")]
    Empty,
    #[error("path traversal sequence in '{0}'")]
    PathTraversal(String),
    #[error("NUL byte in repository id source")]
    NulByte,
}

/// Normalized, collision-resistant repository identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RepoId(String);

impl RepoId {
    /// Derive an id from a remote URL.
    ///
    /// Scheme, credentials, port and the `.git` suffix are dropped and the
    /// result is lower-cased, so `git@github.com:user/repo.git` and
    /// `https://github.com/user/repo.git` both become `github.com/user/repo`.
    pub fn from_remote_url(url: &str) -> Result<Self, RepoIdError> {
        let trimmed = url.trim();
        validate_source(trimmed)?;

        let lowered = trimmed.to_lowercase();
        let (rest, scp_style) = match lowered.find("://") {
            Some(idx) => (&lowered[idx + 3..], false),
            None => (lowered.as_str(), true),
        };

        // user:password@host/path or git@host:path
        let rest = match rest.find('@') {
            Some(at) if !rest[..at].contains('/') => &rest[at + 1..],
            _ => rest,
        };

        let mut normalized = if scp_style {
            match rest.find(':') {
                Some(colon) if !rest[..colon].contains('/') => {
                    format!("{}/{}", &rest[..colon], &rest[colon + 1..])
                }
                _ => rest.to_string(),
            }
        } else {
            strip_port(rest)
        };

        while normalized.ends_with('/') {
            normalized.pop();
        }
        if let Some(stripped) = normalized.strip_suffix(".git") {
            normalized = stripped.to_string();
        }
        while normalized.ends_with('/') {
            normalized.pop();
        }
        let normalized = normalized.trim_start_matches('/').to_string();

        if normalized.is_empty() {
            return Err(RepoIdError::Empty);
        }
        Ok(Self(normalized))
    }

    /// Derive an id from a local working tree path (`local:<path>`).
    pub fn from_local_path(path: &Path) -> Result<Self, RepoIdError> {
        let raw = path.to_string_lossy();
        let raw = raw.trim();
        validate_source(raw)?;

        let mut normalized = raw.replace('\\', "/");
        while normalized.len() > 1 && normalized.ends_with('/') {
            normalized.pop();
        }
        Ok(Self(format!("{}{}", LOCAL_PREFIX, normalized)))
    }

    /// Accept an already-derived id, e.g. one typed on the command line.
    pub fn parse(value: &str) -> Result<Self, RepoIdError> {
        let value = value.trim();
        validate_source(value)?;
        Ok(Self(value.to_string()))
    }

    /// Wrap a value read back from storage. Stored ids were validated when
    /// they were first derived and are never recomputed.
    pub(crate) fn from_stored(value: String) -> Self {
        Self(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_local(&self) -> bool {
        self.0.starts_with(LOCAL_PREFIX)
    }

    /// Short human name: the last path segment
    pub fn display_name(&self) -> &str {
        let tail = self.0.strip_prefix(LOCAL_PREFIX).unwrap_or(&self.0);
        tail.rsplit('/').find(|s| !s.is_empty()).unwrap_or(tail)
    }

    /// Directory-name-safe projection (`:` and `/` become `__`)
    pub fn to_filesystem_safe(&self) -> String {
        self.0.replace([':', '/'], "__")
    }
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RepoId {
    type Error = RepoIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RepoId> for String {
    fn from(id: RepoId) -> Self {
        id.0
    }
}

fn validate_source(value: &str) -> Result<(), RepoIdError> {
    if value.is_empty() {
        return Err(RepoIdError::Empty);
    }
    if value.contains('\0') {
        return Err(RepoIdError::NulByte);
    }
    if value.contains("..") {
        return Err(RepoIdError::PathTraversal(value.to_string()));
    }
    Ok(())
}

/// Drop a numeric `:port` from the host part of `host:port/path`
fn strip_port(rest: &str) -> String {
    let (host, path) = match rest.find('/') {
        Some(slash) => (&rest[..slash], &rest[slash..]),
        None => (rest, ""),
    };
    let host = match host.rsplit_once(':') {
        Some((h, port)) if !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()) => h,
        _ => host,
    };
    format!("{}{}", host, path)
}

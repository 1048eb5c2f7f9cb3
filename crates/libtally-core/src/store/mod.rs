//! Local event store
//!
//! A single SQLite database in WAL mode holds every recorded commit event.
//! Hooks from many shells may write at once; `busy_timeout` makes them queue
//! on the database lock rather than fail.

mod schema;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, ErrorCode};
use serde::Serialize;
use tracing::debug;

use crate::error::TallyError;
use crate::types::event::{Event, EventSource, EventStatus};
use crate::types::repo_id::RepoId;

pub use schema::SCHEMA_VERSION;

/// How long a writer waits on another writer before giving up
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Largest id list bound into one `IN (...)` clause
const MAX_BOUND_IDS: usize = 500;

const EVENT_COLUMNS: &str =
    "id, repo_id, repo_path, commit_hash, branch, timestamp, status_id, source_id";

/// Filter for listing events. All fields combine with AND.
#[derive(Debug, Default, Clone)]
pub struct EventFilter {
    pub status: Option<EventStatus>,
    pub source: Option<EventSource>,
    pub repo_id: Option<RepoId>,
    /// Inclusive lower bound on the event timestamp
    pub since: Option<DateTime<Utc>>,
    /// Inclusive upper bound on the event timestamp
    pub until: Option<DateTime<Utc>>,
    /// Only ids strictly greater than this. Switches ordering to oldest first.
    pub since_id: Option<i64>,
    pub limit: Option<usize>,
}

impl EventFilter {
    pub fn pending() -> Self {
        Self {
            status: Some(EventStatus::Pending),
            ..Self::default()
        }
    }

    pub fn after_id(id: i64) -> Self {
        Self {
            since_id: Some(id),
            ..Self::default()
        }
    }
}

/// Statistics about the event store
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub path: String,
    pub schema_version: u32,
    pub total: u64,
    pub pending: u64,
    pub exported: u64,
    pub orphaned: u64,
    pub skipped: u64,
    pub repositories: u64,
    pub max_id: i64,
}

/// Handle on the event database.
///
/// One connection per handle, serialized by a mutex. Dropping the handle
/// closes the connection.
pub struct EventStore {
    conn: Mutex<Connection>,
    path: PathBuf,
    schema_version: u32,
}

impl std::fmt::Debug for EventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStore")
            .field("path", &self.path)
            .field("schema_version", &self.schema_version)
            .finish()
    }
}

impl EventStore {
    /// Open or create the database at `path`, applying pending migrations
    pub fn open(path: &Path) -> Result<Self, TallyError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut conn = Connection::open(path).map_err(map_sqlite)?;
        configure(&conn)?;
        let schema_version = schema::migrate(&mut conn).map_err(map_tally)?;
        debug!(path = %path.display(), schema_version, "event store opened");

        Ok(Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
            schema_version,
        })
    }

    /// Open a private in-memory store
    pub fn open_in_memory() -> Result<Self, TallyError> {
        let mut conn = Connection::open_in_memory()?;
        let schema_version = schema::migrate(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: PathBuf::from(":memory:"),
            schema_version,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    /// Record an event. A repeat of (repo_id, commit_hash, source) only
    /// refreshes the timestamp of the existing row. Returns the row id.
    pub fn insert(&self, event: &Event) -> Result<i64, TallyError> {
        let conn = self.lock()?;
        let id = conn
            .query_row(
                "INSERT INTO repo_events
                   (repo_id, repo_path, commit_hash, branch, timestamp, status_id, source_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT (repo_id, commit_hash, source_id)
                   DO UPDATE SET timestamp = excluded.timestamp
                 RETURNING id",
                params![
                    event.repo_id.as_str(),
                    event.repo_path,
                    event.commit_hash,
                    event.branch,
                    format_ts(&event.timestamp),
                    EventStatus::Pending.code(),
                    event.source.code(),
                ],
                |row| row.get(0),
            )
            .map_err(map_sqlite)?;
        debug!(id, repo = %event.repo_id, commit = %event.commit_hash, "event recorded");
        Ok(id)
    }

    /// List events matching `filter`. Newest first, or oldest first when
    /// `since_id` is set.
    pub fn list(&self, filter: &EventFilter) -> Result<Vec<Event>, TallyError> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(status) = filter.status {
            clauses.push("status_id = ?");
            values.push(Value::Integer(status.code()));
        }
        if let Some(source) = filter.source {
            clauses.push("source_id = ?");
            values.push(Value::Integer(source.code()));
        }
        if let Some(repo_id) = &filter.repo_id {
            clauses.push("repo_id = ?");
            values.push(Value::Text(repo_id.as_str().to_string()));
        }
        if let Some(since) = &filter.since {
            clauses.push("timestamp >= ?");
            values.push(Value::Text(format_ts(since)));
        }
        if let Some(until) = &filter.until {
            clauses.push("timestamp <= ?");
            values.push(Value::Text(format_ts(until)));
        }
        if let Some(since_id) = filter.since_id {
            clauses.push("id > ?");
            values.push(Value::Integer(since_id));
        }

        let mut sql = format!("SELECT {} FROM repo_events", EVENT_COLUMNS);
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        if filter.since_id.is_some() {
            sql.push_str(" ORDER BY id ASC");
        } else {
            sql.push_str(" ORDER BY timestamp DESC, id DESC");
        }
        if let Some(limit) = filter.limit {
            sql.push_str(" LIMIT ?");
            values.push(Value::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));
        }

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql).map_err(map_sqlite)?;
        let rows = stmt
            .query_map(params_from_iter(values), RawEvent::from_row)
            .map_err(map_sqlite)?;

        let mut events = Vec::new();
        for row in rows {
            events.push(row.map_err(map_sqlite)?.into_event()?);
        }
        Ok(events)
    }

    /// All pending events, newest first
    pub fn get_pending(&self) -> Result<Vec<Event>, TallyError> {
        self.list(&EventFilter::pending())
    }

    /// Move pending events to `status`.
    ///
    /// Rows that already left `pending` are not touched. The whole batch
    /// commits or none of it does. Returns the number of rows changed.
    pub fn update_status(&self, ids: &[i64], status: EventStatus) -> Result<usize, TallyError> {
        if ids.is_empty() || !status.is_terminal() {
            return Ok(0);
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(map_sqlite)?;
        let mut changed = 0;
        for chunk in ids.chunks(MAX_BOUND_IDS) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "UPDATE repo_events SET status_id = ? WHERE status_id = ? AND id IN ({})",
                placeholders
            );
            let mut values = vec![
                Value::Integer(status.code()),
                Value::Integer(EventStatus::Pending.code()),
            ];
            values.extend(chunk.iter().map(|id| Value::Integer(*id)));
            changed += tx
                .execute(&sql, params_from_iter(values))
                .map_err(map_sqlite)?;
        }
        tx.commit().map_err(map_sqlite)?;

        debug!(changed, status = %status, "event status updated");
        Ok(changed)
    }

    /// Mark every pending event of `repo_id` as orphaned
    pub fn mark_orphaned(&self, repo_id: &RepoId) -> Result<usize, TallyError> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE repo_events SET status_id = ?1 WHERE repo_id = ?2 AND status_id = ?3",
                params![
                    EventStatus::Orphaned.code(),
                    repo_id.as_str(),
                    EventStatus::Pending.code()
                ],
            )
            .map_err(map_sqlite)?;
        Ok(changed)
    }

    /// Permanently remove orphaned events
    pub fn delete_orphaned(&self) -> Result<usize, TallyError> {
        let conn = self.lock()?;
        let deleted = conn
            .execute(
                "DELETE FROM repo_events WHERE status_id = ?1",
                params![EventStatus::Orphaned.code()],
            )
            .map_err(map_sqlite)?;
        Ok(deleted)
    }

    /// Rewrite the repo id of pending events. Exported history keeps the
    /// id it was published under.
    pub fn migrate_repo_id(&self, old: &RepoId, new: &RepoId) -> Result<usize, TallyError> {
        if old == new {
            return Ok(0);
        }
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE OR IGNORE repo_events SET repo_id = ?1 WHERE repo_id = ?2 AND status_id = ?3",
                params![new.as_str(), old.as_str(), EventStatus::Pending.code()],
            )
            .map_err(map_sqlite)?;
        Ok(changed)
    }

    /// Highest assigned id, 0 when empty
    pub fn max_id(&self) -> Result<i64, TallyError> {
        let conn = self.lock()?;
        let max: Option<i64> = conn
            .query_row("SELECT MAX(id) FROM repo_events", [], |row| row.get(0))
            .map_err(map_sqlite)?;
        Ok(max.unwrap_or(0))
    }

    pub fn stats(&self) -> Result<StoreStats, TallyError> {
        let mut stats = StoreStats {
            path: self.path.display().to_string(),
            schema_version: self.schema_version,
            total: 0,
            pending: 0,
            exported: 0,
            orphaned: 0,
            skipped: 0,
            repositories: 0,
            max_id: self.max_id()?,
        };

        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT status_id, COUNT(*) FROM repo_events GROUP BY status_id")
            .map_err(map_sqlite)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)))
            .map_err(map_sqlite)?;
        for row in rows {
            let (code, count) = row.map_err(map_sqlite)?;
            let count = u64::try_from(count).unwrap_or(0);
            stats.total += count;
            match EventStatus::from_code(code) {
                Some(EventStatus::Pending) => stats.pending = count,
                Some(EventStatus::Exported) => stats.exported = count,
                Some(EventStatus::Orphaned) => stats.orphaned = count,
                Some(EventStatus::Skipped) => stats.skipped = count,
                None => {}
            }
        }

        let repositories: i64 = conn
            .query_row("SELECT COUNT(DISTINCT repo_id) FROM repo_events", [], |row| row.get(0))
            .map_err(map_sqlite)?;
        stats.repositories = u64::try_from(repositories).unwrap_or(0);
        Ok(stats)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, TallyError> {
        self.conn
            .lock()
            .map_err(|_| TallyError::Internal("event store mutex poisoned".to_string()))
    }
}

fn configure(conn: &Connection) -> Result<(), TallyError> {
    conn.busy_timeout(BUSY_TIMEOUT).map_err(map_sqlite)?;
    conn.pragma_update(None, "journal_mode", "WAL").map_err(map_sqlite)?;
    conn.pragma_update(None, "synchronous", "NORMAL").map_err(map_sqlite)?;
    Ok(())
}

/// Fixed-width RFC 3339 so stored values order correctly as text
fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_ts(value: &str) -> Result<DateTime<Utc>, TallyError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| TallyError::timestamp(value, e))
}

fn map_sqlite(err: rusqlite::Error) -> TallyError {
    match err.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
            TallyError::DbBusy(err.to_string())
        }
        _ => TallyError::Sqlite(err),
    }
}

fn map_tally(err: TallyError) -> TallyError {
    match err {
        TallyError::Sqlite(e) => map_sqlite(e),
        other => other,
    }
}

/// Row as stored, before codes and timestamps are decoded
struct RawEvent {
    id: i64,
    repo_id: String,
    repo_path: String,
    commit_hash: String,
    branch: String,
    timestamp: String,
    status_id: i64,
    source_id: i64,
}

impl RawEvent {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            repo_id: row.get(1)?,
            repo_path: row.get(2)?,
            commit_hash: row.get(3)?,
            branch: row.get(4)?,
            timestamp: row.get(5)?,
            status_id: row.get(6)?,
            source_id: row.get(7)?,
        })
    }

    fn into_event(self) -> Result<Event, TallyError> {
        let status = EventStatus::from_code(self.status_id).ok_or_else(|| {
            TallyError::Internal(format!("event {} has unknown status {}", self.id, self.status_id))
        })?;
        let source = EventSource::from_code(self.source_id).ok_or_else(|| {
            TallyError::Internal(format!("event {} has unknown source {}", self.id, self.source_id))
        })?;
        Ok(Event {
            id: self.id,
            repo_id: RepoId::from_stored(self.repo_id),
            repo_path: self.repo_path,
            commit_hash: self.commit_hash,
            branch: self.branch,
            timestamp: parse_ts(&self.timestamp)?,
            status,
            source,
        })
    }
}

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tracing::info;

use crate::error::TallyError;

/// One embedded schema step. The list is append-only: never edit a step
/// that has shipped, add a new one.
pub(crate) struct Migration {
    pub version: u32,
    pub sql: &'static str,
}

pub(crate) const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        sql: "CREATE TABLE IF NOT EXISTS repo_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                repo_id TEXT NOT NULL,
                repo_path TEXT NOT NULL,
                commit_hash TEXT NOT NULL,
                branch TEXT NOT NULL DEFAULT '',
                timestamp TEXT NOT NULL,
                status_id INTEGER NOT NULL DEFAULT 1,
                source_id INTEGER NOT NULL,
                UNIQUE(repo_id, commit_hash, source_id)
              );
              CREATE INDEX IF NOT EXISTS repo_events_by_status
                ON repo_events (status_id, id);
              CREATE INDEX IF NOT EXISTS repo_events_by_repo
                ON repo_events (repo_id, status_id);",
    },
    Migration {
        version: 2,
        sql: "CREATE INDEX IF NOT EXISTS repo_events_by_timestamp
                ON repo_events (timestamp DESC, id DESC);",
    },
];

/// Latest schema version this build knows about
pub const SCHEMA_VERSION: u32 = 2;

/// Apply every migration newer than the database's recorded version.
/// Returns the resulting schema version.
///
/// The version check and all steps run in one IMMEDIATE transaction, so
/// processes opening a fresh database at once queue on the busy timeout and
/// only the first one applies the steps.
pub(crate) fn migrate(conn: &mut Connection) -> Result<u32, TallyError> {
    if let Ok(version) = current_version(conn) {
        if version == SCHEMA_VERSION {
            return Ok(version);
        }
    }

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
           version INTEGER PRIMARY KEY,
           applied_at TEXT NOT NULL
         );",
    )?;

    let start = current_version(&tx)?;
    if start > SCHEMA_VERSION {
        return Err(TallyError::Internal(format!(
            "database schema version {} is newer than supported version {}",
            start, SCHEMA_VERSION
        )));
    }

    let mut current = start;
    for migration in MIGRATIONS.iter().filter(|m| m.version > start) {
        tx.execute_batch(migration.sql)?;
        tx.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
            params![migration.version, Utc::now().to_rfc3339()],
        )?;
        info!(version = migration.version, "applied schema migration");
        current = migration.version;
    }
    tx.commit()?;

    Ok(current)
}

pub(crate) fn current_version(conn: &Connection) -> Result<u32, TallyError> {
    let version: Option<u32> = conn
        .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
            row.get::<_, Option<u32>>(0)
        })
        .optional()?
        .flatten();
    Ok(version.unwrap_or(0))
}

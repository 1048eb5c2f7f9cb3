//! Export of pending events into the CSV ledger
//!
//! Each event becomes one record placed by its year (record year vs. current
//! year), merged by `repo_id:commit_hash` into whatever the partition already
//! holds, and the partition is rewritten in full. Re-running an export over the same events
//! is a no-op on disk, which is what makes retrying a failed push safe.

mod partition;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::TallyError;
use crate::hash::{author_id, sanitize_message};
use crate::types::event::Event;
use crate::types::record::{CommitKind, ExportRecord};

pub use partition::{LedgerRow, Partition};

/// File name of the partition for the current year
pub const CURRENT_PARTITION: &str = "commits.csv";

/// Natural primary key of a ledger row
pub fn ledger_key(repo_id: &str, commit_hash: &str) -> String {
    format!("{}:{}", repo_id, commit_hash)
}

/// Partition file for an event year. The current year always lands in
/// `commits.csv`; past years carry the year so they never need rewriting
/// once the year rolls over.
pub fn partition_file_name(event_year: i32, current_year: i32) -> String {
    if event_year == current_year {
        CURRENT_PARTITION.to_string()
    } else {
        format!("commits-{:04}.csv", event_year)
    }
}

pub fn partition_for(timestamp: &DateTime<Utc>, now: &DateTime<Utc>) -> String {
    partition_file_name(timestamp.year(), now.year())
}

/// Whether a repository-relative path names a ledger partition: a
/// top-level `commits.csv` or `commits-YYYY.csv`
pub fn is_partition_path(path: &str) -> bool {
    if path == CURRENT_PARTITION {
        return true;
    }
    path.strip_prefix("commits-")
        .and_then(|rest| rest.strip_suffix(".csv"))
        .map(|year| year.len() == 4 && year.bytes().all(|b| b.is_ascii_digit()))
        .unwrap_or(false)
}

/// Commit metadata consumed by the record builder
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitMeta {
    pub author_name: String,
    pub author_email: String,
    pub subject: String,
    pub body: String,
    pub files_changed: u32,
    pub insertions: u32,
    pub deletions: u32,
    pub parent_hashes: Vec<String>,
    pub authored_at: Option<DateTime<Utc>>,
}

/// Lookup of commit metadata for a recorded event
pub trait MetadataSource {
    fn lookup(&self, repo_path: &Path, commit_hash: &str) -> Result<CommitMeta, TallyError>;
}

/// Metadata source that knows nothing; records fall back to event data
#[derive(Debug, Default, Clone, Copy)]
pub struct NoMetadata;

impl MetadataSource for NoMetadata {
    fn lookup(&self, _repo_path: &Path, commit_hash: &str) -> Result<CommitMeta, TallyError> {
        Err(TallyError::NotFound(format!("no metadata for {}", commit_hash)))
    }
}

/// Builds [`ExportRecord`]s from events
pub struct RecordBuilder<'a> {
    metadata: &'a dyn MetadataSource,
    author_salt: String,
    device: String,
}

impl<'a> RecordBuilder<'a> {
    pub fn new(
        metadata: &'a dyn MetadataSource,
        author_salt: impl Into<String>,
        device: impl Into<String>,
    ) -> Self {
        Self {
            metadata,
            author_salt: author_salt.into(),
            device: device.into(),
        }
    }

    /// Build the ledger record for an event. Metadata lookup failures
    /// degrade to the event's own fields.
    pub fn build(&self, event: &Event) -> ExportRecord {
        let meta = match self
            .metadata
            .lookup(Path::new(&event.repo_path), &event.commit_hash)
        {
            Ok(meta) => meta,
            Err(e) => {
                warn!(
                    repo = %event.repo_id,
                    commit = %event.commit_hash,
                    error = %e,
                    "commit metadata unavailable, exporting event fields only"
                );
                CommitMeta::default()
            }
        };

        let message = if meta.body.trim().is_empty() {
            sanitize_message(&meta.subject)
        } else {
            sanitize_message(&format!("{}\n{}", meta.subject, meta.body))
        };

        ExportRecord {
            event_id: Uuid::new_v4().to_string(),
            event_type: CommitKind::from_parent_count(meta.parent_hashes.len()),
            timestamp: meta.authored_at.unwrap_or(event.timestamp),
            repo_id: event.repo_id.as_str().to_string(),
            repo_name: event.repo_id.display_name().to_string(),
            author_id: author_id(&self.author_salt, &meta.author_email),
            author_name: meta.author_name,
            author_email: meta.author_email,
            branch: event.branch.clone(),
            commit_hash: event.commit_hash.clone(),
            parent_hashes: meta.parent_hashes,
            message,
            files_changed: meta.files_changed,
            insertions: meta.insertions,
            deletions: meta.deletions,
            device: self.device.clone(),
        }
    }
}

/// Result of an export pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExportOutcome {
    /// Store ids of every event written to the ledger
    pub exported_ids: Vec<i64>,
    /// Partition files whose bytes changed
    pub modified_partitions: Vec<PathBuf>,
}

impl ExportOutcome {
    pub fn is_empty(&self) -> bool {
        self.exported_ids.is_empty()
    }
}

/// A partition loaded during one export pass
struct Loaded {
    partition: Partition,
    original: Option<Vec<u8>>,
}

fn loaded<'m>(
    open: &'m mut BTreeMap<String, Loaded>,
    dir: &Path,
    file_name: &str,
) -> Result<&'m mut Loaded, TallyError> {
    if !open.contains_key(file_name) {
        let (partition, original) = Partition::load_with_bytes(&dir.join(file_name))?;
        open.insert(file_name.to_string(), Loaded { partition, original });
    }
    open.get_mut(file_name)
        .ok_or_else(|| TallyError::Internal(format!("partition {} not loaded", file_name)))
}

/// Merge `events` into the partitions under `dir`.
///
/// Each record lands in the partition of its own timestamp year. Rows left
/// in `commits.csv` from an earlier year are moved into that year's file
/// first, replacing any row there with the same key.
///
/// Partitions whose content does not change are left untouched on disk and
/// are not reported as modified.
pub fn export_pending(
    dir: &Path,
    events: &[Event],
    builder: &RecordBuilder<'_>,
    now: DateTime<Utc>,
) -> Result<ExportOutcome, TallyError> {
    let mut outcome = ExportOutcome::default();
    if events.is_empty() {
        return Ok(outcome);
    }

    let mut open: BTreeMap<String, Loaded> = BTreeMap::new();

    let stale = loaded(&mut open, dir, CURRENT_PARTITION)?
        .partition
        .split_off_other_years(now.year());
    for (year, key, row) in stale {
        let file_name = partition_file_name(year, now.year());
        info!(key = %key, partition = %file_name, "rotating ledger row out of current partition");
        loaded(&mut open, dir, &file_name)?.partition.insert_row(key, row);
    }

    for event in events {
        let record = builder.build(event);
        let file_name = partition_for(&record.timestamp, &now);
        loaded(&mut open, dir, &file_name)?.partition.upsert(record);
        outcome.exported_ids.push(event.id);
    }

    for (file_name, entry) in &open {
        let bytes = entry.partition.to_csv_bytes()?;
        if entry.original.as_deref() == Some(bytes.as_slice()) {
            debug!(partition = %file_name, "partition unchanged");
            continue;
        }
        if entry.original.is_none() && entry.partition.is_empty() {
            continue;
        }

        let path = dir.join(file_name);
        partition::write_durable(&path, &bytes)?;
        info!(partition = %file_name, rows = entry.partition.len(), "partition written");
        outcome.modified_partitions.push(path);
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::event::EventSource;
    use crate::types::repo_id::RepoId;
    use chrono::TimeZone;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::tempdir;

    /// Fixed metadata keyed by commit hash
    #[derive(Default)]
    struct FixedMetadata(HashMap<String, CommitMeta>);

    impl MetadataSource for FixedMetadata {
        fn lookup(&self, _repo_path: &Path, commit_hash: &str) -> Result<CommitMeta, TallyError> {
            self.0
                .get(commit_hash)
                .cloned()
                .ok_or_else(|| TallyError::NotFound(commit_hash.to_string()))
        }
    }

    fn event(id: i64, commit: &str, ts: DateTime<Utc>) -> Event {
        let mut event = Event::new(
            RepoId::from_remote_url("https://github.com/user/repo").unwrap(),
            "/work/repo",
            commit,
            "main",
            ts,
            EventSource::PostCommit,
        );
        event.id = id;
        event
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_partition_names() {
        assert_eq!(partition_file_name(2025, 2025), "commits.csv");
        assert_eq!(partition_file_name(2024, 2025), "commits-2024.csv");
        assert!(is_partition_path("commits.csv"));
        assert!(is_partition_path("commits-2024.csv"));
        assert!(!is_partition_path("sub/commits.csv"));
        assert!(!is_partition_path("COMMITS.CSV"));
        assert!(!is_partition_path("notes.csv"));
        assert!(!is_partition_path("commits-24.csv"));
        assert!(!is_partition_path("commits-abcd.csv"));
        assert!(!is_partition_path("README.md"));
    }

    #[test]
    fn test_year_rollover_moves_stale_rows_out_of_current_partition() {
        let dir = tempdir().unwrap();
        let builder = RecordBuilder::new(&NoMetadata, "s", "h");
        let december = Utc.with_ymd_and_hms(2025, 12, 30, 10, 0, 0).unwrap();
        let c1 = event(1, "c1", december);
        let c2 = event(2, "c2", Utc.with_ymd_and_hms(2025, 12, 31, 9, 0, 0).unwrap());

        export_pending(dir.path(), &[c1.clone()], &builder, december).unwrap();
        let first = Partition::load(&dir.path().join(CURRENT_PARTITION)).unwrap();
        let c1_id = first.get("github.com/user/repo:c1").unwrap().event_id().unwrap().to_string();

        let january = Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap();
        let outcome = export_pending(dir.path(), &[c2, c1], &builder, january).unwrap();

        assert_eq!(outcome.exported_ids, vec![2, 1]);
        assert_eq!(outcome.modified_partitions.len(), 2);
        assert!(outcome.modified_partitions.contains(&dir.path().join(CURRENT_PARTITION)));
        assert!(outcome.modified_partitions.contains(&dir.path().join("commits-2025.csv")));

        let current = Partition::load(&dir.path().join(CURRENT_PARTITION)).unwrap();
        assert!(current.is_empty());

        let past = Partition::load(&dir.path().join("commits-2025.csv")).unwrap();
        let commits: Vec<String> = past.records().into_iter().map(|r| r.commit_hash).collect();
        assert_eq!(commits, vec!["c1", "c2"]);
        assert_eq!(past.get("github.com/user/repo:c1").unwrap().event_id(), Some(c1_id.as_str()));

        // nothing left to rotate on the next pass
        let again = export_pending(dir.path(), &[event(1, "c1", december)], &builder, january).unwrap();
        assert!(again.modified_partitions.is_empty());
    }

    #[test]
    fn test_partition_follows_author_time() {
        let dir = tempdir().unwrap();
        let mut meta = FixedMetadata::default();
        meta.0.insert(
            "late".to_string(),
            CommitMeta {
                authored_at: Some(Utc.with_ymd_and_hms(2024, 12, 31, 23, 30, 0).unwrap()),
                ..CommitMeta::default()
            },
        );
        let recorded = Utc.with_ymd_and_hms(2025, 1, 1, 0, 10, 0).unwrap();
        export_pending(dir.path(), &[event(1, "late", recorded)], &RecordBuilder::new(&meta, "s", "h"), now())
            .unwrap();

        assert!(!dir.path().join(CURRENT_PARTITION).exists());
        let past = Partition::load(&dir.path().join("commits-2024.csv")).unwrap();
        assert!(past.get("github.com/user/repo:late").is_some());
    }

    #[test]
    fn test_year_boundary_partitioning() {
        let dir = tempdir().unwrap();
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
        let last_second = Utc.with_ymd_and_hms(2024, 12, 31, 23, 59, 59).unwrap();
        let first_second = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();

        let events = vec![event(1, "old", last_second), event(2, "new", first_second)];
        let outcome = export_pending(dir.path(), &events, &RecordBuilder::new(&NoMetadata, "s", "h"), now)
            .unwrap();

        assert_eq!(outcome.exported_ids, vec![1, 2]);
        assert_eq!(outcome.modified_partitions.len(), 2);

        let past = Partition::load(&dir.path().join("commits-2024.csv")).unwrap();
        let current = Partition::load(&dir.path().join("commits.csv")).unwrap();
        assert!(past.get("github.com/user/repo:old").is_some());
        assert!(past.get("github.com/user/repo:new").is_none());
        assert!(current.get("github.com/user/repo:new").is_some());
    }

    #[test]
    fn test_reexport_is_byte_identical_and_untouched() {
        let dir = tempdir().unwrap();
        let mut meta = FixedMetadata::default();
        meta.0.insert(
            "abc".to_string(),
            CommitMeta {
                author_name: "Dev".to_string(),
                author_email: "Dev@Example.com".to_string(),
                subject: "Add feature".to_string(),
                body: "Line one\nLine two".to_string(),
                files_changed: 2,
                insertions: 5,
                deletions: 1,
                parent_hashes: vec!["p1".to_string()],
                authored_at: Some(Utc.with_ymd_and_hms(2025, 5, 30, 8, 0, 0).unwrap()),
            },
        );
        let builder = RecordBuilder::new(&meta, "salt", "laptop");
        let events = vec![event(7, "abc", Utc.with_ymd_and_hms(2025, 5, 30, 8, 0, 5).unwrap())];

        let first = export_pending(dir.path(), &events, &builder, now()).unwrap();
        assert_eq!(first.modified_partitions.len(), 1);
        let bytes = fs::read(dir.path().join(CURRENT_PARTITION)).unwrap();

        let second = export_pending(dir.path(), &events, &builder, now()).unwrap();
        assert_eq!(second.exported_ids, vec![7]);
        assert!(second.modified_partitions.is_empty());
        assert_eq!(fs::read(dir.path().join(CURRENT_PARTITION)).unwrap(), bytes);

        let record = Partition::load(&dir.path().join(CURRENT_PARTITION))
            .unwrap()
            .records()
            .remove(0);
        assert_eq!(record.message, "Add feature Line one Line two");
        assert_eq!(record.timestamp, Utc.with_ymd_and_hms(2025, 5, 30, 8, 0, 0).unwrap());
        assert_eq!(record.author_id, author_id("salt", "dev@example.com"));
        assert_eq!(record.event_type, CommitKind::Commit);
    }

    #[test]
    fn test_later_export_replaces_earlier_payload() {
        let dir = tempdir().unwrap();
        let mut meta = FixedMetadata::default();
        let base = CommitMeta {
            subject: "original subject".to_string(),
            ..CommitMeta::default()
        };
        meta.0.insert("abc".to_string(), base.clone());
        let events = vec![event(1, "abc", now())];
        export_pending(dir.path(), &events, &RecordBuilder::new(&meta, "s", "h"), now()).unwrap();

        meta.0.insert(
            "abc".to_string(),
            CommitMeta {
                subject: "amended subject".to_string(),
                ..base
            },
        );
        export_pending(dir.path(), &events, &RecordBuilder::new(&meta, "s", "h"), now()).unwrap();

        let records = Partition::load(&dir.path().join(CURRENT_PARTITION)).unwrap().records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].message, "amended subject");
    }

    #[test]
    fn test_metadata_failure_falls_back_to_event() {
        let dir = tempdir().unwrap();
        let ts = Utc.with_ymd_and_hms(2025, 2, 2, 2, 2, 2).unwrap();
        export_pending(
            dir.path(),
            &[event(3, "gone", ts)],
            &RecordBuilder::new(&NoMetadata, "s", "desk"),
            now(),
        )
        .unwrap();

        let record = Partition::load(&dir.path().join(CURRENT_PARTITION))
            .unwrap()
            .records()
            .remove(0);
        assert_eq!(record.timestamp, ts);
        assert_eq!(record.branch, "main");
        assert_eq!(record.repo_name, "repo");
        assert_eq!(record.device, "desk");
        assert_eq!(record.files_changed, 0);
    }

    #[test]
    fn test_merge_commit_kind() {
        let mut meta = FixedMetadata::default();
        meta.0.insert(
            "m".to_string(),
            CommitMeta {
                parent_hashes: vec!["a".to_string(), "b".to_string()],
                ..CommitMeta::default()
            },
        );
        let record = RecordBuilder::new(&meta, "s", "h").build(&event(1, "m", now()));
        assert_eq!(record.event_type, CommitKind::Merge);
        assert_eq!(record.parent_hashes.len(), 2);
    }

    #[test]
    fn test_empty_input_touches_nothing() {
        let dir = tempdir().unwrap();
        let outcome =
            export_pending(dir.path(), &[], &RecordBuilder::new(&NoMetadata, "s", "h"), now()).unwrap();
        assert!(outcome.is_empty());
        assert!(!dir.path().join(CURRENT_PARTITION).exists());
    }
}

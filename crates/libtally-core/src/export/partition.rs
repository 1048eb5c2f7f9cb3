//! CSV ledger partitions
//!
//! A partition is loaded into an ordered map keyed by `repo_id:commit_hash`,
//! mutated by key, and written back in full with a deterministic sort. The
//! same inputs always produce the same bytes.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::Path;

use chrono::{DateTime, Datelike, Utc};
use tracing::{debug, warn};

use crate::error::TallyError;
use crate::types::record::{
    parse_timestamp, ExportRecord, COL_COMMIT_HASH, COL_EVENT_ID, COL_REPO_ID, COL_TIMESTAMP,
    CSV_HEADER,
};

/// A raw ledger row as found on disk.
///
/// Rows are kept verbatim so that a row written by a newer or older schema
/// survives a rewrite untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerRow {
    fields: Vec<String>,
}

impl LedgerRow {
    pub fn from_fields(fields: Vec<String>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// `repo_id:commit_hash`, or `None` if the row cannot be keyed
    pub fn key(&self) -> Option<String> {
        let repo_id = self.fields.get(COL_REPO_ID)?.trim();
        let commit = self.fields.get(COL_COMMIT_HASH)?.trim();
        if repo_id.is_empty() || commit.is_empty() {
            return None;
        }
        Some(super::ledger_key(repo_id, commit))
    }

    pub fn event_id(&self) -> Option<&str> {
        self.fields
            .get(COL_EVENT_ID)
            .map(String::as_str)
            .filter(|id| !id.is_empty())
    }

    /// Timestamp of a complete row; `None` for short rows or bad timestamps
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        if self.fields.len() < CSV_HEADER.len() {
            return None;
        }
        parse_timestamp(&self.fields[COL_TIMESTAMP])
    }

    pub fn to_record(&self) -> Option<ExportRecord> {
        ExportRecord::from_fields(&self.fields)
    }
}

impl From<&ExportRecord> for LedgerRow {
    fn from(record: &ExportRecord) -> Self {
        Self::from_fields(record.to_fields())
    }
}

/// All rows of one partition file, keyed by `repo_id:commit_hash`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Partition {
    rows: BTreeMap<String, LedgerRow>,
}

impl Partition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a partition file. A missing file is an empty partition.
    pub fn load(path: &Path) -> Result<Self, TallyError> {
        Ok(Self::load_with_bytes(path)?.0)
    }

    /// Load a partition and also return the bytes it was parsed from
    pub(crate) fn load_with_bytes(path: &Path) -> Result<(Self, Option<Vec<u8>>), TallyError> {
        match fs::read(path) {
            Ok(bytes) => {
                let mut partition = Self::new();
                partition.merge_reader(bytes.as_slice(), &path.display().to_string())?;
                Ok((partition, Some(bytes)))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok((Self::new(), None)),
            Err(e) => Err(e.into()),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TallyError> {
        let mut partition = Self::new();
        partition.merge_bytes(bytes, "buffer")?;
        Ok(partition)
    }

    /// Merge the two sides of a conflicted partition: ours first, then
    /// theirs, so the incoming version wins on duplicate keys.
    pub fn merge_versions(ours: Option<&[u8]>, theirs: Option<&[u8]>) -> Result<Self, TallyError> {
        let mut partition = Self::new();
        if let Some(bytes) = ours {
            partition.merge_bytes(bytes, "ours")?;
        }
        if let Some(bytes) = theirs {
            partition.merge_bytes(bytes, "theirs")?;
        }
        Ok(partition)
    }

    /// Merge CSV bytes into this partition, overwriting rows with equal keys.
    /// Returns the number of rows taken.
    pub fn merge_bytes(&mut self, bytes: &[u8], origin: &str) -> Result<usize, TallyError> {
        self.merge_reader(bytes, origin)
    }

    fn merge_reader<R: Read>(&mut self, reader: R, origin: &str) -> Result<usize, TallyError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let mut taken = 0;
        for (index, result) in reader.records().enumerate() {
            let record = match result {
                Ok(record) => record,
                Err(e) if e.is_io_error() => return Err(e.into()),
                Err(e) => {
                    warn!(origin, row = index + 1, error = %e, "skipping unreadable ledger row");
                    continue;
                }
            };

            let row = LedgerRow::from_fields(record.iter().map(str::to_string).collect());
            match row.key() {
                Some(key) => {
                    self.rows.insert(key, row);
                    taken += 1;
                }
                None => {
                    warn!(origin, row = index + 1, "skipping ledger row without repo_id/commit_hash");
                }
            }
        }
        debug!(origin, rows = taken, "loaded ledger rows");
        Ok(taken)
    }

    /// Insert or replace the row for this record's key.
    ///
    /// When the key already exists the stored `event_id` is kept, so
    /// exporting the same observation again leaves the file unchanged.
    /// Returns `true` if an existing row was replaced.
    pub fn upsert(&mut self, mut record: ExportRecord) -> bool {
        let key = record.key();
        if let Some(existing_id) = self.rows.get(&key).and_then(LedgerRow::event_id) {
            record.event_id = existing_id.to_string();
        }
        self.rows.insert(key, LedgerRow::from(&record)).is_some()
    }

    /// Insert a raw row verbatim, replacing any row with the same key
    pub fn insert_row(&mut self, key: String, row: LedgerRow) {
        self.rows.insert(key, row);
    }

    /// Remove complete rows whose timestamp falls outside `year`.
    ///
    /// Short rows and rows with unreadable timestamps stay where they are.
    pub fn split_off_other_years(&mut self, year: i32) -> Vec<(i32, String, LedgerRow)> {
        let stale: Vec<(String, i32)> = self
            .rows
            .iter()
            .filter_map(|(key, row)| {
                let row_year = row.timestamp()?.year();
                (row_year != year).then(|| (key.clone(), row_year))
            })
            .collect();

        stale
            .into_iter()
            .filter_map(|(key, row_year)| {
                let row = self.rows.remove(&key)?;
                Some((row_year, key, row))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&LedgerRow> {
        self.rows.get(key)
    }

    /// Rows ascending by timestamp, ties by key; incomplete rows last
    pub fn sorted_rows(&self) -> Vec<(&str, &LedgerRow)> {
        let mut rows: Vec<(&str, &LedgerRow, Option<DateTime<Utc>>)> = self
            .rows
            .iter()
            .map(|(key, row)| (key.as_str(), row, row.timestamp()))
            .collect();
        rows.sort_by(|a, b| {
            a.2.is_none()
                .cmp(&b.2.is_none())
                .then_with(|| a.2.cmp(&b.2))
                .then_with(|| a.0.cmp(b.0))
        });
        rows.into_iter().map(|(key, row, _)| (key, row)).collect()
    }

    /// Well-formed records in file order
    pub fn records(&self) -> Vec<ExportRecord> {
        self.sorted_rows()
            .into_iter()
            .filter_map(|(_, row)| row.to_record())
            .collect()
    }

    /// Serialize the whole partition: header, then sorted rows
    pub fn to_csv_bytes(&self) -> Result<Vec<u8>, TallyError> {
        let mut writer = csv::WriterBuilder::new()
            .flexible(true)
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(Vec::new());

        writer.write_record(CSV_HEADER)?;
        for (_, row) in self.sorted_rows() {
            writer.write_record(row.fields())?;
        }
        writer.into_inner().map_err(|e| {
            TallyError::Io(std::io::Error::new(e.error().kind(), e.error().to_string()))
        })
    }

    /// Write the partition to `path` durably: temp file, fsync, rename.
    pub fn write_to(&self, path: &Path) -> Result<(), TallyError> {
        let bytes = self.to_csv_bytes()?;
        write_durable(path, &bytes)
    }
}

/// Replace `path` with `bytes`, fsynced, owner read/write only
pub(crate) fn write_durable(path: &Path, bytes: &[u8]) -> Result<(), TallyError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file_name = path
        .file_name()
        .ok_or_else(|| TallyError::InvalidArgs(format!("not a file path: {}", path.display())))?;
    let tmp_path = path.with_file_name(format!(".{}.tmp", file_name.to_string_lossy()));

    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(&tmp_path)?;
    file.write_all(bytes)?;
    file.flush()?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp_path, path)?;
    Ok(())
}

//! Ledger synchronization through a git remote
//!
//! One cycle: make sure the export repository exists, integrate whatever
//! the remote has (resolving partition conflicts by key), merge pending
//! events into the partitions, commit, push, and only then mark the events
//! exported. Network trouble degrades to a local-only cycle; a conflict in
//! anything other than a partition stops the cycle before any local state
//! changes.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use libtally_core::export::{export_pending, is_partition_path, Partition, RecordBuilder};
use libtally_core::store::EventStore;
use libtally_core::types::{Event, EventStatus, RepoId};
use libtally_core::TrackingRegistry;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::retry::{RetryPolicy, Sleeper, ThreadSleeper};
use crate::runner::{GitRunner, MergeOutcome, Stage};
use crate::GitError;

/// How the cycle integrated remote history
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PullState {
    /// No `origin` configured
    NoRemote,
    /// The remote has no branches yet
    EmptyRemote,
    /// Remote history integrated without conflicts
    Pulled,
    /// Partition conflicts were merged by key
    Resolved { paths: Vec<String> },
    /// Fetch or pull failed; the cycle continued offline
    Failed { reason: String },
}

/// Outcome of the push step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PushState {
    NoRemote,
    /// Nothing has ever been committed
    NothingToPush,
    Pushed,
    Failed { reason: String },
}

impl PushState {
    /// Whether exported events may leave `pending`
    pub fn allows_status_advance(&self) -> bool {
        matches!(self, PushState::NoRemote | PushState::Pushed)
    }
}

/// Summary of one export cycle
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub pull: PullState,
    /// Events written to the ledger this cycle
    pub exported: usize,
    /// Partition files changed, relative to the export repository
    pub modified_partitions: Vec<String>,
    pub committed: bool,
    pub push: PushState,
    /// Events moved to `exported`
    pub marked_exported: usize,
    /// Pending events of untracked repositories moved to `orphaned`
    pub orphaned: usize,
    /// Orphaned events deleted
    pub purged: usize,
}

/// Drives export cycles against one export repository
pub struct SyncEngine<R: GitRunner> {
    runner: R,
    dir: PathBuf,
    retry: RetryPolicy,
    sleeper: Box<dyn Sleeper>,
    device: String,
}

impl<R: GitRunner> SyncEngine<R> {
    pub fn new(runner: R, dir: impl Into<PathBuf>, device: impl Into<String>) -> Self {
        Self {
            runner,
            dir: dir.into(),
            retry: RetryPolicy::default(),
            sleeper: Box::new(ThreadSleeper),
            device: device.into(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Box<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Create the export repository if it does not exist yet
    pub fn ensure_repo(&self) -> Result<bool, GitError> {
        if self.dir.join(".git").exists() {
            return Ok(false);
        }
        info!(dir = %self.dir.display(), "initializing export repository");
        self.runner.init()?;
        Ok(true)
    }

    /// Run a full cycle.
    ///
    /// Returns an error only for local failures and unresolvable conflicts.
    /// A failed push is reported in [`CycleReport::push`]; the events stay
    /// pending and the next cycle retries them.
    pub fn run_cycle(
        &self,
        store: &EventStore,
        builder: &RecordBuilder<'_>,
        registry: &dyn TrackingRegistry,
        now: DateTime<Utc>,
    ) -> Result<CycleReport, GitError> {
        self.ensure_repo()?;
        let has_remote = self.runner.has_remote()?;

        let pull = if has_remote {
            self.pull()?
        } else {
            PullState::NoRemote
        };

        let tracked: BTreeSet<RepoId> = registry.list_tracked().into_iter().collect();
        let pending = store.get_pending()?;
        let (exportable, untracked): (Vec<Event>, Vec<Event>) = pending
            .into_iter()
            .partition(|event| tracked.is_empty() || tracked.contains(&event.repo_id));
        debug!(
            exportable = exportable.len(),
            untracked = untracked.len(),
            "selected pending events"
        );

        let outcome = export_pending(&self.dir, &exportable, builder, now)?;
        let modified: Vec<String> = outcome
            .modified_partitions
            .iter()
            .map(|path| self.relative(path))
            .collect();

        let committed = self.commit_partitions(&modified, outcome.exported_ids.len())?;

        let push = if !has_remote {
            PushState::NoRemote
        } else if !self.runner.has_head()? {
            PushState::NothingToPush
        } else {
            match self.retry.run("push", self.sleeper.as_ref(), || self.runner.push()) {
                Ok(()) => PushState::Pushed,
                Err(e) => {
                    warn!(error = %e, "push failed, events stay pending");
                    PushState::Failed {
                        reason: e.to_string(),
                    }
                }
            }
        };

        let mut report = CycleReport {
            pull,
            exported: outcome.exported_ids.len(),
            modified_partitions: modified,
            committed,
            push,
            marked_exported: 0,
            orphaned: 0,
            purged: 0,
        };

        if !report.push.allows_status_advance() {
            return Ok(report);
        }

        report.marked_exported = store.update_status(&outcome.exported_ids, EventStatus::Exported)?;
        if !tracked.is_empty() {
            let (orphaned, purged) = self.cleanup_orphans(store, &untracked);
            report.orphaned = orphaned;
            report.purged = purged;
        }

        info!(
            exported = report.exported,
            marked = report.marked_exported,
            committed = report.committed,
            "export cycle complete"
        );
        Ok(report)
    }

    /// Best-effort integration of remote history
    fn pull(&self) -> Result<PullState, GitError> {
        if let Err(e) = self.retry.run("fetch", self.sleeper.as_ref(), || self.runner.fetch()) {
            warn!(error = %e, "fetch failed, continuing offline");
            return Ok(PullState::Failed {
                reason: e.to_string(),
            });
        }

        match self.runner.remote_has_branches() {
            Ok(false) => return Ok(PullState::EmptyRemote),
            Ok(true) => {}
            Err(e) => {
                warn!(error = %e, "could not list remote branches, continuing offline");
                return Ok(PullState::Failed {
                    reason: e.to_string(),
                });
            }
        }

        let mut outcome = match self.runner.pull_rebase() {
            Ok(outcome) => outcome,
            Err(e) => return self.pull_failed(e),
        };
        if outcome == MergeOutcome::UnrelatedHistories {
            info!("local and remote ledgers share no history, merging");
            outcome = match self.runner.merge_unrelated() {
                Ok(outcome) => outcome,
                Err(e) => return self.pull_failed(e),
            };
        }

        match outcome {
            MergeOutcome::Clean => Ok(PullState::Pulled),
            MergeOutcome::Conflicted => {
                let paths = self.resolve_conflicts()?;
                Ok(PullState::Resolved { paths })
            }
            MergeOutcome::UnrelatedHistories => self.pull_failed(GitError::Command {
                args: "merge --allow-unrelated-histories".to_string(),
                status: "refused".to_string(),
                stderr: "unrelated histories".to_string(),
            }),
        }
    }

    fn pull_failed(&self, e: GitError) -> Result<PullState, GitError> {
        if e.is_conflict() {
            return Err(e);
        }
        warn!(error = %e, "pull failed, continuing offline");
        Ok(PullState::Failed {
            reason: e.to_string(),
        })
    }

    /// Merge every conflicted partition by key, theirs winning, and
    /// conclude the merge. Any other conflicted file aborts the merge.
    fn resolve_conflicts(&self) -> Result<Vec<String>, GitError> {
        let paths = self.runner.conflicted_paths()?;

        let foreign: Vec<String> = paths
            .iter()
            .filter(|path| !is_partition_path(path))
            .cloned()
            .collect();
        if !foreign.is_empty() {
            self.abort_merge();
            return Err(GitError::UnresolvableConflict { paths: foreign });
        }

        for path in &paths {
            if let Err(e) = self.resolve_partition(path) {
                self.abort_merge();
                return Err(e);
            }
        }

        self.runner.add(&paths)?;
        self.runner
            .commit(&format!("tally: merge ledger from remote ({})", self.device))?;
        info!(files = paths.len(), "resolved partition conflicts");
        Ok(paths)
    }

    fn resolve_partition(&self, path: &str) -> Result<(), GitError> {
        let ours = self.runner.show_stage(Stage::Ours, path)?;
        let theirs = self.runner.show_stage(Stage::Theirs, path)?;
        if ours.is_none() && theirs.is_none() {
            return Err(GitError::MissingConflictVersions {
                path: path.to_string(),
            });
        }

        let merged = Partition::merge_versions(ours.as_deref(), theirs.as_deref())?;
        merged.write_to(&self.dir.join(path))?;
        debug!(path, rows = merged.len(), "partition conflict merged");
        Ok(())
    }

    fn abort_merge(&self) {
        if let Err(e) = self.runner.merge_abort() {
            warn!(error = %e, "failed to abort merge");
        }
    }

    fn commit_partitions(&self, modified: &[String], events: usize) -> Result<bool, GitError> {
        if modified.is_empty() {
            return Ok(false);
        }
        self.runner.add(modified)?;
        if !self.runner.has_staged_changes()? {
            return Ok(false);
        }
        self.runner.commit(&format!(
            "tally: export {} event{} from {}",
            events,
            if events == 1 { "" } else { "s" },
            self.device
        ))?;
        Ok(true)
    }

    fn cleanup_orphans(&self, store: &EventStore, untracked: &[Event]) -> (usize, usize) {
        let repos: BTreeSet<&RepoId> = untracked.iter().map(|e| &e.repo_id).collect();
        let mut orphaned = 0;
        for repo_id in repos {
            match store.mark_orphaned(repo_id) {
                Ok(n) => orphaned += n,
                Err(e) => warn!(repo = %repo_id, error = %e, "failed to orphan events"),
            }
        }
        let purged = match store.delete_orphaned() {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "failed to delete orphaned events");
                0
            }
        };
        (orphaned, purged)
    }

    fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.dir)
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned()
    }
}

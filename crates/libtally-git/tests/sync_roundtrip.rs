//! End-to-end sync between two machines through a bare remote
//!
//! Drives the real `git` binary. Skipped when git is not installed.

use std::path::{Path, PathBuf};
use std::process::Command;

use chrono::{TimeZone, Utc};
use libtally_core::export::{NoMetadata, Partition, RecordBuilder, CURRENT_PARTITION};
use libtally_core::store::EventStore;
use libtally_core::types::{Event, EventSource, RepoId};
use libtally_core::TrackingRegistry;
use libtally_git::{
    CliGit, GitError, GitRunner, PullState, PushState, RetryPolicy, SyncEngine, BRANCH, REMOTE,
};
use tempfile::TempDir;

struct TrackAll;

impl TrackingRegistry for TrackAll {
    fn is_tracked(&self, _repo_id: &RepoId) -> bool {
        true
    }
    fn list_tracked(&self) -> Vec<RepoId> {
        Vec::new()
    }
}

struct Machine {
    name: &'static str,
    store: EventStore,
    engine: SyncEngine<CliGit>,
}

impl Machine {
    fn new(root: &Path, name: &'static str, remote: &Path) -> Self {
        let dir = root.join(name).join("ledger");
        let engine = SyncEngine::new(CliGit::new(&dir, name), &dir, name)
            .with_retry(RetryPolicy::none());
        engine.ensure_repo().unwrap();
        engine.runner().set_remote(&remote.to_string_lossy()).unwrap();
        Self {
            name,
            store: EventStore::open(&root.join(name).join("events.db")).unwrap(),
            engine,
        }
    }

    fn record(&self, commit: &str, hour: u32) {
        self.store
            .insert(&Event::new(
                RepoId::from_remote_url("https://github.com/user/app").unwrap(),
                "/work/app",
                commit,
                "main",
                Utc.with_ymd_and_hms(2025, 3, 1, hour, 0, 0).unwrap(),
                EventSource::PostCommit,
            ))
            .unwrap();
    }

    fn try_cycle(&self) -> Result<libtally_git::CycleReport, GitError> {
        let builder = RecordBuilder::new(&NoMetadata, "salt", self.name);
        self.engine.run_cycle(
            &self.store,
            &builder,
            &TrackAll,
            Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(),
        )
    }

    fn cycle(&self) -> libtally_git::CycleReport {
        self.try_cycle().unwrap()
    }

    /// Commit a hand-edited README.md straight into the ledger repository
    fn commit_readme(&self, text: &str) {
        let dir = self.engine.dir();
        std::fs::write(dir.join("README.md"), text).unwrap();
        git(dir, &["add", "README.md"]);
        git(dir, &["commit", "--quiet", "-m", "edit readme"]);
    }

    fn ledger_commits(&self) -> Vec<String> {
        Partition::load(&self.engine.dir().join(CURRENT_PARTITION))
            .unwrap()
            .records()
            .into_iter()
            .map(|r| r.commit_hash)
            .collect()
    }

    fn pending(&self) -> usize {
        self.store.get_pending().unwrap().len()
    }
}

fn git_available() -> bool {
    Command::new("git").arg("--version").output().is_ok()
}

fn git(dir: &Path, args: &[&str]) {
    let output = Command::new("git")
        .args(["-c", "user.name=Dev", "-c", "user.email=dev@example.com"])
        .args(["-c", "commit.gpgsign=false"])
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
}

fn bare_remote(root: &Path) -> PathBuf {
    let remote = root.join("remote.git");
    let status = Command::new("git")
        .args(["init", "--bare", "--quiet"])
        .arg(&remote)
        .status()
        .unwrap();
    assert!(status.success());
    Command::new("git")
        .args(["symbolic-ref", "HEAD", "refs/heads/main"])
        .current_dir(&remote)
        .status()
        .unwrap();
    remote
}

#[test]
fn test_two_machines_converge() {
    if !git_available() {
        return;
    }
    let temp = TempDir::new().unwrap();
    let remote = bare_remote(temp.path());

    let a = Machine::new(temp.path(), "alpha", &remote);
    let b = Machine::new(temp.path(), "beta", &remote);

    a.record("a1", 1);
    let report = a.cycle();
    assert_eq!(report.pull, PullState::EmptyRemote);
    assert_eq!(report.push, PushState::Pushed);
    assert_eq!(a.pending(), 0);

    b.record("b1", 2);
    let report = b.cycle();
    assert_eq!(report.pull, PullState::Pulled);
    assert_eq!(report.push, PushState::Pushed);
    assert_eq!(b.ledger_commits(), vec!["a1", "b1"]);

    a.record("a2", 3);
    a.cycle();
    assert_eq!(a.ledger_commits(), vec!["a1", "b1", "a2"]);
}

#[test]
fn test_diverged_ledgers_merge_after_reconnect() {
    if !git_available() {
        return;
    }
    let temp = TempDir::new().unwrap();
    let remote = bare_remote(temp.path());

    let a = Machine::new(temp.path(), "alpha", &remote);
    let b = Machine::new(temp.path(), "beta", &remote);

    a.record("seed", 1);
    a.cycle();
    b.cycle();
    assert_eq!(b.ledger_commits(), vec!["seed"]);

    // beta goes offline and commits locally
    b.engine
        .runner()
        .set_remote(&temp.path().join("missing.git").to_string_lossy())
        .unwrap();
    b.record("b1", 3);
    let offline = b.cycle();
    assert!(matches!(offline.pull, PullState::Failed { .. }));
    assert!(matches!(offline.push, PushState::Failed { .. }));
    assert!(offline.committed);
    assert_eq!(b.pending(), 1);

    // alpha keeps pushing meanwhile
    a.record("a1", 2);
    a.cycle();

    // beta reconnects: both sides edited commits.csv
    b.engine.runner().set_remote(&remote.to_string_lossy()).unwrap();
    let report = b.cycle();
    assert!(
        matches!(report.pull, PullState::Resolved { .. } | PullState::Pulled),
        "unexpected pull state {:?}",
        report.pull
    );
    assert_eq!(report.push, PushState::Pushed);
    assert_eq!(b.pending(), 0);
    assert_eq!(b.ledger_commits(), vec!["seed", "a1", "b1"]);

    a.cycle();
    assert_eq!(a.ledger_commits(), vec!["seed", "a1", "b1"]);
}

#[test]
fn test_conflict_outside_ledger_aborts_and_keeps_events_pending() {
    if !git_available() {
        return;
    }
    let temp = TempDir::new().unwrap();
    let remote = bare_remote(temp.path());

    let a = Machine::new(temp.path(), "alpha", &remote);
    let b = Machine::new(temp.path(), "beta", &remote);

    a.record("seed", 1);
    a.cycle();
    b.cycle();

    // both sides edit a file tally does not own
    a.commit_readme("alpha notes\n");
    git(a.engine.dir(), &["push", "--quiet", REMOTE, BRANCH]);
    b.commit_readme("beta notes\n");

    b.record("b1", 2);
    let ledger = b.engine.dir().join(CURRENT_PARTITION);
    let before = std::fs::read(&ledger).unwrap();

    match b.try_cycle() {
        Err(GitError::UnresolvableConflict { paths }) => assert_eq!(paths, vec!["README.md"]),
        other => panic!("unexpected cycle result {:?}", other),
    }

    let git_dir = b.engine.dir().join(".git");
    assert!(!git_dir.join("MERGE_HEAD").exists());
    assert!(!git_dir.join("rebase-merge").exists());
    assert!(!git_dir.join("rebase-apply").exists());
    assert_eq!(std::fs::read(&ledger).unwrap(), before);
    assert_eq!(b.pending(), 1);
    assert_eq!(b.ledger_commits(), vec!["seed"]);
}

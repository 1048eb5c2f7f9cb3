//! Integration tests running the `tally` binary against temp directories

use std::path::Path;
use std::process::Command as StdCommand;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn tally(data_dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("tally").unwrap();
    cmd.env("TALLY_HOME", data_dir);
    cmd.env_remove("RUST_LOG");
    cmd
}

fn git_available() -> bool {
    StdCommand::new("git").arg("--version").output().is_ok()
}

fn git(dir: &Path, args: &[&str]) {
    let status = StdCommand::new("git")
        .args(["-c", "user.name=Dev", "-c", "user.email=dev@example.com"])
        .args(["-c", "commit.gpgsign=false"])
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap()
        .status;
    assert!(status.success(), "git {:?} failed", args);
}

/// Working repository with one commit and an origin remote
fn work_repo(root: &Path) -> std::path::PathBuf {
    let repo = root.join("work");
    std::fs::create_dir_all(&repo).unwrap();
    git(&repo, &["init", "--quiet"]);
    git(&repo, &["symbolic-ref", "HEAD", "refs/heads/main"]);
    git(&repo, &["remote", "add", "origin", "https://github.com/User/App.git"]);
    std::fs::write(repo.join("README.md"), "hello\n").unwrap();
    git(&repo, &["add", "README.md"]);
    git(&repo, &["commit", "--quiet", "-m", "first commit"]);
    repo
}

fn json(output: &[u8]) -> serde_json::Value {
    serde_json::from_slice(output).unwrap()
}

#[test]
fn test_stats_on_empty_store() {
    let temp = TempDir::new().unwrap();
    let out = tally(temp.path())
        .args(["--json", "stats"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let value = json(&out);
    assert_eq!(value["ok"], true);
    assert_eq!(value["data"]["total"], 0);
    assert_eq!(value["data"]["schema_version"], 2);
    assert_eq!(value["data"]["ledger_schema_version"], 1);
    assert_eq!(value["data"]["initialized"], false);
}

#[test]
fn test_export_requires_init() {
    let temp = TempDir::new().unwrap();
    tally(temp.path())
        .arg("export")
        .assert()
        .code(3)
        .stderr(predicate::str::contains("tally init"));
}

#[test]
fn test_invalid_filter_is_usage_error() {
    let temp = TempDir::new().unwrap();
    tally(temp.path())
        .args(["--json", "list", "--status", "finished"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("invalid_args"));
}

#[test]
fn test_record_list_and_export_locally() {
    if !git_available() {
        return;
    }
    let temp = TempDir::new().unwrap();
    let data = temp.path().join("data");
    let ledger = temp.path().join("ledger");
    let repo = work_repo(temp.path());

    tally(&data)
        .args(["init", "--export-repo"])
        .arg(&ledger)
        .args(["--interval", "3600", "--device", "laptop"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Initialized tally"));
    assert!(ledger.join(".git").exists());

    tally(&data)
        .args(["record", "--no-export", "--source", "post-commit", "--repo"])
        .arg(&repo)
        .assert()
        .success()
        .stdout(predicate::str::contains("github.com/user/app"));

    // same commit and source again collapses into one row
    tally(&data)
        .args(["record", "--no-export", "--source", "post-commit", "--repo"])
        .arg(&repo)
        .assert()
        .success();

    let out = tally(&data)
        .args(["--json", "list", "--status", "pending"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let value = json(&out);
    assert_eq!(value["data"]["total"], 1);
    assert_eq!(value["data"]["events"][0]["source"], "post-commit");
    assert_eq!(value["data"]["events"][0]["branch"], "main");

    let out = tally(&data)
        .args(["--json", "export", "--force"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let value = json(&out);
    assert_eq!(value["data"]["result"], "ran");
    assert_eq!(value["data"]["exported"], 1);
    assert_eq!(value["data"]["push"]["state"], "no_remote");

    let csv = std::fs::read_to_string(ledger.join("commits.csv")).unwrap();
    assert!(csv.starts_with("event_id,event_type,timestamp,repo_id"));
    assert!(csv.contains("first commit"));
    assert!(csv.contains("laptop"));

    // interval has not elapsed since the forced cycle
    tally(&data)
        .args(["--json", "export"])
        .assert()
        .success()
        .stdout(predicate::str::contains("not_due"));

    let out = tally(&data)
        .args(["--json", "stats"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let value = json(&out);
    assert_eq!(value["data"]["exported"], 1);
    assert_eq!(value["data"]["pending"], 0);
}

#[test]
fn test_track_untrack_and_migrate() {
    if !git_available() {
        return;
    }
    let temp = TempDir::new().unwrap();
    let data = temp.path().join("data");
    tally(&data)
        .args(["init", "--export-repo"])
        .arg(temp.path().join("ledger"))
        .assert()
        .success();

    tally(&data)
        .args(["track", "--id", "github.com/user/old"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Tracking github.com/user/old"));
    tally(&data)
        .args(["track", "--id", "github.com/user/old"])
        .assert()
        .success()
        .stdout(predicate::str::contains("already tracked"));

    let out = tally(&data)
        .args(["--json", "migrate-repo", "--from", "github.com/user/old", "--to", "github.com/user/new"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let value = json(&out);
    assert_eq!(value["data"]["migrated"], 0);
    assert_eq!(value["data"]["tracking_updated"], true);

    let config = std::fs::read_to_string(data.join("config.toml")).unwrap();
    assert!(config.contains("github.com/user/new"));
    assert!(!config.contains("github.com/user/old"));

    let out = tally(&data)
        .args(["--json", "track", "--id", "local:/work/scratch"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let value = json(&out);
    assert_eq!(value["data"]["local"], true);
    assert_eq!(value["data"]["changed"], true);

    tally(&data)
        .args(["track", "--id", "local:/work/other"])
        .assert()
        .success()
        .stdout(predicate::str::contains("no remote"));

    tally(&data)
        .args(["untrack", "--id", "github.com/user/new"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Stopped tracking"));
}

#[test]
fn test_rejects_traversal_repo_id() {
    let temp = TempDir::new().unwrap();
    tally(temp.path())
        .args(["purge", "--repo", "../etc"])
        .assert()
        .code(2);
}

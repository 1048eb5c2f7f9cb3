//! Narrow interface over the git operations the sync engine needs
//!
//! [`CliGit`] shells out to the `git` binary in the export repository so
//! that the user's credential helpers, SSH agent and remote config apply
//! unchanged.

use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tracing::{debug, warn};

use crate::GitError;

/// Remote the ledger is pushed to
pub const REMOTE: &str = "origin";
/// Branch the ledger lives on
pub const BRANCH: &str = "main";

/// Index stage of a conflicted path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Local version (`:2:`)
    Ours,
    /// Incoming version (`:3:`)
    Theirs,
}

impl Stage {
    pub fn number(self) -> u8 {
        match self {
            Stage::Ours => 2,
            Stage::Theirs => 3,
        }
    }
}

/// Result of integrating remote history
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// History integrated, working tree clean
    Clean,
    /// Local and remote share no ancestor
    UnrelatedHistories,
    /// A merge is in progress with conflicted paths
    Conflicted,
}

pub trait GitRunner {
    /// Create the repository
    fn init(&self) -> Result<(), GitError>;
    fn has_remote(&self) -> Result<bool, GitError>;
    /// Point `origin` at `url`
    fn set_remote(&self, url: &str) -> Result<(), GitError>;
    fn remote_has_branches(&self) -> Result<bool, GitError>;
    fn fetch(&self) -> Result<(), GitError>;
    fn pull_rebase(&self) -> Result<MergeOutcome, GitError>;
    fn merge_unrelated(&self) -> Result<MergeOutcome, GitError>;
    /// Repository-relative paths with unresolved conflicts
    fn conflicted_paths(&self) -> Result<Vec<String>, GitError>;
    /// Content of one side of a conflict, `None` if that side lacks the path
    fn show_stage(&self, stage: Stage, path: &str) -> Result<Option<Vec<u8>>, GitError>;
    fn add(&self, paths: &[String]) -> Result<(), GitError>;
    fn commit(&self, message: &str) -> Result<(), GitError>;
    fn merge_abort(&self) -> Result<(), GitError>;
    fn has_staged_changes(&self) -> Result<bool, GitError>;
    /// Whether any commit exists yet
    fn has_head(&self) -> Result<bool, GitError>;
    fn push(&self) -> Result<(), GitError>;
}

/// [`GitRunner`] backed by the `git` executable
#[derive(Debug, Clone)]
pub struct CliGit {
    work_dir: PathBuf,
    committer_name: String,
    committer_email: String,
}

impl CliGit {
    pub fn new(work_dir: impl Into<PathBuf>, device: &str) -> Self {
        Self {
            work_dir: work_dir.into(),
            committer_name: "tally".to_string(),
            committer_email: format!("tally@{}", device),
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    fn command<I, S>(&self, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = Command::new("git");
        cmd.arg("-c")
            .arg(format!("user.name={}", self.committer_name))
            .arg("-c")
            .arg(format!("user.email={}", self.committer_email))
            .arg("-c")
            .arg("commit.gpgsign=false")
            .args(args)
            .current_dir(&self.work_dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("GIT_MERGE_AUTOEDIT", "no");
        cmd
    }

    /// Run git and return its output whatever the exit status
    fn run(&self, args: &[&str]) -> Result<Output, GitError> {
        debug!(args = %args.join(" "), dir = %self.work_dir.display(), "git");
        Ok(self.command(args).output()?)
    }

    /// Run git and fail on a non-zero exit
    fn run_ok(&self, args: &[&str]) -> Result<Output, GitError> {
        let output = self.run(args)?;
        if output.status.success() {
            Ok(output)
        } else {
            Err(command_error(args, &output))
        }
    }

    fn in_rebase(&self) -> bool {
        let git_dir = self.work_dir.join(".git");
        git_dir.join("rebase-merge").exists() || git_dir.join("rebase-apply").exists()
    }

    fn upstream(&self) -> String {
        format!("{}/{}", REMOTE, BRANCH)
    }

    /// Merge the fetched branch. Conflicts leave the merge in progress.
    fn merge_fetched(&self, extra: &[&str]) -> Result<MergeOutcome, GitError> {
        let upstream = self.upstream();
        let mut args = vec!["merge", "--no-edit"];
        args.extend_from_slice(extra);
        args.push(&upstream);

        let output = self.run(&args)?;
        if output.status.success() {
            return Ok(MergeOutcome::Clean);
        }
        if is_unrelated_histories(&output) {
            return Ok(MergeOutcome::UnrelatedHistories);
        }
        if !self.conflicted_paths()?.is_empty() {
            return Ok(MergeOutcome::Conflicted);
        }
        Err(command_error(&args, &output))
    }
}

impl GitRunner for CliGit {
    fn init(&self) -> Result<(), GitError> {
        fs::create_dir_all(&self.work_dir)?;
        self.run_ok(&["init", "--quiet"])?;
        let head = format!("refs/heads/{}", BRANCH);
        self.run_ok(&["symbolic-ref", "HEAD", &head])?;
        Ok(())
    }

    fn has_remote(&self) -> Result<bool, GitError> {
        Ok(self.run(&["remote", "get-url", REMOTE])?.status.success())
    }

    fn set_remote(&self, url: &str) -> Result<(), GitError> {
        if self.has_remote()? {
            self.run_ok(&["remote", "set-url", REMOTE, url])?;
        } else {
            self.run_ok(&["remote", "add", REMOTE, url])?;
        }
        Ok(())
    }

    fn remote_has_branches(&self) -> Result<bool, GitError> {
        let output = self.run_ok(&["ls-remote", "--heads", REMOTE])?;
        Ok(!String::from_utf8_lossy(&output.stdout).trim().is_empty())
    }

    fn fetch(&self) -> Result<(), GitError> {
        self.run_ok(&["fetch", "--quiet", REMOTE])?;
        Ok(())
    }

    fn pull_rebase(&self) -> Result<MergeOutcome, GitError> {
        let args = ["pull", "--rebase", "--autostash", "--quiet", REMOTE, BRANCH];
        let output = self.run(&args)?;
        if output.status.success() {
            return Ok(MergeOutcome::Clean);
        }
        if is_unrelated_histories(&output) {
            return Ok(MergeOutcome::UnrelatedHistories);
        }
        if self.in_rebase() {
            // Replaying local commits hit a conflict. Fall back to a merge
            // so both sides of each file are available at stages 2 and 3.
            warn!("rebase onto {} conflicted, merging instead", self.upstream());
            self.run_ok(&["rebase", "--abort"])?;
            return self.merge_fetched(&[]);
        }
        Err(command_error(&args, &output))
    }

    fn merge_unrelated(&self) -> Result<MergeOutcome, GitError> {
        self.merge_fetched(&["--allow-unrelated-histories"])
    }

    fn conflicted_paths(&self) -> Result<Vec<String>, GitError> {
        let output = self.run_ok(&["diff", "--name-only", "--diff-filter=U", "-z"])?;
        Ok(output
            .stdout
            .split(|b| *b == 0)
            .filter(|p| !p.is_empty())
            .map(|p| String::from_utf8_lossy(p).into_owned())
            .collect())
    }

    fn show_stage(&self, stage: Stage, path: &str) -> Result<Option<Vec<u8>>, GitError> {
        let spec = format!(":{}:{}", stage.number(), path);
        let output = self.run(&["show", &spec])?;
        if output.status.success() {
            Ok(Some(output.stdout))
        } else {
            debug!(spec = %spec, "conflict side not present");
            Ok(None)
        }
    }

    fn add(&self, paths: &[String]) -> Result<(), GitError> {
        if paths.is_empty() {
            return Ok(());
        }
        let mut args = vec!["add", "--"];
        args.extend(paths.iter().map(String::as_str));
        self.run_ok(&args)?;
        Ok(())
    }

    fn commit(&self, message: &str) -> Result<(), GitError> {
        self.run_ok(&["commit", "--quiet", "--no-verify", "-m", message])?;
        Ok(())
    }

    fn merge_abort(&self) -> Result<(), GitError> {
        if self.in_rebase() {
            self.run_ok(&["rebase", "--abort"])?;
        } else {
            self.run_ok(&["merge", "--abort"])?;
        }
        Ok(())
    }

    fn has_staged_changes(&self) -> Result<bool, GitError> {
        let args = ["diff", "--cached", "--quiet"];
        let output = self.run(&args)?;
        match output.status.code() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(command_error(&args, &output)),
        }
    }

    fn has_head(&self) -> Result<bool, GitError> {
        Ok(self
            .run(&["rev-parse", "--verify", "--quiet", "HEAD"])?
            .status
            .success())
    }

    fn push(&self) -> Result<(), GitError> {
        let refspec = format!("HEAD:refs/heads/{}", BRANCH);
        self.run_ok(&["push", "--quiet", REMOTE, &refspec])?;
        Ok(())
    }
}

fn is_unrelated_histories(output: &Output) -> bool {
    String::from_utf8_lossy(&output.stderr).contains("unrelated histories")
}

fn command_error(args: &[&str], output: &Output) -> GitError {
    GitError::Command {
        args: args.join(" "),
        status: output.status.to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    }
}

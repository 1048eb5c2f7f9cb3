//! Resolve which repository a working directory belongs to

use std::path::{Path, PathBuf};

use git2::Repository;
use libtally_core::types::RepoId;
use tracing::debug;

use crate::GitError;

/// Identity and position of a working tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoContext {
    pub repo_id: RepoId,
    /// Root of the working tree
    pub work_dir: PathBuf,
    /// Current branch, or `HEAD` when detached
    pub branch: String,
    /// Full hash of `HEAD`, `None` on an unborn branch
    pub head: Option<String>,
}

/// Discover the repository containing `path`.
///
/// The id comes from the `origin` remote when there is one, so all clones
/// agree. Otherwise the canonical working tree path is used.
pub fn resolve_repo(path: &Path) -> Result<RepoContext, GitError> {
    let repo = Repository::discover(path).map_err(|_| GitError::NotARepo)?;
    let work_dir = repo.workdir().ok_or(GitError::NotARepo)?.to_path_buf();
    let work_dir = work_dir.canonicalize().unwrap_or(work_dir);

    let remote_url = repo
        .find_remote("origin")
        .ok()
        .and_then(|remote| remote.url().map(str::to_string));

    let repo_id = match remote_url {
        Some(url) => RepoId::from_remote_url(&url),
        None => RepoId::from_local_path(&work_dir),
    }
    .map_err(libtally_core::TallyError::from)?;

    let (branch, head) = match repo.head() {
        Ok(head_ref) => {
            let branch = if repo.head_detached().unwrap_or(false) {
                "HEAD".to_string()
            } else {
                head_ref.shorthand().unwrap_or("HEAD").to_string()
            };
            (branch, head_ref.target().map(|oid| oid.to_string()))
        }
        Err(_) => (unborn_branch(&repo), None),
    };

    debug!(repo = %repo_id, branch = %branch, "resolved repository");
    Ok(RepoContext {
        repo_id,
        work_dir,
        branch,
        head,
    })
}

fn unborn_branch(repo: &Repository) -> String {
    repo.find_reference("HEAD")
        .ok()
        .and_then(|r| r.symbolic_target().map(str::to_string))
        .and_then(|target| target.strip_prefix("refs/heads/").map(str::to_string))
        .unwrap_or_else(|| "HEAD".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;
    use tempfile::TempDir;

    fn git(dir: &Path, args: &[&str]) {
        let status = Command::new("git")
            .args(["-c", "user.name=Dev", "-c", "user.email=dev@example.com"])
            .args(["-c", "commit.gpgsign=false"])
            .args(args)
            .current_dir(dir)
            .output()
            .unwrap()
            .status;
        assert!(status.success());
    }

    fn setup_repo() -> Option<TempDir> {
        if Command::new("git").arg("--version").output().is_err() {
            return None;
        }
        let temp = TempDir::new().unwrap();
        git(temp.path(), &["init", "--quiet"]);
        git(temp.path(), &["symbolic-ref", "HEAD", "refs/heads/trunk"]);
        Some(temp)
    }

    #[test]
    fn test_local_repo_without_remote() {
        let Some(temp) = setup_repo() else { return };
        let nested = temp.path().join("src/deep");
        std::fs::create_dir_all(&nested).unwrap();

        let ctx = resolve_repo(&nested).unwrap();
        assert!(ctx.repo_id.is_local());
        assert_eq!(ctx.work_dir, temp.path().canonicalize().unwrap());
        assert_eq!(ctx.branch, "trunk");
        assert!(ctx.head.is_none());
    }

    #[test]
    fn test_origin_url_wins() {
        let Some(temp) = setup_repo() else { return };
        git(temp.path(), &["remote", "add", "origin", "git@github.com:User/Widgets.git"]);
        git(temp.path(), &["commit", "--quiet", "--allow-empty", "-m", "start"]);

        let ctx = resolve_repo(temp.path()).unwrap();
        assert_eq!(ctx.repo_id.as_str(), "github.com/user/widgets");
        assert_eq!(ctx.branch, "trunk");
        assert_eq!(ctx.head.as_ref().map(String::len), Some(40));
    }

    #[test]
    fn test_outside_repository() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(resolve_repo(temp.path()), Err(GitError::NotARepo)));
    }
}

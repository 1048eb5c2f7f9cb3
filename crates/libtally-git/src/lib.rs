//! Git transport for the tally ledger
//!
//! - [`SyncEngine`]: pull, conflict resolution, export, commit, push
//! - [`GitRunner`]: the git operations the engine relies on, with a
//!   subprocess implementation in [`CliGit`]
//! - [`GitMetadataSource`]: commit metadata for export records via libgit2
//! - [`resolve_repo`]: repository identity of a working tree

mod error;
mod identity;
mod metadata;
mod retry;
mod runner;
mod sync;

pub use error::GitError;
pub use identity::{resolve_repo, RepoContext};
pub use metadata::GitMetadataSource;
pub use retry::{RetryPolicy, Sleeper, ThreadSleeper};
pub use runner::{CliGit, GitRunner, MergeOutcome, Stage, BRANCH, REMOTE};
pub use sync::{CycleReport, PullState, PushState, SyncEngine};

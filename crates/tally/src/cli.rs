use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "tally", about = "Commit activity ledger synced through git", version)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress human-readable output
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Override the data directory (default: $TALLY_HOME or ~/.tally)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create the data directory, config and export repository
    Init {
        /// Working tree the CSV ledger is committed to
        #[arg(long)]
        export_repo: PathBuf,

        /// Remote URL for the export repository
        #[arg(long)]
        remote: Option<String>,

        /// Minimum seconds between scheduled exports (0 = every time)
        #[arg(long)]
        interval: Option<u64>,

        /// Device name recorded on exported rows
        #[arg(long)]
        device: Option<String>,
    },

    /// Record a commit observation (called from git hooks)
    Record {
        /// Working tree to record from (default: current directory)
        #[arg(long)]
        repo: Option<PathBuf>,

        /// Commit hash (default: HEAD)
        #[arg(long)]
        commit: Option<String>,

        /// Branch name (default: current branch)
        #[arg(long)]
        branch: Option<String>,

        /// Observation channel: post-commit, post-rewrite, post-checkout,
        /// post-merge, pre-push, manual, backfill
        #[arg(long, default_value = "manual")]
        source: String,

        /// Do not run a scheduled export afterwards
        #[arg(long)]
        no_export: bool,
    },

    /// Export pending events and sync the ledger
    Export {
        /// Ignore the export interval
        #[arg(long)]
        force: bool,
    },

    /// List recorded events, newest first
    List {
        /// Filter by status (pending, exported, orphaned, skipped)
        #[arg(long)]
        status: Option<String>,

        /// Filter by source
        #[arg(long)]
        source: Option<String>,

        /// Filter by repository id
        #[arg(long)]
        repo: Option<String>,

        /// Only events at or after this time (RFC 3339 or YYYY-MM-DD)
        #[arg(long)]
        since: Option<String>,

        /// Only events at or before this time (RFC 3339 or YYYY-MM-DD)
        #[arg(long)]
        until: Option<String>,

        /// Maximum number of events
        #[arg(long, default_value = "50")]
        limit: usize,
    },

    /// Follow newly recorded events until interrupted
    Watch {
        /// Only events of this repository id
        #[arg(long)]
        repo: Option<String>,
    },

    /// Start exporting a repository's events
    Track {
        /// Working tree (default: current directory)
        path: Option<PathBuf>,

        /// Repository id instead of a path
        #[arg(long, conflicts_with = "path")]
        id: Option<String>,
    },

    /// Stop exporting a repository's events
    Untrack {
        /// Working tree (default: current directory)
        path: Option<PathBuf>,

        /// Repository id instead of a path
        #[arg(long, conflicts_with = "path")]
        id: Option<String>,
    },

    /// Move pending events from one repository id to another
    MigrateRepo {
        #[arg(long)]
        from: String,

        #[arg(long)]
        to: String,
    },

    /// Delete orphaned events
    Purge {
        /// Orphan this repository's pending events first
        #[arg(long)]
        repo: Option<String>,
    },

    /// Show event store statistics
    Stats,
}

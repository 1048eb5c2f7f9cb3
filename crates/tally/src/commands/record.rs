use std::path::PathBuf;

use chrono::Utc;
use libtally_core::{
    config::load_config, schedule::ExportTrigger, Event, EventSource, TallyError,
};
use libtally_git::resolve_repo;
use serde::Serialize;
use tracing::warn;

use crate::cli::Cli;
use crate::commands::export::{run_gated_cycle, CycleOutcome};
use crate::context::TallyContext;
use crate::output::{output_success, print_human};

pub struct RecordArgs {
    pub repo: Option<PathBuf>,
    pub commit: Option<String>,
    pub branch: Option<String>,
    pub source: String,
    pub export: bool,
}

#[derive(Serialize)]
struct RecordOutput {
    id: i64,
    repo_id: String,
    commit_hash: String,
    branch: String,
    source: EventSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    export: Option<CycleOutcome>,
}

/// Record one observation. Runs as a git hook, so a failing export never
/// fails the command once the event is stored.
pub fn run(cli: &Cli, args: RecordArgs) -> Result<(), TallyError> {
    let ctx = TallyContext::resolve(cli)?;
    let source: EventSource = args.source.parse()?;

    let path = match args.repo {
        Some(path) => path,
        None => std::env::current_dir()?,
    };
    let repo = resolve_repo(&path).map_err(TallyError::from)?;

    let commit_hash = match args.commit.map(|c| c.trim().to_string()) {
        Some(commit) if !commit.is_empty() => commit,
        Some(_) => return Err(TallyError::InvalidArgs("empty commit hash".to_string())),
        None => repo.head.clone().ok_or_else(|| {
            TallyError::InvalidArgs(format!(
                "{} has no commits yet; pass --commit",
                repo.work_dir.display()
            ))
        })?,
    };
    let branch = args.branch.unwrap_or_else(|| repo.branch.clone());

    let event = Event::new(
        repo.repo_id.clone(),
        repo.work_dir.to_string_lossy().to_string(),
        commit_hash,
        branch,
        Utc::now(),
        source,
    );

    let store = ctx.open_store()?;
    let id = store.insert(&event)?;
    drop(store);

    let export = if args.export {
        opportunistic_export(&ctx)
    } else {
        None
    };

    print_human(
        cli,
        &format!(
            "Recorded {} {} ({})",
            event.repo_id,
            short(&event.commit_hash),
            event.source
        ),
    );
    output_success(
        cli,
        RecordOutput {
            id,
            repo_id: event.repo_id.to_string(),
            commit_hash: event.commit_hash,
            branch: event.branch,
            source: event.source,
            export,
        },
    );

    Ok(())
}

fn opportunistic_export(ctx: &TallyContext) -> Option<CycleOutcome> {
    let config = match load_config(&ctx.data_dir) {
        Ok(Some(config)) => config,
        Ok(None) => return None,
        Err(e) => {
            warn!(error = %e, "config unreadable, export skipped");
            return None;
        }
    };
    match run_gated_cycle(ctx, &config, ExportTrigger::Scheduled) {
        Ok(outcome) => Some(outcome),
        Err(e) => {
            warn!(error = %e, "export after record failed; events stay pending");
            None
        }
    }
}

fn short(hash: &str) -> &str {
    hash.get(..libtally_core::types::SHORT_HASH_LEN).unwrap_or(hash)
}

use std::path::PathBuf;

use libtally_core::{config::save_config, RepoId, TallyError};
use libtally_git::resolve_repo;
use serde::Serialize;

use crate::cli::Cli;
use crate::context::TallyContext;
use crate::output::{output_success, print_human};

#[derive(Serialize)]
struct TrackOutput {
    repo_id: String,
    tracked: bool,
    changed: bool,
    local: bool,
    tracked_count: usize,
}

/// Add (`track = true`) or remove a repository from the tracked list
pub fn run(cli: &Cli, path: Option<PathBuf>, id: Option<String>, track: bool) -> Result<(), TallyError> {
    let ctx = TallyContext::resolve(cli)?;
    let mut config = ctx.config()?;

    let repo_id = match id {
        Some(id) => RepoId::parse(&id)?,
        None => {
            let path = match path {
                Some(path) => path,
                None => std::env::current_dir()?,
            };
            resolve_repo(&path).map_err(TallyError::from)?.repo_id
        }
    };

    let changed = if track {
        config.track(repo_id.clone())
    } else {
        config.untrack(&repo_id)
    };
    if changed {
        save_config(&ctx.data_dir, &config)?;
    }

    let msg = match (track, changed) {
        (true, true) if repo_id.is_local() => format!(
            "Tracking {} (no remote; other machines will record it under a different id)",
            repo_id
        ),
        (true, true) => format!("Tracking {}", repo_id),
        (true, false) => format!("{} is already tracked", repo_id),
        (false, true) => format!(
            "Stopped tracking {}; its pending events are orphaned on the next export",
            repo_id
        ),
        (false, false) => format!("{} was not tracked", repo_id),
    };
    print_human(cli, &msg);
    output_success(
        cli,
        TrackOutput {
            repo_id: repo_id.to_string(),
            tracked: track,
            changed,
            local: repo_id.is_local(),
            tracked_count: config.tracked.len(),
        },
    );
    Ok(())
}

use libtally_core::{config::{load_config, save_config}, RepoId, TallyError};
use serde::Serialize;
use tracing::info;

use crate::cli::Cli;
use crate::context::TallyContext;
use crate::output::{output_success, print_human};

#[derive(Serialize)]
struct MigrateOutput {
    from: String,
    to: String,
    migrated: usize,
    tracking_updated: bool,
}

/// Re-key pending events, e.g. after a repository moved to a new remote.
/// Exported rows keep their id since they are already in the ledger.
pub fn run(cli: &Cli, from: &str, to: &str) -> Result<(), TallyError> {
    let from = RepoId::parse(from)?;
    let to = RepoId::parse(to)?;
    if from == to {
        return Err(TallyError::InvalidArgs("--from and --to are the same".to_string()));
    }

    let ctx = TallyContext::resolve(cli)?;
    let store = ctx.open_store()?;
    let migrated = store.migrate_repo_id(&from, &to)?;

    let mut tracking_updated = false;
    if let Some(mut config) = load_config(&ctx.data_dir)? {
        if config.untrack(&from) {
            config.track(to.clone());
            save_config(&ctx.data_dir, &config)?;
            tracking_updated = true;
        }
    }

    info!(from = %from, to = %to, migrated, "migrated repository id");
    print_human(cli, &format!("Moved {} pending event(s) from {} to {}", migrated, from, to));
    output_success(
        cli,
        MigrateOutput {
            from: from.to_string(),
            to: to.to_string(),
            migrated,
            tracking_updated,
        },
    );
    Ok(())
}

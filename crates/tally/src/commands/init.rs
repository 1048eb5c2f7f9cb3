use std::path::PathBuf;

use libtally_core::{
    config::{load_config, save_config, Config},
    hash::generate_salt,
    TallyError,
};
use libtally_git::{CliGit, GitRunner, SyncEngine};
use serde::Serialize;
use tracing::info;

use crate::cli::Cli;
use crate::context::TallyContext;
use crate::output::{output_success, print_human};

#[derive(Serialize)]
struct InitOutput {
    data_dir: String,
    export_repo: String,
    remote: Option<String>,
    export_interval_secs: u64,
    device: String,
    schema_version: u32,
    created_export_repo: bool,
    reinitialized: bool,
}

pub fn run(
    cli: &Cli,
    export_repo: PathBuf,
    remote: Option<String>,
    interval: Option<u64>,
    device: Option<String>,
) -> Result<(), TallyError> {
    let ctx = TallyContext::resolve(cli)?;
    let export_repo = absolute(export_repo)?;

    // Re-init keeps the salt so author ids stay stable across runs
    let existing = load_config(&ctx.data_dir)?;
    let reinitialized = existing.is_some();
    let mut config = match existing {
        Some(mut config) => {
            config.export_repo = export_repo;
            config
        }
        None => Config::new(export_repo, generate_salt()),
    };
    if remote.is_some() {
        config.remote = remote;
    }
    if let Some(interval) = interval {
        config.export_interval_secs = interval;
    }
    if let Some(device) = device {
        if device.trim().is_empty() {
            return Err(TallyError::InvalidArgs("device name must not be empty".to_string()));
        }
        config.device = device;
    }

    let store = ctx.open_store()?;
    let schema_version = store.schema_version();
    drop(store);

    let engine = SyncEngine::new(
        CliGit::new(&config.export_repo, &config.device),
        &config.export_repo,
        config.device.clone(),
    );
    let created_export_repo = engine.ensure_repo().map_err(TallyError::from)?;
    if let Some(url) = &config.remote {
        engine.runner().set_remote(url).map_err(TallyError::from)?;
    }

    save_config(&ctx.data_dir, &config)?;
    info!(data_dir = %ctx.data_dir.display(), "initialized");

    output_success(
        cli,
        InitOutput {
            data_dir: ctx.data_dir.to_string_lossy().to_string(),
            export_repo: config.export_repo.to_string_lossy().to_string(),
            remote: config.remote.clone(),
            export_interval_secs: config.export_interval_secs,
            device: config.device.clone(),
            schema_version,
            created_export_repo,
            reinitialized,
        },
    );
    print_human(
        cli,
        &format!(
            "Initialized tally in {} (ledger: {})",
            ctx.data_dir.display(),
            config.export_repo.display()
        ),
    );

    Ok(())
}

fn absolute(path: PathBuf) -> Result<PathBuf, TallyError> {
    if path.is_absolute() {
        Ok(path)
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

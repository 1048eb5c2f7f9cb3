use libtally_core::{
    config::{load_config, load_state},
    types::CSV_SCHEMA_VERSION,
    StoreStats, TallyError,
};
use serde::Serialize;

use crate::cli::Cli;
use crate::context::TallyContext;
use crate::output::{output_success, print_human};

#[derive(Serialize)]
struct StatsOutput {
    #[serde(flatten)]
    store: StoreStats,
    ledger_schema_version: u32,
    initialized: bool,
    tracked: usize,
    export_interval_secs: Option<u64>,
    last_export_unix: Option<i64>,
}

pub fn run(cli: &Cli) -> Result<(), TallyError> {
    let ctx = TallyContext::resolve(cli)?;
    let store = ctx.open_store()?;
    let stats = store.stats()?;
    let config = load_config(&ctx.data_dir)?;
    let state = load_state(&ctx.data_dir)?;

    let output = StatsOutput {
        ledger_schema_version: CSV_SCHEMA_VERSION,
        initialized: config.is_some(),
        tracked: config.as_ref().map(|c| c.tracked.len()).unwrap_or(0),
        export_interval_secs: config.as_ref().map(|c| c.export_interval_secs),
        last_export_unix: state.last_export_unix,
        store: stats,
    };

    print_human(
        cli,
        &format!(
            "Database: {} (schema v{}, ledger v{})\nEvents: {} total, {} pending, {} exported, {} orphaned, {} skipped\nRepositories: {} ({} tracked)",
            output.store.path,
            output.store.schema_version,
            output.ledger_schema_version,
            output.store.total,
            output.store.pending,
            output.store.exported,
            output.store.orphaned,
            output.store.skipped,
            output.store.repositories,
            output.tracked,
        ),
    );
    output_success(cli, output);
    Ok(())
}

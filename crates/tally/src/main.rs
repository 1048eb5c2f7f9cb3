mod cli;
mod commands;
mod context;
mod output;

use clap::Parser;
use cli::{Cli, Command};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() {
    let cli = Cli::parse();

    // Logs go to stderr so `--json` output on stdout stays parseable
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let result = match &cli.command {
        Command::Init {
            export_repo,
            remote,
            interval,
            device,
        } => commands::init::run(&cli, export_repo.clone(), remote.clone(), *interval, device.clone()),
        Command::Record {
            repo,
            commit,
            branch,
            source,
            no_export,
        } => commands::record::run(
            &cli,
            commands::record::RecordArgs {
                repo: repo.clone(),
                commit: commit.clone(),
                branch: branch.clone(),
                source: source.clone(),
                export: !*no_export,
            },
        ),
        Command::Export { force } => commands::export::run(&cli, *force),
        Command::List {
            status,
            source,
            repo,
            since,
            until,
            limit,
        } => commands::list::run(
            &cli,
            commands::list::ListArgs {
                status: status.clone(),
                source: source.clone(),
                repo: repo.clone(),
                since: since.clone(),
                until: until.clone(),
                limit: *limit,
            },
        ),
        Command::Watch { repo } => commands::watch::run(&cli, repo.clone()),
        Command::Track { path, id } => commands::track::run(&cli, path.clone(), id.clone(), true),
        Command::Untrack { path, id } => commands::track::run(&cli, path.clone(), id.clone(), false),
        Command::MigrateRepo { from, to } => commands::migrate::run(&cli, from, to),
        Command::Purge { repo } => commands::purge::run(&cli, repo.clone()),
        Command::Stats => commands::stats::run(&cli),
    };

    if let Err(e) = result {
        output::output_error(&cli, &e);
        std::process::exit(e.exit_code());
    }
}

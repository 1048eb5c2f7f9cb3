use libtally_core::{EventFilter, RepoId, TallyError, Tailer};
use tracing::{info, warn};

use crate::cli::Cli;
use crate::context::TallyContext;
use crate::output::{print_human, print_json_line};

/// Print newly recorded events until Ctrl-C or SIGTERM.
///
/// JSON mode writes one event object per line.
pub fn run(cli: &Cli, repo: Option<String>) -> Result<(), TallyError> {
    let filter = EventFilter {
        repo_id: repo.as_deref().map(RepoId::parse).transpose()?,
        ..EventFilter::default()
    };
    let ctx = TallyContext::resolve(cli)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let store = ctx.open_store()?;
        let mut tailer = Tailer::from_end(&store, filter)?;
        info!(cursor = tailer.cursor(), "watching for events");
        print_human(cli, "Watching for new events (Ctrl-C to stop)");

        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(tailer.interval()) => {
                    for event in tailer.poll(&store)? {
                        if cli.json {
                            print_json_line(&event);
                        } else {
                            print_human(
                                cli,
                                &format!(
                                    "{} {} {} {} ({})",
                                    event.timestamp.format("%Y-%m-%d %H:%M:%S"),
                                    event.repo_id,
                                    event.commit_hash,
                                    event.branch,
                                    event.source
                                ),
                            );
                        }
                    }
                }
            }
        }

        info!(cursor = tailer.cursor(), "watch stopped");
        Ok::<(), TallyError>(())
    })
}

/// Resolves on the first Ctrl-C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

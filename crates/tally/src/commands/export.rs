use chrono::Utc;
use libtally_core::{
    config::{load_state, save_state, Config},
    schedule::{is_due, ExportTrigger},
    ExportLock, RecordBuilder, TallyError,
};
use libtally_git::{CliGit, CycleReport, GitMetadataSource, PullState, PushState, SyncEngine};
use serde::Serialize;
use tracing::{debug, info};

use crate::cli::Cli;
use crate::context::TallyContext;
use crate::output::{output_success, print_human};

/// Why a cycle did not run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NotDue,
    Locked,
}

#[derive(Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CycleOutcome {
    Ran(CycleReport),
    Skipped { reason: SkipReason },
}

pub fn run(cli: &Cli, force: bool) -> Result<(), TallyError> {
    let ctx = TallyContext::resolve(cli)?;
    let config = ctx.config()?;
    let trigger = if force {
        ExportTrigger::Manual
    } else {
        ExportTrigger::Scheduled
    };

    let outcome = run_gated_cycle(&ctx, &config, trigger)?;
    print_human(cli, &describe(&outcome));
    output_success(cli, outcome);
    Ok(())
}

/// Run one export cycle if the gate and the single-flight lock allow it.
///
/// Scheduler state is advanced whenever the cycle itself completed, also when
/// the push failed, so an offline machine waits a full interval before trying
/// again. The events of such a cycle stay pending.
pub fn run_gated_cycle(
    ctx: &TallyContext,
    config: &Config,
    trigger: ExportTrigger,
) -> Result<CycleOutcome, TallyError> {
    let now = Utc::now();
    let state = load_state(&ctx.data_dir)?;
    if !is_due(trigger, now, state.last_export_unix, config.export_interval_secs) {
        debug!(last = ?state.last_export_unix, "export not due");
        return Ok(CycleOutcome::Skipped {
            reason: SkipReason::NotDue,
        });
    }

    let _lock = match ExportLock::try_acquire(&ctx.lock_path()) {
        Ok(lock) => lock,
        Err(TallyError::DbBusy(msg)) => {
            info!(reason = %msg, "export already in progress, skipping");
            return Ok(CycleOutcome::Skipped {
                reason: SkipReason::Locked,
            });
        }
        Err(e) => return Err(e),
    };

    let store = ctx.open_store()?;
    let metadata = GitMetadataSource;
    let builder = RecordBuilder::new(&metadata, &config.author_salt, &config.device);
    let engine = SyncEngine::new(
        CliGit::new(&config.export_repo, &config.device),
        &config.export_repo,
        config.device.clone(),
    );

    let report = engine
        .run_cycle(&store, &builder, config, now)
        .map_err(TallyError::from)?;

    let mut state = state;
    state.last_export_unix = Some(Utc::now().timestamp());
    save_state(&ctx.data_dir, &state)?;

    info!(
        exported = report.exported,
        marked = report.marked_exported,
        committed = report.committed,
        "export cycle finished"
    );
    Ok(CycleOutcome::Ran(report))
}

pub fn describe(outcome: &CycleOutcome) -> String {
    match outcome {
        CycleOutcome::Skipped {
            reason: SkipReason::NotDue,
        } => "Export not due yet (use --force to export now)".to_string(),
        CycleOutcome::Skipped {
            reason: SkipReason::Locked,
        } => "Another export is running; skipped".to_string(),
        CycleOutcome::Ran(report) => {
            let mut lines = vec![format!(
                "Exported {} event(s), {} marked exported",
                report.exported, report.marked_exported
            )];
            if !report.modified_partitions.is_empty() {
                lines.push(format!("Updated {}", report.modified_partitions.join(", ")));
            }
            match &report.pull {
                PullState::Resolved { paths } => {
                    lines.push(format!("Resolved conflicts in {}", paths.join(", ")))
                }
                PullState::Failed { reason } => lines.push(format!("Pull failed: {}", reason)),
                _ => {}
            }
            match &report.push {
                PushState::Pushed => lines.push("Pushed".to_string()),
                PushState::Failed { reason } => {
                    lines.push(format!("Push failed, events stay pending: {}", reason))
                }
                PushState::NoRemote => lines.push("No remote configured".to_string()),
                PushState::NothingToPush => {}
            }
            if report.orphaned > 0 || report.purged > 0 {
                lines.push(format!(
                    "Orphaned {} untracked event(s), purged {}",
                    report.orphaned, report.purged
                ));
            }
            lines.join("\n")
        }
    }
}

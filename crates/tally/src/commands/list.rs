use comfy_table::{presets, ContentArrangement, Table};
use libtally_core::{
    types::{parse_time_arg, SHORT_HASH_LEN},
    Event, EventFilter, EventSource, EventStatus, RepoId, TallyError,
};
use serde::Serialize;

use crate::cli::Cli;
use crate::context::TallyContext;
use crate::output::{output_success, print_human};

pub struct ListArgs {
    pub status: Option<String>,
    pub source: Option<String>,
    pub repo: Option<String>,
    pub since: Option<String>,
    pub until: Option<String>,
    pub limit: usize,
}

#[derive(Serialize)]
struct ListOutput {
    events: Vec<Event>,
    total: usize,
}

pub fn run(cli: &Cli, args: ListArgs) -> Result<(), TallyError> {
    let filter = build_filter(args)?;
    let ctx = TallyContext::resolve(cli)?;
    let store = ctx.open_store()?;
    let events = store.list(&filter)?;

    if events.is_empty() {
        print_human(cli, "No events");
    } else {
        print_human(cli, &render_table(&events).to_string());
    }

    let total = events.len();
    output_success(cli, ListOutput { events, total });
    Ok(())
}

fn build_filter(args: ListArgs) -> Result<EventFilter, TallyError> {
    if args.limit == 0 {
        return Err(TallyError::InvalidArgs("--limit must be at least 1".to_string()));
    }
    let since = args.since.as_deref().map(parse_time_arg).transpose()?;
    let until = args.until.as_deref().map(parse_time_arg).transpose()?;
    if let (Some(since), Some(until)) = (since, until) {
        if since > until {
            return Err(TallyError::InvalidArgs("--since is after --until".to_string()));
        }
    }

    Ok(EventFilter {
        status: args.status.as_deref().map(str::parse::<EventStatus>).transpose()?,
        source: args.source.as_deref().map(str::parse::<EventSource>).transpose()?,
        repo_id: args.repo.as_deref().map(RepoId::parse).transpose()?,
        since,
        until,
        since_id: None,
        limit: Some(args.limit),
    })
}

fn render_table(events: &[Event]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_HORIZONTAL_ONLY)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["id", "time", "repo", "commit", "branch", "source", "status"]);

    for event in events {
        table.add_row(vec![
            event.id.to_string(),
            event.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            event.repo_id.to_string(),
            event
                .commit_hash
                .get(..SHORT_HASH_LEN)
                .unwrap_or(&event.commit_hash)
                .to_string(),
            event.branch.clone(),
            event.source.to_string(),
            event.status.to_string(),
        ]);
    }
    table
}

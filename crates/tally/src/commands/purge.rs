use libtally_core::{RepoId, TallyError};
use serde::Serialize;

use crate::cli::Cli;
use crate::context::TallyContext;
use crate::output::{output_success, print_human};

#[derive(Serialize)]
struct PurgeOutput {
    orphaned: usize,
    deleted: usize,
}

pub fn run(cli: &Cli, repo: Option<String>) -> Result<(), TallyError> {
    let repo = repo.as_deref().map(RepoId::parse).transpose()?;
    let ctx = TallyContext::resolve(cli)?;
    let store = ctx.open_store()?;

    let orphaned = match &repo {
        Some(repo_id) => store.mark_orphaned(repo_id)?,
        None => 0,
    };
    let deleted = store.delete_orphaned()?;

    print_human(cli, &format!("Deleted {} orphaned event(s)", deleted));
    output_success(cli, PurgeOutput { orphaned, deleted });
    Ok(())
}

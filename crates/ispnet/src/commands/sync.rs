//! Sync command handlers.

use ispnet_core::{SyncDirection, SyncOptions, SyncResult};
use tabled::Tabled;

use crate::cli::{GlobalOpts, SyncArgs, SyncCommand, SyncRunArgs};
use crate::config::Context;
use crate::error::CliError;
use crate::output;

use super::util;

#[derive(Tabled)]
struct SyncRow {
    #[tabled(rename = "Device")]
    device: String,
    #[tabled(rename = "Entity")]
    entity: String,
    #[tabled(rename = "Total")]
    total: usize,
    #[tabled(rename = "Created")]
    created: usize,
    #[tabled(rename = "Updated")]
    updated: usize,
    #[tabled(rename = "Unchanged")]
    unchanged: usize,
    #[tabled(rename = "Deleted")]
    deleted: usize,
    #[tabled(rename = "Failed")]
    failed: usize,
    #[tabled(rename = "Skipped")]
    skipped: usize,
    #[tabled(rename = "Outcome")]
    outcome: String,
}

fn row(r: &SyncResult, color: bool) -> SyncRow {
    let mut outcome = output::paint_outcome(r.outcome, color);
    if r.dry_run {
        outcome.push_str(" (dry run)");
    }
    if r.cancelled {
        outcome.push_str(" (interrupted)");
    }
    SyncRow {
        device: r.device_id.to_string(),
        entity: r.entity_type.to_string(),
        total: r.total,
        created: r.created,
        updated: r.updated,
        unchanged: r.unchanged,
        deleted: r.deleted,
        failed: r.failed,
        skipped: r.skipped,
        outcome,
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(ctx: &Context, args: SyncArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let (direction, run) = match args.command {
        SyncCommand::Import(run) => (SyncDirection::Import, run),
        SyncCommand::Mirror(run) => (SyncDirection::Mirror, run),
        SyncCommand::Prune(run) => (SyncDirection::Prune, run),
    };
    run_sync(ctx, direction, run, global).await
}

async fn run_sync(
    ctx: &Context,
    direction: SyncDirection,
    run: SyncRunArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let entity_type = util::entity(run.entity);
    let devices = ctx.platform.select(&util::selector(&run.selector)).await?;

    if direction == SyncDirection::Prune && !run.dry_run {
        let prompt = format!(
            "Delete {entity_type} rows missing from the store on {} device(s)?",
            devices.len()
        );
        if !util::confirm(&prompt, global.yes)? {
            return Ok(());
        }
    }

    let options = SyncOptions {
        active_only: !run.include_disabled,
        dry_run: run.dry_run,
    };
    let spinner = output::spinner(&format!("{direction} {entity_type}"), global);
    let report = ctx
        .platform
        .sync_fleet(devices, entity_type, direction, options, &ctx.cancel)
        .await;
    spinner.finish_and_clear();

    let settled = util::settle(report);
    let results: Vec<SyncResult> = settled.completed.iter().map(|(_, r)| r.clone()).collect();

    let color = output::should_color(&global.color);
    let out = output::render_list(
        &global.output,
        &results,
        |r| row(r, color),
        |r| format!("{} {}", r.device_id, r.outcome),
    )?;
    output::print_output(&out, global.quiet);

    for result in &results {
        for err in &result.errors {
            eprintln!("{}: {} {}: {}", result.device_id, err.kind, err.key, err.message);
        }
    }

    let incomplete = results.iter().filter(|r| !r.is_success()).count();
    let total = settled.total();
    settled.finish()?;
    if results.iter().any(|r| r.cancelled) {
        return Err(CliError::Cancelled);
    }
    if incomplete > 0 {
        return Err(CliError::Partial {
            failed: incomplete,
            total,
        });
    }
    Ok(())
}

//! Configuration snapshot handlers.

use bytesize::ByteSize;
use ispnet_core::{
    BackupRecord, BackupTrigger, DeviceId, DiffLine, DiffTag, RetentionPolicy, run_fleet,
};
use owo_colors::OwoColorize;
use serde::Serialize;
use tabled::Tabled;

use crate::cli::{BackupArgs, BackupCommand, GlobalOpts, OutputFormat};
use crate::config::Context;
use crate::error::CliError;
use crate::output;

use super::util;

#[derive(Tabled)]
struct BackupRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Device")]
    device: String,
    #[tabled(rename = "Created")]
    created: String,
    #[tabled(rename = "Trigger")]
    trigger: String,
    #[tabled(rename = "Size")]
    size: String,
    #[tabled(rename = "Digest")]
    digest: String,
    #[tabled(rename = "Note")]
    note: String,
}

impl From<&BackupRecord> for BackupRow {
    fn from(r: &BackupRecord) -> Self {
        Self {
            id: r.id.to_string(),
            device: r.device_id.to_string(),
            created: r.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            trigger: r.trigger.to_string(),
            size: ByteSize::b(r.size_bytes).to_string(),
            digest: r.digest.chars().take(12).collect(),
            note: output::or_dash(r.note.as_ref()),
        }
    }
}

#[derive(Serialize)]
struct BackupView<'a> {
    #[serde(flatten)]
    record: &'a BackupRecord,
    content: &'a str,
}

fn record_detail(r: &BackupRecord) -> String {
    let mut lines = vec![
        format!("ID:       {}", r.id),
        format!("Device:   {}", r.device_id),
        format!("Created:  {}", r.created_at.to_rfc3339()),
        format!("Trigger:  {}", r.trigger),
        format!("Size:     {}", ByteSize::b(r.size_bytes)),
        format!("Digest:   {}", r.digest),
    ];
    if let Some(note) = &r.note {
        lines.push(format!("Note:     {note}"));
    }
    if let Some(change) = r.change_id {
        lines.push(format!("Change:   {change}"));
    }
    lines.join("\n")
}

fn render_diff(lines: &[DiffLine], color: bool) -> String {
    lines
        .iter()
        .map(|line| match line.tag {
            DiffTag::Added if color => format!("+{}", line.text).green().to_string(),
            DiffTag::Removed if color => format!("-{}", line.text).red().to_string(),
            DiffTag::Added => format!("+{}", line.text),
            DiffTag::Removed => format!("-{}", line.text),
            DiffTag::Context => format!(" {}", line.text),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn retention(
    ctx: &Context,
    keep_last: Option<usize>,
    max_age: Option<&str>,
) -> Result<RetentionPolicy, CliError> {
    let mut policy = ispnet_config::retention_policy(&ctx.config.defaults)?;
    if let Some(keep) = keep_last {
        policy.keep_last = keep;
    }
    if let Some(age) = max_age {
        let parsed = humantime::parse_duration(age).map_err(|e| CliError::Validation {
            field: "max-age".into(),
            reason: e.to_string(),
        })?;
        policy.max_age = Some(parsed);
    }
    Ok(policy)
}

fn print_records(records: &[BackupRecord], global: &GlobalOpts) -> Result<(), CliError> {
    let out = output::render_list(&global.output, records, |r| BackupRow::from(r), |r| r.id.to_string())?;
    output::print_output(&out, global.quiet);
    Ok(())
}

// ── Handler ─────────────────────────────────────────────────────────

#[allow(clippy::too_many_lines)]
pub async fn handle(ctx: &Context, args: BackupArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let backup = ctx.platform.backup();

    match args.command {
        BackupCommand::Create {
            selector,
            note,
            scheduled,
        } => {
            let devices = ctx.platform.select(&util::selector(&selector)).await?;
            let trigger = if scheduled {
                BackupTrigger::Scheduled
            } else {
                BackupTrigger::Manual
            };
            let spinner = output::spinner("Exporting configuration", global);
            let report = ctx
                .platform
                .backup_fleet(devices, trigger, note, &ctx.cancel)
                .await;
            spinner.finish_and_clear();

            let settled = util::settle(report);
            let records: Vec<BackupRecord> =
                settled.completed.iter().map(|(_, r)| r.clone()).collect();
            print_records(&records, global)?;
            settled.finish()
        }

        BackupCommand::List { device } => {
            let records = backup.list_backups(&DeviceId::new(device.as_str())).await?;
            print_records(&records, global)
        }

        BackupCommand::Show { id } => {
            let stored = backup.get_backup(util::parse_uuid("id", &id)?).await?;
            let view = BackupView {
                record: &stored.record,
                content: &stored.content,
            };
            let out = match global.output {
                OutputFormat::Table | OutputFormat::Plain => stored.content.clone(),
                _ => output::render_single(&global.output, &view, |v| v.content.to_owned(), |v| {
                    v.record.id.to_string()
                })?,
            };
            output::print_output(&out, global.quiet);
            Ok(())
        }

        BackupCommand::Diff { from, to } => {
            let lines = backup
                .diff(util::parse_uuid("from", &from)?, util::parse_uuid("to", &to)?)
                .await?;
            let out = match global.output {
                OutputFormat::Table | OutputFormat::Plain => {
                    render_diff(&lines, output::should_color(&global.color))
                }
                _ => output::render_single(&global.output, &lines, |_| String::new(), |_| {
                    String::new()
                })?,
            };
            output::print_output(&out, global.quiet);
            Ok(())
        }

        BackupCommand::Restore { device, id } => {
            let backup_id = util::parse_uuid("id", &id)?;
            let prompt = format!("Overwrite the running configuration of {device} with {backup_id}?");
            if !util::confirm(&prompt, global.yes)? {
                return Ok(());
            }
            let spinner = output::spinner("Restoring configuration", global);
            let result = backup
                .restore(&DeviceId::new(device.as_str()), backup_id)
                .await;
            spinner.finish_and_clear();
            result?;
            if !global.quiet {
                eprintln!("Restored {backup_id} onto {device}");
            }
            Ok(())
        }

        BackupCommand::Begin { device, reason } => {
            let ticket = backup
                .begin_change(&DeviceId::new(device.as_str()), &reason)
                .await?;
            let out = output::render_single(
                &global.output,
                &ticket,
                |t| format!("Change:   {}\n{}", t.change_id, record_detail(&t.backup)),
                |t| t.change_id.to_string(),
            )?;
            output::print_output(&out, global.quiet);
            Ok(())
        }

        BackupCommand::Revert { change_id } => {
            let change = util::parse_uuid("change-id", &change_id)?;
            let prompt = format!("Revert change {change} by restoring its pre-change snapshot?");
            if !util::confirm(&prompt, global.yes)? {
                return Ok(());
            }
            let spinner = output::spinner("Reverting change", global);
            let result = backup.revert(change).await;
            spinner.finish_and_clear();
            let record = result?;
            let out = output::render_single(&global.output, &record, record_detail, |r| {
                r.id.to_string()
            })?;
            output::print_output(&out, global.quiet);
            Ok(())
        }

        BackupCommand::Prune {
            selector,
            keep_last,
            max_age,
        } => {
            let policy = retention(ctx, keep_last, max_age.as_deref())?;
            let devices = ctx.platform.select(&util::selector(&selector)).await?;
            let policy = &policy;
            let report = run_fleet(
                devices,
                ctx.platform.config().concurrency,
                &ctx.cancel,
                |id| async move { backup.apply_retention(&id, policy).await },
            )
            .await;

            let settled = util::settle(report);
            let deleted: Vec<BackupRecord> = settled
                .completed
                .iter()
                .flat_map(|(_, records)| records.iter().cloned())
                .collect();
            print_records(&deleted, global)?;
            settled.finish()
        }
    }
}

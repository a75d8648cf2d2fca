//! RADIUS failover handlers.

use ispnet_core::{AuthMode, DeviceId, FailoverLogEntry, FailoverState, FleetReport, run_fleet};
use serde::Serialize;
use tabled::Tabled;

use crate::cli::{FailoverArgs, FailoverCommand, GlobalOpts, SelectorArgs};
use crate::config::Context;
use crate::error::CliError;
use crate::output;

use super::util;

#[derive(Tabled)]
struct StateRow {
    #[tabled(rename = "Device")]
    device: String,
    #[tabled(rename = "Connected")]
    connected: String,
    #[tabled(rename = "RADIUS")]
    radius: String,
    #[tabled(rename = "Accounting")]
    accounting: String,
    #[tabled(rename = "Local Secrets")]
    local_secrets: usize,
    #[tabled(rename = "Watchdog")]
    watchdog: String,
    #[tabled(rename = "Mode")]
    mode: String,
    #[tabled(rename = "Notes")]
    notes: String,
}

fn yes_no(flag: bool) -> String {
    let word = if flag { "yes" } else { "no" };
    word.into()
}

impl From<&FailoverState> for StateRow {
    fn from(s: &FailoverState) -> Self {
        let radius = match (s.radius_configured, s.radius_enabled) {
            (false, _) => "-".into(),
            (true, false) => "configured".into(),
            (true, true) => "enabled".into(),
        };
        let mode = if s.connected && s.effective_mode() != s.primary_auth {
            format!("{} (recorded {})", s.effective_mode(), s.primary_auth)
        } else {
            s.primary_auth.to_string()
        };
        let mut notes = s.warnings.clone();
        if let Some(err) = &s.error {
            notes.insert(0, err.clone());
        }
        Self {
            device: s.device_id.to_string(),
            connected: yes_no(s.connected),
            radius,
            accounting: yes_no(s.accounting_enabled),
            local_secrets: s.local_secrets_enabled,
            watchdog: output::or_dash(s.watchdog_status.as_ref()),
            mode,
            notes: notes.join("; "),
        }
    }
}

#[derive(Tabled)]
struct LogRow {
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Topics")]
    topics: String,
    #[tabled(rename = "Message")]
    message: String,
}

impl From<&FailoverLogEntry> for LogRow {
    fn from(e: &FailoverLogEntry) -> Self {
        Self {
            time: e.time.clone(),
            topics: e.topics.clone(),
            message: e.message.clone(),
        }
    }
}

#[derive(Serialize)]
struct RadiusTest {
    device_id: DeviceId,
    reachable: bool,
}

#[derive(Clone, Copy)]
enum Action {
    Configure,
    Switch(AuthMode),
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(ctx: &Context, args: FailoverArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        FailoverCommand::Configure(sel) => apply(ctx, &sel, Action::Configure, global).await,
        FailoverCommand::Radius(sel) => {
            apply(ctx, &sel, Action::Switch(AuthMode::Radius), global).await
        }
        FailoverCommand::Router(sel) => {
            apply(ctx, &sel, Action::Switch(AuthMode::Router), global).await
        }
        FailoverCommand::Hybrid(sel) => {
            apply(ctx, &sel, Action::Switch(AuthMode::Hybrid), global).await
        }

        FailoverCommand::Status(sel) => {
            let devices = ctx.platform.select(&util::selector(&sel)).await?;
            let spinner = output::spinner("Reading failover state", global);
            let report = ctx
                .platform
                .failover_status_fleet(devices, &ctx.cancel)
                .await;
            spinner.finish_and_clear();
            print_states(report, global)
        }

        FailoverCommand::Test { device } => {
            let id = DeviceId::new(device.as_str());
            let reachable = ctx.platform.failover().test_radius_connection(&id).await?;
            let result = RadiusTest {
                device_id: id,
                reachable,
            };
            let out = output::render_single(
                &global.output,
                &result,
                |r| {
                    if r.reachable {
                        format!("{}: RADIUS server answered", r.device_id)
                    } else {
                        format!("{}: no reply from RADIUS server", r.device_id)
                    }
                },
                |r| yes_no(r.reachable),
            )?;
            output::print_output(&out, global.quiet);
            if reachable {
                Ok(())
            } else {
                Err(CliError::DeviceError {
                    device: result.device_id.to_string(),
                    message: "RADIUS server unreachable from router".into(),
                })
            }
        }

        FailoverCommand::Log { device, limit } => {
            let id = DeviceId::new(device.as_str());
            let entries = ctx.platform.failover().failover_log(&id, limit).await?;
            let out = output::render_list(&global.output, &entries, |e| LogRow::from(e), |e| {
                format!("{} {}", e.time, e.message)
            })?;
            output::print_output(&out, global.quiet);
            Ok(())
        }
    }
}

async fn apply(
    ctx: &Context,
    sel: &SelectorArgs,
    action: Action,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let devices = ctx.platform.select(&util::selector(sel)).await?;

    if let Action::Switch(mode) = action {
        let prompt = format!("Switch {} router(s) to {mode} authentication?", devices.len());
        if !util::confirm(&prompt, global.yes)? {
            return Ok(());
        }
    }

    let failover = ctx.platform.failover();
    let label = match action {
        Action::Configure => "Configuring RADIUS failover".to_owned(),
        Action::Switch(mode) => format!("Switching to {mode} mode"),
    };
    let spinner = output::spinner(&label, global);
    let report = run_fleet(
        devices,
        ctx.platform.config().concurrency,
        &ctx.cancel,
        |id| async move {
            match action {
                Action::Configure => failover.configure_failover(&id).await,
                Action::Switch(AuthMode::Radius) => failover.switch_to_radius_mode(&id).await,
                Action::Switch(AuthMode::Router) => failover.switch_to_router_mode(&id).await,
                Action::Switch(AuthMode::Hybrid) => failover.switch_to_hybrid_mode(&id).await,
            }
        },
    )
    .await;
    spinner.finish_and_clear();

    if let Action::Switch(mode) = action {
        // The registry holds the mode of every switch that landed, including
        // ones whose final read-back failed.
        let attempted: Vec<DeviceId> = report
            .completed()
            .map(|(id, _)| id.clone())
            .chain(report.failed().map(|(id, _)| id.clone()))
            .collect();
        for id in attempted {
            let switched = ctx
                .platform
                .registry()
                .get(&id)
                .await
                .is_some_and(|device| device.descriptor.primary_auth == mode);
            if !switched {
                continue;
            }
            if let Err(e) = ispnet_config::record_primary_auth(&ctx.config_path, &id, mode) {
                tracing::warn!(device = %id, error = %e, "could not record auth mode in config");
            }
        }
    }

    print_states(report, global)
}

fn print_states(report: FleetReport<FailoverState>, global: &GlobalOpts) -> Result<(), CliError> {
    let settled = util::settle(report);
    let states: Vec<FailoverState> = settled.completed.iter().map(|(_, s)| s.clone()).collect();
    let out = output::render_list(&global.output, &states, |s| StateRow::from(s), |s| {
        format!("{} {}", s.device_id, s.primary_auth)
    })?;
    output::print_output(&out, global.quiet);
    settled.finish()
}

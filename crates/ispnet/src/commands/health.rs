//! Health probe handlers.

use ispnet_core::{DeviceId, DeviceSelector, ErrorKind, HealthReport};
use tabled::Tabled;

use crate::cli::{GlobalOpts, HealthArgs, HealthCommand};
use crate::config::Context;
use crate::error::CliError;
use crate::output;

use super::util;

#[derive(Tabled)]
struct HealthRow {
    #[tabled(rename = "Device")]
    device: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Latency")]
    latency: String,
    #[tabled(rename = "CPU")]
    cpu: String,
    #[tabled(rename = "Memory")]
    memory: String,
    #[tabled(rename = "Checked")]
    checked: String,
    #[tabled(rename = "Message")]
    message: String,
}

fn pct(value: Option<f64>) -> String {
    output::or_dash(value.map(|v| format!("{v:.0}%")))
}

fn row(r: &HealthReport, color: bool) -> HealthRow {
    let resources = r.resources.as_ref();
    HealthRow {
        device: r.device_id.to_string(),
        status: output::paint_status(r.status, color),
        latency: output::or_dash(r.latency_ms.map(|ms| format!("{ms} ms"))),
        cpu: pct(resources.and_then(|s| s.cpu_load_pct)),
        memory: pct(resources.and_then(|s| s.memory_used_pct)),
        checked: r.checked_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        message: r.message.clone(),
    }
}

fn detail(r: &HealthReport, color: bool) -> String {
    let mut lines = vec![
        format!("Device:   {}", r.device_id),
        format!("Status:   {}", output::paint_status(r.status, color)),
        format!("Latency:  {}", output::or_dash(r.latency_ms.map(|ms| format!("{ms} ms")))),
    ];
    if let Some(res) = &r.resources {
        lines.push(format!("CPU:      {}", pct(res.cpu_load_pct)));
        lines.push(format!("Memory:   {}", pct(res.memory_used_pct)));
        lines.push(format!("Uptime:   {}", output::or_dash(res.uptime.as_ref())));
    }
    lines.push(format!("Checked:  {}", r.checked_at.to_rfc3339()));
    lines.push(format!("Message:  {}", r.message));
    lines.join("\n")
}

/// Exit status for a single probe.
fn probe_result(report: HealthReport) -> Result<(), CliError> {
    if report.is_healthy() {
        return Ok(());
    }
    let device = report.device_id.to_string();
    Err(match report.error {
        _ if !report.reachable => CliError::ConnectionFailed {
            device,
            reason: report.message,
        },
        Some(ErrorKind::Auth) => CliError::AuthFailed { device },
        _ => CliError::DeviceError {
            device,
            message: report.message,
        },
    })
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(ctx: &Context, args: HealthArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let color = output::should_color(&global.color);

    match args.command {
        HealthCommand::Check { device } => {
            let report = ctx
                .platform
                .health()
                .check_device(&DeviceId::new(device.as_str()))
                .await?;
            let out = output::render_single(
                &global.output,
                &report,
                |r| detail(r, color),
                |r| format!("{} {}", r.device_id, r.status),
            )?;
            output::print_output(&out, global.quiet);
            probe_result(report)
        }

        HealthCommand::Fleet(sel) => {
            let selector = if sel.devices.is_empty() && sel.kind.is_none() {
                DeviceSelector::all(None)
            } else {
                util::selector(&sel)
            };
            let devices = ctx.platform.select(&selector).await?;
            let spinner = output::spinner("Probing devices", global);
            let fleet = ctx.platform.health().check_fleet(devices, &ctx.cancel).await;
            spinner.finish_and_clear();

            let out = output::render_list(
                &global.output,
                &fleet.reports,
                |r| row(r, color),
                |r| format!("{} {}", r.device_id, r.status),
            )?;
            output::print_output(&out, global.quiet);

            for (device, message) in &fleet.errors {
                eprintln!("{device}: {message}");
            }
            for device in &fleet.skipped {
                eprintln!("{device}: skipped (interrupted)");
            }
            if !global.quiet {
                eprintln!("{} healthy, {} unhealthy", fleet.healthy, fleet.unhealthy);
            }

            let total = fleet.reports.len() + fleet.errors.len() + fleet.skipped.len();
            let failed = fleet.unhealthy + fleet.errors.len();
            if failed > 0 {
                return Err(CliError::Partial { failed, total });
            }
            if !fleet.skipped.is_empty() {
                return Err(CliError::Cancelled);
            }
            Ok(())
        }

        HealthCommand::History { device, limit } => {
            let id = DeviceId::new(device.as_str());
            if ctx.platform.registry().get(&id).await.is_none() {
                return Err(CliError::NotFound {
                    resource_type: "device".into(),
                    identifier: device,
                    list_command: "devices list".into(),
                });
            }
            let reports = ctx.platform.health_log().recent_health(&id, limit).await?;
            let out = output::render_list(
                &global.output,
                &reports,
                |r| row(r, color),
                |r| format!("{} {}", r.checked_at.to_rfc3339(), r.status),
            )?;
            output::print_output(&out, global.quiet);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use ispnet_core::DeviceStatus;

    use super::*;

    fn report(reachable: bool, error: Option<ErrorKind>) -> HealthReport {
        HealthReport {
            device_id: DeviceId::new("r1"),
            reachable,
            latency_ms: None,
            status: DeviceStatus::Warning,
            message: "probe".into(),
            resources: None,
            error,
            checked_at: Utc::now(),
        }
    }

    #[test]
    fn rejected_login_is_an_auth_failure() {
        let err = probe_result(report(true, Some(ErrorKind::Auth))).err();
        assert!(matches!(err, Some(CliError::AuthFailed { .. })));
    }

    #[test]
    fn resource_warning_is_success() {
        assert!(probe_result(report(true, None)).is_ok());
        let err = probe_result(report(false, Some(ErrorKind::Connection))).err();
        assert!(matches!(err, Some(CliError::ConnectionFailed { .. })));
    }
}

//! Device inventory handlers.

use chrono::{DateTime, Utc};
use ispnet_core::{
    AuthMode, Device, DeviceId, DeviceKind, DeviceStatus, ManagementProtocol, Vendor,
};
use serde::Serialize;
use tabled::Tabled;

use crate::cli::{DevicesArgs, DevicesCommand, GlobalOpts};
use crate::config::Context;
use crate::error::CliError;
use crate::output;

use super::util;

/// Serializable view of a registry entry; credentials never leave core.
#[derive(Serialize)]
struct DeviceView {
    id: DeviceId,
    name: String,
    kind: DeviceKind,
    vendor: Vendor,
    protocol: ManagementProtocol,
    host: String,
    port: u16,
    primary_auth: AuthMode,
    status: DeviceStatus,
    last_checked: Option<DateTime<Utc>>,
}

impl From<Device> for DeviceView {
    fn from(d: Device) -> Self {
        let desc = d.descriptor;
        Self {
            id: desc.id,
            name: desc.name,
            kind: desc.kind,
            vendor: desc.vendor,
            protocol: desc.protocol,
            host: desc.host,
            port: desc.port,
            primary_auth: desc.primary_auth,
            status: d.status,
            last_checked: d.last_checked,
        }
    }
}

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Vendor")]
    vendor: String,
    #[tabled(rename = "Protocol")]
    protocol: String,
    #[tabled(rename = "Auth")]
    auth: String,
}

impl From<&DeviceView> for DeviceRow {
    fn from(d: &DeviceView) -> Self {
        Self {
            id: d.id.to_string(),
            name: d.name.clone(),
            kind: d.kind.to_string(),
            vendor: d.vendor.to_string(),
            protocol: d.protocol.to_string(),
            auth: match d.kind {
                DeviceKind::Router => d.primary_auth.to_string(),
                DeviceKind::Olt => "-".into(),
            },
        }
    }
}

fn detail(d: &DeviceView) -> String {
    [
        format!("ID:       {}", d.id),
        format!("Name:     {}", d.name),
        format!("Kind:     {}", d.kind),
        format!("Vendor:   {}", d.vendor),
        format!("Address:  {}:{} ({})", d.host, d.port, d.protocol),
        format!("Auth:     {}", d.primary_auth),
        format!("Status:   {}", d.status),
        format!("Checked:  {}", output::or_dash(d.last_checked.map(|t| t.to_rfc3339()))),
    ]
    .join("\n")
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(ctx: &Context, args: DevicesArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let registry = ctx.platform.registry();
    match args.command {
        DevicesCommand::List { kind } => {
            let devices: Vec<DeviceView> = registry
                .list(kind.map(util::kind))
                .await
                .into_iter()
                .map(DeviceView::from)
                .collect();
            let out = output::render_list(
                &global.output,
                &devices,
                |d| DeviceRow::from(d),
                |d| d.id.to_string(),
            )?;
            output::print_output(&out, global.quiet);
            Ok(())
        }

        DevicesCommand::Show { device } => {
            let found = registry
                .get(&DeviceId::new(device.as_str()))
                .await
                .ok_or_else(|| CliError::NotFound {
                    resource_type: "device".into(),
                    identifier: device,
                    list_command: "devices list".into(),
                })?;
            let view = DeviceView::from(found);
            let out = output::render_single(&global.output, &view, detail, |d| d.id.to_string())?;
            output::print_output(&out, global.quiet);
            Ok(())
        }
    }
}

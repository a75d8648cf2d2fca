// ── OLT vendor OID table ──
//
// Static per-vendor OIDs for ONU discovery, parsed once and validated when
// the platform is built. Interpretation helpers turn raw SNMP values into
// canonical ONU fields.

use std::sync::LazyLock;

use ispnet_api::{Oid, Value};
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::error::CoreError;
use crate::model::Vendor;

/// `SNMPv2-MIB::sysDescr.0`, used as the OLT liveness probe.
pub const SYS_DESCR: &str = "1.3.6.1.2.1.1.1.0";

/// Parsed OIDs for one vendor.
#[derive(Debug, Clone)]
pub struct VendorOids {
    pub vendor: Vendor,
    /// ONU list tables, tried in order until one yields rows.
    pub onu_list: Vec<Oid>,
    pub onu_status: Option<Oid>,
    pub onu_rx_power: Option<Oid>,
    pub onu_tx_power: Option<Oid>,
    pub onu_distance: Option<Oid>,
    /// Integer optical power readings are divided by this to get dBm.
    pub power_divisor: f64,
}

struct RawOids {
    vendor: Vendor,
    onu_list: &'static [&'static str],
    onu_status: Option<&'static str>,
    onu_rx_power: Option<&'static str>,
    onu_tx_power: Option<&'static str>,
    onu_distance: Option<&'static str>,
    power_divisor: f64,
}

const RAW_TABLE: &[RawOids] = &[
    RawOids {
        vendor: Vendor::Vsol,
        onu_list: &[
            "1.3.6.1.2.1.155.1.4.1.5.1",
            "1.3.6.1.4.1.11606.10.101.6.1",
            "1.3.6.1.4.1.37950.1.1.5.12.1.25.1.3",
        ],
        onu_status: Some("1.3.6.1.4.1.37950.1.1.5.12.1.25.1.4"),
        onu_rx_power: Some("1.3.6.1.4.1.37950.1.1.5.12.1.25.1.5"),
        onu_tx_power: Some("1.3.6.1.4.1.37950.1.1.5.12.1.25.1.6"),
        onu_distance: Some("1.3.6.1.4.1.37950.1.1.5.12.1.25.1.7"),
        power_divisor: 1.0,
    },
    RawOids {
        vendor: Vendor::Huawei,
        onu_list: &[
            "1.3.6.1.4.1.2011.6.128.1.1.2.43.1.3",
            "1.3.6.1.4.1.2011.5.104.1.1.1",
        ],
        onu_status: Some("1.3.6.1.4.1.2011.6.128.1.1.2.46.1.15"),
        onu_rx_power: Some("1.3.6.1.4.1.2011.6.128.1.1.2.51.1.4"),
        onu_tx_power: Some("1.3.6.1.4.1.2011.6.128.1.1.2.51.1.6"),
        onu_distance: Some("1.3.6.1.4.1.2011.6.128.1.1.2.53.1.1"),
        power_divisor: 100.0,
    },
    RawOids {
        vendor: Vendor::Zte,
        onu_list: &["1.3.6.1.4.1.3902.1012.3.28.1.1.5"],
        onu_status: Some("1.3.6.1.4.1.3902.1012.3.28.2.1.5"),
        onu_rx_power: Some("1.3.6.1.4.1.3902.1012.3.50.12.1.1.10"),
        onu_tx_power: Some("1.3.6.1.4.1.3902.1012.3.50.12.1.1.9"),
        onu_distance: Some("1.3.6.1.4.1.3902.1012.3.28.2.1.9"),
        power_divisor: 1.0,
    },
    RawOids {
        vendor: Vendor::Bdcom,
        onu_list: &["1.3.6.1.4.1.3320.101.11.1.1.2"],
        onu_status: Some("1.3.6.1.4.1.3320.101.11.4.1.5"),
        onu_rx_power: Some("1.3.6.1.4.1.3320.101.108.1.1.9"),
        onu_tx_power: Some("1.3.6.1.4.1.3320.101.108.1.1.10"),
        onu_distance: Some("1.3.6.1.4.1.3320.101.11.1.1.8"),
        power_divisor: 10.0,
    },
    // RouterOS has no ONU table; only SFP optical readings.
    RawOids {
        vendor: Vendor::Mikrotik,
        onu_list: &[],
        onu_status: None,
        onu_rx_power: Some("1.3.6.1.4.1.14988.1.1.9.1.3"),
        onu_tx_power: Some("1.3.6.1.4.1.14988.1.1.9.1.4"),
        onu_distance: None,
        power_divisor: 1.0,
    },
];

static TABLE: LazyLock<Result<Vec<VendorOids>, String>> = LazyLock::new(|| {
    RAW_TABLE
        .iter()
        .map(|raw| -> Result<VendorOids, String> {
            let parse = |s: &str| {
                s.parse::<Oid>()
                    .map_err(|e| format!("{} OID table: {e}", raw.vendor))
            };
            let parse_opt = |s: Option<&str>| s.map(parse).transpose();
            Ok(VendorOids {
                vendor: raw.vendor,
                onu_list: raw
                    .onu_list
                    .iter()
                    .map(|s| parse(s))
                    .collect::<Result<_, _>>()?,
                onu_status: parse_opt(raw.onu_status)?,
                onu_rx_power: parse_opt(raw.onu_rx_power)?,
                onu_tx_power: parse_opt(raw.onu_tx_power)?,
                onu_distance: parse_opt(raw.onu_distance)?,
                power_divisor: raw.power_divisor,
            })
        })
        .collect()
});

/// Parse the whole table, failing on the first malformed OID.
pub fn validate_table() -> Result<(), CoreError> {
    table().map(|_| ())
}

fn table() -> Result<&'static [VendorOids], CoreError> {
    TABLE.as_deref().map_err(|message| CoreError::Config {
        message: message.clone(),
    })
}

/// OIDs for `vendor`, if it is in the table.
pub fn oids_for(vendor: Vendor) -> Result<Option<&'static VendorOids>, CoreError> {
    Ok(table()?.iter().find(|entry| entry.vendor == vendor))
}

// ── Value interpretation ────────────────────────────────────────────

/// Operational state of an ONU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OnuStatus {
    Online,
    Offline,
    /// Loss of signal.
    Los,
    DyingGasp,
    Unknown,
}

pub fn parse_status(vendor: Vendor, value: &Value) -> OnuStatus {
    if let Value::OctetString(_) = value {
        if let Some(text) = value.as_text() {
            if text.parse::<i64>().is_err() {
                return status_from_text(&text);
            }
        }
    }
    let Some(code) = value.as_i64() else {
        return OnuStatus::Unknown;
    };
    if vendor == Vendor::Zte {
        // 1 logging, 2 los, 3 syncMib, 4 working, 5 dyingGasp, 6 authFailed, 7 offline
        match code {
            4 => OnuStatus::Online,
            2 => OnuStatus::Los,
            5 => OnuStatus::DyingGasp,
            1 | 3 | 6 | 7 => OnuStatus::Offline,
            _ => OnuStatus::Unknown,
        }
    } else {
        match code {
            1 => OnuStatus::Online,
            2 => OnuStatus::Offline,
            _ => OnuStatus::Unknown,
        }
    }
}

fn status_from_text(text: &str) -> OnuStatus {
    let normalized: String = text
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect::<String>()
        .to_ascii_lowercase();
    match normalized.as_str() {
        "working" | "online" | "up" => OnuStatus::Online,
        "los" => OnuStatus::Los,
        "offline" | "down" => OnuStatus::Offline,
        "dyinggasp" => OnuStatus::DyingGasp,
        _ => OnuStatus::Unknown,
    }
}

/// Optical power in dBm.
#[allow(clippy::cast_precision_loss)]
pub fn parse_power(oids: &VendorOids, value: &Value) -> Option<f64> {
    if let Value::OctetString(_) = value {
        let text = value.as_text()?;
        return text
            .trim_end_matches("dBm")
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite());
    }
    value.as_i64().map(|raw| raw as f64 / oids.power_divisor)
}

/// Distance in meters.
pub fn parse_distance(value: &Value) -> Option<u64> {
    value.as_i64().and_then(|d| u64::try_from(d).ok())
}

/// Split an ONU table index into `(pon_port, onu_id)`: all arcs but the
/// last name the port, the last arc is the ONU number.
pub fn split_index(suffix: &[u32]) -> (String, String) {
    match suffix.split_last() {
        None => ("unknown".into(), String::new()),
        Some((last, [])) => ("unknown".into(), last.to_string()),
        Some((last, port)) => (
            port.iter()
                .map(u32::to_string)
                .collect::<Vec<_>>()
                .join("/"),
            last.to_string(),
        ),
    }
}

/// Render a serial reported as text or raw bytes.
///
/// GPON serials are often 4 vendor letters followed by 4 binary bytes
/// (`HWTC` + `0x1A2B3C4D` → `HWTC1A2B3C4D`).
pub fn clean_serial(value: &Value) -> String {
    let Value::OctetString(bytes) = value else {
        return value.as_text().unwrap_or_default();
    };
    let trimmed: &[u8] = {
        let end = bytes.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
        bytes.get(..end).unwrap_or_default()
    };
    if !trimmed.is_empty() && trimmed.iter().all(|b| (0x20..=0x7e).contains(b)) {
        return String::from_utf8_lossy(trimmed).trim().to_owned();
    }
    if let Some((prefix, rest)) = bytes.split_first_chunk::<4>() {
        if rest.len() == 4 && prefix.iter().all(u8::is_ascii_alphanumeric) {
            return format!(
                "{}{}",
                String::from_utf8_lossy(prefix),
                hex::encode_upper(rest)
            );
        }
    }
    hex::encode_upper(bytes)
}

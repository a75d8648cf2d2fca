use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{DeviceId, DeviceStatus};
use crate::error::ErrorKind;

/// Resource figures read from a router during a probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSample {
    pub cpu_load_pct: Option<f64>,
    pub memory_used_pct: Option<f64>,
    pub uptime: Option<String>,
}

/// Outcome of one health probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub device_id: DeviceId,
    pub reachable: bool,
    pub latency_ms: Option<u64>,
    pub status: DeviceStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceSample>,
    /// Why the probe failed. A device can answer and still fail the probe
    /// (rejected credentials, garbled reply).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    /// The probe completed. Resource warnings still count as healthy.
    pub fn is_healthy(&self) -> bool {
        self.reachable && self.error.is_none()
    }
}

/// Fleet-wide probe summary. Every requested device appears exactly once
/// across `reports`, `errors` and `skipped`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FleetHealth {
    pub reports: Vec<HealthReport>,
    /// Devices that could not be probed at all (e.g. unknown id).
    pub errors: Vec<(DeviceId, String)>,
    /// Devices not started because the run was cancelled.
    pub skipped: Vec<DeviceId>,
    pub healthy: usize,
    pub unhealthy: usize,
}

use serde::{Deserialize, Serialize};

use super::{AuthMode, DeviceId};

/// RADIUS/failover posture of one router, as read from the device.
///
/// `radius_enabled` is only reported `true` when a RADIUS client entry
/// exists; a router with `use-radius=yes` and no client gets a warning
/// instead.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailoverState {
    pub device_id: DeviceId,
    pub connected: bool,
    pub radius_configured: bool,
    pub radius_enabled: bool,
    pub accounting_enabled: bool,
    /// Local PPP secrets currently enabled on the router.
    pub local_secrets_enabled: usize,
    pub watchdog_id: Option<String>,
    /// Netwatch status as reported by the router (`up`, `down`, `unknown`).
    pub watchdog_status: Option<String>,
    pub radius_server: Option<String>,
    /// Mode recorded in the registry.
    pub primary_auth: AuthMode,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FailoverState {
    pub(crate) fn disconnected(device_id: DeviceId, primary_auth: AuthMode, error: String) -> Self {
        Self {
            device_id,
            primary_auth,
            error: Some(error),
            ..Self::default()
        }
    }

    /// Mode the router is effectively running, independent of the registry.
    pub fn effective_mode(&self) -> AuthMode {
        match (self.radius_enabled, self.local_secrets_enabled > 0) {
            (true, false) => AuthMode::Radius,
            (true, true) => AuthMode::Hybrid,
            (false, _) => AuthMode::Router,
        }
    }
}

/// A router log line carrying the failover marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailoverLogEntry {
    pub time: String,
    pub topics: String,
    pub message: String,
}

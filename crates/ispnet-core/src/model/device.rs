// ── Device domain types ──
//
// A device is addressed everywhere by its logical `DeviceId`. The
// descriptor carries everything needed to open a session; its `Debug`
// output redacts the management address and never shows credentials.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use ispnet_api::{SnmpVersion, UsmUser};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use crate::config::TlsVerification;

/// Logical device identifier, unique across the inventory.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Ids double as directory names in the file store.
    pub fn is_path_safe(&self) -> bool {
        !self.0.is_empty()
            && self.0 != "."
            && self.0 != ".."
            && self
                .0
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for DeviceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl FromStr for DeviceId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_owned()))
    }
}

/// Device role.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeviceKind {
    Router,
    Olt,
}

/// Hardware vendor. Selects the OID table for OLTs.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[non_exhaustive]
pub enum Vendor {
    Mikrotik,
    Vsol,
    Huawei,
    Zte,
    Bdcom,
}

/// Lifecycle status as last observed by a health probe.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeviceStatus {
    #[default]
    Unknown,
    Online,
    /// Reachable but degraded (high load, auth failure, odd replies).
    Warning,
    Offline,
}

/// Which authority answers PPP logins on a router.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AuthMode {
    /// RADIUS only; local PPP secrets are disabled.
    Radius,
    /// Local PPP secrets only.
    #[default]
    Router,
    /// RADIUS enabled with local secrets still active.
    Hybrid,
}

/// Management protocol used to reach the device.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ManagementProtocol {
    /// RouterOS v7 REST over HTTP(S).
    Rest,
    /// RouterOS binary API (port 8728).
    Api,
    /// SNMP v1/v2c/v3.
    Snmp,
}

impl ManagementProtocol {
    pub fn default_port(self, tls: &TlsVerification) -> u16 {
        match self {
            Self::Rest if matches!(tls, TlsVerification::PlainText) => 80,
            Self::Rest => 443,
            Self::Api => ispnet_api::routeros::api::DEFAULT_PORT,
            Self::Snmp => ispnet_api::snmp::DEFAULT_PORT,
        }
    }
}

/// How to authenticate against a device.
#[derive(Debug, Clone)]
pub enum Credentials {
    Login {
        username: String,
        password: SecretString,
    },
    Snmp {
        community: SecretString,
        version: SnmpVersion,
    },
    /// SNMPv3 user-based security.
    Usm(UsmUser),
}

/// Everything needed to open a session against one device.
#[derive(Clone)]
pub struct DeviceDescriptor {
    pub id: DeviceId,
    pub name: String,
    pub kind: DeviceKind,
    pub vendor: Vendor,
    pub protocol: ManagementProtocol,
    pub host: String,
    pub port: u16,
    pub tls: TlsVerification,
    pub credentials: Credentials,
    /// Persisted auth mode; only explicit failover switches change it.
    pub primary_auth: AuthMode,
}

impl fmt::Debug for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceDescriptor")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("vendor", &self.vendor)
            .field("protocol", &self.protocol)
            .field("host", &"<redacted>")
            .field("primary_auth", &self.primary_auth)
            .finish_non_exhaustive()
    }
}

/// Registry record: descriptor plus observed state.
#[derive(Debug, Clone)]
pub struct Device {
    pub descriptor: DeviceDescriptor,
    pub status: DeviceStatus,
    /// Timestamp of the observation behind `status`.
    pub last_checked: Option<DateTime<Utc>>,
}

impl Device {
    pub fn new(descriptor: DeviceDescriptor) -> Self {
        Self {
            descriptor,
            status: DeviceStatus::Unknown,
            last_checked: None,
        }
    }

    pub fn id(&self) -> &DeviceId {
        &self.descriptor.id
    }
}

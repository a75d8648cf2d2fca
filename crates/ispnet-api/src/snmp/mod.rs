// SNMP v1/v2c/v3 client for OLT polling.

pub mod ber;
mod client;
pub mod usm;

use serde::{Deserialize, Serialize};

pub use ber::{Oid, Value};
pub use client::SnmpClient;
pub use usm::{AuthProtocol, PrivProtocol, UsmAuth, UsmPrivacy, UsmUser};

pub const DEFAULT_PORT: u16 = 161;

/// Protocol version spoken to the agent.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SnmpVersion {
    V1,
    #[default]
    V2c,
    /// User-based security; connect with [`SnmpClient::connect_v3`].
    V3,
}

impl SnmpVersion {
    /// The `version` field carried in community-based messages.
    pub(crate) fn wire_value(self) -> Option<i64> {
        match self {
            Self::V1 => Some(0),
            Self::V2c => Some(1),
            Self::V3 => None,
        }
    }
}

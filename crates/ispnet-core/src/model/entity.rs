use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use super::DeviceId;

/// Canonical field name to value.
pub type FieldMap = BTreeMap<String, String>;

/// Kinds of records kept in step between the store and devices.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EntityType {
    IpPool,
    PppProfile,
    PppSecret,
    /// Optical network unit discovered on an OLT. Import-only.
    Onu,
}

/// Which direction last wrote a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Provenance {
    /// Pulled from the device.
    Import,
    /// Pushed to the device.
    Mirror,
}

/// A record the store holds for one device.
///
/// `key` is the natural key (pool/profile/secret name, ONU serial) and is
/// unique per `(device_id, entity_type)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncedEntity {
    pub device_id: DeviceId,
    pub entity_type: EntityType,
    pub key: String,
    pub fields: FieldMap,
    pub active: bool,
    pub provenance: Provenance,
    pub updated_at: DateTime<Utc>,
}

impl SyncedEntity {
    pub fn new(device_id: DeviceId, entity_type: EntityType, key: impl Into<String>) -> Self {
        Self {
            device_id,
            entity_type,
            key: key.into(),
            fields: FieldMap::new(),
            active: true,
            provenance: Provenance::Import,
            updated_at: Utc::now(),
        }
    }

    pub fn with_field(mut self, name: &str, value: impl Into<String>) -> Self {
        self.fields.insert(name.to_owned(), value.into());
        self
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// Same content, ignoring bookkeeping (provenance, timestamp).
    pub fn same_content(&self, other: &Self) -> bool {
        self.fields == other.fields && self.active == other.active
    }
}

// ── Device registry ──
//
// Authoritative device records keyed by id. Status writes are
// last-write-wins by observation time, so concurrent probes of the same
// device can land in any order without locks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;

use crate::error::CoreError;
use crate::model::{AuthMode, Device, DeviceDescriptor, DeviceId, DeviceKind, DeviceStatus};

#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    /// Current descriptor for `id`. Reads fresh on every call so rotated
    /// credentials are picked up mid-run.
    async fn resolve(&self, id: &DeviceId) -> Result<DeviceDescriptor, CoreError>;

    async fn get(&self, id: &DeviceId) -> Option<Device>;

    /// All devices, optionally filtered by kind, ordered by id.
    async fn list(&self, kind: Option<DeviceKind>) -> Vec<Device>;

    /// Record an observed status. Older observations never overwrite newer
    /// ones; unknown ids are ignored.
    async fn record_status(&self, id: &DeviceId, status: DeviceStatus, observed_at: DateTime<Utc>);

    /// Persist the auth mode after a successful failover switch.
    async fn record_auth_mode(&self, id: &DeviceId, mode: AuthMode);
}

/// `DashMap`-backed registry populated from the inventory.
#[derive(Default)]
pub struct InMemoryRegistry {
    devices: DashMap<DeviceId, Device>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_descriptors(descriptors: impl IntoIterator<Item = DeviceDescriptor>) -> Self {
        let registry = Self::new();
        for descriptor in descriptors {
            registry.upsert(descriptor);
        }
        registry
    }

    /// Insert or replace a descriptor, keeping any observed status.
    pub fn upsert(&self, descriptor: DeviceDescriptor) {
        match self.devices.get_mut(&descriptor.id) {
            Some(mut existing) => existing.descriptor = descriptor,
            None => {
                self.devices
                    .insert(descriptor.id.clone(), Device::new(descriptor));
            }
        }
    }

    pub fn remove(&self, id: &DeviceId) -> Option<Device> {
        self.devices.remove(id).map(|(_, device)| device)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[async_trait]
impl DeviceRegistry for InMemoryRegistry {
    async fn resolve(&self, id: &DeviceId) -> Result<DeviceDescriptor, CoreError> {
        self.devices
            .get(id)
            .map(|entry| entry.descriptor.clone())
            .ok_or_else(|| CoreError::device_not_found(id))
    }

    async fn get(&self, id: &DeviceId) -> Option<Device> {
        self.devices.get(id).map(|entry| entry.clone())
    }

    async fn list(&self, kind: Option<DeviceKind>) -> Vec<Device> {
        let mut devices: Vec<Device> = self
            .devices
            .iter()
            .filter(|entry| kind.is_none_or(|k| entry.descriptor.kind == k))
            .map(|entry| entry.value().clone())
            .collect();
        devices.sort_by(|a, b| a.id().cmp(b.id()));
        devices
    }

    async fn record_status(&self, id: &DeviceId, status: DeviceStatus, observed_at: DateTime<Utc>) {
        let Some(mut entry) = self.devices.get_mut(id) else {
            debug!(device = %id, "status for unknown device ignored");
            return;
        };
        if entry.last_checked.is_none_or(|prev| observed_at >= prev) {
            entry.status = status;
            entry.last_checked = Some(observed_at);
        }
    }

    async fn record_auth_mode(&self, id: &DeviceId, mode: AuthMode) {
        if let Some(mut entry) = self.devices.get_mut(id) {
            entry.descriptor.primary_auth = mode;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Duration;
    use ispnet_api::SnmpVersion;
    use secrecy::SecretString;

    use super::*;
    use crate::config::TlsVerification;
    use crate::model::{Credentials, ManagementProtocol, Vendor};

    fn olt(id: &str) -> DeviceDescriptor {
        DeviceDescriptor {
            id: DeviceId::new(id),
            name: id.to_uppercase(),
            kind: DeviceKind::Olt,
            vendor: Vendor::Zte,
            protocol: ManagementProtocol::Snmp,
            host: "192.0.2.10".into(),
            port: 161,
            tls: TlsVerification::PlainText,
            credentials: Credentials::Snmp {
                community: SecretString::from("public".to_string()),
                version: SnmpVersion::V2c,
            },
            primary_auth: AuthMode::Router,
        }
    }

    #[tokio::test]
    async fn resolve_unknown_is_not_found() {
        let registry = InMemoryRegistry::new();
        let err = registry.resolve(&DeviceId::new("ghost")).await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn status_is_last_write_wins_by_timestamp() {
        let registry = InMemoryRegistry::from_descriptors([olt("olt-1")]);
        let id = DeviceId::new("olt-1");
        let now = Utc::now();

        registry.record_status(&id, DeviceStatus::Online, now).await;
        registry
            .record_status(&id, DeviceStatus::Offline, now - Duration::seconds(5))
            .await;
        assert_eq!(registry.get(&id).await.unwrap().status, DeviceStatus::Online);

        registry
            .record_status(&id, DeviceStatus::Offline, now + Duration::seconds(5))
            .await;
        assert_eq!(registry.get(&id).await.unwrap().status, DeviceStatus::Offline);
    }

    #[tokio::test]
    async fn upsert_keeps_observed_status() {
        let registry = InMemoryRegistry::from_descriptors([olt("olt-1")]);
        let id = DeviceId::new("olt-1");
        registry.record_status(&id, DeviceStatus::Online, Utc::now()).await;

        let mut rotated = olt("olt-1");
        rotated.name = "renamed".into();
        registry.upsert(rotated);

        let device = registry.get(&id).await.unwrap();
        assert_eq!(device.descriptor.name, "renamed");
        assert_eq!(device.status, DeviceStatus::Online);
    }

    #[tokio::test]
    async fn list_filters_and_sorts() {
        let registry = InMemoryRegistry::from_descriptors([olt("olt-b"), olt("olt-a")]);
        let ids: Vec<_> = registry
            .list(Some(DeviceKind::Olt))
            .await
            .iter()
            .map(|d| d.id().to_string())
            .collect();
        assert_eq!(ids, vec!["olt-a", "olt-b"]);
        assert!(registry.list(Some(DeviceKind::Router)).await.is_empty());
    }
}

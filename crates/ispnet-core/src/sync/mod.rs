// ── Sync engine ──
//
// Keeps pools, profiles, secrets and ONU records in step between the
// store and devices. Import pulls (device → store), mirror pushes
// (store → device), prune is mirror plus deletion of unknown remote rows.

mod engine;
mod mapping;
mod onu;
mod result;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::CoreError;
use crate::model::{DeviceId, EntityType, SyncedEntity};
use crate::store::{SyncStore, upsert_outcome};

pub use engine::DeviceSyncEngine;
pub use result::{RecordError, SyncDirection, SyncOutcome, SyncResult};

pub(crate) use result::SyncTally;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    /// Leave inactive records out: disabled secrets are not mirrored and
    /// disabled remote rows are skipped on import.
    pub active_only: bool,
    /// Compute the plan without writing anywhere.
    pub dry_run: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            active_only: true,
            dry_run: false,
        }
    }
}

#[async_trait]
pub trait SyncEngine: Send + Sync {
    /// Device → store. Never deletes store records.
    async fn import(
        &self,
        device: &DeviceId,
        entity_type: EntityType,
        options: &SyncOptions,
        cancel: &CancellationToken,
    ) -> Result<SyncResult, CoreError>;

    /// Store → device. Remote rows unknown to the store are left alone.
    async fn mirror(
        &self,
        device: &DeviceId,
        entity_type: EntityType,
        options: &SyncOptions,
        cancel: &CancellationToken,
    ) -> Result<SyncResult, CoreError>;

    /// Mirror, then delete remote rows the store does not know.
    async fn prune(
        &self,
        device: &DeviceId,
        entity_type: EntityType,
        options: &SyncOptions,
        cancel: &CancellationToken,
    ) -> Result<SyncResult, CoreError>;
}

/// How an imported record folds into the copy already in the store.
pub(crate) struct ImportRules<'a> {
    /// Canonical fields the device is authoritative for. A device-owned
    /// field missing from the import was cleared on the device; any other
    /// stored field survives.
    pub device_owns: &'a (dyn Fn(&str) -> bool + Sync),
    /// Keep the stored active flag. In RADIUS mode the router's `disabled`
    /// flags belong to the failover controller, not to the subscriber.
    pub keep_active: bool,
}

impl ImportRules<'_> {
    pub(crate) fn merge(&self, stored: &SyncedEntity, mut imported: SyncedEntity) -> SyncedEntity {
        for (name, value) in &stored.fields {
            if !(self.device_owns)(name.as_str()) && !imported.fields.contains_key(name) {
                imported.fields.insert(name.clone(), value.clone());
            }
        }
        if self.keep_active {
            imported.active = stored.active;
        }
        if imported.same_content(stored) {
            // Nothing the device said is new; the last writer stays on record.
            imported.provenance = stored.provenance;
            imported.updated_at = stored.updated_at;
        }
        imported
    }
}

/// Merge an imported record into the store, or in a dry run, classify it
/// against the stored copy.
pub(crate) async fn persist_import(
    store: &dyn SyncStore,
    imported: SyncedEntity,
    rules: &ImportRules<'_>,
    tally: &mut SyncTally,
) {
    let key = imported.key.clone();
    let dry_run = tally.dry_run();
    let outcome = async {
        let stored = store
            .get_entity(&imported.device_id, imported.entity_type, &imported.key)
            .await?;
        let merged = match &stored {
            Some(current) => rules.merge(current, imported),
            None => imported,
        };
        if dry_run {
            Ok(upsert_outcome(stored.as_ref(), &merged))
        } else {
            store.upsert_entity(merged).await
        }
    }
    .await;
    match outcome {
        Ok(outcome) => tally.record(outcome.into()),
        Err(e) => tally.fail(key, &e),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::model::Provenance;

    fn secret(profile: &str) -> SyncedEntity {
        SyncedEntity::new(DeviceId::new("r1"), EntityType::PppSecret, "alice")
            .with_field("profile", profile)
    }

    #[test]
    fn merge_keeps_fields_the_device_does_not_own() {
        let owns = |name: &str| name == "profile" || name == "comment";
        let rules = ImportRules {
            device_owns: &owns,
            keep_active: false,
        };
        let stored = secret("10M")
            .with_field("password", "s3cret")
            .with_field("comment", "old note")
            .with_field("plan_id", "42");

        let merged = rules.merge(&stored, secret("20M").with_active(false));
        assert_eq!(merged.field("profile"), Some("20M"));
        assert_eq!(merged.field("password"), Some("s3cret"));
        assert_eq!(merged.field("plan_id"), Some("42"));
        assert_eq!(merged.field("comment"), None);
        assert!(!merged.active);
    }

    #[test]
    fn unchanged_merge_keeps_provenance() {
        let owns = |name: &str| name == "profile";
        let rules = ImportRules {
            device_owns: &owns,
            keep_active: true,
        };
        let mut stored = secret("10M").with_field("password", "s3cret");
        stored.provenance = Provenance::Mirror;

        let merged = rules.merge(&stored, secret("10M").with_active(false));
        assert!(merged.active);
        assert_eq!(merged.provenance, Provenance::Mirror);
        assert_eq!(merged.updated_at, stored.updated_at);
    }
}

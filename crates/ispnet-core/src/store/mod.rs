// ── Persistence ──
//
// Three narrow traits over the same backing store: synced records,
// configuration snapshots, and the health-check history. `MemoryStore`
// backs tests and dry runs; `FileStore` is the on-disk default.

mod file;
mod memory;
mod sealed;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::CoreError;
use crate::model::{BackupRecord, DeviceId, EntityType, HealthReport, StoredBackup, SyncedEntity};

pub use file::FileStore;
pub use memory::MemoryStore;
pub use sealed::BlobKey;

/// Result of writing a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
    /// Content identical to what was stored; nothing written.
    Unchanged,
}

#[async_trait]
pub trait SyncStore: Send + Sync {
    /// Insert or replace by `(device_id, entity_type, key)`.
    async fn upsert_entity(&self, entity: SyncedEntity) -> Result<UpsertOutcome, CoreError>;

    async fn get_entity(
        &self,
        device: &DeviceId,
        entity_type: EntityType,
        key: &str,
    ) -> Result<Option<SyncedEntity>, CoreError>;

    /// Records for one device and type, ordered by key.
    async fn list_entities(
        &self,
        device: &DeviceId,
        entity_type: EntityType,
        active_only: bool,
    ) -> Result<Vec<SyncedEntity>, CoreError>;

    /// Flag a record as last written by a mirror.
    async fn mark_mirrored(
        &self,
        device: &DeviceId,
        entity_type: EntityType,
        key: &str,
        at: DateTime<Utc>,
    ) -> Result<(), CoreError>;
}

#[async_trait]
pub trait BackupStore: Send + Sync {
    async fn put_backup(&self, record: BackupRecord, content: String) -> Result<(), CoreError>;

    /// Snapshots for one device, newest first.
    async fn list_backups(&self, device: &DeviceId) -> Result<Vec<BackupRecord>, CoreError>;

    /// Fetch a snapshot and verify its content digest.
    async fn get_backup(&self, id: Uuid) -> Result<Option<StoredBackup>, CoreError>;

    async fn find_by_change(&self, change_id: Uuid) -> Result<Option<BackupRecord>, CoreError>;

    /// Remove a snapshot's metadata; its content goes too once nothing
    /// else references the digest. Returns whether the record existed.
    async fn delete_backup(&self, id: Uuid) -> Result<bool, CoreError>;
}

#[async_trait]
pub trait HealthLog: Send + Sync {
    async fn record_health_check(&self, report: &HealthReport) -> Result<(), CoreError>;

    /// Most recent reports for a device, newest first.
    async fn recent_health(
        &self,
        device: &DeviceId,
        limit: usize,
    ) -> Result<Vec<HealthReport>, CoreError>;
}

/// Everything the platform needs from a store.
pub trait Store: SyncStore + BackupStore + HealthLog {}

impl<T: SyncStore + BackupStore + HealthLog> Store for T {}

/// SHA-256 of snapshot content, lowercase hex.
pub fn content_digest(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

/// Decide what an upsert does given the stored record.
pub(crate) fn upsert_outcome(existing: Option<&SyncedEntity>, incoming: &SyncedEntity) -> UpsertOutcome {
    match existing {
        None => UpsertOutcome::Created,
        Some(current) if current.same_content(incoming) => UpsertOutcome::Unchanged,
        Some(_) => UpsertOutcome::Updated,
    }
}

pub(crate) fn verify_digest(record: &BackupRecord, content: &str) -> Result<(), CoreError> {
    let actual = content_digest(content);
    if actual == record.digest {
        Ok(())
    } else {
        Err(CoreError::Store {
            message: format!(
                "snapshot {} is corrupt: digest {actual} does not match {}",
                record.id, record.digest
            ),
        })
    }
}

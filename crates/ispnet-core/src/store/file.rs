// ── On-disk store ──
//
// Layout under the data directory:
//
//   entities/<device>/<entity_type>.json   records for one device and type
//   backups/index.json                     snapshot metadata
//   backups/blobs/<sha256>.rsc             snapshot content, by digest
//                                          (sealed when a BlobKey is set)
//   health/<device>.jsonl                  append-only probe history
//
// Writers serialize on one mutex and replace files via temp + rename, so a
// crash mid-write leaves the previous version intact.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use super::sealed::{self, BlobKey};
use super::{BackupStore, HealthLog, SyncStore, UpsertOutcome, upsert_outcome, verify_digest};
use crate::error::CoreError;
use crate::model::{
    BackupRecord, DeviceId, EntityType, HealthReport, Provenance, StoredBackup, SyncedEntity,
};

pub struct FileStore {
    root: PathBuf,
    write_lock: Mutex<()>,
    blob_key: Option<BlobKey>,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let root = root.into();
        for dir in ["entities", "backups/blobs", "health"] {
            tokio::fs::create_dir_all(root.join(dir))
                .await
                .map_err(CoreError::store)?;
        }
        debug!(root = %root.display(), "opened file store");
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
            blob_key: None,
        })
    }

    /// Encrypt snapshot content written from now on. Plaintext blobs
    /// already on disk stay readable.
    pub fn with_blob_key(mut self, key: BlobKey) -> Self {
        self.blob_key = Some(key);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entities_path(&self, device: &DeviceId, entity_type: EntityType) -> Result<PathBuf, CoreError> {
        checked(device)?;
        Ok(self
            .root
            .join("entities")
            .join(device.as_str())
            .join(format!("{entity_type}.json")))
    }

    fn index_path(&self) -> PathBuf {
        self.root.join("backups").join("index.json")
    }

    fn blob_path(&self, digest: &str) -> PathBuf {
        self.root
            .join("backups")
            .join("blobs")
            .join(format!("{digest}.rsc"))
    }

    fn health_path(&self, device: &DeviceId) -> Result<PathBuf, CoreError> {
        checked(device)?;
        Ok(self.root.join("health").join(format!("{device}.jsonl")))
    }

    async fn load_entities(
        &self,
        device: &DeviceId,
        entity_type: EntityType,
    ) -> Result<Vec<SyncedEntity>, CoreError> {
        read_json(&self.entities_path(device, entity_type)?).await
    }

    async fn load_index(&self) -> Result<Vec<BackupRecord>, CoreError> {
        read_json(&self.index_path()).await
    }

    /// Missing content is written; with a key set, plaintext content left
    /// from before encryption was enabled is rewritten sealed.
    async fn blob_needs_write(&self, blob: &Path) -> Result<bool, CoreError> {
        if !tokio::fs::try_exists(blob).await.map_err(CoreError::store)? {
            return Ok(true);
        }
        if self.blob_key.is_none() {
            return Ok(false);
        }
        let existing = tokio::fs::read(blob).await.map_err(CoreError::store)?;
        Ok(!sealed::is_sealed(&existing))
    }

    fn decode_blob(&self, digest: &str, bytes: Vec<u8>) -> Result<String, CoreError> {
        let plain = if sealed::is_sealed(&bytes) {
            let key = self.blob_key.as_ref().ok_or_else(|| CoreError::Store {
                message: format!("snapshot {digest} is encrypted and no backup key is configured"),
            })?;
            sealed::open(key, digest, &bytes)?
        } else {
            bytes
        };
        String::from_utf8(plain).map_err(|_| CoreError::Store {
            message: format!("snapshot {digest} is not UTF-8"),
        })
    }
}

fn checked(device: &DeviceId) -> Result<(), CoreError> {
    if device.is_path_safe() {
        Ok(())
    } else {
        Err(CoreError::validation(format!(
            "device id {device:?} cannot be used as a store path"
        )))
    }
}

/// Read a JSON array file; a missing file is an empty list.
async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, CoreError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| CoreError::Store {
            message: format!("{} is unreadable: {e}", path.display()),
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(CoreError::store(e)),
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), CoreError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(CoreError::store)?;
    }
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(CoreError::store)?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(CoreError::store)
}

async fn write_json<T: Serialize + Sync>(path: &Path, value: &T) -> Result<(), CoreError> {
    let bytes = serde_json::to_vec_pretty(value).map_err(CoreError::store)?;
    write_atomic(path, &bytes).await
}

#[async_trait]
impl SyncStore for FileStore {
    async fn upsert_entity(&self, entity: SyncedEntity) -> Result<UpsertOutcome, CoreError> {
        let _guard = self.write_lock.lock().await;
        let path = self.entities_path(&entity.device_id, entity.entity_type)?;
        let mut records: Vec<SyncedEntity> = read_json(&path).await?;

        let position = records.iter().position(|e| e.key == entity.key);
        let outcome = upsert_outcome(position.and_then(|i| records.get(i)), &entity);
        match (outcome, position) {
            (UpsertOutcome::Unchanged, _) => return Ok(outcome),
            (_, Some(i)) => records[i] = entity,
            (_, None) => records.push(entity),
        }
        records.sort_by(|a, b| a.key.cmp(&b.key));
        write_json(&path, &records).await?;
        Ok(outcome)
    }

    async fn get_entity(
        &self,
        device: &DeviceId,
        entity_type: EntityType,
        key: &str,
    ) -> Result<Option<SyncedEntity>, CoreError> {
        Ok(self
            .load_entities(device, entity_type)
            .await?
            .into_iter()
            .find(|e| e.key == key))
    }

    async fn list_entities(
        &self,
        device: &DeviceId,
        entity_type: EntityType,
        active_only: bool,
    ) -> Result<Vec<SyncedEntity>, CoreError> {
        let mut records = self.load_entities(device, entity_type).await?;
        records.retain(|e| !active_only || e.active);
        Ok(records)
    }

    async fn mark_mirrored(
        &self,
        device: &DeviceId,
        entity_type: EntityType,
        key: &str,
        at: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        let _guard = self.write_lock.lock().await;
        let path = self.entities_path(device, entity_type)?;
        let mut records: Vec<SyncedEntity> = read_json(&path).await?;
        let Some(entity) = records.iter_mut().find(|e| e.key == key) else {
            return Ok(());
        };
        entity.provenance = Provenance::Mirror;
        entity.updated_at = at;
        write_json(&path, &records).await
    }
}

#[async_trait]
impl BackupStore for FileStore {
    async fn put_backup(&self, record: BackupRecord, content: String) -> Result<(), CoreError> {
        checked(&record.device_id)?;
        verify_digest(&record, &content)?;

        let _guard = self.write_lock.lock().await;
        let blob = self.blob_path(&record.digest);
        if self.blob_needs_write(&blob).await? {
            match &self.blob_key {
                Some(key) => {
                    let bytes = sealed::seal(key, &record.digest, content.as_bytes())?;
                    write_atomic(&blob, &bytes).await?;
                }
                None => write_atomic(&blob, content.as_bytes()).await?,
            }
        }
        let mut index = self.load_index().await?;
        index.retain(|r| r.id != record.id);
        index.push(record);
        write_json(&self.index_path(), &index).await
    }

    async fn list_backups(&self, device: &DeviceId) -> Result<Vec<BackupRecord>, CoreError> {
        let mut records: Vec<BackupRecord> = self
            .load_index()
            .await?
            .into_iter()
            .filter(|r| &r.device_id == device)
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    async fn get_backup(&self, id: Uuid) -> Result<Option<StoredBackup>, CoreError> {
        let Some(record) = self.load_index().await?.into_iter().find(|r| r.id == id) else {
            return Ok(None);
        };
        let bytes = tokio::fs::read(self.blob_path(&record.digest))
            .await
            .map_err(|e| CoreError::Store {
                message: format!("content for snapshot {id} is unreadable: {e}"),
            })?;
        let content = self.decode_blob(&record.digest, bytes)?;
        verify_digest(&record, &content)?;
        Ok(Some(StoredBackup { record, content }))
    }

    async fn find_by_change(&self, change_id: Uuid) -> Result<Option<BackupRecord>, CoreError> {
        Ok(self
            .load_index()
            .await?
            .into_iter()
            .find(|r| r.change_id == Some(change_id)))
    }

    async fn delete_backup(&self, id: Uuid) -> Result<bool, CoreError> {
        let _guard = self.write_lock.lock().await;
        let mut index = self.load_index().await?;
        let Some(position) = index.iter().position(|r| r.id == id) else {
            return Ok(false);
        };
        let removed = index.remove(position);
        write_json(&self.index_path(), &index).await?;

        if !index.iter().any(|r| r.digest == removed.digest) {
            if let Err(e) = tokio::fs::remove_file(self.blob_path(&removed.digest)).await {
                warn!(digest = %removed.digest, error = %e, "orphaned snapshot content not removed");
            }
        }
        Ok(true)
    }
}

#[async_trait]
impl HealthLog for FileStore {
    async fn record_health_check(&self, report: &HealthReport) -> Result<(), CoreError> {
        let path = self.health_path(&report.device_id)?;
        let mut line = serde_json::to_vec(report).map_err(CoreError::store)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(CoreError::store)?;
        file.write_all(&line).await.map_err(CoreError::store)?;
        file.flush().await.map_err(CoreError::store)
    }

    async fn recent_health(
        &self,
        device: &DeviceId,
        limit: usize,
    ) -> Result<Vec<HealthReport>, CoreError> {
        let path = self.health_path(device)?;
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CoreError::store(e)),
        };
        // A torn final line from an interrupted append is skipped.
        Ok(text
            .lines()
            .rev()
            .filter_map(|line| serde_json::from_str(line).ok())
            .take(limit)
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::{BackupTrigger, DeviceStatus};
    use crate::store::content_digest;

    async fn store() -> (tempfile::TempDir, FileStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn entities_persist_across_reopen() {
        let (dir, store) = store().await;
        let dev = DeviceId::new("core-1");
        let profile = SyncedEntity::new(dev.clone(), EntityType::PppProfile, "50M")
            .with_field("rate_limit", "50M/50M");
        assert_eq!(
            store.upsert_entity(profile.clone()).await.unwrap(),
            UpsertOutcome::Created
        );

        let reopened = FileStore::open(dir.path()).await.unwrap();
        let loaded = reopened
            .get_entity(&dev, EntityType::PppProfile, "50M")
            .await
            .unwrap()
            .unwrap();
        assert!(loaded.same_content(&profile));
        assert_eq!(
            reopened.upsert_entity(profile).await.unwrap(),
            UpsertOutcome::Unchanged
        );
    }

    #[tokio::test]
    async fn unsafe_device_ids_are_rejected() {
        let (_dir, store) = store().await;
        let err = store
            .list_entities(&DeviceId::new("../escape"), EntityType::IpPool, false)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation { .. }));
    }

    #[tokio::test]
    async fn corrupted_blob_is_detected() {
        let (_dir, store) = store().await;
        let content = "/ppp secret\nadd name=alice\n".to_string();
        let record = BackupRecord {
            id: Uuid::new_v4(),
            device_id: DeviceId::new("core-1"),
            created_at: Utc::now(),
            trigger: BackupTrigger::Manual,
            size_bytes: content.len() as u64,
            digest: content_digest(&content),
            note: None,
            change_id: None,
        };
        store.put_backup(record.clone(), content).await.unwrap();
        tokio::fs::write(store.blob_path(&record.digest), "tampered")
            .await
            .unwrap();

        let err = store.get_backup(record.id).await.unwrap_err();
        assert!(matches!(err, CoreError::Store { .. }));
    }

    fn record_for(content: &str) -> BackupRecord {
        BackupRecord {
            id: Uuid::new_v4(),
            device_id: DeviceId::new("core-1"),
            created_at: Utc::now(),
            trigger: BackupTrigger::Scheduled,
            size_bytes: content.len() as u64,
            digest: content_digest(content),
            note: None,
            change_id: None,
        }
    }

    fn blob_key(phrase: &str) -> BlobKey {
        BlobKey::from_passphrase(&secrecy::SecretString::from(phrase.to_string())).unwrap()
    }

    #[tokio::test]
    async fn sealed_blobs_round_trip_and_hide_secrets() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path())
            .await
            .unwrap()
            .with_blob_key(blob_key("rotate-me"));
        let content = "/radius\nadd address=10.0.0.5 secret=sharedsecret\n".to_string();
        let record = record_for(&content);
        store.put_backup(record.clone(), content.clone()).await.unwrap();

        let on_disk = tokio::fs::read(store.blob_path(&record.digest)).await.unwrap();
        assert!(!String::from_utf8_lossy(&on_disk).contains("sharedsecret"));

        let loaded = store.get_backup(record.id).await.unwrap().unwrap();
        assert_eq!(loaded.content, content);

        let keyless = FileStore::open(dir.path()).await.unwrap();
        assert!(matches!(
            keyless.get_backup(record.id).await,
            Err(CoreError::Store { .. })
        ));
    }

    #[tokio::test]
    async fn plaintext_blobs_stay_readable_after_enabling_a_key() {
        let (dir, store) = store().await;
        let content = "/ip pool\nadd name=pool-a ranges=10.1.0.2-10.1.0.254\n".to_string();
        let record = record_for(&content);
        store.put_backup(record.clone(), content.clone()).await.unwrap();

        let keyed = FileStore::open(dir.path())
            .await
            .unwrap()
            .with_blob_key(blob_key("new-key"));
        let loaded = keyed.get_backup(record.id).await.unwrap().unwrap();
        assert_eq!(loaded.content, content);
    }

    #[tokio::test]
    async fn storing_known_content_under_a_key_seals_the_plaintext_blob() {
        let (dir, store) = store().await;
        let content = "/radius\nadd address=10.0.0.5 secret=sharedsecret\n".to_string();
        let first = record_for(&content);
        store.put_backup(first.clone(), content.clone()).await.unwrap();

        let keyed = FileStore::open(dir.path())
            .await
            .unwrap()
            .with_blob_key(blob_key("new-key"));
        let second = record_for(&content);
        keyed.put_backup(second.clone(), content.clone()).await.unwrap();

        let on_disk = tokio::fs::read(keyed.blob_path(&second.digest)).await.unwrap();
        assert!(sealed::is_sealed(&on_disk));
        assert_eq!(
            keyed.get_backup(first.id).await.unwrap().unwrap().content,
            content
        );
    }

    #[tokio::test]
    async fn health_history_appends() {
        let (_dir, store) = store().await;
        let dev = DeviceId::new("olt-1");
        for latency in [5, 7, 9] {
            store
                .record_health_check(&HealthReport {
                    device_id: dev.clone(),
                    reachable: true,
                    latency_ms: Some(latency),
                    status: DeviceStatus::Online,
                    message: "ok".into(),
                    resources: None,
                    error: None,
                    checked_at: Utc::now(),
                })
                .await
                .unwrap();
        }
        let recent = store.recent_health(&dev, 2).await.unwrap();
        let latencies: Vec<_> = recent.iter().map(|r| r.latency_ms).collect();
        assert_eq!(latencies, vec![Some(9), Some(7)]);
    }
}

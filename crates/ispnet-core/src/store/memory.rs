// ── In-memory store ──
//
// Lock-free maps keyed per device. Entities keep key order via
// `IndexMap` sorted on insert so listings are deterministic.

use std::collections::VecDeque;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use indexmap::IndexMap;
use uuid::Uuid;

use super::{BackupStore, HealthLog, SyncStore, UpsertOutcome, upsert_outcome, verify_digest};
use crate::error::CoreError;
use crate::model::{
    BackupRecord, DeviceId, EntityType, HealthReport, Provenance, StoredBackup, SyncedEntity,
};

/// Health reports kept per device.
const HEALTH_HISTORY: usize = 500;

#[derive(Default)]
pub struct MemoryStore {
    entities: DashMap<(DeviceId, EntityType), IndexMap<String, SyncedEntity>>,
    backups: DashMap<Uuid, BackupRecord>,
    blobs: DashMap<String, String>,
    health: DashMap<DeviceId, VecDeque<HealthReport>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SyncStore for MemoryStore {
    async fn upsert_entity(&self, entity: SyncedEntity) -> Result<UpsertOutcome, CoreError> {
        let mut bucket = self
            .entities
            .entry((entity.device_id.clone(), entity.entity_type))
            .or_default();
        let outcome = upsert_outcome(bucket.get(&entity.key), &entity);
        if outcome != UpsertOutcome::Unchanged {
            bucket.insert(entity.key.clone(), entity);
            bucket.sort_keys();
        }
        Ok(outcome)
    }

    async fn get_entity(
        &self,
        device: &DeviceId,
        entity_type: EntityType,
        key: &str,
    ) -> Result<Option<SyncedEntity>, CoreError> {
        Ok(self
            .entities
            .get(&(device.clone(), entity_type))
            .and_then(|bucket| bucket.get(key).cloned()))
    }

    async fn list_entities(
        &self,
        device: &DeviceId,
        entity_type: EntityType,
        active_only: bool,
    ) -> Result<Vec<SyncedEntity>, CoreError> {
        Ok(self
            .entities
            .get(&(device.clone(), entity_type))
            .map(|bucket| {
                bucket
                    .values()
                    .filter(|e| !active_only || e.active)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn mark_mirrored(
        &self,
        device: &DeviceId,
        entity_type: EntityType,
        key: &str,
        at: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        if let Some(mut bucket) = self.entities.get_mut(&(device.clone(), entity_type)) {
            if let Some(entity) = bucket.get_mut(key) {
                entity.provenance = Provenance::Mirror;
                entity.updated_at = at;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl BackupStore for MemoryStore {
    async fn put_backup(&self, record: BackupRecord, content: String) -> Result<(), CoreError> {
        verify_digest(&record, &content)?;
        self.blobs.entry(record.digest.clone()).or_insert(content);
        self.backups.insert(record.id, record);
        Ok(())
    }

    async fn list_backups(&self, device: &DeviceId) -> Result<Vec<BackupRecord>, CoreError> {
        let mut records: Vec<BackupRecord> = self
            .backups
            .iter()
            .filter(|r| &r.device_id == device)
            .map(|r| r.value().clone())
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    async fn get_backup(&self, id: Uuid) -> Result<Option<StoredBackup>, CoreError> {
        let Some(record) = self.backups.get(&id).map(|r| r.value().clone()) else {
            return Ok(None);
        };
        let content = self
            .blobs
            .get(&record.digest)
            .map(|c| c.value().clone())
            .ok_or_else(|| CoreError::Store {
                message: format!("content for snapshot {id} is missing"),
            })?;
        verify_digest(&record, &content)?;
        Ok(Some(StoredBackup { record, content }))
    }

    async fn find_by_change(&self, change_id: Uuid) -> Result<Option<BackupRecord>, CoreError> {
        Ok(self
            .backups
            .iter()
            .find(|r| r.change_id == Some(change_id))
            .map(|r| r.value().clone()))
    }

    async fn delete_backup(&self, id: Uuid) -> Result<bool, CoreError> {
        let Some((_, record)) = self.backups.remove(&id) else {
            return Ok(false);
        };
        let still_referenced = self.backups.iter().any(|r| r.digest == record.digest);
        if !still_referenced {
            self.blobs.remove(&record.digest);
        }
        Ok(true)
    }
}

#[async_trait]
impl HealthLog for MemoryStore {
    async fn record_health_check(&self, report: &HealthReport) -> Result<(), CoreError> {
        let mut history = self.health.entry(report.device_id.clone()).or_default();
        history.push_back(report.clone());
        while history.len() > HEALTH_HISTORY {
            history.pop_front();
        }
        Ok(())
    }

    async fn recent_health(
        &self,
        device: &DeviceId,
        limit: usize,
    ) -> Result<Vec<HealthReport>, CoreError> {
        Ok(self
            .health
            .get(device)
            .map(|history| history.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

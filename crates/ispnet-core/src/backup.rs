// ── Configuration snapshots ──
//
// Snapshots are the router's `/export` text, stored content-addressed by
// SHA-256. Records are immutable; only `apply_retention` deletes them.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use ispnet_api::Row;
use ispnet_api::routeros::RouterSession;
use tracing::{info, warn};
use uuid::Uuid;

use crate::diff::diff_lines;
use crate::error::{CoreError, DeviceResultExt};
use crate::model::{
    BackupRecord, BackupTrigger, ChangeTicket, DeviceDescriptor, DeviceId, DeviceKind, DiffLine,
    RetentionPolicy, StoredBackup,
};
use crate::notify::{Event, Notifier, notify_quietly};
use crate::registry::DeviceRegistry;
use crate::session::{DeviceTransport, release};
use crate::store::{BackupStore, content_digest};

#[async_trait]
pub trait BackupManager: Send + Sync {
    async fn create_backup(
        &self,
        device: &DeviceId,
        trigger: BackupTrigger,
        note: Option<String>,
    ) -> Result<BackupRecord, CoreError>;

    /// Newest first.
    async fn list_backups(&self, device: &DeviceId) -> Result<Vec<BackupRecord>, CoreError>;

    async fn get_backup(&self, id: Uuid) -> Result<StoredBackup, CoreError>;

    /// Diff snapshot `from` → `to`, ignoring the export header.
    async fn diff(&self, from: Uuid, to: Uuid) -> Result<Vec<DiffLine>, CoreError>;

    /// Push a stored snapshot back onto its device. Destructive.
    async fn restore(&self, device: &DeviceId, backup_id: Uuid) -> Result<(), CoreError>;

    /// Take a pre-change snapshot tagged with a fresh change id.
    async fn begin_change(&self, device: &DeviceId, reason: &str)
    -> Result<ChangeTicket, CoreError>;

    /// Restore the pre-change snapshot of `change_id`.
    async fn revert(&self, change_id: Uuid) -> Result<BackupRecord, CoreError>;

    /// Delete scheduled snapshots outside `policy`; returns what was deleted.
    async fn apply_retention(
        &self,
        device: &DeviceId,
        policy: &RetentionPolicy,
    ) -> Result<Vec<BackupRecord>, CoreError>;
}

pub struct RouterBackupManager {
    registry: Arc<dyn DeviceRegistry>,
    transport: Arc<dyn DeviceTransport>,
    store: Arc<dyn BackupStore>,
    notifier: Arc<dyn Notifier>,
}

impl RouterBackupManager {
    pub fn new(
        registry: Arc<dyn DeviceRegistry>,
        transport: Arc<dyn DeviceTransport>,
        store: Arc<dyn BackupStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            registry,
            transport,
            store,
            notifier,
        }
    }

    async fn router(&self, device: &DeviceId) -> Result<DeviceDescriptor, CoreError> {
        let descriptor = self.registry.resolve(device).await?;
        if descriptor.kind == DeviceKind::Router {
            Ok(descriptor)
        } else {
            Err(CoreError::Unsupported {
                device: device.clone(),
                operation: "configuration export".into(),
            })
        }
    }

    async fn snapshot(
        &self,
        device: &DeviceId,
        trigger: BackupTrigger,
        note: Option<String>,
        change_id: Option<Uuid>,
    ) -> Result<BackupRecord, CoreError> {
        match self.export_and_store(device, trigger, note, change_id).await {
            Ok(record) => {
                info!(
                    device = %device,
                    backup = %record.id,
                    trigger = %trigger,
                    bytes = record.size_bytes,
                    "snapshot stored"
                );
                Ok(record)
            }
            Err(e @ (CoreError::NotFound { .. } | CoreError::Unsupported { .. })) => Err(e),
            Err(e) => {
                let err = CoreError::Backup {
                    device: device.clone(),
                    message: e.to_string(),
                };
                warn!(device = %device, kind = %e.kind(), error = %e, "snapshot failed");
                notify_quietly(
                    self.notifier.as_ref(),
                    Event::BackupFailed {
                        device_id: device.clone(),
                        message: e.to_string(),
                    },
                )
                .await;
                Err(err)
            }
        }
    }

    async fn export_and_store(
        &self,
        device: &DeviceId,
        trigger: BackupTrigger,
        note: Option<String>,
        change_id: Option<Uuid>,
    ) -> Result<BackupRecord, CoreError> {
        let descriptor = self.router(device).await?;
        let mut session = self.transport.open_router(&descriptor).await?;
        let export = session.execute("/export").await.for_device(device);
        release(session, device).await;

        let content = export?;
        if content
            .lines()
            .all(|line| line.trim().is_empty() || line.starts_with('#'))
        {
            return Err(CoreError::Protocol {
                device: device.clone(),
                message: "device returned an empty export".into(),
            });
        }

        let record = BackupRecord {
            id: Uuid::new_v4(),
            device_id: device.clone(),
            created_at: Utc::now(),
            trigger,
            size_bytes: u64::try_from(content.len()).unwrap_or(u64::MAX),
            digest: content_digest(&content),
            note,
            change_id,
        };
        self.store.put_backup(record.clone(), content).await?;
        Ok(record)
    }
}

/// Upload `content` as a script file, import it, then remove the file.
async fn push_config(
    session: &mut dyn RouterSession,
    device: &DeviceId,
    backup: &StoredBackup,
) -> Result<(), CoreError> {
    let file_name = format!("ispnet-restore-{}.rsc", backup.record.id.simple());
    session
        .command(
            "/file/add",
            &Row::new()
                .with("name", file_name.as_str())
                .with("contents", backup.content.as_str()),
        )
        .await
        .for_device(device)?;

    let output = session
        .execute(&format!("/import file-name={file_name}"))
        .await
        .for_device(device);

    match session.print("/file", &[("name", file_name.as_str())]).await {
        Ok(files) => {
            for id in files.iter().filter_map(Row::id) {
                if let Err(e) = session.remove("/file", id).await {
                    warn!(device = %device, error = %e, "restore file left on router");
                }
            }
        }
        Err(e) => warn!(device = %device, error = %e, "restore file left on router"),
    }

    let output = output?;
    if let Some(line) = import_failure(&output) {
        return Err(CoreError::Rejected {
            device: device.clone(),
            message: line.to_owned(),
        });
    }
    Ok(())
}

/// Line prefixes RouterOS uses when `/import` stops on a bad line.
const IMPORT_FAILURE_PREFIXES: [&str; 5] = [
    "failure:",
    "script error",
    "syntax error",
    "bad command name",
    "expected end of command",
];

/// First line of `/import` output that reports an aborted import.
fn import_failure(output: &str) -> Option<&str> {
    output.lines().map(str::trim).find(|line| {
        let lowered = line.to_ascii_lowercase();
        IMPORT_FAILURE_PREFIXES
            .iter()
            .any(|prefix| lowered.starts_with(prefix))
    })
}

#[async_trait]
impl BackupManager for RouterBackupManager {
    async fn create_backup(
        &self,
        device: &DeviceId,
        trigger: BackupTrigger,
        note: Option<String>,
    ) -> Result<BackupRecord, CoreError> {
        self.snapshot(device, trigger, note, None).await
    }

    async fn list_backups(&self, device: &DeviceId) -> Result<Vec<BackupRecord>, CoreError> {
        self.store.list_backups(device).await
    }

    async fn get_backup(&self, id: Uuid) -> Result<StoredBackup, CoreError> {
        self.store
            .get_backup(id)
            .await?
            .ok_or_else(|| CoreError::NotFound {
                entity_type: "Backup".into(),
                identifier: id.to_string(),
            })
    }

    async fn diff(&self, from: Uuid, to: Uuid) -> Result<Vec<DiffLine>, CoreError> {
        let old = self.get_backup(from).await?;
        let new = self.get_backup(to).await?;
        Ok(diff_lines(&old.content, &new.content))
    }

    async fn restore(&self, device: &DeviceId, backup_id: Uuid) -> Result<(), CoreError> {
        let backup = self.get_backup(backup_id).await?;
        if &backup.record.device_id != device {
            return Err(CoreError::validation(format!(
                "snapshot {backup_id} belongs to device {}, not {device}",
                backup.record.device_id
            )));
        }

        let descriptor = self.router(device).await?;
        warn!(device = %device, backup = %backup_id, "restoring configuration");
        let mut session = self.transport.open_router(&descriptor).await?;
        let outcome = push_config(session.as_mut(), device, &backup).await;
        release(session, device).await;
        outcome?;

        info!(device = %device, backup = %backup_id, "configuration restored");
        Ok(())
    }

    async fn begin_change(
        &self,
        device: &DeviceId,
        reason: &str,
    ) -> Result<ChangeTicket, CoreError> {
        let change_id = Uuid::new_v4();
        let backup = self
            .snapshot(
                device,
                BackupTrigger::PreChange,
                Some(reason.to_owned()),
                Some(change_id),
            )
            .await?;
        Ok(ChangeTicket { change_id, backup })
    }

    async fn revert(&self, change_id: Uuid) -> Result<BackupRecord, CoreError> {
        let record = self
            .store
            .find_by_change(change_id)
            .await?
            .ok_or_else(|| CoreError::NotFound {
                entity_type: "Change".into(),
                identifier: change_id.to_string(),
            })?;
        self.restore(&record.device_id, record.id).await?;
        Ok(record)
    }

    async fn apply_retention(
        &self,
        device: &DeviceId,
        policy: &RetentionPolicy,
    ) -> Result<Vec<BackupRecord>, CoreError> {
        let cutoff = policy
            .max_age
            .and_then(|age| chrono::Duration::from_std(age).ok())
            .map(|age| Utc::now() - age);

        let expired: Vec<BackupRecord> = self
            .store
            .list_backups(device)
            .await?
            .into_iter()
            .filter(|r| r.trigger == BackupTrigger::Scheduled)
            .skip(policy.keep_last)
            .filter(|r| cutoff.is_none_or(|c| r.created_at < c))
            .collect();

        for record in &expired {
            self.store.delete_backup(record.id).await?;
        }
        if !expired.is_empty() {
            info!(device = %device, deleted = expired.len(), "retention applied");
        }
        Ok(expired)
    }
}

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use super::DeviceId;

/// What caused a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BackupTrigger {
    Manual,
    Scheduled,
    /// Taken right before a tracked change; carries a change id.
    PreChange,
}

/// Immutable metadata for one configuration snapshot.
///
/// Content lives in the store under `digest` (SHA-256, lowercase hex).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub id: Uuid,
    pub device_id: DeviceId,
    pub created_at: DateTime<Utc>,
    pub trigger: BackupTrigger,
    pub size_bytes: u64,
    pub digest: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_id: Option<Uuid>,
}

/// A snapshot together with its content.
#[derive(Debug, Clone)]
pub struct StoredBackup {
    pub record: BackupRecord,
    pub content: String,
}

/// Handle for a tracked change: revert restores `backup`.
#[derive(Debug, Clone, Serialize)]
pub struct ChangeTicket {
    pub change_id: Uuid,
    pub backup: BackupRecord,
}

/// Pruning rule for `scheduled` snapshots. Manual and pre-change
/// snapshots are never pruned by retention.
#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    /// Newest scheduled snapshots always kept.
    pub keep_last: usize,
    /// Scheduled snapshots older than this are dropped (beyond `keep_last`).
    pub max_age: Option<Duration>,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            keep_last: 7,
            max_age: Some(Duration::from_secs(30 * 24 * 60 * 60)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DiffTag {
    Added,
    Removed,
    Context,
}

/// One line of a configuration diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffLine {
    pub tag: DiffTag,
    pub text: String,
}

impl DiffLine {
    pub fn is_change(&self) -> bool {
        self.tag != DiffTag::Context
    }
}

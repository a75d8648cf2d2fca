// ── Operational notifications ──
//
// Fire-and-forget events emitted by health, sync, backup and failover.
// A failing notifier is logged and never fails the operation.

use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};

use crate::model::{AuthMode, DeviceId, EntityType};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    DeviceUnreachable {
        device_id: DeviceId,
        reason: String,
    },
    DeviceRecovered {
        device_id: DeviceId,
    },
    SyncFailed {
        device_id: DeviceId,
        entity_type: EntityType,
        message: String,
    },
    BackupFailed {
        device_id: DeviceId,
        message: String,
    },
    AuthModeChanged {
        device_id: DeviceId,
        from: AuthMode,
        to: AuthMode,
    },
}

impl Event {
    pub fn device_id(&self) -> &DeviceId {
        match self {
            Self::DeviceUnreachable { device_id, .. }
            | Self::DeviceRecovered { device_id }
            | Self::SyncFailed { device_id, .. }
            | Self::BackupFailed { device_id, .. }
            | Self::AuthModeChanged { device_id, .. } => device_id,
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &Event) -> Result<(), String>;
}

/// Deliver an event, swallowing delivery failures.
pub(crate) async fn notify_quietly(notifier: &dyn Notifier, event: Event) {
    if let Err(e) = notifier.notify(&event).await {
        warn!(device = %event.device_id(), error = %e, "notification delivery failed");
    }
}

/// Writes events to the tracing log. Default for the CLI.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, event: &Event) -> Result<(), String> {
        match event {
            Event::DeviceUnreachable { device_id, reason } => {
                warn!(device = %device_id, %reason, "device unreachable");
            }
            Event::DeviceRecovered { device_id } => info!(device = %device_id, "device recovered"),
            Event::SyncFailed {
                device_id,
                entity_type,
                message,
            } => warn!(device = %device_id, entity = %entity_type, %message, "sync failed"),
            Event::BackupFailed { device_id, message } => {
                warn!(device = %device_id, %message, "backup failed");
            }
            Event::AuthModeChanged {
                device_id,
                from,
                to,
            } => info!(device = %device_id, %from, %to, "auth mode changed"),
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, _event: &Event) -> Result<(), String> {
        Ok(())
    }
}

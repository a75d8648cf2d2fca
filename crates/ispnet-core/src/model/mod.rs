// Domain model: devices, synced records, snapshots, failover and health.

pub mod backup;
pub mod device;
pub mod entity;
pub mod failover;
pub mod health;

pub use backup::{
    BackupRecord, BackupTrigger, ChangeTicket, DiffLine, DiffTag, RetentionPolicy, StoredBackup,
};
pub use device::{
    AuthMode, Credentials, Device, DeviceDescriptor, DeviceId, DeviceKind, DeviceStatus,
    ManagementProtocol, Vendor,
};
pub use entity::{EntityType, FieldMap, Provenance, SyncedEntity};
pub use failover::{FailoverLogEntry, FailoverState};
pub use health::{FleetHealth, HealthReport, ResourceSample};

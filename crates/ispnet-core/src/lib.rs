//! Orchestration layer between `ispnet-api` and the `ispnet` CLI.
//!
//! This crate owns the domain model and the four services an ISP operator
//! runs against a fleet of MikroTik routers and OLTs:
//!
//! - **[`SyncEngine`]**: Keeps IP pools, PPP profiles, PPP secrets and ONU
//!   records in step between a [`Store`] and devices. `import` is additive,
//!   `mirror` never deletes, `prune` deletes remote rows the store does not
//!   know.
//!
//! - **[`FailoverController`]**: Moves routers between local-secret,
//!   RADIUS and hybrid authentication. Switches are journaled and rolled
//!   back on failure; local secrets are only disabled after RADIUS is
//!   verified reachable from the router.
//!
//! - **[`BackupManager`]**: Content-addressed configuration snapshots with
//!   diff, restore, change tickets and retention.
//!
//! - **[`HealthMonitor`]**: Bounded-timeout probes recorded to the registry
//!   and the health log.
//!
//! [`Platform`] wires these together around a [`DeviceRegistry`], a store,
//! a [`DeviceTransport`] and a [`Notifier`]. Fleet operations fan out with
//! [`run_fleet`] under a shared [`CancellationToken`](tokio_util::sync::CancellationToken).

pub mod backup;
pub mod config;
pub mod diff;
pub mod error;
pub mod failover;
pub mod fleet;
pub mod health;
pub mod model;
pub mod notify;
pub mod platform;
pub mod registry;
pub mod session;
pub mod store;
pub mod sync;
pub mod vendor;

// ── Primary re-exports ──────────────────────────────────────────────
pub use backup::{BackupManager, RouterBackupManager};
pub use config::{EngineConfig, RadiusSettings, TlsVerification, WatchdogSettings};
pub use error::{CoreError, DeviceResultExt, ErrorKind};
pub use failover::{FailoverController, RouterFailover};
pub use fleet::{DeviceSelector, FleetOutcome, FleetReport, run_fleet};
pub use health::{DeviceHealthMonitor, HealthMonitor, ProbeSettings};
pub use notify::{Event, NoopNotifier, Notifier, TracingNotifier};
pub use platform::{Platform, PlatformBuilder};
pub use registry::{DeviceRegistry, InMemoryRegistry};
pub use session::{DeviceTransport, NetworkTransport, SnmpSession};
pub use store::{
    BackupStore, BlobKey, FileStore, HealthLog, MemoryStore, Store, SyncStore, UpsertOutcome,
};
pub use sync::{
    DeviceSyncEngine, RecordError, SyncDirection, SyncEngine, SyncOptions, SyncOutcome,
    SyncResult,
};

pub use model::{
    AuthMode, BackupRecord, BackupTrigger, ChangeTicket, Credentials, Device, DeviceDescriptor,
    DeviceId, DeviceKind, DeviceStatus, DiffLine, DiffTag, EntityType, FailoverLogEntry,
    FailoverState, FieldMap, FleetHealth, HealthReport, ManagementProtocol, Provenance,
    ResourceSample, RetentionPolicy, StoredBackup, SyncedEntity, Vendor,
};

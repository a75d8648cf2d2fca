// ── Platform facade ──
//
// Bundles the registry, store, transport and notifier with the four
// services built on them. Cheaply cloneable; every service shares the
// same registry and store.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::backup::{BackupManager, RouterBackupManager};
use crate::config::EngineConfig;
use crate::error::CoreError;
use crate::failover::{FailoverController, RouterFailover};
use crate::fleet::{DeviceSelector, FleetReport, run_fleet};
use crate::health::{DeviceHealthMonitor, HealthMonitor, ProbeSettings};
use crate::model::{BackupRecord, BackupTrigger, DeviceId, EntityType, FailoverState};
use crate::notify::{Notifier, TracingNotifier};
use crate::registry::{DeviceRegistry, InMemoryRegistry};
use crate::session::{DeviceTransport, NetworkTransport};
use crate::store::{BackupStore, HealthLog, MemoryStore, Store, SyncStore};
use crate::sync::{DeviceSyncEngine, SyncDirection, SyncEngine, SyncOptions, SyncResult};

#[derive(Clone)]
pub struct Platform {
    inner: Arc<PlatformInner>,
}

struct PlatformInner {
    config: EngineConfig,
    registry: Arc<dyn DeviceRegistry>,
    sync_store: Arc<dyn SyncStore>,
    backup_store: Arc<dyn BackupStore>,
    health_log: Arc<dyn HealthLog>,
    sync: DeviceSyncEngine,
    failover: RouterFailover,
    backup: RouterBackupManager,
    health: DeviceHealthMonitor,
}

type StoreHandles = (Arc<dyn SyncStore>, Arc<dyn BackupStore>, Arc<dyn HealthLog>);

/// Builder for [`Platform`]. Unset parts default to an empty in-memory
/// registry and store, the network transport and the tracing notifier.
pub struct PlatformBuilder {
    config: EngineConfig,
    registry: Option<Arc<dyn DeviceRegistry>>,
    stores: Option<StoreHandles>,
    transport: Option<Arc<dyn DeviceTransport>>,
    notifier: Option<Arc<dyn Notifier>>,
}

impl PlatformBuilder {
    #[must_use]
    pub fn registry(mut self, registry: Arc<dyn DeviceRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    #[must_use]
    pub fn store<S: Store + 'static>(mut self, store: Arc<S>) -> Self {
        let sync: Arc<dyn SyncStore> = store.clone();
        let backup: Arc<dyn BackupStore> = store.clone();
        let health: Arc<dyn HealthLog> = store;
        self.stores = Some((sync, backup, health));
        self
    }

    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn DeviceTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    #[must_use]
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Validate the vendor OID table and wire the services together.
    pub fn build(self) -> Result<Platform, CoreError> {
        crate::vendor::validate_table()?;

        let config = self.config;
        let registry: Arc<dyn DeviceRegistry> = match self.registry {
            Some(registry) => registry,
            None => Arc::new(InMemoryRegistry::new()),
        };
        let (sync_store, backup_store, health_log) = match self.stores {
            Some(stores) => stores,
            None => {
                let store = Arc::new(MemoryStore::new());
                let sync: Arc<dyn SyncStore> = store.clone();
                let backup: Arc<dyn BackupStore> = store.clone();
                let health: Arc<dyn HealthLog> = store;
                (sync, backup, health)
            }
        };
        let transport: Arc<dyn DeviceTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(NetworkTransport::new(config.clone())),
        };
        let notifier: Arc<dyn Notifier> = match self.notifier {
            Some(notifier) => notifier,
            None => Arc::new(TracingNotifier),
        };

        let sync = DeviceSyncEngine::new(
            registry.clone(),
            transport.clone(),
            sync_store.clone(),
            notifier.clone(),
        );
        let failover = RouterFailover::new(
            registry.clone(),
            transport.clone(),
            notifier.clone(),
            config.radius.clone(),
        )
        .with_store(sync_store.clone());
        let backup = RouterBackupManager::new(
            registry.clone(),
            transport.clone(),
            backup_store.clone(),
            notifier.clone(),
        );
        let health = DeviceHealthMonitor::new(
            registry.clone(),
            transport,
            health_log.clone(),
            notifier,
            ProbeSettings::from(&config),
        );

        debug!(concurrency = config.concurrency, "platform ready");
        Ok(Platform {
            inner: Arc::new(PlatformInner {
                config,
                registry,
                sync_store,
                backup_store,
                health_log,
                sync,
                failover,
                backup,
                health,
            }),
        })
    }
}

impl Platform {
    pub fn builder(config: EngineConfig) -> PlatformBuilder {
        PlatformBuilder {
            config,
            registry: None,
            stores: None,
            transport: None,
            notifier: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &dyn DeviceRegistry {
        self.inner.registry.as_ref()
    }

    pub fn sync_store(&self) -> &dyn SyncStore {
        self.inner.sync_store.as_ref()
    }

    pub fn backup_store(&self) -> &dyn BackupStore {
        self.inner.backup_store.as_ref()
    }

    pub fn health_log(&self) -> &dyn HealthLog {
        self.inner.health_log.as_ref()
    }

    pub fn sync(&self) -> &dyn SyncEngine {
        &self.inner.sync
    }

    pub fn failover(&self) -> &dyn FailoverController {
        &self.inner.failover
    }

    pub fn backup(&self) -> &dyn BackupManager {
        &self.inner.backup
    }

    pub fn health(&self) -> &dyn HealthMonitor {
        &self.inner.health
    }

    /// Expand a selector into device ids.
    ///
    /// Explicit ids are kept even when unregistered so fleet runs report
    /// them as not found; `kind` alone selects every device of that kind.
    pub async fn select(&self, selector: &DeviceSelector) -> Result<Vec<DeviceId>, CoreError> {
        if selector.all || (selector.ids.is_empty() && selector.kind.is_some()) {
            return Ok(self
                .registry()
                .list(selector.kind)
                .await
                .into_iter()
                .map(|d| d.descriptor.id)
                .collect());
        }
        if selector.ids.is_empty() {
            return Err(CoreError::validation(
                "no devices selected (use --device, --kind or --all)",
            ));
        }

        let mut ids = Vec::with_capacity(selector.ids.len());
        for id in &selector.ids {
            let matches_kind = match (selector.kind, self.registry().get(id).await) {
                (Some(kind), Some(device)) => device.descriptor.kind == kind,
                _ => true,
            };
            if matches_kind {
                ids.push(id.clone());
            }
        }
        Ok(ids)
    }

    pub async fn sync_fleet(
        &self,
        devices: Vec<DeviceId>,
        entity_type: EntityType,
        direction: SyncDirection,
        options: SyncOptions,
        cancel: &CancellationToken,
    ) -> FleetReport<SyncResult> {
        let sync = self.sync();
        let options = &options;
        run_fleet(devices, self.config().concurrency, cancel, |id| async move {
            match direction {
                SyncDirection::Import => sync.import(&id, entity_type, options, cancel).await,
                SyncDirection::Mirror => sync.mirror(&id, entity_type, options, cancel).await,
                SyncDirection::Prune => sync.prune(&id, entity_type, options, cancel).await,
            }
        })
        .await
    }

    pub async fn backup_fleet(
        &self,
        devices: Vec<DeviceId>,
        trigger: BackupTrigger,
        note: Option<String>,
        cancel: &CancellationToken,
    ) -> FleetReport<BackupRecord> {
        let backup = self.backup();
        let note = &note;
        run_fleet(devices, self.config().concurrency, cancel, |id| async move {
            backup.create_backup(&id, trigger, note.clone()).await
        })
        .await
    }

    pub async fn failover_status_fleet(
        &self,
        devices: Vec<DeviceId>,
        cancel: &CancellationToken,
    ) -> FleetReport<FailoverState> {
        let failover = self.failover();
        run_fleet(devices, self.config().concurrency, cancel, |id| async move {
            failover.get_status(&id).await
        })
        .await
    }
}

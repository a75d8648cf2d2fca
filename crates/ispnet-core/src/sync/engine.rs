// ── DeviceSyncEngine ──
//
// Sessions are opened per call and released on every exit path. Records
// are processed in order; cancellation is checked between records, never
// in the middle of a device write.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use indexmap::IndexMap;
use ispnet_api::Row;
use ispnet_api::routeros::RouterSession;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::mapping::{EntityMapping, mapping_for};
use super::result::RecordChange;
use super::{
    ImportRules, SyncDirection, SyncEngine, SyncOptions, SyncOutcome, SyncResult, SyncTally,
};
use super::{onu, persist_import};
use crate::error::{CoreError, DeviceResultExt};
use crate::model::{AuthMode, DeviceDescriptor, DeviceId, DeviceKind, EntityType, SyncedEntity};
use crate::notify::{Event, Notifier, notify_quietly};
use crate::registry::DeviceRegistry;
use crate::session::{DeviceTransport, release};
use crate::store::SyncStore;

pub struct DeviceSyncEngine {
    registry: Arc<dyn DeviceRegistry>,
    transport: Arc<dyn DeviceTransport>,
    store: Arc<dyn SyncStore>,
    notifier: Arc<dyn Notifier>,
}

/// What a mirror pass needs besides the session and the tally.
struct MirrorContext<'a> {
    store: &'a dyn SyncStore,
    mapping: &'static EntityMapping,
    device: &'a DeviceId,
    /// Secrets exist on the router only as disabled fallbacks.
    radius_mode: bool,
    cancel: &'a CancellationToken,
}

impl DeviceSyncEngine {
    pub fn new(
        registry: Arc<dyn DeviceRegistry>,
        transport: Arc<dyn DeviceTransport>,
        store: Arc<dyn SyncStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            registry,
            transport,
            store,
            notifier,
        }
    }

    fn router_mapping(
        descriptor: &DeviceDescriptor,
        entity_type: EntityType,
    ) -> Result<&'static EntityMapping, CoreError> {
        let mapping = mapping_for(entity_type).ok_or_else(|| {
            CoreError::validation(format!("{entity_type} records can only be imported"))
        })?;
        if descriptor.kind != DeviceKind::Router {
            return Err(CoreError::validation(format!(
                "device {} is not a router",
                descriptor.id
            )));
        }
        Ok(mapping)
    }

    async fn finish(&self, tally: SyncTally, entity_type: EntityType) -> SyncResult {
        let result = tally.finish();
        info!(
            device = %result.device_id,
            entity = %entity_type,
            direction = %result.direction,
            total = result.total,
            failed = result.failed,
            outcome = %result.outcome,
            dry_run = result.dry_run,
            "sync finished"
        );
        if result.outcome == SyncOutcome::Failure {
            let message = result
                .errors
                .first()
                .map(|e| e.message.clone())
                .unwrap_or_default();
            self.report_failure(&result.device_id, entity_type, message)
                .await;
        }
        result
    }

    async fn report_failure(&self, device: &DeviceId, entity_type: EntityType, message: String) {
        notify_quietly(
            self.notifier.as_ref(),
            Event::SyncFailed {
                device_id: device.clone(),
                entity_type,
                message,
            },
        )
        .await;
    }

    /// Surface hard errors through the notifier before returning them.
    async fn hard_error<T>(
        &self,
        device: &DeviceId,
        entity_type: EntityType,
        err: CoreError,
    ) -> Result<T, CoreError> {
        warn!(device = %device, entity = %entity_type, kind = %err.kind(), error = %err, "sync aborted");
        if !matches!(err, CoreError::NotFound { .. } | CoreError::Validation { .. }) {
            self.report_failure(device, entity_type, err.to_string())
                .await;
        }
        Err(err)
    }

    async fn run_import(
        &self,
        device: &DeviceId,
        entity_type: EntityType,
        options: &SyncOptions,
        cancel: &CancellationToken,
    ) -> Result<SyncTally, CoreError> {
        let descriptor = self.registry.resolve(device).await?;
        let mut tally = SyncTally::new(
            device.clone(),
            entity_type,
            SyncDirection::Import,
            options.dry_run,
        );

        if entity_type == EntityType::Onu {
            if descriptor.kind != DeviceKind::Olt {
                return Err(CoreError::validation(format!(
                    "device {device} is not an OLT"
                )));
            }
            let mut snmp = self.transport.open_snmp(&descriptor).await?;
            onu::import_onus(
                snmp.as_mut(),
                self.store.as_ref(),
                &descriptor,
                cancel,
                &mut tally,
            )
            .await?;
            return Ok(tally);
        }

        let mapping = Self::router_mapping(&descriptor, entity_type)?;
        let mut session = self.transport.open_router(&descriptor).await?;
        let device_owns = |name: &str| mapping.device_owns(name);
        let rules = ImportRules {
            device_owns: &device_owns,
            keep_active: descriptor.primary_auth == AuthMode::Radius,
        };
        let outcome = import_rows(
            session.as_mut(),
            self.store.as_ref(),
            mapping,
            &rules,
            options,
            cancel,
            &mut tally,
        )
        .await;
        release(session, device).await;
        outcome.map(|()| tally)
    }

    async fn run_mirror(
        &self,
        device: &DeviceId,
        entity_type: EntityType,
        options: &SyncOptions,
        cancel: &CancellationToken,
        prune: bool,
    ) -> Result<SyncTally, CoreError> {
        let descriptor = self.registry.resolve(device).await?;
        let mapping = Self::router_mapping(&descriptor, entity_type)?;
        let records = self
            .store
            .list_entities(device, entity_type, options.active_only)
            .await?;
        let keep: HashSet<String> = if prune {
            self.store
                .list_entities(device, entity_type, false)
                .await?
                .into_iter()
                .map(|e| e.key)
                .collect()
        } else {
            HashSet::new()
        };

        let direction = if prune {
            SyncDirection::Prune
        } else {
            SyncDirection::Mirror
        };
        let mut tally = SyncTally::new(device.clone(), entity_type, direction, options.dry_run);
        let ctx = MirrorContext {
            store: self.store.as_ref(),
            mapping,
            device,
            radius_mode: descriptor.primary_auth == AuthMode::Radius,
            cancel,
        };

        let mut session = self.transport.open_router(&descriptor).await?;
        let outcome = async {
            let remote = remote_index(session.as_mut(), mapping, device).await?;
            mirror_records(&ctx, session.as_mut(), &records, &remote, &mut tally).await;
            if prune && !cancel.is_cancelled() {
                delete_unknown(&ctx, session.as_mut(), &remote, &keep, &mut tally).await;
            }
            Ok::<(), CoreError>(())
        }
        .await;
        release(session, device).await;
        outcome.map(|()| tally)
    }
}

#[async_trait]
impl SyncEngine for DeviceSyncEngine {
    async fn import(
        &self,
        device: &DeviceId,
        entity_type: EntityType,
        options: &SyncOptions,
        cancel: &CancellationToken,
    ) -> Result<SyncResult, CoreError> {
        match self.run_import(device, entity_type, options, cancel).await {
            Ok(tally) => Ok(self.finish(tally, entity_type).await),
            Err(e) => self.hard_error(device, entity_type, e).await,
        }
    }

    async fn mirror(
        &self,
        device: &DeviceId,
        entity_type: EntityType,
        options: &SyncOptions,
        cancel: &CancellationToken,
    ) -> Result<SyncResult, CoreError> {
        match self
            .run_mirror(device, entity_type, options, cancel, false)
            .await
        {
            Ok(tally) => Ok(self.finish(tally, entity_type).await),
            Err(e) => self.hard_error(device, entity_type, e).await,
        }
    }

    async fn prune(
        &self,
        device: &DeviceId,
        entity_type: EntityType,
        options: &SyncOptions,
        cancel: &CancellationToken,
    ) -> Result<SyncResult, CoreError> {
        match self
            .run_mirror(device, entity_type, options, cancel, true)
            .await
        {
            Ok(tally) => Ok(self.finish(tally, entity_type).await),
            Err(e) => self.hard_error(device, entity_type, e).await,
        }
    }
}

// ── Steps ───────────────────────────────────────────────────────────

async fn import_rows(
    session: &mut dyn RouterSession,
    store: &dyn SyncStore,
    mapping: &EntityMapping,
    rules: &ImportRules<'_>,
    options: &SyncOptions,
    cancel: &CancellationToken,
    tally: &mut SyncTally,
) -> Result<(), CoreError> {
    let device = tally.device_id().clone();
    let rows = session.print(mapping.menu, &[]).await.for_device(&device)?;
    debug!(device = %device, menu = mapping.menu, rows = rows.len(), "remote rows listed");

    for row in &rows {
        if cancel.is_cancelled() {
            tally.cancel();
            break;
        }
        if row.flag("dynamic") {
            tally.skip();
            continue;
        }
        let Some(entity) = mapping.to_entity(&device, row) else {
            tally.fail(
                row.id().unwrap_or("<unnamed>"),
                &CoreError::Protocol {
                    device: device.clone(),
                    message: format!("{} row without a name", mapping.menu),
                },
            );
            continue;
        };
        if options.active_only && !rules.keep_active && !entity.active {
            tally.skip();
            continue;
        }
        persist_import(store, entity, rules, tally).await;
    }
    Ok(())
}

/// Remote rows keyed by natural key, in device order.
async fn remote_index(
    session: &mut dyn RouterSession,
    mapping: &EntityMapping,
    device: &DeviceId,
) -> Result<IndexMap<String, Row>, CoreError> {
    let rows = session.print(mapping.menu, &[]).await.for_device(device)?;
    let mut index = IndexMap::with_capacity(rows.len());
    for row in rows {
        if let Some(key) = mapping.key(&row).map(str::to_owned) {
            index.entry(key).or_insert(row);
        }
    }
    Ok(index)
}

async fn mirror_records(
    ctx: &MirrorContext<'_>,
    session: &mut dyn RouterSession,
    records: &[SyncedEntity],
    remote: &IndexMap<String, Row>,
    tally: &mut SyncTally,
) {
    for record in records {
        if ctx.cancel.is_cancelled() {
            tally.cancel();
            return;
        }
        let dry_run = tally.dry_run();
        match mirror_one(ctx, session, record, remote.get(&record.key), dry_run).await {
            Ok(change) => {
                if !dry_run && change != RecordChange::Unchanged {
                    if let Err(e) = ctx
                        .store
                        .mark_mirrored(ctx.device, record.entity_type, &record.key, Utc::now())
                        .await
                    {
                        warn!(device = %ctx.device, key = %record.key, error = %e, "could not record mirror provenance");
                    }
                }
                tally.record(change);
            }
            Err(e) => {
                debug!(device = %ctx.device, key = %record.key, kind = %e.kind(), error = %e, "record failed");
                tally.fail(record.key.as_str(), &e);
            }
        }
    }
}

fn flag_value(set: bool) -> &'static str {
    if set { "yes" } else { "no" }
}

async fn mirror_one(
    ctx: &MirrorContext<'_>,
    session: &mut dyn RouterSession,
    record: &SyncedEntity,
    remote: Option<&Row>,
    dry_run: bool,
) -> Result<RecordChange, CoreError> {
    let mapping = ctx.mapping;
    let Some(row) = remote else {
        let mut create = mapping.to_row(record);
        if let Some(flag) = mapping.active_field {
            create.insert(flag, flag_value(ctx.radius_mode || !record.active));
        }
        if ctx.radius_mode {
            mapping.align_fallback(record.active, None, &mut create);
        }
        if !dry_run {
            session
                .add(mapping.menu, &create)
                .await
                .for_device(ctx.device)?;
        }
        return Ok(RecordChange::Created);
    };

    let mut changes = mapping.changes(record, row);
    if let Some(flag) = mapping.active_field {
        // In RADIUS mode the failover controller owns the disabled flag.
        if !ctx.radius_mode && row.flag(flag) == record.active {
            changes.insert(flag, flag_value(!record.active));
        }
    }
    if ctx.radius_mode {
        mapping.align_fallback(record.active, Some(row), &mut changes);
    }
    if changes.is_empty() {
        return Ok(RecordChange::Unchanged);
    }
    if !dry_run {
        let id = row.id().ok_or_else(|| CoreError::Protocol {
            device: ctx.device.clone(),
            message: format!("{} row {} has no .id", mapping.menu, record.key),
        })?;
        session
            .set(mapping.menu, id, &changes)
            .await
            .for_device(ctx.device)?;
    }
    Ok(RecordChange::Updated)
}

async fn delete_unknown(
    ctx: &MirrorContext<'_>,
    session: &mut dyn RouterSession,
    remote: &IndexMap<String, Row>,
    keep: &HashSet<String>,
    tally: &mut SyncTally,
) {
    for (key, row) in remote {
        if keep.contains(key) || ctx.mapping.is_protected(row) {
            continue;
        }
        if ctx.cancel.is_cancelled() {
            tally.cancel();
            return;
        }
        if tally.dry_run() {
            tally.record(RecordChange::Deleted);
            continue;
        }
        let removed = match row.id() {
            Some(id) => session
                .remove(ctx.mapping.menu, id)
                .await
                .for_device(ctx.device),
            None => Err(CoreError::Protocol {
                device: ctx.device.clone(),
                message: format!("{} row {key} has no .id", ctx.mapping.menu),
            }),
        };
        match removed {
            Ok(()) => {
                info!(device = %ctx.device, menu = ctx.mapping.menu, %key, "pruned remote row");
                tally.record(RecordChange::Deleted);
            }
            Err(e) => tally.fail(key.as_str(), &e),
        }
    }
}

// ONU discovery over SNMP.
//
// Walk the vendor's ONU list tables in order, then read status, optical
// power and distance per index. Any single-ONU failure is recorded and the
// walk continues; losing the OLT altogether aborts.

use ispnet_api::{Oid, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{ImportRules, SyncTally, persist_import};
use crate::error::CoreError;
use crate::model::{DeviceDescriptor, DeviceId, EntityType, SyncedEntity};
use crate::session::SnmpSession;
use crate::store::SyncStore;
use crate::vendor::{self, OnuStatus, VendorOids};

/// Fields a discovery pass writes. Anything else on a stored ONU (the
/// subscriber it is assigned to, notes) is kept across imports.
const DISCOVERED_FIELDS: &[&str] = &[
    "index",
    "pon_port",
    "onu_id",
    "status",
    "rx_power_dbm",
    "tx_power_dbm",
    "distance_m",
];

pub(crate) async fn import_onus(
    snmp: &mut dyn SnmpSession,
    store: &dyn SyncStore,
    descriptor: &DeviceDescriptor,
    cancel: &CancellationToken,
    tally: &mut SyncTally,
) -> Result<(), CoreError> {
    let device = &descriptor.id;
    let oids = vendor::oids_for(descriptor.vendor)?
        .filter(|o| !o.onu_list.is_empty())
        .ok_or_else(|| CoreError::Unsupported {
            device: device.clone(),
            operation: format!("ONU discovery on {} devices", descriptor.vendor),
        })?;

    let Some((table, rows)) = walk_onu_list(snmp, oids, device).await? else {
        warn!(device = %device, vendor = %descriptor.vendor, "no ONUs discovered");
        return Ok(());
    };
    debug!(device = %device, table = %table, onus = rows.len(), "ONU table walked");

    let device_owns = |name: &str| DISCOVERED_FIELDS.contains(&name);
    let rules = ImportRules {
        device_owns: &device_owns,
        keep_active: false,
    };

    for (oid, value) in &rows {
        if cancel.is_cancelled() {
            tally.cancel();
            break;
        }
        let Some(index) = oid.suffix(table) else {
            continue;
        };
        let index_key = index
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(".");

        let serial = vendor::clean_serial(value);
        if serial.is_empty() {
            tally.fail(
                index_key,
                &CoreError::Protocol {
                    device: device.clone(),
                    message: "ONU reported an empty serial".into(),
                },
            );
            continue;
        }

        match describe_onu(snmp, oids, device, index, &index_key, serial).await {
            Ok(entity) => persist_import(store, entity, &rules, tally).await,
            Err(e) => tally.fail(index_key, &e),
        }
    }
    Ok(())
}

/// First list table that yields rows. Errors only when every table failed.
async fn walk_onu_list<'t>(
    snmp: &mut dyn SnmpSession,
    oids: &'t VendorOids,
    device: &DeviceId,
) -> Result<Option<(&'t Oid, Vec<(Oid, Value)>)>, CoreError> {
    let mut last_error = None;
    let mut any_answered = false;
    for table in &oids.onu_list {
        match snmp.walk(table).await {
            Ok(rows) if !rows.is_empty() => return Ok(Some((table, rows))),
            Ok(_) => any_answered = true,
            Err(e) if e.is_connection() || e.is_auth() => {
                return Err(CoreError::from_api(device, e));
            }
            Err(e) => {
                debug!(device = %device, table = %table, error = %e, "ONU table unavailable");
                last_error = Some(e);
            }
        }
    }
    match last_error {
        Some(e) if !any_answered => Err(CoreError::from_api(device, e)),
        _ => Ok(None),
    }
}

async fn describe_onu(
    snmp: &mut dyn SnmpSession,
    oids: &VendorOids,
    device: &DeviceId,
    index: &[u32],
    index_key: &str,
    serial: String,
) -> Result<SyncedEntity, CoreError> {
    let (pon_port, onu_id) = vendor::split_index(index);
    let mut entity = SyncedEntity::new(device.clone(), EntityType::Onu, serial)
        .with_field("index", index_key)
        .with_field("pon_port", pon_port)
        .with_field("onu_id", onu_id);

    let status = match &oids.onu_status {
        Some(base) => read_optional(snmp, device, &base.child(index))
            .await?
            .map(|v| vendor::parse_status(oids.vendor, &v)),
        None => None,
    }
    .unwrap_or(OnuStatus::Unknown);
    entity = entity.with_field("status", status.to_string());

    for (base, name) in [
        (&oids.onu_rx_power, "rx_power_dbm"),
        (&oids.onu_tx_power, "tx_power_dbm"),
    ] {
        let Some(base) = base else { continue };
        let reading = read_optional(snmp, device, &base.child(index))
            .await?
            .and_then(|v| vendor::parse_power(oids, &v));
        if let Some(dbm) = reading {
            entity = entity.with_field(name, format!("{dbm:.2}"));
        }
    }

    if let Some(base) = &oids.onu_distance {
        let distance = read_optional(snmp, device, &base.child(index))
            .await?
            .and_then(|v| vendor::parse_distance(&v));
        if let Some(meters) = distance {
            entity = entity.with_field("distance_m", meters.to_string());
        }
    }

    Ok(entity)
}

/// A per-ONU detail read. Missing objects are `None`; a lost agent is an error.
async fn read_optional(
    snmp: &mut dyn SnmpSession,
    device: &DeviceId,
    oid: &Oid,
) -> Result<Option<Value>, CoreError> {
    match snmp.get(oid).await {
        Ok(value) if value.is_exception() => Ok(None),
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_connection() => Err(CoreError::from_api(device, e)),
        Err(e) => {
            debug!(device = %device, oid = %oid, error = %e, "ONU detail unavailable");
            Ok(None)
        }
    }
}

// ── Entity mappings ──
//
// Table-driven translation between RouterOS menu rows and canonical
// records. One static mapping per router entity type.

use ispnet_api::Row;
use ispnet_api::routeros::menu;

use crate::failover::{is_fallback_tagged, tag_fallback, untag_fallback};
use crate::model::{DeviceId, EntityType, Provenance, SyncedEntity};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FieldMode {
    /// Compared and pushed on every mirror.
    Mutable,
    /// Pushed, but compared only when the device returns it (passwords).
    WriteOnly,
    /// Free text that may carry the failover fallback tag. The tag is
    /// never imported and survives mirrors.
    Annotated,
}

#[derive(Debug)]
pub(crate) struct FieldSpec {
    pub canonical: &'static str,
    pub device: &'static str,
    pub mode: FieldMode,
}

#[derive(Debug)]
pub(crate) struct EntityMapping {
    pub entity_type: EntityType,
    pub menu: &'static str,
    /// Device attribute holding the natural key.
    pub key_field: &'static str,
    pub fields: &'static [FieldSpec],
    /// Device flag whose `yes` means the record is inactive.
    pub active_field: Option<&'static str>,
    /// Built-in rows prune must never delete.
    pub protected_keys: &'static [&'static str],
}

const fn field(canonical: &'static str, device: &'static str) -> FieldSpec {
    FieldSpec {
        canonical,
        device,
        mode: FieldMode::Mutable,
    }
}

static IP_POOL: EntityMapping = EntityMapping {
    entity_type: EntityType::IpPool,
    menu: menu::IP_POOL,
    key_field: "name",
    fields: &[
        field("ranges", "ranges"),
        field("next_pool", "next-pool"),
        field("comment", "comment"),
    ],
    active_field: None,
    protected_keys: &[],
};

static PPP_PROFILE: EntityMapping = EntityMapping {
    entity_type: EntityType::PppProfile,
    menu: menu::PPP_PROFILE,
    key_field: "name",
    fields: &[
        field("local_address", "local-address"),
        field("remote_address", "remote-address"),
        field("rate_limit", "rate-limit"),
        field("session_timeout", "session-timeout"),
        field("idle_timeout", "idle-timeout"),
        field("only_one", "only-one"),
        field("change_tcp_mss", "change-tcp-mss"),
        field("comment", "comment"),
    ],
    active_field: None,
    protected_keys: &["default", "default-encryption"],
};

static PPP_SECRET: EntityMapping = EntityMapping {
    entity_type: EntityType::PppSecret,
    menu: menu::PPP_SECRET,
    key_field: "name",
    fields: &[
        FieldSpec {
            canonical: "password",
            device: "password",
            mode: FieldMode::WriteOnly,
        },
        field("service", "service"),
        field("profile", "profile"),
        field("local_address", "local-address"),
        field("remote_address", "remote-address"),
        FieldSpec {
            canonical: "comment",
            device: "comment",
            mode: FieldMode::Annotated,
        },
    ],
    active_field: Some("disabled"),
    protected_keys: &[],
};

/// Mapping for a router-side entity type; `None` for ONUs.
pub(crate) fn mapping_for(entity_type: EntityType) -> Option<&'static EntityMapping> {
    match entity_type {
        EntityType::IpPool => Some(&IP_POOL),
        EntityType::PppProfile => Some(&PPP_PROFILE),
        EntityType::PppSecret => Some(&PPP_SECRET),
        EntityType::Onu => None,
    }
}

/// RouterOS reports booleans as `yes/no` (API) or `true/false` (REST).
pub(crate) fn normalize(value: &str) -> &str {
    match value {
        "true" | "yes" => "yes",
        "false" | "no" => "no",
        other => other,
    }
}

impl EntityMapping {
    pub(crate) fn key<'r>(&self, row: &'r Row) -> Option<&'r str> {
        row.get(self.key_field).filter(|k| !k.is_empty())
    }

    /// Dynamic and built-in rows belong to the router.
    pub(crate) fn is_protected(&self, row: &Row) -> bool {
        row.flag("dynamic")
            || row.flag("default")
            || self
                .key(row)
                .is_some_and(|k| self.protected_keys.iter().any(|p| *p == k))
    }

    /// Whether an import is authoritative for `canonical`. Write-only
    /// fields never come back from the device, so their stored value wins.
    pub(crate) fn device_owns(&self, canonical: &str) -> bool {
        self.fields
            .iter()
            .any(|spec| spec.canonical == canonical && spec.mode != FieldMode::WriteOnly)
    }

    pub(crate) fn is_active(&self, row: &Row) -> bool {
        self.active_field.is_none_or(|f| !row.flag(f))
    }

    /// Canonical record from a device row; `None` when the row has no key.
    pub(crate) fn to_entity(&self, device: &DeviceId, row: &Row) -> Option<SyncedEntity> {
        let key = self.key(row)?;
        let mut entity = SyncedEntity::new(device.clone(), self.entity_type, key)
            .with_active(self.is_active(row));
        entity.provenance = Provenance::Import;
        for spec in self.fields {
            let Some(value) = row.get(spec.device).map(normalize) else {
                continue;
            };
            let value = match spec.mode {
                FieldMode::Annotated => untag_fallback(value),
                FieldMode::Mutable | FieldMode::WriteOnly => value,
            };
            if !value.is_empty() {
                entity
                    .fields
                    .insert(spec.canonical.to_owned(), value.to_owned());
            }
        }
        Some(entity)
    }

    /// Full row for creating `entity` on the device.
    pub(crate) fn to_row(&self, entity: &SyncedEntity) -> Row {
        let mut row = Row::new().with(self.key_field, entity.key.as_str());
        for spec in self.fields {
            if let Some(value) = entity.field(spec.canonical) {
                row.insert(spec.device, value);
            }
        }
        row
    }

    /// Attributes that differ between the stored record and the device row.
    pub(crate) fn changes(&self, entity: &SyncedEntity, remote: &Row) -> Row {
        let mut changes = Row::new();
        for spec in self.fields {
            let Some(desired) = entity.field(spec.canonical) else {
                continue;
            };
            let current = remote.get(spec.device).map(normalize);
            let differs = match spec.mode {
                FieldMode::Mutable => current.unwrap_or_default() != normalize(desired),
                FieldMode::WriteOnly => current.is_some_and(|c| c != desired),
                FieldMode::Annotated => current.map(untag_fallback).unwrap_or_default() != desired,
            };
            if !differs {
                continue;
            }
            if spec.mode == FieldMode::Annotated && is_fallback_tagged(current) {
                changes.insert(spec.device, tag_fallback(Some(desired)));
            } else {
                changes.insert(spec.device, desired);
            }
        }
        changes
    }

    /// Tag active records for watchdog fallback and untag inactive ones.
    /// `row` is the pending create or update; `remote` the device row, if
    /// any. Only used while the router is in RADIUS mode.
    pub(crate) fn align_fallback(&self, active: bool, remote: Option<&Row>, row: &mut Row) {
        for spec in self.fields.iter().filter(|s| s.mode == FieldMode::Annotated) {
            let effective = row
                .get(spec.device)
                .or_else(|| remote.and_then(|r| r.get(spec.device)))
                .map(str::to_owned);
            if is_fallback_tagged(effective.as_deref()) == active {
                continue;
            }
            let value = if active {
                tag_fallback(effective.as_deref())
            } else {
                effective
                    .as_deref()
                    .map(untag_fallback)
                    .unwrap_or_default()
                    .to_owned()
            };
            row.insert(spec.device, value);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn remote_secret() -> Row {
        Row::from([
            (".id", "*1A"),
            ("name", "alice"),
            ("service", "pppoe"),
            ("profile", "10M"),
            ("disabled", "true"),
        ])
    }

    #[test]
    fn imports_secret_with_normalized_flags() {
        let mapping = mapping_for(EntityType::PppSecret).unwrap();
        let entity = mapping
            .to_entity(&DeviceId::new("r1"), &remote_secret())
            .unwrap();
        assert_eq!(entity.entity_type, EntityType::PppSecret);
        assert_eq!(entity.key, "alice");
        assert!(!entity.active);
        assert_eq!(entity.field("profile"), Some("10M"));
        assert_eq!(entity.field("password"), None);
    }

    #[test]
    fn unreadable_password_is_not_a_change() {
        let mapping = mapping_for(EntityType::PppSecret).unwrap();
        let stored = SyncedEntity::new(DeviceId::new("r1"), EntityType::PppSecret, "alice")
            .with_field("password", "s3cret")
            .with_field("service", "pppoe")
            .with_field("profile", "20M");

        let changes = mapping.changes(&stored, &remote_secret());
        assert_eq!(changes.len(), 1);
        assert_eq!(changes.get("profile"), Some("20M"));

        let readable = remote_secret().with("password", "old").with("profile", "20M");
        let changes = mapping.changes(&stored, &readable);
        assert_eq!(changes.get("password"), Some("s3cret"));
        assert_eq!(changes.len(), 1);
    }

    #[test]
    fn password_is_not_device_owned() {
        let mapping = mapping_for(EntityType::PppSecret).unwrap();
        assert!(mapping.device_owns("profile"));
        assert!(!mapping.device_owns("password"));
        assert!(!mapping.device_owns("plan_id"));
    }

    #[test]
    fn fallback_tag_is_neither_imported_nor_overwritten() {
        let mapping = mapping_for(EntityType::PppSecret).unwrap();
        let remote = remote_secret().with("comment", "ispnet-fallback tower 3");
        let entity = mapping.to_entity(&DeviceId::new("r1"), &remote).unwrap();
        assert_eq!(entity.field("comment"), Some("tower 3"));

        let stored = entity.clone().with_field("comment", "tower 4");
        let changes = mapping.changes(&stored, &remote);
        assert_eq!(changes.get("comment"), Some("ispnet-fallback tower 4"));
        assert!(mapping.changes(&entity, &remote).is_empty());
    }

    #[test]
    fn align_fallback_follows_activity() {
        let mapping = mapping_for(EntityType::PppSecret).unwrap();
        let mut create = Row::from([("name", "alice"), ("comment", "vip")]);
        mapping.align_fallback(true, None, &mut create);
        assert_eq!(create.get("comment"), Some("ispnet-fallback vip"));

        let remote = Row::from([("name", "bob"), ("comment", "ispnet-fallback")]);
        let mut changes = Row::new();
        mapping.align_fallback(false, Some(&remote), &mut changes);
        assert_eq!(changes.get("comment"), Some(""));

        let mut untouched = Row::new();
        mapping.align_fallback(true, Some(&remote), &mut untouched);
        assert!(untouched.is_empty());
    }

    #[test]
    fn boolean_spellings_compare_equal() {
        let mapping = mapping_for(EntityType::PppProfile).unwrap();
        let stored = SyncedEntity::new(DeviceId::new("r1"), EntityType::PppProfile, "10M")
            .with_field("only_one", "yes");
        let remote = Row::from([("name", "10M"), ("only-one", "true")]);
        assert!(mapping.changes(&stored, &remote).is_empty());
    }

    #[test]
    fn builtin_profiles_are_protected() {
        let mapping = mapping_for(EntityType::PppProfile).unwrap();
        assert!(mapping.is_protected(&Row::from([("name", "default")])));
        assert!(mapping.is_protected(&Row::from([("name", "x"), ("dynamic", "true")])));
        assert!(!mapping.is_protected(&Row::from([("name", "10M")])));
    }
}

#![allow(clippy::unwrap_used)]

use std::io::Write as _;
use std::time::Duration;

use ispnet_api::SnmpVersion;
use ispnet_config::{
    ConfigError, backup_key, device_descriptor, device_descriptors, engine_config, load_config_from,
    read_config_file, record_primary_auth, retention_policy, sample_config, save_config_to,
};
use ispnet_core::{
    AuthMode, Credentials, DeviceId, DeviceKind, ManagementProtocol, TlsVerification, Vendor,
};
use pretty_assertions::assert_eq;
use secrecy::ExposeSecret;

const INVENTORY: &str = r#"
[defaults]
use_keyring = false
concurrency = 8
api_timeout = 15
backup_keep_last = 3
backup_max_age = "14d"

[radius]
server = "10.9.9.9"
secret = "shared"
interim_update = "10m"

[radius.netwatch]
interval = "30s"

[devices.core-1]
name = "Core"
kind = "router"
host = "192.0.2.1"
username = "admin"
password = "hunter2"
primary_auth = "hybrid"

[devices.edge-api]
kind = "router"
protocol = "api"
host = "192.0.2.2"
username = "ops"
password_env = "CARGO_PKG_NAME"
insecure = false

[devices.olt-1]
kind = "olt"
vendor = "huawei"
host = "192.0.2.50"
community = "public"
snmp_version = "v1"
"#;

fn write_config(text: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    file.write_all(text.as_bytes()).unwrap();
    file
}

#[test]
fn missing_file_yields_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = load_config_from(&dir.path().join("nope.toml")).unwrap();

    assert!(cfg.devices.is_empty());
    assert!(cfg.radius.is_none());
    assert_eq!(cfg.defaults.concurrency, 4);
    assert_eq!(cfg.defaults.output, "table");

    let engine = engine_config(&cfg).unwrap();
    assert_eq!(engine.probe_timeout, Duration::from_secs(20));
    assert!(engine.radius.is_none());
}

#[test]
fn inventory_translates_to_descriptors() {
    let file = write_config(INVENTORY);
    let cfg = load_config_from(file.path()).unwrap();
    let descriptors = device_descriptors(&cfg).unwrap();

    let ids: Vec<&str> = descriptors.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, vec!["core-1", "edge-api", "olt-1"]);

    let core = &descriptors[0];
    assert_eq!(core.name, "Core");
    assert_eq!(core.protocol, ManagementProtocol::Rest);
    assert_eq!(core.port, 443);
    assert_eq!(core.tls, TlsVerification::DangerAcceptInvalid);
    assert_eq!(core.primary_auth, AuthMode::Hybrid);
    match &core.credentials {
        Credentials::Login { username, password } => {
            assert_eq!(username, "admin");
            assert_eq!(password.expose_secret(), "hunter2");
        }
        other => panic!("expected a login, got {other:?}"),
    }

    let edge = &descriptors[1];
    assert_eq!(edge.name, "edge-api");
    assert_eq!(edge.port, 8728);
    assert_eq!(edge.tls, TlsVerification::SystemDefaults);
    match &edge.credentials {
        Credentials::Login { password, .. } => {
            assert_eq!(password.expose_secret(), "ispnet-config");
        }
        other => panic!("expected a login, got {other:?}"),
    }

    let olt = &descriptors[2];
    assert_eq!(olt.kind, DeviceKind::Olt);
    assert_eq!(olt.vendor, Vendor::Huawei);
    assert_eq!(olt.protocol, ManagementProtocol::Snmp);
    assert_eq!(olt.port, 161);
    assert!(matches!(
        olt.credentials,
        Credentials::Snmp {
            version: SnmpVersion::V1,
            ..
        }
    ));
}

#[test]
fn engine_config_carries_defaults_and_radius() {
    let file = write_config(INVENTORY);
    let cfg = load_config_from(file.path()).unwrap();
    let engine = engine_config(&cfg).unwrap();

    assert_eq!(engine.concurrency, 8);
    assert_eq!(engine.api_timeout, Duration::from_secs(15));
    let radius = engine.radius.unwrap();
    assert_eq!(radius.server, "10.9.9.9");
    assert_eq!(radius.secret.expose_secret(), "shared");
    assert_eq!(radius.auth_port, 1812);
    assert_eq!(radius.interim_update, "10m");
    assert_eq!(radius.watchdog.interval, "30s");
    assert!(radius.watchdog.enabled);

    let retention = retention_policy(&cfg.defaults).unwrap();
    assert_eq!(retention.keep_last, 3);
    assert_eq!(retention.max_age, Some(Duration::from_secs(14 * 24 * 3600)));
}

#[test]
fn missing_password_is_reported_per_device() {
    let file = write_config(
        r#"
[defaults]
use_keyring = false

[devices.r1]
kind = "router"
host = "192.0.2.1"
username = "admin"
"#,
    );
    let cfg = load_config_from(file.path()).unwrap();
    let err = device_descriptor("r1", cfg.device("r1").unwrap(), &cfg.defaults).unwrap_err();

    assert!(matches!(err, ConfigError::NoCredentials { ref owner, .. } if owner == "r1"));
}

#[test]
fn invalid_inventories_are_rejected_at_load() {
    let cases = [
        (
            "[devices.r1]\nkind = \"router\"\nprotocol = \"snmp\"\nhost = \"h\"\n",
            "devices.r1.protocol",
        ),
        (
            "[devices.o1]\nkind = \"olt\"\nhost = \"h\"\nsnmp_version = \"v3\"\n",
            "devices.o1.snmp_version",
        ),
        (
            "[devices.o1]\nkind = \"olt\"\nhost = \"h\"\nsnmp_version = \"v3\"\n\n[devices.o1.usm]\nuser = \"poller\"\npriv_protocol = \"aes\"\n",
            "devices.o1.usm.priv_protocol",
        ),
        ("[devices.\"a/b\"]\nkind = \"router\"\nhost = \"h\"\n", "devices.a/b"),
        ("[devices.r1]\nkind = \"router\"\nhost = \" \"\n", "devices.r1.host"),
        ("[defaults]\nconcurrency = 0\n", "defaults.concurrency"),
    ];
    for (text, expected) in cases {
        let file = write_config(text);
        match load_config_from(file.path()) {
            Err(ConfigError::Validation { field, .. }) => assert_eq!(field, expected),
            other => panic!("{expected}: unexpected {other:?}"),
        }
    }
}

#[test]
fn snmp_v3_olt_resolves_a_usm_user() {
    let file = write_config(
        r#"
[defaults]
use_keyring = false

[devices.olt-3]
kind = "olt"
vendor = "zte"
host = "192.0.2.30"
snmp_version = "v3"

[devices.olt-3.usm]
user = "poller"
auth_protocol = "sha1"
auth_password = "authpass123"
priv_protocol = "aes"
priv_password = "privpass123"
"#,
    );
    let cfg = load_config_from(file.path()).unwrap();
    let desc = device_descriptor("olt-3", cfg.device("olt-3").unwrap(), &cfg.defaults).unwrap();

    let Credentials::Usm(user) = &desc.credentials else {
        panic!("expected USM credentials, got {:?}", desc.credentials);
    };
    assert_eq!(user.name, "poller");
    let auth = user.auth.as_ref().unwrap();
    assert_eq!(auth.password.expose_secret(), "authpass123");
    assert_eq!(
        auth.privacy.as_ref().unwrap().password.expose_secret(),
        "privpass123"
    );

    let shown = toml::to_string(&cfg.redacted()).unwrap();
    assert!(!shown.contains("authpass123"));
    assert!(!shown.contains("privpass123"));
}

#[test]
fn backup_key_is_only_resolved_when_encryption_is_on() {
    let off = write_config("[defaults]\nuse_keyring = false\n");
    let cfg = load_config_from(off.path()).unwrap();
    assert!(backup_key(&cfg.defaults).unwrap().is_none());

    let on = write_config(
        "[defaults]\nuse_keyring = false\nencrypt_backups = true\n\
         backup_key_env = \"ISPNET_TEST_BACKUP_KEY_UNSET\"\n",
    );
    let cfg = load_config_from(on.path()).unwrap();
    let err = backup_key(&cfg.defaults).unwrap_err();
    assert!(matches!(err, ConfigError::NoCredentials { ref owner, .. } if owner == "backups"));
}

#[test]
fn primary_auth_is_written_back_without_touching_other_devices() {
    let file = write_config(INVENTORY);
    record_primary_auth(file.path(), &DeviceId::new("edge-api"), AuthMode::Radius).unwrap();

    let cfg = read_config_file(file.path()).unwrap();
    assert_eq!(cfg.devices["edge-api"].primary_auth, AuthMode::Radius);
    assert_eq!(cfg.devices["core-1"].primary_auth, AuthMode::Hybrid);
    assert_eq!(cfg.devices["core-1"].password.as_deref(), Some("hunter2"));

    let err = record_primary_auth(file.path(), &DeviceId::new("ghost"), AuthMode::Radius)
        .unwrap_err();
    assert!(matches!(err, ConfigError::UnknownDevice(_)));
}

#[test]
fn sample_config_round_trips_and_redacts() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.toml");
    let mut sample = sample_config();
    sample.devices.get_mut("core-1").unwrap().password = Some("secret".into());
    save_config_to(&path, &sample).unwrap();

    let loaded = read_config_file(&path).unwrap();
    assert_eq!(loaded.devices.len(), 1);
    assert_eq!(
        loaded.radius.as_ref().unwrap().secret_env.as_deref(),
        Some("ISPNET_RADIUS_SECRET")
    );

    let shown = toml::to_string(&loaded.redacted()).unwrap();
    assert!(!shown.contains("secret\""), "{shown}");
    assert!(shown.contains("********"));
}

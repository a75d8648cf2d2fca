//! Configuration for the ispnet CLI.
//!
//! One TOML file (`[defaults]`, `[radius]`, `[devices.<id>]`) merged with
//! `ISPNET_` environment variables, credential resolution (env + keyring +
//! plaintext), and translation into `ispnet_core::EngineConfig` and
//! `DeviceDescriptor`s. The CLI layers flag overrides on top.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use ispnet_api::SnmpVersion;
use ispnet_api::snmp::{AuthProtocol, PrivProtocol, UsmUser};
use ispnet_core::{
    AuthMode, Credentials, DeviceDescriptor, DeviceId, DeviceKind, EngineConfig,
    ManagementProtocol, RadiusSettings, RetentionPolicy, TlsVerification, Vendor,
    WatchdogSettings,
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Keyring service name; entries are keyed `<device>/password`,
/// `<device>/community`, `<device>/auth`, `<device>/priv`, `radius/secret`
/// and `backup/key`.
pub const KEYRING_SERVICE: &str = "ispnet";

const REDACTED: &str = "********";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no {what} configured for '{owner}'")]
    NoCredentials { owner: String, what: String },

    #[error("unknown device '{0}'")]
    UnknownDevice(String),

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: impl Into<String>, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub defaults: Defaults,

    /// RADIUS server routers fail over to and from.
    pub radius: Option<RadiusConfig>,

    /// Device inventory keyed by logical id.
    #[serde(default)]
    pub devices: BTreeMap<String, DeviceConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Defaults {
    pub output: String,
    pub color: String,
    /// Accept self-signed certificates unless a device says otherwise.
    pub insecure: bool,
    /// Consult the system keyring when resolving secrets.
    pub use_keyring: bool,
    /// Seconds.
    pub api_timeout: u64,
    pub connect_timeout: u64,
    pub snmp_timeout: u64,
    pub snmp_retries: u32,
    pub probe_timeout: u64,
    pub concurrency: usize,
    pub cpu_warning_pct: f64,
    pub memory_warning_pct: f64,
    /// Where the file store lives; platform data dir when unset.
    pub data_dir: Option<PathBuf>,
    pub backup_keep_last: usize,
    /// humantime duration, e.g. `30d`. Unset keeps scheduled snapshots
    /// by count only.
    pub backup_max_age: Option<String>,
    /// Encrypt snapshot content at rest with the key from `backup_key_env`
    /// or the keyring.
    pub encrypt_backups: bool,
    pub backup_key_env: Option<String>,
}

impl Default for Defaults {
    fn default() -> Self {
        let engine = EngineConfig::default();
        let retention = RetentionPolicy::default();
        Self {
            output: "table".into(),
            color: "auto".into(),
            insecure: true,
            use_keyring: true,
            api_timeout: engine.api_timeout.as_secs(),
            connect_timeout: engine.connect_timeout.as_secs(),
            snmp_timeout: engine.snmp_timeout.as_secs(),
            snmp_retries: engine.snmp_retries,
            probe_timeout: engine.probe_timeout.as_secs(),
            concurrency: engine.concurrency,
            cpu_warning_pct: engine.cpu_warning_pct,
            memory_warning_pct: engine.memory_warning_pct,
            data_dir: None,
            backup_keep_last: retention.keep_last,
            backup_max_age: Some("30d".into()),
            encrypt_backups: false,
            backup_key_env: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RadiusConfig {
    pub server: String,

    /// Shared secret (plaintext; prefer keyring or `secret_env`).
    pub secret: Option<String>,

    /// Environment variable holding the shared secret.
    pub secret_env: Option<String>,

    #[serde(default = "default_auth_port")]
    pub auth_port: u16,

    #[serde(default = "default_acct_port")]
    pub acct_port: u16,

    #[serde(default = "default_client_timeout")]
    pub client_timeout: String,

    #[serde(default = "default_interim_update")]
    pub interim_update: String,

    #[serde(default)]
    pub netwatch: NetwatchConfig,
}

fn default_auth_port() -> u16 {
    1812
}
fn default_acct_port() -> u16 {
    1813
}
fn default_client_timeout() -> String {
    "3s".into()
}
fn default_interim_update() -> String {
    "5m".into()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NetwatchConfig {
    pub enabled: bool,
    pub interval: String,
    pub timeout: String,
}

impl Default for NetwatchConfig {
    fn default() -> Self {
        let watchdog = WatchdogSettings::default();
        Self {
            enabled: watchdog.enabled,
            interval: watchdog.interval,
            timeout: watchdog.timeout,
        }
    }
}

/// One managed device.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceConfig {
    /// Display name; the id when unset.
    pub name: Option<String>,

    pub kind: DeviceKind,

    #[serde(default = "default_vendor")]
    pub vendor: Vendor,

    pub host: String,

    /// Protocol default port when unset.
    pub port: Option<u16>,

    /// `rest` for routers and `snmp` for OLTs when unset.
    pub protocol: Option<ManagementProtocol>,

    pub username: Option<String>,

    /// Plaintext password (prefer keyring or `password_env`).
    pub password: Option<String>,

    pub password_env: Option<String>,

    /// SNMP community (prefer keyring or `community_env`).
    pub community: Option<String>,

    pub community_env: Option<String>,

    #[serde(default)]
    pub snmp_version: SnmpVersion,

    /// SNMPv3 user; required when `snmp_version = "v3"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usm: Option<UsmConfig>,

    /// Updated by `ispnet failover` after each successful switch.
    #[serde(default)]
    pub primary_auth: AuthMode,

    /// Override `defaults.insecure`.
    pub insecure: Option<bool>,

    /// Custom CA bundle for the REST interface.
    pub ca_cert: Option<PathBuf>,

    /// Talk plain HTTP to the REST interface.
    #[serde(default)]
    pub plaintext: bool,
}

/// `[devices.<id>.usm]`: noAuthNoPriv without `auth_protocol`, authPriv
/// when `priv_protocol` is also set.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct UsmConfig {
    pub user: String,
    pub auth_protocol: Option<AuthProtocol>,
    pub auth_password: Option<String>,
    pub auth_password_env: Option<String>,
    pub priv_protocol: Option<PrivProtocol>,
    pub priv_password: Option<String>,
    pub priv_password_env: Option<String>,
}

fn default_vendor() -> Vendor {
    Vendor::Mikrotik
}

impl DeviceConfig {
    pub fn effective_protocol(&self) -> ManagementProtocol {
        self.protocol.unwrap_or(match self.kind {
            DeviceKind::Router => ManagementProtocol::Rest,
            DeviceKind::Olt => ManagementProtocol::Snmp,
        })
    }
}

impl Config {
    /// Copy with every plaintext secret masked, for display.
    pub fn redacted(&self) -> Self {
        let mask = |s: &Option<String>| s.as_ref().map(|_| REDACTED.to_owned());
        let mut out = self.clone();
        if let Some(radius) = out.radius.as_mut() {
            radius.secret = mask(&radius.secret);
        }
        for device in out.devices.values_mut() {
            device.password = mask(&device.password);
            device.community = mask(&device.community);
            if let Some(usm) = device.usm.as_mut() {
                usm.auth_password = mask(&usm.auth_password);
                usm.priv_password = mask(&usm.priv_password);
            }
        }
        out
    }

    pub fn device(&self, id: &str) -> Result<&DeviceConfig, ConfigError> {
        self.devices
            .get(id)
            .ok_or_else(|| ConfigError::UnknownDevice(id.into()))
    }
}

// ── Config file path ────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("net", "ispnet", "ispnet")
}

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    project_dirs().map_or_else(
        || home_fallback(".config").join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Default location of the file store.
pub fn default_data_dir() -> PathBuf {
    project_dirs().map_or_else(
        || home_fallback(".local/share"),
        |dirs| dirs.data_dir().to_path_buf(),
    )
}

fn home_fallback(sub: &str) -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(sub);
    p.push("ispnet");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the config at the canonical path, merged with the environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load `path` (missing is fine) merged with `ISPNET_` variables, e.g.
/// `ISPNET_DEFAULTS__CONCURRENCY=8`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("ISPNET_").split("__"));

    let config: Config = figment.extract()?;
    validate(&config)?;
    Ok(config)
}

/// Read `path` as-is, without environment overrides. Used before writing
/// back so env values never leak into the file.
pub fn read_config_file(path: &Path) -> Result<Config, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(toml::from_str(&text)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Config::default()),
        Err(e) => Err(e.into()),
    }
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.defaults.concurrency == 0 {
        return Err(invalid("defaults.concurrency", "must be at least 1"));
    }
    if let Some(age) = &config.defaults.backup_max_age {
        humantime::parse_duration(age)
            .map_err(|e| invalid("defaults.backup_max_age", e.to_string()))?;
    }
    for (id, device) in &config.devices {
        let field = |name: &str| format!("devices.{id}.{name}");
        if !DeviceId::new(id.as_str()).is_path_safe() {
            return Err(invalid(
                format!("devices.{id}"),
                "ids may only contain letters, digits, '-', '_' and '.'",
            ));
        }
        if device.host.trim().is_empty() {
            return Err(invalid(field("host"), "must not be empty"));
        }
        let protocol = device.effective_protocol();
        match (device.kind, protocol) {
            (DeviceKind::Router, ManagementProtocol::Snmp) => {
                return Err(invalid(field("protocol"), "routers are managed over rest or api"));
            }
            (DeviceKind::Olt, ManagementProtocol::Rest | ManagementProtocol::Api) => {
                return Err(invalid(field("protocol"), "OLTs are managed over snmp"));
            }
            _ => {}
        }
        if protocol == ManagementProtocol::Snmp && device.snmp_version == SnmpVersion::V3 {
            let Some(usm) = &device.usm else {
                return Err(invalid(field("snmp_version"), "v3 needs a [usm] table"));
            };
            if usm.user.trim().is_empty() {
                return Err(invalid(field("usm.user"), "must not be empty"));
            }
            if usm.priv_protocol.is_some() && usm.auth_protocol.is_none() {
                return Err(invalid(
                    field("usm.priv_protocol"),
                    "privacy requires auth_protocol",
                ));
            }
        }
    }
    Ok(())
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write it to `path`.
pub fn save_config_to(path: &Path, cfg: &Config) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

/// Persist a device's auth mode after a failover switch.
pub fn record_primary_auth(path: &Path, id: &DeviceId, mode: AuthMode) -> Result<(), ConfigError> {
    let mut cfg = read_config_file(path)?;
    let device = cfg
        .devices
        .get_mut(id.as_str())
        .ok_or_else(|| ConfigError::UnknownDevice(id.to_string()))?;
    if device.primary_auth == mode {
        return Ok(());
    }
    device.primary_auth = mode;
    save_config_to(path, &cfg)
}

/// Starter config written by `ispnet config init`.
pub fn sample_config() -> Config {
    let mut devices = BTreeMap::new();
    devices.insert(
        "core-1".to_owned(),
        DeviceConfig {
            name: Some("Core router".into()),
            kind: DeviceKind::Router,
            vendor: Vendor::Mikrotik,
            host: "192.0.2.1".into(),
            port: None,
            protocol: Some(ManagementProtocol::Rest),
            username: Some("admin".into()),
            password: None,
            password_env: None,
            community: None,
            community_env: None,
            snmp_version: SnmpVersion::V2c,
            usm: None,
            primary_auth: AuthMode::Router,
            insecure: None,
            ca_cert: None,
            plaintext: false,
        },
    );
    Config {
        defaults: Defaults::default(),
        radius: Some(RadiusConfig {
            server: "192.0.2.10".into(),
            secret: None,
            secret_env: Some("ISPNET_RADIUS_SECRET".into()),
            auth_port: default_auth_port(),
            acct_port: default_acct_port(),
            client_timeout: default_client_timeout(),
            interim_update: default_interim_update(),
            netwatch: NetwatchConfig::default(),
        }),
        devices,
    }
}

// ── Credential resolution ───────────────────────────────────────────

/// Where a secret may come from, in resolution order.
struct SecretSource<'a> {
    env: Option<&'a str>,
    keyring_key: String,
    plaintext: Option<&'a str>,
}

fn resolve_secret(
    source: &SecretSource<'_>,
    use_keyring: bool,
    owner: &str,
    what: &str,
) -> Result<SecretString, ConfigError> {
    // 1. Named environment variable
    if let Some(val) = source.env.and_then(|name| std::env::var(name).ok()) {
        return Ok(SecretString::from(val));
    }

    // 2. System keyring
    if use_keyring {
        if let Some(secret) = keyring_get(&source.keyring_key) {
            return Ok(SecretString::from(secret));
        }
    }

    // 3. Plaintext in config
    if let Some(val) = source.plaintext {
        return Ok(SecretString::from(val.to_owned()));
    }

    Err(ConfigError::NoCredentials {
        owner: owner.into(),
        what: what.into(),
    })
}

fn keyring_get(key: &str) -> Option<String> {
    keyring::Entry::new(KEYRING_SERVICE, key)
        .ok()?
        .get_password()
        .ok()
}

/// Store a secret in the system keyring under `key`.
pub fn store_secret(key: &str, secret: &str) -> Result<(), ConfigError> {
    keyring::Entry::new(KEYRING_SERVICE, key)?.set_password(secret)?;
    Ok(())
}

pub fn password_key(id: &str) -> String {
    format!("{id}/password")
}

pub fn community_key(id: &str) -> String {
    format!("{id}/community")
}

pub fn auth_key(id: &str) -> String {
    format!("{id}/auth")
}

pub fn priv_key(id: &str) -> String {
    format!("{id}/priv")
}

pub const RADIUS_SECRET_KEY: &str = "radius/secret";

pub const BACKUP_KEY: &str = "backup/key";

/// Passphrase for snapshot encryption; `None` when `encrypt_backups` is off.
pub fn backup_key(defaults: &Defaults) -> Result<Option<SecretString>, ConfigError> {
    if !defaults.encrypt_backups {
        return Ok(None);
    }
    resolve_secret(
        &SecretSource {
            env: defaults.backup_key_env.as_deref(),
            keyring_key: BACKUP_KEY.to_owned(),
            plaintext: None,
        },
        defaults.use_keyring,
        "backups",
        "encryption key",
    )
    .map(Some)
}

fn resolve_credentials(
    id: &str,
    device: &DeviceConfig,
    use_keyring: bool,
) -> Result<Credentials, ConfigError> {
    if device.effective_protocol() == ManagementProtocol::Snmp {
        if device.snmp_version == SnmpVersion::V3 {
            let usm = device.usm.as_ref().ok_or_else(|| ConfigError::NoCredentials {
                owner: id.into(),
                what: "SNMPv3 user".into(),
            })?;
            return Ok(Credentials::Usm(resolve_usm(id, usm, use_keyring)?));
        }
        let community = resolve_secret(
            &SecretSource {
                env: device.community_env.as_deref(),
                keyring_key: community_key(id),
                plaintext: device.community.as_deref(),
            },
            use_keyring,
            id,
            "SNMP community",
        )?;
        return Ok(Credentials::Snmp {
            community,
            version: device.snmp_version,
        });
    }

    let username = device
        .username
        .clone()
        .ok_or_else(|| ConfigError::NoCredentials {
            owner: id.into(),
            what: "username".into(),
        })?;
    let password = resolve_secret(
        &SecretSource {
            env: device.password_env.as_deref(),
            keyring_key: password_key(id),
            plaintext: device.password.as_deref(),
        },
        use_keyring,
        id,
        "password",
    )?;
    Ok(Credentials::Login { username, password })
}

fn resolve_usm(id: &str, usm: &UsmConfig, use_keyring: bool) -> Result<UsmUser, ConfigError> {
    let mut user = UsmUser::new(usm.user.clone());
    let Some(auth) = usm.auth_protocol else {
        return Ok(user);
    };
    let auth_password = resolve_secret(
        &SecretSource {
            env: usm.auth_password_env.as_deref(),
            keyring_key: auth_key(id),
            plaintext: usm.auth_password.as_deref(),
        },
        use_keyring,
        id,
        "SNMPv3 auth password",
    )?;
    user = user.with_auth(auth, auth_password);
    if let Some(privacy) = usm.priv_protocol {
        let priv_password = resolve_secret(
            &SecretSource {
                env: usm.priv_password_env.as_deref(),
                keyring_key: priv_key(id),
                plaintext: usm.priv_password.as_deref(),
            },
            use_keyring,
            id,
            "SNMPv3 privacy password",
        )?;
        user = user.with_privacy(privacy, priv_password);
    }
    Ok(user)
}

// ── Translation to core types ───────────────────────────────────────

/// Build one device's descriptor, resolving its credentials.
pub fn device_descriptor(
    id: &str,
    device: &DeviceConfig,
    defaults: &Defaults,
) -> Result<DeviceDescriptor, ConfigError> {
    let protocol = device.effective_protocol();
    let tls = if device.plaintext {
        TlsVerification::PlainText
    } else if let Some(ca) = &device.ca_cert {
        TlsVerification::CustomCa(ca.clone())
    } else if device.insecure.unwrap_or(defaults.insecure) {
        TlsVerification::DangerAcceptInvalid
    } else {
        TlsVerification::SystemDefaults
    };
    let port = device.port.unwrap_or_else(|| protocol.default_port(&tls));
    let credentials = resolve_credentials(id, device, defaults.use_keyring)?;

    Ok(DeviceDescriptor {
        id: DeviceId::new(id),
        name: device.name.clone().unwrap_or_else(|| id.to_owned()),
        kind: device.kind,
        vendor: device.vendor,
        protocol,
        host: device.host.clone(),
        port,
        tls,
        credentials,
        primary_auth: device.primary_auth,
    })
}

/// Descriptors for the whole inventory, ordered by id.
pub fn device_descriptors(cfg: &Config) -> Result<Vec<DeviceDescriptor>, ConfigError> {
    cfg.devices
        .iter()
        .map(|(id, device)| device_descriptor(id, device, &cfg.defaults))
        .collect()
}

fn radius_settings(radius: &RadiusConfig, use_keyring: bool) -> Result<RadiusSettings, ConfigError> {
    if radius.server.trim().is_empty() {
        return Err(invalid("radius.server", "must not be empty"));
    }
    let secret = resolve_secret(
        &SecretSource {
            env: radius.secret_env.as_deref(),
            keyring_key: RADIUS_SECRET_KEY.to_owned(),
            plaintext: radius.secret.as_deref(),
        },
        use_keyring,
        "radius",
        "shared secret",
    )?;
    let mut settings = RadiusSettings::new(radius.server.clone(), secret);
    settings.auth_port = radius.auth_port;
    settings.acct_port = radius.acct_port;
    settings.client_timeout.clone_from(&radius.client_timeout);
    settings.interim_update.clone_from(&radius.interim_update);
    settings.watchdog = WatchdogSettings {
        enabled: radius.netwatch.enabled,
        interval: radius.netwatch.interval.clone(),
        timeout: radius.netwatch.timeout.clone(),
    };
    Ok(settings)
}

/// Engine knobs from `[defaults]` plus the resolved `[radius]` section.
pub fn engine_config(cfg: &Config) -> Result<EngineConfig, ConfigError> {
    let d = &cfg.defaults;
    let radius = cfg
        .radius
        .as_ref()
        .map(|r| radius_settings(r, d.use_keyring))
        .transpose()?;
    Ok(EngineConfig {
        api_timeout: Duration::from_secs(d.api_timeout),
        connect_timeout: Duration::from_secs(d.connect_timeout),
        snmp_timeout: Duration::from_secs(d.snmp_timeout),
        snmp_retries: d.snmp_retries,
        probe_timeout: Duration::from_secs(d.probe_timeout),
        concurrency: d.concurrency,
        cpu_warning_pct: d.cpu_warning_pct,
        memory_warning_pct: d.memory_warning_pct,
        radius,
    })
}

pub fn retention_policy(defaults: &Defaults) -> Result<RetentionPolicy, ConfigError> {
    let max_age = defaults
        .backup_max_age
        .as_deref()
        .map(humantime::parse_duration)
        .transpose()
        .map_err(|e| invalid("defaults.backup_max_age", e.to_string()))?;
    Ok(RetentionPolicy {
        keep_last: defaults.backup_keep_last,
        max_age,
    })
}

pub fn data_dir(defaults: &Defaults) -> PathBuf {
    defaults.data_dir.clone().unwrap_or_else(default_data_dir)
}

// ── Runtime configuration ──
//
// Built by the CLI from `ispnet-config` and passed into `Platform`.
// Core never reads config files.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

/// TLS handling for HTTPS management interfaces.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsVerification {
    /// Use the operating system's trust store.
    SystemDefaults,
    /// Trust a specific CA bundle.
    CustomCa(PathBuf),
    /// Accept any certificate (RouterOS ships self-signed).
    #[default]
    DangerAcceptInvalid,
    /// Plain HTTP for the REST interface.
    PlainText,
}

/// The netwatch rule that flips routers back to local auth when RADIUS
/// stops answering pings.
#[derive(Debug, Clone)]
pub struct WatchdogSettings {
    pub enabled: bool,
    /// RouterOS duration syntax, e.g. `1m`.
    pub interval: String,
    pub timeout: String,
}

impl Default for WatchdogSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: "1m".into(),
            timeout: "1s".into(),
        }
    }
}

/// RADIUS server the routers should authenticate against.
#[derive(Debug, Clone)]
pub struct RadiusSettings {
    pub server: String,
    pub secret: SecretString,
    pub auth_port: u16,
    pub acct_port: u16,
    /// Client-side request timeout on the router (`3s`).
    pub client_timeout: String,
    /// Accounting interim-update interval (`5m`).
    pub interim_update: String,
    pub watchdog: WatchdogSettings,
}

impl RadiusSettings {
    pub fn new(server: impl Into<String>, secret: SecretString) -> Self {
        Self {
            server: server.into(),
            secret,
            auth_port: 1812,
            acct_port: 1813,
            client_timeout: "3s".into(),
            interim_update: "5m".into(),
            watchdog: WatchdogSettings::default(),
        }
    }
}

/// Engine-wide knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Deadline for each RouterOS call.
    pub api_timeout: Duration,
    pub connect_timeout: Duration,
    /// Deadline for each SNMP request.
    pub snmp_timeout: Duration,
    pub snmp_retries: u32,
    /// Upper bound on a whole health probe.
    pub probe_timeout: Duration,
    /// Devices worked on concurrently by fleet operations.
    pub concurrency: usize,
    pub cpu_warning_pct: f64,
    pub memory_warning_pct: f64,
    pub radius: Option<RadiusSettings>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
            snmp_timeout: Duration::from_secs(3),
            snmp_retries: 1,
            probe_timeout: Duration::from_secs(20),
            concurrency: 4,
            cpu_warning_pct: 90.0,
            memory_warning_pct: 90.0,
            radius: None,
        }
    }
}

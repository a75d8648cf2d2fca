//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text and a stable exit code.

use miette::Diagnostic;
use thiserror::Error;

use ispnet_config::ConfigError;
use ispnet_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
    pub const PARTIAL: i32 = 9;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────

    #[error("Could not reach device {device}")]
    #[diagnostic(
        code(ispnet::connection_failed),
        help(
            "Check that the device is powered, routable and its management\n\
             service (REST, API or SNMP) is enabled.\n\
             Try: ispnet health check {device}"
        )
    )]
    ConnectionFailed { device: String, reason: String },

    #[error("Device {device} did not answer in time")]
    #[diagnostic(
        code(ispnet::timeout),
        help("Increase the timeout with --timeout or check the device's load.")
    )]
    Timeout { device: String },

    // ── Authentication ───────────────────────────────────────────────

    #[error("Authentication to {device} failed")]
    #[diagnostic(
        code(ispnet::auth_failed),
        help(
            "Verify the username and password for this device.\n\
             Run: ispnet config set-password {device}"
        )
    )]
    AuthFailed { device: String },

    #[error("No {what} configured for '{owner}'")]
    #[diagnostic(
        code(ispnet::no_credentials),
        help(
            "Store it with: ispnet config set-password {owner}\n\
             Or point password_env / community_env / secret_env at an environment variable."
        )
    )]
    NoCredentials { owner: String, what: String },

    // ── Resources ────────────────────────────────────────────────────

    #[error("{resource_type} '{identifier}' not found")]
    #[diagnostic(
        code(ispnet::not_found),
        help("Run: ispnet {list_command} to see what exists")
    )]
    NotFound {
        resource_type: String,
        identifier: String,
        list_command: String,
    },

    // ── Device ───────────────────────────────────────────────────────

    #[error("Device {device} refused the operation: {message}")]
    #[diagnostic(code(ispnet::device_error))]
    DeviceError { device: String, message: String },

    #[error("Backup failed for {device}: {message}")]
    #[diagnostic(
        code(ispnet::backup_failed),
        help("Check that the account may run /export and write files on the router.")
    )]
    BackupFailed { device: String, message: String },

    // ── Fleet ────────────────────────────────────────────────────────

    #[error("{failed} of {total} devices failed")]
    #[diagnostic(
        code(ispnet::partial),
        help("Per-device errors are listed above; rerun with -v for details.")
    )]
    Partial { failed: usize, total: usize },

    #[error("Interrupted")]
    #[diagnostic(code(ispnet::cancelled))]
    Cancelled,

    // ── Validation ───────────────────────────────────────────────────

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(ispnet::validation))]
    Validation { field: String, reason: String },

    #[error("Destructive operation '{action}' requires confirmation")]
    #[diagnostic(
        code(ispnet::confirmation_required),
        help("Use --yes (-y) to skip confirmation in non-interactive contexts.")
    )]
    NonInteractiveRequiresYes { action: String },

    // ── Configuration ────────────────────────────────────────────────

    #[error("No devices configured")]
    #[diagnostic(
        code(ispnet::no_config),
        help(
            "Create a config with: ispnet config init\n\
             Expected at: {path}"
        )
    )]
    NoConfig { path: String },

    #[error(transparent)]
    #[diagnostic(code(ispnet::config))]
    Config(ConfigError),

    #[error("Keyring error: {0}")]
    #[diagnostic(
        code(ispnet::keyring),
        help("No keyring service is available; use password_env in the config instead.")
    )]
    Keyring(String),

    #[error("Internal error: {0}")]
    #[diagnostic(code(ispnet::internal))]
    Internal(String),

    // ── IO / Serialization ────────────────────────────────────────────

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Serialization failed: {0}")]
    #[diagnostic(code(ispnet::serialization))]
    Serialization(String),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::AuthFailed { .. } | Self::NoCredentials { .. } => exit_code::AUTH,
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::Partial { .. } => exit_code::PARTIAL,
            Self::Validation { .. } | Self::NonInteractiveRequiresYes { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            ConfigError::NoCredentials { owner, what } => Self::NoCredentials { owner, what },
            ConfigError::UnknownDevice(identifier) => Self::NotFound {
                resource_type: "device".into(),
                identifier,
                list_command: "devices list".into(),
            },
            ConfigError::Keyring(e) => Self::Keyring(e.to_string()),
            other => Self::Config(other),
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Connection { device, reason } => Self::ConnectionFailed {
                device: device.to_string(),
                reason,
            },

            CoreError::Timeout { device, .. } => Self::Timeout {
                device: device.to_string(),
            },

            CoreError::Auth { device, .. } => Self::AuthFailed {
                device: device.to_string(),
            },

            CoreError::NotFound {
                entity_type,
                identifier,
            } => {
                let list_command = match entity_type.as_str() {
                    "Backup" | "Change" => "backup list <device>",
                    _ => "devices list",
                };
                Self::NotFound {
                    resource_type: entity_type,
                    identifier,
                    list_command: list_command.into(),
                }
            }

            CoreError::Backup { device, message } => Self::BackupFailed {
                device: device.to_string(),
                message,
            },

            err @ (CoreError::Protocol { .. }
            | CoreError::Rejected { .. }
            | CoreError::Unsupported { .. }
            | CoreError::Precondition { .. }) => Self::DeviceError {
                device: err.device().map(ToString::to_string).unwrap_or_default(),
                message: err.to_string(),
            },

            CoreError::Validation { message } | CoreError::Config { message } => {
                Self::Validation {
                    field: "input".into(),
                    reason: message,
                }
            }

            CoreError::Cancelled => Self::Cancelled,

            CoreError::Store { message } | CoreError::Internal(message) => {
                Self::Internal(message)
            }
        }
    }
}

impl From<serde_json::Error> for CliError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for CliError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

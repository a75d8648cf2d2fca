// ── Core error types ──
//
// Errors carry the device id, never its address or credentials. The
// `DeviceResultExt::for_device` adapter translates transport-layer errors
// into this taxonomy at the point where the device is known.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::Display;
use thiserror::Error;

use crate::model::DeviceId;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Reachability ─────────────────────────────────────────────────
    #[error("Cannot reach device {device}: {reason}")]
    Connection { device: DeviceId, reason: String },

    #[error("Device {device} timed out after {timeout:?}")]
    Timeout { device: DeviceId, timeout: Duration },

    #[error("Authentication to device {device} failed: {message}")]
    Auth { device: DeviceId, message: String },

    // ── Device responses ─────────────────────────────────────────────
    #[error("Unexpected response from device {device}: {message}")]
    Protocol { device: DeviceId, message: String },

    #[error("Device {device} rejected the command: {message}")]
    Rejected { device: DeviceId, message: String },

    #[error("Operation not supported on device {device}: {operation}")]
    Unsupported { device: DeviceId, operation: String },

    /// A safety check refused to continue (e.g. RADIUS unreachable before
    /// disabling local auth).
    #[error("Refusing to continue on device {device}: {message}")]
    Precondition { device: DeviceId, message: String },

    // ── Data errors ──────────────────────────────────────────────────
    #[error("{entity_type} not found: {identifier}")]
    NotFound {
        entity_type: String,
        identifier: String,
    },

    #[error("Validation failed: {message}")]
    Validation { message: String },

    // ── Subsystems ───────────────────────────────────────────────────
    #[error("Backup failed for device {device}: {message}")]
    Backup { device: DeviceId, message: String },

    #[error("Store error: {message}")]
    Store { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification used in sync results, logs and exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    Connection,
    Auth,
    Protocol,
    NotFound,
    Backup,
    Validation,
    Internal,
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connection { .. } | Self::Timeout { .. } => ErrorKind::Connection,
            Self::Auth { .. } => ErrorKind::Auth,
            Self::Protocol { .. } | Self::Rejected { .. } | Self::Unsupported { .. } => {
                ErrorKind::Protocol
            }
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Backup { .. } => ErrorKind::Backup,
            Self::Validation { .. } | Self::Precondition { .. } | Self::Config { .. } => {
                ErrorKind::Validation
            }
            Self::Store { .. } | Self::Cancelled | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn device_not_found(id: &DeviceId) -> Self {
        Self::NotFound {
            entity_type: "Device".into(),
            identifier: id.to_string(),
        }
    }

    pub(crate) fn store(err: impl std::fmt::Display) -> Self {
        Self::Store {
            message: err.to_string(),
        }
    }

    /// The device this error is about, if any.
    pub fn device(&self) -> Option<&DeviceId> {
        match self {
            Self::Connection { device, .. }
            | Self::Timeout { device, .. }
            | Self::Auth { device, .. }
            | Self::Protocol { device, .. }
            | Self::Rejected { device, .. }
            | Self::Unsupported { device, .. }
            | Self::Precondition { device, .. }
            | Self::Backup { device, .. } => Some(device),
            _ => None,
        }
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Translate a transport error for a known device.
    pub fn from_api(device: &DeviceId, err: ispnet_api::Error) -> Self {
        use ispnet_api::Error as Api;

        let device = device.clone();
        match err {
            Api::Authentication { message } => Self::Auth { device, message },
            Api::Connection { reason } => Self::Connection { device, reason },
            Api::Timeout { timeout } => Self::Timeout { device, timeout },
            Api::Tls(reason) => Self::Connection {
                device,
                reason: format!("TLS: {reason}"),
            },
            Api::Transport(e) if e.is_connect() || e.is_timeout() => Self::Connection {
                device,
                reason: e.to_string(),
            },
            Api::Transport(e) => Self::Protocol {
                device,
                message: e.to_string(),
            },
            Api::InvalidUrl(e) => Self::Validation {
                message: format!("invalid management address for {device}: {e}"),
            },
            Api::Protocol { message } => Self::Protocol { device, message },
            Api::Deserialization { message, .. } => Self::Protocol { device, message },
            Api::Rejected { message, .. } => Self::Rejected { device, message },
            Api::NotFound(what) => Self::NotFound {
                entity_type: format!("Object on {device}"),
                identifier: what,
            },
            Api::InvalidOid(oid) => Self::Validation {
                message: format!("invalid OID {oid}"),
            },
            Api::UnsupportedOperation(op) => Self::Unsupported {
                device,
                operation: op.into(),
            },
        }
    }
}

/// Attach a device id to a transport-layer result.
pub trait DeviceResultExt<T> {
    fn for_device(self, device: &DeviceId) -> Result<T, CoreError>;
}

impl<T> DeviceResultExt<T> for Result<T, ispnet_api::Error> {
    fn for_device(self, device: &DeviceId) -> Result<T, CoreError> {
        self.map_err(|e| CoreError::from_api(device, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_errors_map_into_taxonomy() {
        let id = DeviceId::new("edge-7");
        let auth = CoreError::from_api(
            &id,
            ispnet_api::Error::Authentication {
                message: "bad password".into(),
            },
        );
        assert_eq!(auth.kind(), ErrorKind::Auth);
        assert!(auth.to_string().contains("edge-7"));

        let timeout = CoreError::from_api(
            &id,
            ispnet_api::Error::Timeout {
                timeout: Duration::from_secs(3),
            },
        );
        assert_eq!(timeout.kind(), ErrorKind::Connection);

        let trap = CoreError::from_api(
            &id,
            ispnet_api::Error::Rejected {
                message: "failure: already have such name".into(),
                category: None,
            },
        );
        assert_eq!(trap.kind(), ErrorKind::Protocol);
        assert_eq!(trap.device(), Some(&id));
        assert_eq!(CoreError::Cancelled.device(), None);
    }
}

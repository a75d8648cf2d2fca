use std::time::Duration;

use thiserror::Error;

/// Top-level error type for the `ispnet-api` crate.
///
/// Covers every failure mode across the device transports: RouterOS REST,
/// the RouterOS binary API, and SNMP. Messages never carry device addresses
/// or credentials; `ispnet-core` attaches the device id when it maps these
/// into its own taxonomy.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// Login rejected (wrong credentials, disabled user, missing policy).
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    // ── Connection ──────────────────────────────────────────────────
    /// Device unreachable: refused, reset, DNS failure, closed mid-reply.
    #[error("Connection failed: {reason}")]
    Connection { reason: String },

    /// HTTP transport error that is neither a connect nor a timeout failure.
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// A single call exceeded its deadline.
    #[error("Request timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    /// TLS handshake or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── Protocol ────────────────────────────────────────────────────
    /// The device answered with something the client could not interpret.
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// The device understood the command and refused it (`!trap`, HTTP 400).
    #[error("Device rejected command: {message}")]
    Rejected {
        message: String,
        category: Option<u32>,
    },

    /// The addressed object does not exist on the device.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed object identifier.
    #[error("Invalid OID: {0}")]
    InvalidOid(String),

    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },

    // ── Capability ──────────────────────────────────────────────────
    /// Operation or protocol variant this client does not implement.
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(&'static str),
}

impl Error {
    /// Map a reqwest failure, stripping the URL so the device address
    /// never ends up in a log line.
    pub(crate) fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            Self::Timeout { timeout }
        } else if err.is_connect() {
            Self::Connection {
                reason: err.without_url().to_string(),
            }
        } else {
            Self::Transport(err.without_url())
        }
    }

    /// Map a socket-level failure.
    pub(crate) fn from_io(err: &std::io::Error) -> Self {
        Self::Connection {
            reason: err.kind().to_string(),
        }
    }

    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Returns `true` if the credentials were rejected.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }

    /// Returns `true` if the device could not be reached at all.
    pub fn is_connection(&self) -> bool {
        match self {
            Self::Connection { .. } | Self::Timeout { .. } => true,
            Self::Transport(e) => e.is_connect() || e.is_timeout(),
            _ => false,
        }
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        self.is_connection()
    }

    /// Returns `true` if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Transport(e) => e.status() == Some(reqwest::StatusCode::NOT_FOUND),
            _ => false,
        }
    }
}

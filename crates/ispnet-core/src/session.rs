// ── Device sessions ──
//
// `DeviceTransport` is the seam between orchestration and the wire. The
// network implementation opens real RouterOS/SNMP sessions; tests swap in
// in-memory fakes. Sessions are per-operation and must be released with
// `release()` on every exit path.

use async_trait::async_trait;
use ispnet_api::routeros::{ApiClient, RestClient, RouterSession};
use ispnet_api::{Oid, SnmpClient, TlsMode, TransportConfig, Value};
use tracing::{debug, warn};
use url::Url;

use crate::config::{EngineConfig, TlsVerification};
use crate::error::{CoreError, DeviceResultExt};
use crate::model::{Credentials, DeviceDescriptor, DeviceId, ManagementProtocol};

/// Read-only SNMP access to an OLT.
#[async_trait]
pub trait SnmpSession: Send {
    async fn get(&mut self, oid: &Oid) -> Result<Value, ispnet_api::Error>;
    async fn walk(&mut self, root: &Oid) -> Result<Vec<(Oid, Value)>, ispnet_api::Error>;
}

#[async_trait]
impl SnmpSession for SnmpClient {
    async fn get(&mut self, oid: &Oid) -> Result<Value, ispnet_api::Error> {
        SnmpClient::get(self, oid).await
    }

    async fn walk(&mut self, root: &Oid) -> Result<Vec<(Oid, Value)>, ispnet_api::Error> {
        SnmpClient::walk(self, root).await
    }
}

/// Opens sessions against devices.
#[async_trait]
pub trait DeviceTransport: Send + Sync {
    async fn open_router(
        &self,
        device: &DeviceDescriptor,
    ) -> Result<Box<dyn RouterSession>, CoreError>;

    async fn open_snmp(&self, device: &DeviceDescriptor)
    -> Result<Box<dyn SnmpSession>, CoreError>;
}

/// Close a router session, logging (not propagating) close failures.
pub async fn release(mut session: Box<dyn RouterSession>, device: &DeviceId) {
    if let Err(e) = session.close().await {
        warn!(device = %device, error = %e, "closing router session failed");
    }
}

/// Real network transport built from the engine timeouts.
#[derive(Debug, Clone)]
pub struct NetworkTransport {
    config: EngineConfig,
}

impl NetworkTransport {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    fn transport_config(&self, tls: &TlsVerification) -> TransportConfig {
        let tls = match tls {
            TlsVerification::SystemDefaults | TlsVerification::PlainText => TlsMode::System,
            TlsVerification::CustomCa(path) => TlsMode::CustomCa(path.clone()),
            TlsVerification::DangerAcceptInvalid => TlsMode::DangerAcceptInvalid,
        };
        TransportConfig {
            tls,
            timeout: self.config.api_timeout,
            connect_timeout: self.config.connect_timeout,
        }
    }
}

/// Base URL for a router's REST interface.
pub(crate) fn rest_base_url(device: &DeviceDescriptor) -> Result<Url, CoreError> {
    let scheme = if matches!(device.tls, TlsVerification::PlainText) {
        "http"
    } else {
        "https"
    };
    let host = if device.host.contains(':') && !device.host.starts_with('[') {
        format!("[{}]", device.host)
    } else {
        device.host.clone()
    };
    Url::parse(&format!("{scheme}://{host}:{}", device.port)).map_err(|e| {
        CoreError::validation(format!(
            "invalid management address for {}: {e}",
            device.id
        ))
    })
}

#[async_trait]
impl DeviceTransport for NetworkTransport {
    async fn open_router(
        &self,
        device: &DeviceDescriptor,
    ) -> Result<Box<dyn RouterSession>, CoreError> {
        let Credentials::Login { username, password } = &device.credentials else {
            return Err(CoreError::validation(format!(
                "device {} has SNMP credentials but is managed as a router",
                device.id
            )));
        };
        let transport = self.transport_config(&device.tls);

        debug!(device = %device.id, protocol = %device.protocol, "opening router session");
        match device.protocol {
            ManagementProtocol::Rest => {
                let base = rest_base_url(device)?;
                let client =
                    RestClient::new(base, username.clone(), password.clone(), &transport)
                        .for_device(&device.id)?;
                Ok(Box::new(client))
            }
            ManagementProtocol::Api => {
                let client =
                    ApiClient::connect(&device.host, device.port, username, password, &transport)
                        .await
                        .for_device(&device.id)?;
                Ok(Box::new(client))
            }
            ManagementProtocol::Snmp => Err(CoreError::Unsupported {
                device: device.id.clone(),
                operation: "RouterOS management over SNMP".into(),
            }),
        }
    }

    async fn open_snmp(
        &self,
        device: &DeviceDescriptor,
    ) -> Result<Box<dyn SnmpSession>, CoreError> {
        let client = match &device.credentials {
            Credentials::Snmp { community, version } => {
                debug!(device = %device.id, version = %version, "opening SNMP session");
                SnmpClient::connect(
                    &device.host,
                    device.port,
                    community.clone(),
                    *version,
                    self.config.snmp_timeout,
                )
                .await
            }
            Credentials::Usm(user) => {
                debug!(device = %device.id, user = %user.name, "opening SNMPv3 session");
                SnmpClient::connect_v3(
                    &device.host,
                    device.port,
                    user.clone(),
                    self.config.snmp_timeout,
                )
                .await
            }
            Credentials::Login { .. } => {
                return Err(CoreError::validation(format!(
                    "device {} has no SNMP credentials configured",
                    device.id
                )));
            }
        }
        .for_device(&device.id)?
        .with_retries(self.config.snmp_retries);
        Ok(Box::new(client))
    }
}

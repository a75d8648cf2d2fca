// UDP request/response loop for GET and GETNEXT.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use tokio::net::UdpSocket;
use tracing::{debug, trace};

use super::SnmpVersion;
use super::ber::{Message, Oid, Pdu, PduKind, Value};
use super::usm::{ReportReason, SecurityParams, UsmSession, UsmUser};
use crate::error::Error;

/// v1 `noSuchName`, which v1 agents also use to signal the end of a walk.
const NO_SUCH_NAME: i64 = 2;

const MAX_DATAGRAM: usize = 65_535;

enum Security {
    Community {
        wire_version: i64,
        community: SecretString,
    },
    User(Box<UsmSession>),
}

/// A datagram that answers the outstanding request.
struct Reply {
    pdu: Pdu,
    /// USM parameters the agent sent; `None` for community messages.
    security: Option<SecurityParams>,
}

/// SNMP session bound to one agent.
pub struct SnmpClient {
    socket: UdpSocket,
    security: Security,
    version: SnmpVersion,
    timeout: Duration,
    retries: u32,
    next_request_id: i32,
}

impl SnmpClient {
    /// Resolve `host`, bind a local socket of the same address family, and
    /// connect it to the agent. No traffic is sent until the first request.
    pub async fn connect(
        host: &str,
        port: u16,
        community: SecretString,
        version: SnmpVersion,
        timeout: Duration,
    ) -> Result<Self, Error> {
        let wire_version = version
            .wire_value()
            .ok_or(Error::UnsupportedOperation("SNMPv3 without a USM user"))?;
        let socket = bind(host, port).await?;
        Ok(Self::new(
            socket,
            Security::Community {
                wire_version,
                community,
            },
            version,
            timeout,
        ))
    }

    /// Like [`connect`](Self::connect) for an SNMPv3 agent. The engine is
    /// discovered on the first request.
    pub async fn connect_v3(
        host: &str,
        port: u16,
        user: UsmUser,
        timeout: Duration,
    ) -> Result<Self, Error> {
        let session = UsmSession::new(user)?;
        let socket = bind(host, port).await?;
        Ok(Self::new(
            socket,
            Security::User(Box::new(session)),
            SnmpVersion::V3,
            timeout,
        ))
    }

    fn new(socket: UdpSocket, security: Security, version: SnmpVersion, timeout: Duration) -> Self {
        Self {
            socket,
            security,
            version,
            timeout,
            retries: 1,
            next_request_id: 1,
        }
    }

    /// Number of resends after a timed-out request.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Fetch a single scalar or table cell.
    pub async fn get(&mut self, oid: &Oid) -> Result<Value, Error> {
        let pdu = self.request(PduKind::GetRequest, oid).await?;
        if pdu.error_status == NO_SUCH_NAME {
            return Err(Error::NotFound(oid.to_string()));
        }
        check_status(&pdu)?;
        let (_, value) = pdu
            .varbinds
            .into_iter()
            .next()
            .ok_or_else(|| Error::protocol("response carried no varbinds"))?;
        if value.is_exception() {
            return Err(Error::NotFound(oid.to_string()));
        }
        Ok(value)
    }

    /// Walk the subtree under `root` with GETNEXT, in agent order.
    pub async fn walk(&mut self, root: &Oid) -> Result<Vec<(Oid, Value)>, Error> {
        let mut out = Vec::new();
        let mut cursor = root.clone();
        loop {
            let pdu = self.request(PduKind::GetNextRequest, &cursor).await?;
            if pdu.error_status == NO_SUCH_NAME {
                break;
            }
            check_status(&pdu)?;
            let Some((oid, value)) = pdu.varbinds.into_iter().next() else {
                break;
            };
            if value == Value::EndOfMibView || !oid.starts_with(root) {
                break;
            }
            if oid <= cursor {
                return Err(Error::protocol(format!(
                    "agent returned non-increasing OID {oid} after {cursor}"
                )));
            }
            cursor = oid.clone();
            out.push((oid, value));
        }
        debug!(root = %root, rows = out.len(), "snmp walk complete");
        Ok(out)
    }

    pub fn version(&self) -> SnmpVersion {
        self.version
    }

    // ── Requests ─────────────────────────────────────────────────────

    fn next_id(&mut self) -> i32 {
        let id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1).max(1);
        id
    }

    async fn request(&mut self, kind: PduKind, oid: &Oid) -> Result<Pdu, Error> {
        trace!(%oid, "snmp {kind:?}");
        let varbinds = vec![(oid.clone(), Value::Null)];
        let (version, community) = match &self.security {
            Security::Community {
                wire_version,
                community,
            } => (*wire_version, community.expose_secret().as_bytes().to_vec()),
            Security::User(_) => return self.request_v3(kind, varbinds).await,
        };

        let request_id = self.next_id();
        let bytes = Message {
            version,
            community,
            pdu: Pdu {
                kind,
                request_id,
                error_status: 0,
                error_index: 0,
                varbinds,
            },
        }
        .encode();
        Ok(self.exchange(request_id, &bytes).await?.pdu)
    }

    fn usm(&mut self) -> Result<&mut UsmSession, Error> {
        match &mut self.security {
            Security::User(session) => Ok(session),
            Security::Community { .. } => Err(Error::protocol("not an SNMPv3 session")),
        }
    }

    async fn request_v3(&mut self, kind: PduKind, varbinds: Vec<(Oid, Value)>) -> Result<Pdu, Error> {
        if !self.usm()?.is_discovered() {
            self.discover().await?;
        }

        let mut resynced = false;
        loop {
            let request_id = self.next_id();
            let pdu = Pdu {
                kind,
                request_id,
                error_status: 0,
                error_index: 0,
                varbinds: varbinds.clone(),
            };
            let bytes = self.usm()?.seal(request_id, pdu)?;
            let reply = self.exchange(request_id, &bytes).await?;
            if reply.pdu.kind != PduKind::Report {
                return Ok(reply.pdu);
            }

            let reason = ReportReason::of(&reply.pdu);
            match (reason, reply.security) {
                (ReportReason::NotInTimeWindow, Some(security)) if !resynced => {
                    debug!(
                        boots = security.engine_boots,
                        time = security.engine_time,
                        "resynchronising with agent clock"
                    );
                    self.usm()?.resync(&security);
                    resynced = true;
                }
                _ => return Err(report_error(reason)),
            }
        }
    }

    async fn discover(&mut self) -> Result<(), Error> {
        let request_id = self.next_id();
        let bytes = UsmSession::discovery_request(request_id);
        let reply = self.exchange(request_id, &bytes).await?;
        let security = reply
            .security
            .ok_or_else(|| Error::protocol("discovery answered without USM parameters"))?;
        self.usm()?.learn_engine(&security)?;
        debug!(
            engine_id_len = security.engine_id.len(),
            boots = security.engine_boots,
            "snmp engine discovered"
        );
        Ok(())
    }

    // ── Transport ────────────────────────────────────────────────────

    async fn exchange(&mut self, request_id: i32, bytes: &[u8]) -> Result<Reply, Error> {
        for attempt in 0..=self.retries {
            trace!(request_id, attempt, "snmp send");
            self.socket
                .send(bytes)
                .await
                .map_err(|e| Error::from_io(&e))?;
            if let Ok(result) = tokio::time::timeout(self.timeout, self.receive(request_id)).await {
                return result;
            }
        }
        Err(Error::Timeout {
            timeout: self.timeout,
        })
    }

    /// Read datagrams until one answers `request_id`. Stale replies and
    /// datagrams that do not decode are dropped.
    async fn receive(&self, request_id: i32) -> Result<Reply, Error> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let len = self
                .socket
                .recv(&mut buf)
                .await
                .map_err(|e| Error::from_io(&e))?;
            match self.accept(&buf[..len], request_id) {
                Ok(Some(reply)) => return Ok(reply),
                Ok(None) => trace!(want = request_id, "dropping stale reply"),
                Err(e) => debug!(error = %e, len, "dropping undecodable datagram"),
            }
        }
    }

    fn accept(&self, datagram: &[u8], request_id: i32) -> Result<Option<Reply>, Error> {
        match &self.security {
            Security::Community { .. } => {
                let message = Message::decode(datagram)?;
                let answers = message.pdu.kind == PduKind::Response
                    && message.pdu.request_id == request_id;
                Ok(answers.then_some(Reply {
                    pdu: message.pdu,
                    security: None,
                }))
            }
            Security::User(session) => {
                let Some(inbound) = session.open(datagram, request_id)? else {
                    return Ok(None);
                };
                let answers = inbound.pdu.kind == PduKind::Report
                    || (inbound.pdu.kind == PduKind::Response
                        && inbound.pdu.request_id == request_id);
                Ok(answers.then_some(Reply {
                    pdu: inbound.pdu,
                    security: Some(inbound.security),
                }))
            }
        }
    }
}

async fn bind(host: &str, port: u16) -> Result<UdpSocket, Error> {
    let target = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| Error::from_io(&e))?
        .next()
        .ok_or_else(|| Error::Connection {
            reason: "agent address did not resolve".into(),
        })?;
    let local = if target.is_ipv4() {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
    } else {
        SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
    };
    let socket = UdpSocket::bind(local)
        .await
        .map_err(|e| Error::from_io(&e))?;
    socket
        .connect(target)
        .await
        .map_err(|e| Error::from_io(&e))?;
    Ok(socket)
}

fn report_error(reason: ReportReason) -> Error {
    match reason {
        ReportReason::UnknownUserName
        | ReportReason::WrongDigest
        | ReportReason::UnsupportedSecurityLevel
        | ReportReason::DecryptionError => Error::Authentication {
            message: reason.describe().into(),
        },
        ReportReason::NotInTimeWindow | ReportReason::UnknownEngineId | ReportReason::Other => {
            Error::Rejected {
                message: reason.describe().into(),
                category: None,
            }
        }
    }
}

fn check_status(pdu: &Pdu) -> Result<(), Error> {
    if pdu.error_status == 0 {
        return Ok(());
    }
    Err(Error::Rejected {
        message: format!(
            "agent error-status {} at index {}",
            pdu.error_status, pdu.error_index
        ),
        category: u32::try_from(pdu.error_status).ok(),
    })
}

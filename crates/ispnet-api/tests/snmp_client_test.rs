#![allow(clippy::unwrap_used)]
// Integration tests for `SnmpClient` against an in-process UDP agent.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use tokio::net::UdpSocket;

use ispnet_api::snmp::ber::{Message, Pdu, PduKind};
use ispnet_api::snmp::usm::{ScopedData, ScopedPdu, SecurityParams, V3Message};
use ispnet_api::{Error, Oid, SnmpClient, SnmpVersion, UsmUser, Value};

// ── Fake agent ──────────────────────────────────────────────────────

fn oid(s: &str) -> Oid {
    s.parse().unwrap()
}

fn mib() -> BTreeMap<Oid, Value> {
    let mut mib = BTreeMap::new();
    mib.insert(
        oid("1.3.6.1.2.1.1.1.0"),
        Value::OctetString(b"BDCOM(tm) P3310C".to_vec()),
    );
    for (idx, serial) in [(1u32, "BDCM0001"), (2, "BDCM0002"), (3, "BDCM0003")] {
        mib.insert(
            oid("1.3.6.1.4.1.3320.101.11.1.1.2").child(&[10, idx]),
            Value::OctetString(serial.as_bytes().to_vec()),
        );
    }
    mib.insert(oid("1.3.6.1.4.1.3320.101.11.4.1.5.10.1"), Value::Integer(1));
    mib
}

/// Answer GET/GETNEXT from `mib` for community `public`; ignore anything else.
async fn spawn_agent(mib: BTreeMap<Oid, Value>) -> u16 {
    spawn_agent_with(mib, false).await
}

/// Like [`spawn_agent`], but when `noisy` every answer is preceded by a
/// datagram that is not valid BER.
async fn spawn_agent_with(mib: BTreeMap<Oid, Value>, noisy: bool) -> u16 {
    let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
    let port = socket.local_addr().unwrap().port();
    tokio::spawn(async move {
        let mut buf = vec![0u8; 65_535];
        while let Ok((len, peer)) = socket.recv_from(&mut buf).await {
            let Ok(mut msg) = Message::decode(&buf[..len]) else {
                continue;
            };
            if msg.community != b"public" {
                continue;
            }
            let (requested, _) = msg.pdu.varbinds[0].clone();
            let answer = match msg.pdu.kind {
                PduKind::GetRequest => (
                    requested.clone(),
                    mib.get(&requested).cloned().unwrap_or(Value::NoSuchObject),
                ),
                PduKind::GetNextRequest => mib
                    .range((std::ops::Bound::Excluded(requested.clone()), std::ops::Bound::Unbounded))
                    .next()
                    .map_or((requested, Value::EndOfMibView), |(k, v)| (k.clone(), v.clone())),
                PduKind::Response | PduKind::Report => continue,
            };
            msg.pdu.kind = PduKind::Response;
            msg.pdu.varbinds = vec![answer];
            if noisy {
                let _ = socket.send_to(b"\x30\x82\xff", peer).await;
            }
            let _ = socket.send_to(&msg.encode(), peer).await;
        }
    });
    port
}

const ENGINE_ID: &[u8] = b"\x80\x00\x1f\x88\x04ispnet";

/// A noAuthNoPriv v3 agent: reports its engine to discovery requests and
/// answers GETs for user `poller` from `mib`.
async fn spawn_v3_agent(mib: BTreeMap<Oid, Value>) -> u16 {
    let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
    let port = socket.local_addr().unwrap().port();
    tokio::spawn(async move {
        let mut buf = vec![0u8; 65_535];
        while let Ok((len, peer)) = socket.recv_from(&mut buf).await {
            let Ok(msg) = V3Message::decode(&buf[..len]) else {
                continue;
            };
            let ScopedData::Plain(scoped) = msg.data else {
                continue;
            };
            let security = SecurityParams {
                engine_id: ENGINE_ID.to_vec(),
                engine_boots: 1,
                engine_time: 300,
                user_name: msg.security.user_name.clone(),
                ..SecurityParams::default()
            };
            let pdu = if msg.security.engine_id.is_empty() {
                Pdu {
                    kind: PduKind::Report,
                    varbinds: vec![(oid("1.3.6.1.6.3.15.1.1.4.0"), Value::Counter32(1))],
                    ..scoped.pdu
                }
            } else if msg.security.user_name == b"poller" {
                let (requested, _) = scoped.pdu.varbinds[0].clone();
                let value = mib.get(&requested).cloned().unwrap_or(Value::NoSuchObject);
                Pdu {
                    kind: PduKind::Response,
                    varbinds: vec![(requested, value)],
                    ..scoped.pdu
                }
            } else {
                Pdu {
                    kind: PduKind::Report,
                    varbinds: vec![(oid("1.3.6.1.6.3.15.1.1.3.0"), Value::Counter32(1))],
                    ..scoped.pdu
                }
            };
            let reply = V3Message {
                msg_id: msg.msg_id,
                flags: 0,
                security,
                data: ScopedData::Plain(ScopedPdu {
                    context_engine_id: ENGINE_ID.to_vec(),
                    context_name: Vec::new(),
                    pdu,
                }),
            };
            let _ = socket.send_to(&reply.encode(), peer).await;
        }
    });
    port
}

async fn v3_client(port: u16, user: &str) -> SnmpClient {
    SnmpClient::connect_v3("127.0.0.1", port, UsmUser::new(user), Duration::from_millis(200))
        .await
        .unwrap()
        .with_retries(0)
}

async fn client(port: u16, community: &str) -> SnmpClient {
    SnmpClient::connect(
        "127.0.0.1",
        port,
        SecretString::from(community.to_string()),
        SnmpVersion::V2c,
        Duration::from_millis(200),
    )
    .await
    .unwrap()
    .with_retries(0)
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_get_scalar() {
    let port = spawn_agent(mib()).await;
    let mut snmp = client(port, "public").await;

    let value = snmp.get(&oid(".1.3.6.1.2.1.1.1.0")).await.unwrap();
    assert_eq!(value.as_text().as_deref(), Some("BDCOM(tm) P3310C"));
}

#[tokio::test]
async fn test_get_missing_is_not_found() {
    let port = spawn_agent(mib()).await;
    let mut snmp = client(port, "public").await;

    let err = snmp.get(&oid("1.3.6.1.2.1.1.5.0")).await.unwrap_err();
    assert!(err.is_not_found(), "got: {err:?}");
}

#[tokio::test]
async fn test_walk_stays_inside_subtree() {
    let port = spawn_agent(mib()).await;
    let mut snmp = client(port, "public").await;

    let root = oid("1.3.6.1.4.1.3320.101.11.1.1.2");
    let rows = snmp.walk(&root).await.unwrap();

    let serials: Vec<_> = rows.iter().filter_map(|(_, v)| v.as_text()).collect();
    assert_eq!(serials, vec!["BDCM0001", "BDCM0002", "BDCM0003"]);
    assert_eq!(rows[2].0.suffix(&root), Some(&[10u32, 3][..]));
}

#[tokio::test]
async fn test_walk_past_end_of_mib_is_empty() {
    let port = spawn_agent(mib()).await;
    let mut snmp = client(port, "public").await;

    let rows = snmp.walk(&oid("1.3.6.1.4.1.9999")).await.unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn test_undecodable_datagram_is_skipped() {
    let port = spawn_agent_with(mib(), true).await;
    let mut snmp = client(port, "public").await;

    let value = snmp.get(&oid("1.3.6.1.2.1.1.1.0")).await.unwrap();
    assert_eq!(value.as_text().as_deref(), Some("BDCOM(tm) P3310C"));
}

#[tokio::test]
async fn test_wrong_community_times_out() {
    let port = spawn_agent(mib()).await;
    let mut snmp = client(port, "private").await;

    let err = snmp.get(&oid("1.3.6.1.2.1.1.1.0")).await.unwrap_err();
    assert!(matches!(err, Error::Timeout { .. }), "got: {err:?}");
}

#[tokio::test]
async fn test_v3_community_connect_is_rejected_up_front() {
    let result = SnmpClient::connect(
        "127.0.0.1",
        161,
        SecretString::from("public".to_string()),
        SnmpVersion::V3,
        Duration::from_millis(200),
    )
    .await;
    assert!(matches!(result, Err(Error::UnsupportedOperation(_))));
}

#[tokio::test]
async fn test_v3_discovers_engine_then_gets() {
    let port = spawn_v3_agent(mib()).await;
    let mut snmp = v3_client(port, "poller").await;

    let value = snmp.get(&oid("1.3.6.1.2.1.1.1.0")).await.unwrap();
    assert_eq!(value.as_text().as_deref(), Some("BDCOM(tm) P3310C"));
    assert_eq!(snmp.version(), SnmpVersion::V3);
}

#[tokio::test]
async fn test_v3_unknown_user_is_an_auth_error() {
    let port = spawn_v3_agent(mib()).await;
    let mut snmp = v3_client(port, "intruder").await;

    let err = snmp.get(&oid("1.3.6.1.2.1.1.1.0")).await.unwrap_err();
    assert!(matches!(err, Error::Authentication { .. }), "got: {err:?}");
}

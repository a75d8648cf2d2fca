// Shared fakes for the core integration tests.
//
// `FakeRouter` is a tiny in-memory RouterOS: menus of rows, singleton
// menus (`/ppp/aaa`), `/execute` export/import, `/file/add` and `/ping`.
// Every mutation is appended to an op log so tests can assert ordering.
#![allow(dead_code, clippy::unwrap_used, clippy::missing_panics_doc)]

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ispnet_api::routeros::{RouterSession, menu};
use ispnet_api::{Oid, Row, Value};
use ispnet_core::{
    AuthMode, CoreError, Credentials, DeviceDescriptor, DeviceId, DeviceKind, DeviceTransport,
    EngineConfig, Event, InMemoryRegistry, ManagementProtocol, MemoryStore, Notifier, Platform,
    RadiusSettings, SnmpSession, TlsVerification, Vendor,
};
use secrecy::SecretString;

// ── Router ──────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct RouterState {
    pub menus: BTreeMap<String, Vec<Row>>,
    pub singletons: BTreeMap<String, Row>,
    /// Configuration body returned by `/export` (without the header).
    pub config: String,
    pub exports: u32,
    pub ping_received: u32,
    pub ops: Vec<String>,
    /// Any op whose log line starts with this fails with a trap.
    pub fail_when: Option<String>,
    /// Once an op starting with this is logged, every later print fails
    /// as if the link dropped.
    pub drop_reads_after: Option<String>,
    reads_dropped: bool,
    pub unreachable: bool,
    /// Login fails with bad credentials.
    pub reject_login: bool,
    pub open_delay: Option<Duration>,
    next_id: u32,
}

#[derive(Debug, Clone, Default)]
pub struct FakeRouter {
    state: Arc<Mutex<RouterState>>,
}

impl FakeRouter {
    pub fn new() -> Self {
        let router = Self::default();
        router.with_state(|s| {
            s.singletons.insert(
                menu::PPP_AAA.into(),
                Row::from([
                    ("use-radius", "no"),
                    ("accounting", "no"),
                    ("interim-update", "0s"),
                ]),
            );
            s.singletons
                .insert(menu::RADIUS_INCOMING.into(), Row::from([("accept", "no")]));
            s.singletons.insert(
                menu::SYSTEM_RESOURCE.into(),
                Row::from([
                    ("cpu-load", "5"),
                    ("free-memory", "700000"),
                    ("total-memory", "1000000"),
                    ("uptime", "1w2d03:04:05"),
                ]),
            );
            s.menus.insert(menu::RADIUS.into(), Vec::new());
            s.menus.insert(menu::NETWATCH.into(), Vec::new());
            s.menus.insert(menu::PPP_SECRET.into(), Vec::new());
            s.ping_received = 3;
            s.config = "/ip pool\nadd name=dhcp ranges=10.0.0.2-10.0.0.254\n".into();
        });
        router
    }

    pub fn with_state<T>(&self, f: impl FnOnce(&mut RouterState) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }

    /// Seed a row, assigning it an `.id`.
    pub fn seed(&self, menu: &str, pairs: &[(&str, &str)]) -> String {
        self.with_state(|s| {
            let id = s.allocate_id();
            let mut row = Row::new().with(".id", id.as_str());
            for (k, v) in pairs {
                row.insert(*k, *v);
            }
            s.menus.entry(menu.to_owned()).or_default().push(row);
            id
        })
    }

    pub fn rows(&self, menu: &str) -> Vec<Row> {
        self.with_state(|s| s.menus.get(menu).cloned().unwrap_or_default())
    }

    pub fn row_named(&self, menu: &str, name: &str) -> Option<Row> {
        self.rows(menu)
            .into_iter()
            .find(|r| r.get("name") == Some(name))
    }

    pub fn singleton(&self, menu: &str) -> Row {
        self.with_state(|s| s.singletons.get(menu).cloned().unwrap_or_default())
    }

    pub fn ops(&self) -> Vec<String> {
        self.with_state(|s| s.ops.clone())
    }

    pub fn clear_ops(&self) {
        self.with_state(|s| s.ops.clear());
    }

    /// Index of the first op starting with `prefix`.
    pub fn op_index(&self, prefix: &str) -> Option<usize> {
        self.ops().iter().position(|op| op.starts_with(prefix))
    }

    pub fn fail_when(&self, prefix: &str) {
        self.with_state(|s| s.fail_when = Some(prefix.to_owned()));
    }

    pub fn drop_reads_after(&self, prefix: &str) {
        self.with_state(|s| s.drop_reads_after = Some(prefix.to_owned()));
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.with_state(|s| s.unreachable = unreachable);
    }

    pub fn reject_login(&self) {
        self.with_state(|s| s.reject_login = true);
    }

    pub fn config(&self) -> String {
        self.with_state(|s| s.config.clone())
    }

    pub fn set_config(&self, config: &str) {
        self.with_state(|s| s.config = config.to_owned());
    }
}

impl RouterState {
    fn allocate_id(&mut self) -> String {
        self.next_id += 1;
        format!("*{:X}", self.next_id)
    }

    fn log(&mut self, op: String) -> Result<(), ispnet_api::Error> {
        if self.fail_when.as_deref().is_some_and(|p| op.starts_with(p)) {
            return Err(ispnet_api::Error::Rejected {
                message: format!("failure: injected on `{op}`"),
                category: None,
            });
        }
        if self.drop_reads_after.as_deref().is_some_and(|p| op.starts_with(p)) {
            self.reads_dropped = true;
        }
        self.ops.push(op);
        Ok(())
    }
}

fn render(row: &Row) -> String {
    row.iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(" ")
}

pub struct FakeSession {
    router: FakeRouter,
}

#[async_trait]
impl RouterSession for FakeSession {
    async fn print(
        &mut self,
        menu: &str,
        filter: &[(&str, &str)],
    ) -> Result<Vec<Row>, ispnet_api::Error> {
        self.router.with_state(|s| {
            if s.reads_dropped {
                return Err(ispnet_api::Error::Connection {
                    reason: "connection reset by peer".into(),
                });
            }
            if let Some(row) = s.singletons.get(menu) {
                return Ok(vec![row.clone()]);
            }
            Ok(s.menus
                .get(menu)
                .map(|rows| {
                    rows.iter()
                        .filter(|row| filter.iter().all(|(k, v)| row.get(k) == Some(*v)))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default())
        })
    }

    async fn add(&mut self, menu: &str, row: &Row) -> Result<String, ispnet_api::Error> {
        self.router.with_state(|s| {
            let label = row.get("name").or(row.get("comment")).unwrap_or_default();
            s.log(format!("add {menu} {label}"))?;
            let id = s.allocate_id();
            let mut stored = Row::new().with(".id", id.as_str());
            for (k, v) in row.iter() {
                stored.insert(k, v);
            }
            s.menus.entry(menu.to_owned()).or_default().push(stored);
            Ok(id)
        })
    }

    async fn set(&mut self, menu: &str, id: &str, row: &Row) -> Result<(), ispnet_api::Error> {
        self.router.with_state(|s| {
            let name = s
                .menus
                .get(menu)
                .and_then(|rows| rows.iter().find(|r| r.id() == Some(id)))
                .and_then(|r| r.get("name").map(str::to_owned))
                .unwrap_or_default();
            s.log(format!("set {menu} {name} {}", render(row)))?;
            let target = s
                .menus
                .get_mut(menu)
                .and_then(|rows| rows.iter_mut().find(|r| r.id() == Some(id)))
                .ok_or_else(|| ispnet_api::Error::NotFound(format!("{menu} {id}")))?;
            for (k, v) in row.iter() {
                target.insert(k, v);
            }
            Ok(())
        })
    }

    async fn remove(&mut self, menu: &str, id: &str) -> Result<(), ispnet_api::Error> {
        self.router.with_state(|s| {
            s.log(format!("remove {menu} {id}"))?;
            let rows = s.menus.entry(menu.to_owned()).or_default();
            let before = rows.len();
            rows.retain(|r| r.id() != Some(id));
            if rows.len() == before {
                return Err(ispnet_api::Error::NotFound(format!("{menu} {id}")));
            }
            Ok(())
        })
    }

    async fn command(&mut self, path: &str, args: &Row) -> Result<Vec<Row>, ispnet_api::Error> {
        self.router.with_state(|s| match path {
            "/execute" => {
                let script = args.get("script").unwrap_or_default().to_owned();
                if script == "/export" {
                    s.log("export".into())?;
                    s.exports += 1;
                    let text = format!(
                        "# {:02}:00:00 by RouterOS 7.16.2\n# software id = FAKE-1\n{}",
                        s.exports, s.config
                    );
                    return Ok(vec![Row::new().with("ret", text)]);
                }
                if let Some(file) = script.strip_prefix("/import file-name=") {
                    s.log(format!("import {file}"))?;
                    let contents = s
                        .menus
                        .get("/file")
                        .and_then(|files| files.iter().find(|f| f.get("name") == Some(file)))
                        .and_then(|f| f.get("contents").map(str::to_owned))
                        .ok_or_else(|| ispnet_api::Error::NotFound(file.to_owned()))?;
                    s.config = contents
                        .lines()
                        .filter(|l| !l.starts_with('#'))
                        .map(|l| format!("{l}\n"))
                        .collect();
                    return Ok(vec![Row::new().with(
                        "ret",
                        "Script file loaded and executed successfully",
                    )]);
                }
                Err(ispnet_api::Error::Rejected {
                    message: format!("unsupported script {script}"),
                    category: None,
                })
            }
            "/file/add" => {
                let name = args.get("name").unwrap_or_default().to_owned();
                s.log(format!("file {name}"))?;
                let id = s.allocate_id();
                let mut row = Row::new().with(".id", id.as_str());
                for (k, v) in args.iter() {
                    row.insert(k, v);
                }
                s.menus.entry("/file".into()).or_default().push(row);
                Ok(Vec::new())
            }
            "/ping" => {
                s.log(format!("ping {}", args.get("address").unwrap_or_default()))?;
                Ok(vec![
                    Row::new()
                        .with("sent", "3")
                        .with("received", s.ping_received.to_string()),
                ])
            }
            _ => {
                let Some(menu) = path.strip_suffix("/set") else {
                    return Err(ispnet_api::Error::Rejected {
                        message: format!("no such command {path}"),
                        category: None,
                    });
                };
                s.log(format!("apply {menu} {}", render(args)))?;
                let target = s.singletons.entry(menu.to_owned()).or_default();
                for (k, v) in args.iter() {
                    target.insert(k, v);
                }
                Ok(Vec::new())
            }
        })
    }

    async fn close(&mut self) -> Result<(), ispnet_api::Error> {
        Ok(())
    }
}

// ── OLT ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct FakeOlt {
    values: Arc<Mutex<BTreeMap<Vec<u32>, Value>>>,
    unreachable: Arc<Mutex<bool>>,
}

impl FakeOlt {
    pub fn set(&self, oid: &str, value: Value) {
        let oid: Oid = oid.parse().unwrap();
        self.values
            .lock()
            .unwrap()
            .insert(oid.arcs().to_vec(), value);
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        *self.unreachable.lock().unwrap() = unreachable;
    }
}

pub struct FakeSnmp {
    olt: FakeOlt,
}

impl FakeSnmp {
    fn check(&self) -> Result<(), ispnet_api::Error> {
        if *self.olt.unreachable.lock().unwrap() {
            return Err(ispnet_api::Error::Timeout {
                timeout: Duration::from_secs(3),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl SnmpSession for FakeSnmp {
    async fn get(&mut self, oid: &Oid) -> Result<Value, ispnet_api::Error> {
        self.check()?;
        Ok(self
            .olt
            .values
            .lock()
            .unwrap()
            .get(oid.arcs())
            .cloned()
            .unwrap_or(Value::NoSuchObject))
    }

    async fn walk(&mut self, root: &Oid) -> Result<Vec<(Oid, Value)>, ispnet_api::Error> {
        self.check()?;
        Ok(self
            .olt
            .values
            .lock()
            .unwrap()
            .iter()
            .filter(|(arcs, _)| arcs.starts_with(root.arcs()) && arcs.len() > root.arcs().len())
            .map(|(arcs, value)| (Oid::from_slice(arcs), value.clone()))
            .collect())
    }
}

// ── Transport ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct FakeTransport {
    routers: Arc<Mutex<HashMap<DeviceId, FakeRouter>>>,
    olts: Arc<Mutex<HashMap<DeviceId, FakeOlt>>>,
}

impl FakeTransport {
    pub fn add_router(&self, id: &str) -> FakeRouter {
        let router = FakeRouter::new();
        self.routers
            .lock()
            .unwrap()
            .insert(DeviceId::new(id), router.clone());
        router
    }

    pub fn add_olt(&self, id: &str) -> FakeOlt {
        let olt = FakeOlt::default();
        self.olts
            .lock()
            .unwrap()
            .insert(DeviceId::new(id), olt.clone());
        olt
    }
}

#[async_trait]
impl DeviceTransport for FakeTransport {
    async fn open_router(
        &self,
        device: &DeviceDescriptor,
    ) -> Result<Box<dyn RouterSession>, CoreError> {
        let router = self
            .routers
            .lock()
            .unwrap()
            .get(&device.id)
            .cloned()
            .ok_or_else(|| CoreError::Connection {
                device: device.id.clone(),
                reason: "no route to host".into(),
            })?;
        let (unreachable, reject_login, delay) =
            router.with_state(|s| (s.unreachable, s.reject_login, s.open_delay));
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if unreachable {
            return Err(CoreError::Connection {
                device: device.id.clone(),
                reason: "connection refused".into(),
            });
        }
        if reject_login {
            return Err(CoreError::Auth {
                device: device.id.clone(),
                message: "invalid user name or password".into(),
            });
        }
        Ok(Box::new(FakeSession { router }))
    }

    async fn open_snmp(
        &self,
        device: &DeviceDescriptor,
    ) -> Result<Box<dyn SnmpSession>, CoreError> {
        let olt = self
            .olts
            .lock()
            .unwrap()
            .get(&device.id)
            .cloned()
            .ok_or_else(|| CoreError::Connection {
                device: device.id.clone(),
                reason: "no route to host".into(),
            })?;
        Ok(Box::new(FakeSnmp { olt }))
    }
}

// ── Notifier ────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<Event>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, event: &Event) -> Result<(), String> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

// ── Fixtures ────────────────────────────────────────────────────────

pub fn router_descriptor(id: &str) -> DeviceDescriptor {
    DeviceDescriptor {
        id: DeviceId::new(id),
        name: format!("Router {id}"),
        kind: DeviceKind::Router,
        vendor: Vendor::Mikrotik,
        protocol: ManagementProtocol::Rest,
        host: "192.0.2.1".into(),
        port: 443,
        tls: TlsVerification::DangerAcceptInvalid,
        credentials: Credentials::Login {
            username: "admin".into(),
            password: SecretString::from("router-pass".to_string()),
        },
        primary_auth: AuthMode::Router,
    }
}

pub fn olt_descriptor(id: &str, vendor: Vendor) -> DeviceDescriptor {
    DeviceDescriptor {
        id: DeviceId::new(id),
        name: format!("OLT {id}"),
        kind: DeviceKind::Olt,
        vendor,
        protocol: ManagementProtocol::Snmp,
        host: "192.0.2.50".into(),
        port: 161,
        tls: TlsVerification::DangerAcceptInvalid,
        credentials: Credentials::Snmp {
            community: SecretString::from("public".to_string()),
            version: ispnet_api::SnmpVersion::V2c,
        },
        primary_auth: AuthMode::Router,
    }
}

pub fn radius_settings() -> RadiusSettings {
    RadiusSettings::new("10.9.9.9", SecretString::from("radius-secret".to_string()))
}

pub struct Harness {
    pub platform: Platform,
    pub transport: FakeTransport,
    pub registry: Arc<InMemoryRegistry>,
    pub store: Arc<MemoryStore>,
    pub notifier: Arc<RecordingNotifier>,
}

impl Harness {
    pub fn new(descriptors: Vec<DeviceDescriptor>) -> Self {
        let config = EngineConfig {
            radius: Some(radius_settings()),
            probe_timeout: Duration::from_millis(300),
            ..EngineConfig::default()
        };
        Self::with_config(descriptors, config)
    }

    pub fn with_config(descriptors: Vec<DeviceDescriptor>, config: EngineConfig) -> Self {
        let transport = FakeTransport::default();
        let registry = Arc::new(InMemoryRegistry::from_descriptors(descriptors));
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let platform = Platform::builder(config)
            .registry(registry.clone())
            .store(store.clone())
            .transport(Arc::new(transport.clone()))
            .notifier(notifier.clone())
            .build()
            .unwrap();
        Self {
            platform,
            transport,
            registry,
            store,
            notifier,
        }
    }
}

// ── RADIUS failover ──
//
// Moves routers between RADIUS and local (router-native) PPP
// authentication without a lockout window: local secrets are disabled
// only after RADIUS is configured, reachable and confirmed enabled, and
// are re-enabled before RADIUS is switched off. Every device write made
// by a switch is journaled and undone in reverse order on failure.

use std::sync::Arc;

use async_trait::async_trait;
use ispnet_api::Row;
use ispnet_api::routeros::{RouterSession, menu};
use secrecy::ExposeSecret;
use tracing::{debug, error, info, warn};

use crate::config::RadiusSettings;
use crate::error::{CoreError, DeviceResultExt};
use crate::model::{
    AuthMode, DeviceDescriptor, DeviceId, DeviceKind, EntityType, FailoverLogEntry, FailoverState,
};
use crate::notify::{Event, Notifier, notify_quietly};
use crate::registry::DeviceRegistry;
use crate::session::{DeviceTransport, release};
use crate::store::SyncStore;

/// Comment identifying the managed `/radius` client entry.
pub const RADIUS_COMMENT: &str = "ispnet radius server";
/// Comment identifying the managed netwatch rule.
pub const WATCHDOG_COMMENT: &str = "ispnet radius watchdog";
/// Prefix of every router log line written by the watchdog scripts.
pub const LOG_MARKER: &str = "ispnet:";
/// Comment prefix on local secrets that a RADIUS switch disabled. The
/// watchdog re-enables exactly these while RADIUS is down.
pub const FALLBACK_TAG: &str = "ispnet-fallback";

const PING_COUNT: &str = "3";

#[async_trait]
pub trait FailoverController: Send + Sync {
    /// Idempotently install the RADIUS client and watchdog rule.
    async fn configure_failover(&self, device: &DeviceId) -> Result<FailoverState, CoreError>;

    async fn switch_to_radius_mode(&self, device: &DeviceId) -> Result<FailoverState, CoreError>;

    async fn switch_to_router_mode(&self, device: &DeviceId) -> Result<FailoverState, CoreError>;

    /// RADIUS enabled with local secrets left active.
    async fn switch_to_hybrid_mode(&self, device: &DeviceId) -> Result<FailoverState, CoreError>;

    /// Read-only. Unreachable routers yield `connected: false` rather than
    /// an error; unknown device ids are still `NotFound`.
    async fn get_status(&self, device: &DeviceId) -> Result<FailoverState, CoreError>;

    /// Ping the RADIUS server from the router; `true` if any reply arrived.
    async fn test_radius_connection(&self, device: &DeviceId) -> Result<bool, CoreError>;

    /// Newest watchdog log lines first.
    async fn failover_log(
        &self,
        device: &DeviceId,
        limit: usize,
    ) -> Result<Vec<FailoverLogEntry>, CoreError>;
}

pub struct RouterFailover {
    registry: Arc<dyn DeviceRegistry>,
    transport: Arc<dyn DeviceTransport>,
    /// Consulted when re-enabling local secrets: secrets the store marks
    /// inactive stay disabled.
    store: Option<Arc<dyn SyncStore>>,
    notifier: Arc<dyn Notifier>,
    radius: Option<RadiusSettings>,
}

impl RouterFailover {
    pub fn new(
        registry: Arc<dyn DeviceRegistry>,
        transport: Arc<dyn DeviceTransport>,
        notifier: Arc<dyn Notifier>,
        radius: Option<RadiusSettings>,
    ) -> Self {
        Self {
            registry,
            transport,
            store: None,
            notifier,
            radius,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn SyncStore>) -> Self {
        self.store = Some(store);
        self
    }

    fn radius(&self) -> Result<&RadiusSettings, CoreError> {
        self.radius.as_ref().ok_or_else(|| CoreError::Config {
            message: "no [radius] server configured".into(),
        })
    }

    async fn router(&self, device: &DeviceId) -> Result<DeviceDescriptor, CoreError> {
        let descriptor = self.registry.resolve(device).await?;
        if descriptor.kind == DeviceKind::Router {
            Ok(descriptor)
        } else {
            Err(CoreError::validation(format!(
                "device {device} is not a router"
            )))
        }
    }

    /// Run a journaled switch on a fresh session, rolling back on failure
    /// and persisting the new mode on success.
    async fn switch(
        &self,
        device: &DeviceId,
        target: AuthMode,
    ) -> Result<FailoverState, CoreError> {
        let descriptor = self.router(device).await?;
        let radius = match target {
            AuthMode::Router => None,
            AuthMode::Radius | AuthMode::Hybrid => Some(self.radius()?),
        };

        info!(device = %device, from = %descriptor.primary_auth, to = %target, "switching auth mode");
        let mut session = self.transport.open_router(&descriptor).await?;
        let mut journal = Journal::default();

        let steps = match (target, radius) {
            (AuthMode::Radius, Some(settings)) => {
                to_radius(session.as_mut(), device, settings, &mut journal).await
            }
            (AuthMode::Hybrid, Some(settings)) => {
                self.to_hybrid(session.as_mut(), device, settings, &mut journal)
                    .await
            }
            _ => self.to_router(session.as_mut(), device, &mut journal).await,
        };

        let outcome = match steps {
            Ok(()) => {
                // Every step landed, so the router is in `target` whether or
                // not the read-back below works.
                self.persist_mode(&descriptor, target).await;
                let state = read_state(session.as_mut(), device, target).await;
                if let Err(e) = &state {
                    warn!(device = %device, mode = %target, error = %e, "switch applied but state read-back failed");
                }
                state
            }
            Err(e) => {
                warn!(device = %device, error = %e, steps = journal.len(), "switch failed, rolling back");
                journal.rollback(session.as_mut(), device).await;
                Err(e)
            }
        };
        release(session, device).await;
        outcome
    }

    async fn persist_mode(&self, descriptor: &DeviceDescriptor, mode: AuthMode) {
        self.registry.record_auth_mode(&descriptor.id, mode).await;
        if descriptor.primary_auth != mode {
            notify_quietly(
                self.notifier.as_ref(),
                Event::AuthModeChanged {
                    device_id: descriptor.id.clone(),
                    from: descriptor.primary_auth,
                    to: mode,
                },
            )
            .await;
        }
    }

    async fn to_router(
        &self,
        session: &mut dyn RouterSession,
        device: &DeviceId,
        journal: &mut Journal,
    ) -> Result<(), CoreError> {
        self.enable_local_secrets(session, device, journal).await?;

        let previous = read_aaa(session, device).await?;
        apply_logged(
            session,
            device,
            menu::PPP_AAA,
            Row::new().with("use-radius", "no"),
            &previous,
            journal,
        )
        .await?;
        if read_aaa(session, device).await?.flag("use-radius") {
            return Err(CoreError::Protocol {
                device: device.clone(),
                message: "use-radius is still enabled after switching it off".into(),
            });
        }

        // A live watchdog would flip RADIUS back on at the next "up" event.
        set_watchdog_disabled(session, device, true, journal).await
    }

    /// Watchdog armed state `configure_failover` must leave in place.
    fn watchdog_armed(mode: AuthMode) -> bool {
        mode != AuthMode::Router
    }

    async fn to_hybrid(
        &self,
        session: &mut dyn RouterSession,
        device: &DeviceId,
        settings: &RadiusSettings,
        journal: &mut Journal,
    ) -> Result<(), CoreError> {
        self.enable_local_secrets(session, device, journal).await?;
        ensure_configured(session, device, settings, true, journal).await?;
        enable_radius(session, device, settings, journal).await
    }

    /// Enable disabled local secrets, leaving alone those the store marks
    /// inactive, and drop the fallback tag from every secret.
    async fn enable_local_secrets(
        &self,
        session: &mut dyn RouterSession,
        device: &DeviceId,
        journal: &mut Journal,
    ) -> Result<(), CoreError> {
        let secrets = session
            .print(menu::PPP_SECRET, &[])
            .await
            .for_device(device)?;
        let mut enabled = 0usize;
        for secret in secrets.iter().filter(|s| !s.flag("dynamic")) {
            let tagged = is_fallback_tagged(secret.get("comment"));
            let mut enable = secret.flag("disabled");
            if enable {
                if let (Some(store), Some(name)) = (&self.store, secret.get("name")) {
                    let record = store
                        .get_entity(device, EntityType::PppSecret, name)
                        .await?;
                    enable = record.is_none_or(|r| r.active);
                }
            }
            if !enable && !tagged {
                continue;
            }
            let Some(id) = secret.id() else { continue };

            let mut changes = Row::new();
            let mut previous = Row::new();
            if enable {
                changes.insert("disabled", "no");
                previous.insert("disabled", "yes");
            }
            if let Some(comment) = secret.get("comment").filter(|_| tagged) {
                changes.insert("comment", untag_fallback(comment));
                previous.insert("comment", comment);
            }
            session
                .set(menu::PPP_SECRET, id, &changes)
                .await
                .for_device(device)?;
            journal.push(Undo::Set {
                menu: menu::PPP_SECRET,
                id: id.to_owned(),
                row: previous,
            });
            if enable {
                enabled += 1;
            }
        }
        debug!(device = %device, enabled, "local secrets enabled");
        Ok(())
    }
}

#[async_trait]
impl FailoverController for RouterFailover {
    async fn configure_failover(&self, device: &DeviceId) -> Result<FailoverState, CoreError> {
        let settings = self.radius()?;
        let descriptor = self.router(device).await?;
        let mut session = self.transport.open_router(&descriptor).await?;

        // Configuration is idempotent; a partial run is completed by the
        // next one, so nothing is rolled back here.
        let mut journal = Journal::default();
        let armed = Self::watchdog_armed(descriptor.primary_auth);
        let outcome =
            match ensure_configured(session.as_mut(), device, settings, armed, &mut journal).await {
                Ok(()) => read_state(session.as_mut(), device, descriptor.primary_auth).await,
                Err(e) => Err(e),
            };
        release(session, device).await;

        let state = outcome?;
        info!(device = %device, changes = journal.len(), "failover configured");
        Ok(state)
    }

    async fn switch_to_radius_mode(&self, device: &DeviceId) -> Result<FailoverState, CoreError> {
        self.switch(device, AuthMode::Radius).await
    }

    async fn switch_to_router_mode(&self, device: &DeviceId) -> Result<FailoverState, CoreError> {
        self.switch(device, AuthMode::Router).await
    }

    async fn switch_to_hybrid_mode(&self, device: &DeviceId) -> Result<FailoverState, CoreError> {
        self.switch(device, AuthMode::Hybrid).await
    }

    async fn get_status(&self, device: &DeviceId) -> Result<FailoverState, CoreError> {
        let descriptor = self.router(device).await?;
        let mut session = match self.transport.open_router(&descriptor).await {
            Ok(session) => session,
            Err(e) => {
                debug!(device = %device, error = %e, "status probe could not connect");
                return Ok(FailoverState::disconnected(
                    device.clone(),
                    descriptor.primary_auth,
                    e.to_string(),
                ));
            }
        };
        let outcome = read_state(session.as_mut(), device, descriptor.primary_auth).await;
        release(session, device).await;

        Ok(outcome.unwrap_or_else(|e| {
            FailoverState::disconnected(device.clone(), descriptor.primary_auth, e.to_string())
        }))
    }

    async fn test_radius_connection(&self, device: &DeviceId) -> Result<bool, CoreError> {
        let settings = self.radius()?;
        let descriptor = self.router(device).await?;
        let mut session = self.transport.open_router(&descriptor).await?;
        let outcome = ping(session.as_mut(), device, &settings.server).await;
        release(session, device).await;
        outcome.map(|received| received > 0)
    }

    async fn failover_log(
        &self,
        device: &DeviceId,
        limit: usize,
    ) -> Result<Vec<FailoverLogEntry>, CoreError> {
        let descriptor = self.router(device).await?;
        let mut session = self.transport.open_router(&descriptor).await?;
        let outcome = session.print(menu::LOG, &[]).await.for_device(device);
        release(session, device).await;

        Ok(outcome?
            .iter()
            .rev()
            .filter_map(|row| {
                let message = row.get("message")?;
                message.contains(LOG_MARKER).then(|| FailoverLogEntry {
                    time: row.get("time").unwrap_or_default().to_owned(),
                    topics: row.get("topics").unwrap_or_default().to_owned(),
                    message: message.to_owned(),
                })
            })
            .take(limit)
            .collect())
    }
}

// ── Journal ─────────────────────────────────────────────────────────

#[derive(Debug)]
enum Undo {
    Remove { menu: &'static str, id: String },
    Set { menu: &'static str, id: String, row: Row },
    Apply { menu: &'static str, row: Row },
}

impl Undo {
    fn menu(&self) -> &'static str {
        match self {
            Self::Remove { menu, .. } | Self::Set { menu, .. } | Self::Apply { menu, .. } => menu,
        }
    }
}

#[derive(Debug, Default)]
struct Journal(Vec<Undo>);

impl Journal {
    fn push(&mut self, undo: Undo) {
        self.0.push(undo);
    }

    fn len(&self) -> usize {
        self.0.len()
    }

    /// Undo in reverse order. Failures are logged; the remaining steps
    /// still run.
    async fn rollback(self, session: &mut dyn RouterSession, device: &DeviceId) {
        for undo in self.0.into_iter().rev() {
            let result = match &undo {
                Undo::Remove { menu, id } => session.remove(menu, id).await,
                Undo::Set { menu, id, row } => session.set(menu, id, row).await,
                Undo::Apply { menu, row } => session.apply(menu, row).await,
            };
            if let Err(e) = result {
                error!(device = %device, menu = undo.menu(), error = %e, "rollback step failed");
            }
        }
    }
}

// ── Steps ───────────────────────────────────────────────────────────

async fn to_radius(
    session: &mut dyn RouterSession,
    device: &DeviceId,
    settings: &RadiusSettings,
    journal: &mut Journal,
) -> Result<(), CoreError> {
    ensure_configured(session, device, settings, true, journal).await?;

    let received = ping(session, device, &settings.server).await?;
    if received == 0 {
        return Err(CoreError::Precondition {
            device: device.clone(),
            message: "RADIUS server did not answer pings from the router".into(),
        });
    }

    enable_radius(session, device, settings, journal).await?;

    // Only now is it safe to take local fallback away. The tag marks what
    // the watchdog may hand back during an outage; secrets that were
    // already disabled stay out of it.
    let secrets = session
        .print(menu::PPP_SECRET, &[])
        .await
        .for_device(device)?;
    let mut disabled = 0usize;
    for secret in secrets
        .iter()
        .filter(|s| !s.flag("disabled") && !s.flag("dynamic"))
    {
        let Some(id) = secret.id() else { continue };
        let comment = secret.get("comment");
        let changes = Row::new()
            .with("disabled", "yes")
            .with("comment", tag_fallback(comment));
        session
            .set(menu::PPP_SECRET, id, &changes)
            .await
            .for_device(device)?;
        journal.push(Undo::Set {
            menu: menu::PPP_SECRET,
            id: id.to_owned(),
            row: Row::new()
                .with("disabled", "no")
                .with("comment", comment.unwrap_or_default()),
        });
        disabled += 1;
    }
    debug!(device = %device, disabled, "local secrets disabled");
    Ok(())
}

/// Install/update the RADIUS client, incoming accept and watchdog rule.
/// The watchdog is left disarmed unless `armed`; a live rule on a router
/// in router mode would turn RADIUS on by itself.
async fn ensure_configured(
    session: &mut dyn RouterSession,
    device: &DeviceId,
    settings: &RadiusSettings,
    armed: bool,
    journal: &mut Journal,
) -> Result<(), CoreError> {
    upsert_managed(
        session,
        device,
        menu::RADIUS,
        RADIUS_COMMENT,
        radius_client_row(settings),
        &["secret"],
        journal,
    )
    .await?;

    // CoA support; older firmware lacks the menu.
    if let Err(e) = session
        .apply(menu::RADIUS_INCOMING, &Row::new().with("accept", "yes"))
        .await
    {
        warn!(device = %device, error = %e, "could not enable RADIUS incoming");
    }

    if settings.watchdog.enabled {
        upsert_managed(
            session,
            device,
            menu::NETWATCH,
            WATCHDOG_COMMENT,
            watchdog_row(settings, armed),
            &[],
            journal,
        )
        .await?;
    }
    Ok(())
}

async fn enable_radius(
    session: &mut dyn RouterSession,
    device: &DeviceId,
    settings: &RadiusSettings,
    journal: &mut Journal,
) -> Result<(), CoreError> {
    let previous = read_aaa(session, device).await?;
    let desired = Row::new()
        .with("use-radius", "yes")
        .with("accounting", "yes")
        .with("interim-update", settings.interim_update.as_str());
    apply_logged(session, device, menu::PPP_AAA, desired, &previous, journal).await?;

    let confirmed = read_aaa(session, device).await?;
    if confirmed.flag("use-radius") {
        Ok(())
    } else {
        Err(CoreError::Protocol {
            device: device.clone(),
            message: "router did not confirm use-radius=yes".into(),
        })
    }
}

/// Apply settings to a singleton menu, journaling the previous values.
async fn apply_logged(
    session: &mut dyn RouterSession,
    device: &DeviceId,
    menu: &'static str,
    desired: Row,
    previous: &Row,
    journal: &mut Journal,
) -> Result<(), CoreError> {
    let restore: Row = desired
        .iter()
        .filter_map(|(k, _)| previous.get(k).map(|v| (k.to_owned(), v.to_owned())))
        .collect();
    session.apply(menu, &desired).await.for_device(device)?;
    journal.push(Undo::Apply { menu, row: restore });
    Ok(())
}

/// Create or update the single row tagged `comment`, removing duplicates.
/// `write_only` attributes are compared only when the router returns them.
async fn upsert_managed(
    session: &mut dyn RouterSession,
    device: &DeviceId,
    menu: &'static str,
    comment: &str,
    desired: Row,
    write_only: &[&str],
    journal: &mut Journal,
) -> Result<(), CoreError> {
    let rows = session.print(menu, &[]).await.for_device(device)?;
    let mut managed = rows
        .iter()
        .filter(|row| row.get("comment") == Some(comment));

    let Some(existing) = managed.next() else {
        let id = session.add(menu, &desired).await.for_device(device)?;
        info!(device = %device, menu, "managed entry created");
        journal.push(Undo::Remove { menu, id });
        return Ok(());
    };

    for duplicate in managed {
        if let Some(id) = duplicate.id() {
            session.remove(menu, id).await.for_device(device)?;
            info!(device = %device, menu, "duplicate managed entry removed");
        }
    }

    let mut changes = Row::new();
    let mut previous = Row::new();
    for (key, value) in desired.iter() {
        match existing.get(key) {
            Some(current) if current == value => {}
            None if write_only.iter().any(|w| *w == key) => {}
            current => {
                changes.insert(key, value);
                if let Some(current) = current {
                    previous.insert(key, current);
                }
            }
        }
    }
    if changes.is_empty() {
        return Ok(());
    }
    // Hidden attributes ride along with any real change.
    for key in write_only {
        if let Some(value) = desired.get(key) {
            if existing.get(key).is_none() {
                changes.insert(*key, value);
            }
        }
    }

    let id = existing.id().ok_or_else(|| CoreError::Protocol {
        device: device.clone(),
        message: format!("{menu} entry has no .id"),
    })?;
    session.set(menu, id, &changes).await.for_device(device)?;
    debug!(device = %device, menu, changed = changes.len(), "managed entry updated");
    journal.push(Undo::Set {
        menu,
        id: id.to_owned(),
        row: previous,
    });
    Ok(())
}

async fn set_watchdog_disabled(
    session: &mut dyn RouterSession,
    device: &DeviceId,
    disabled: bool,
    journal: &mut Journal,
) -> Result<(), CoreError> {
    let rows = session.print(menu::NETWATCH, &[]).await.for_device(device)?;
    let Some(rule) = rows
        .iter()
        .find(|row| row.get("comment") == Some(WATCHDOG_COMMENT))
    else {
        return Ok(());
    };
    if rule.flag("disabled") == disabled {
        return Ok(());
    }
    let Some(id) = rule.id() else { return Ok(()) };
    let flag = |on: bool| if on { "yes" } else { "no" };
    session
        .set(menu::NETWATCH, id, &Row::new().with("disabled", flag(disabled)))
        .await
        .for_device(device)?;
    journal.push(Undo::Set {
        menu: menu::NETWATCH,
        id: id.to_owned(),
        row: Row::new().with("disabled", flag(!disabled)),
    });
    Ok(())
}

fn radius_client_row(settings: &RadiusSettings) -> Row {
    Row::new()
        .with("service", "ppp")
        .with("address", settings.server.as_str())
        .with("secret", settings.secret.expose_secret())
        .with("authentication-port", settings.auth_port.to_string())
        .with("accounting-port", settings.acct_port.to_string())
        .with("timeout", settings.client_timeout.as_str())
        .with("comment", RADIUS_COMMENT)
}

fn watchdog_row(settings: &RadiusSettings, armed: bool) -> Row {
    let tagged = format!("[find comment~\"^{FALLBACK_TAG}\"]");
    let up = format!(
        "/ppp aaa set use-radius=yes accounting=yes; /ppp secret disable {tagged}; \
         :log info \"{LOG_MARKER} RADIUS reachable, RADIUS authentication on\""
    );
    let down = format!(
        "/ppp aaa set use-radius=no; /ppp secret enable {tagged}; \
         :log warning \"{LOG_MARKER} RADIUS unreachable, fallback secrets enabled\""
    );
    Row::new()
        .with("host", settings.server.as_str())
        .with("interval", settings.watchdog.interval.as_str())
        .with("timeout", settings.watchdog.timeout.as_str())
        .with("up-script", up)
        .with("down-script", down)
        .with("disabled", if armed { "no" } else { "yes" })
        .with("comment", WATCHDOG_COMMENT)
}

/// `comment` with the fallback tag removed.
pub(crate) fn untag_fallback(comment: &str) -> &str {
    match comment.strip_prefix(FALLBACK_TAG) {
        Some(rest) => rest.strip_prefix(' ').unwrap_or(rest),
        None => comment,
    }
}

pub(crate) fn tag_fallback(comment: Option<&str>) -> String {
    match comment.map(untag_fallback).filter(|c| !c.is_empty()) {
        Some(text) => format!("{FALLBACK_TAG} {text}"),
        None => FALLBACK_TAG.to_owned(),
    }
}

pub(crate) fn is_fallback_tagged(comment: Option<&str>) -> bool {
    comment.is_some_and(|c| c.starts_with(FALLBACK_TAG))
}

async fn read_aaa(session: &mut dyn RouterSession, device: &DeviceId) -> Result<Row, CoreError> {
    Ok(session
        .print(menu::PPP_AAA, &[])
        .await
        .for_device(device)?
        .into_iter()
        .next()
        .unwrap_or_default())
}

/// Replies received for a router-side ping of `address`.
async fn ping(
    session: &mut dyn RouterSession,
    device: &DeviceId,
    address: &str,
) -> Result<u32, CoreError> {
    let args = Row::new()
        .with("address", address)
        .with("count", PING_COUNT);
    let rows = session.command("/ping", &args).await.for_device(device)?;
    let received = rows
        .iter()
        .rev()
        .find_map(|row| row.get("received"))
        .and_then(|r| r.parse().ok())
        .unwrap_or(0);
    debug!(device = %device, received, "RADIUS ping finished");
    Ok(received)
}

/// Read the router's posture; `recorded` is the mode the registry holds.
async fn read_state(
    session: &mut dyn RouterSession,
    device: &DeviceId,
    recorded: AuthMode,
) -> Result<FailoverState, CoreError> {
    let clients = session.print(menu::RADIUS, &[]).await.for_device(device)?;
    let client = clients
        .iter()
        .find(|row| row.get("comment") == Some(RADIUS_COMMENT))
        .or_else(|| {
            clients
                .iter()
                .find(|row| row.get("service").is_some_and(|s| s.contains("ppp")))
        });
    let aaa = read_aaa(session, device).await?;
    let secrets = session
        .print(menu::PPP_SECRET, &[])
        .await
        .for_device(device)?;
    let watchdogs = session.print(menu::NETWATCH, &[]).await.for_device(device)?;
    let watchdog = watchdogs
        .iter()
        .find(|row| row.get("comment") == Some(WATCHDOG_COMMENT));

    let use_radius = aaa.flag("use-radius");
    let mut state = FailoverState {
        device_id: device.clone(),
        connected: true,
        radius_configured: client.is_some(),
        radius_enabled: use_radius && client.is_some(),
        accounting_enabled: aaa.flag("accounting"),
        local_secrets_enabled: secrets
            .iter()
            .filter(|s| !s.flag("disabled") && !s.flag("dynamic"))
            .count(),
        watchdog_id: watchdog.and_then(Row::id).map(str::to_owned),
        watchdog_status: watchdog.and_then(|w| w.get("status")).map(str::to_owned),
        radius_server: client.and_then(|c| c.get("address")).map(str::to_owned),
        primary_auth: recorded,
        warnings: Vec::new(),
        error: None,
    };

    if use_radius && client.is_none() {
        state
            .warnings
            .push("use-radius is on but no RADIUS client is configured".into());
    }
    if state.effective_mode() != recorded {
        state.warnings.push(format!(
            "router is running in {} mode, {recorded} is recorded",
            state.effective_mode(),
        ));
    }
    Ok(state)
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;

    use super::*;

    fn settings() -> RadiusSettings {
        RadiusSettings::new("10.9.9.9", SecretString::from("s".to_string()))
    }

    #[test]
    fn watchdog_scripts_only_touch_tagged_secrets() {
        let row = watchdog_row(&settings(), true);
        let up = row.get("up-script").unwrap_or_default();
        let down = row.get("down-script").unwrap_or_default();

        assert!(down.starts_with("/ppp aaa set use-radius=no;"));
        assert!(down.contains("/ppp secret enable [find comment~\"^ispnet-fallback\"]"));
        assert!(!down.contains("disabled=yes"));
        assert!(up.contains("/ppp secret disable [find comment~\"^ispnet-fallback\"]"));
        assert_eq!(row.get("disabled"), Some("no"));
        assert_eq!(watchdog_row(&settings(), false).get("disabled"), Some("yes"));
    }

    #[test]
    fn fallback_tag_wraps_existing_comments() {
        assert_eq!(tag_fallback(None), "ispnet-fallback");
        assert_eq!(tag_fallback(Some("")), "ispnet-fallback");
        assert_eq!(tag_fallback(Some("vip")), "ispnet-fallback vip");
        assert_eq!(tag_fallback(Some("ispnet-fallback vip")), "ispnet-fallback vip");
        assert_eq!(untag_fallback("ispnet-fallback vip"), "vip");
        assert_eq!(untag_fallback("ispnet-fallback"), "");
        assert_eq!(untag_fallback("vip"), "vip");
        assert!(is_fallback_tagged(Some("ispnet-fallback")));
        assert!(!is_fallback_tagged(Some("vip")));
        assert!(!is_fallback_tagged(None));
    }
}

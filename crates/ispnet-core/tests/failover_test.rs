#![allow(clippy::unwrap_used)]

mod support;

use ispnet_api::routeros::menu;
use ispnet_core::failover::{FALLBACK_TAG, LOG_MARKER, RADIUS_COMMENT, WATCHDOG_COMMENT};
use ispnet_core::{
    AuthMode, DeviceId, DeviceRegistry, EngineConfig, EntityType, ErrorKind, Event, SyncStore,
    SyncedEntity,
};
use pretty_assertions::assert_eq;

use support::{FakeRouter, Harness, router_descriptor};

fn harness_with_router(id: &str, mode: AuthMode) -> (Harness, FakeRouter) {
    let mut descriptor = router_descriptor(id);
    descriptor.primary_auth = mode;
    let harness = Harness::new(vec![descriptor]);
    let router = harness.transport.add_router(id);
    (harness, router)
}

fn mutations(router: &FakeRouter) -> Vec<String> {
    router
        .ops()
        .into_iter()
        .filter(|op| op.starts_with("add ") || op.starts_with("set ") || op.starts_with("remove "))
        .collect()
}

async fn recorded_mode(harness: &Harness, id: &str) -> AuthMode {
    harness
        .registry
        .get(&DeviceId::new(id))
        .await
        .unwrap()
        .descriptor
        .primary_auth
}

#[tokio::test]
async fn configure_failover_is_idempotent() {
    let (harness, router) = harness_with_router("r1", AuthMode::Router);
    let device = DeviceId::new("r1");

    let first = harness
        .platform
        .failover()
        .configure_failover(&device)
        .await
        .unwrap();
    assert!(first.radius_configured);
    assert!(!first.radius_enabled);
    assert_eq!(first.radius_server.as_deref(), Some("10.9.9.9"));
    assert!(first.watchdog_id.is_some());
    assert_eq!(router.singleton(menu::RADIUS_INCOMING).get("accept"), Some("yes"));

    router.clear_ops();
    let second = harness
        .platform
        .failover()
        .configure_failover(&device)
        .await
        .unwrap();

    assert_eq!(first, second);
    assert!(mutations(&router).is_empty(), "{:?}", router.ops());
    assert_eq!(router.rows(menu::RADIUS).len(), 1);
    assert_eq!(router.rows(menu::NETWATCH).len(), 1);
    assert_eq!(recorded_mode(&harness, "r1").await, AuthMode::Router);
}

#[tokio::test]
async fn configure_failover_collapses_duplicate_clients() {
    let (harness, router) = harness_with_router("r1", AuthMode::Router);
    router.seed(
        menu::RADIUS,
        &[("address", "10.1.1.1"), ("comment", RADIUS_COMMENT)],
    );
    router.seed(
        menu::RADIUS,
        &[("address", "10.1.1.2"), ("comment", RADIUS_COMMENT)],
    );

    harness
        .platform
        .failover()
        .configure_failover(&DeviceId::new("r1"))
        .await
        .unwrap();

    let clients = router.rows(menu::RADIUS);
    assert_eq!(clients.len(), 1);
    assert_eq!(clients[0].get("address"), Some("10.9.9.9"));
    assert_eq!(clients[0].get("secret"), Some("radius-secret"));
}

#[tokio::test]
async fn radius_switch_configures_then_enables_then_disables_fallback() {
    let (harness, router) = harness_with_router("r1", AuthMode::Router);
    router.seed(menu::PPP_SECRET, &[("name", "alice"), ("profile", "10M")]);
    router.seed(menu::PPP_SECRET, &[("name", "bob"), ("profile", "10M")]);
    router.seed(
        menu::PPP_SECRET,
        &[("name", "dyn"), ("dynamic", "true")],
    );

    let state = harness
        .platform
        .failover()
        .switch_to_radius_mode(&DeviceId::new("r1"))
        .await
        .unwrap();

    assert!(state.radius_configured);
    assert!(state.radius_enabled);
    assert!(state.accounting_enabled);
    assert_eq!(state.local_secrets_enabled, 0);
    assert_eq!(state.effective_mode(), AuthMode::Radius);
    assert!(state.warnings.is_empty(), "{:?}", state.warnings);

    // No lockout window: the client exists and answers before RADIUS is
    // switched on, and locals are only disabled after that.
    let client = router.op_index("add /radius ").unwrap();
    let ping = router.op_index("ping ").unwrap();
    let enable = router.op_index("apply /ppp/aaa use-radius=yes").unwrap();
    let first_disable = router.op_index("set /ppp/secret").unwrap();
    assert!(client < ping && ping < enable && enable < first_disable);

    assert!(router.row_named(menu::PPP_SECRET, "alice").unwrap().flag("disabled"));
    assert!(!router.row_named(menu::PPP_SECRET, "dyn").unwrap().flag("disabled"));
    assert_eq!(recorded_mode(&harness, "r1").await, AuthMode::Radius);
    assert!(harness.notifier.events().contains(&Event::AuthModeChanged {
        device_id: DeviceId::new("r1"),
        from: AuthMode::Router,
        to: AuthMode::Radius,
    }));
}

#[tokio::test]
async fn configure_after_router_switch_keeps_watchdog_disarmed() {
    let (harness, router) = harness_with_router("r1", AuthMode::Router);
    let device = DeviceId::new("r1");
    let failover = harness.platform.failover();

    failover.switch_to_radius_mode(&device).await.unwrap();
    assert!(!router.rows(menu::NETWATCH)[0].flag("disabled"));
    failover.switch_to_router_mode(&device).await.unwrap();
    assert!(router.rows(menu::NETWATCH)[0].flag("disabled"));

    router.clear_ops();
    let state = failover.configure_failover(&device).await.unwrap();

    let watchdog = &router.rows(menu::NETWATCH)[0];
    assert!(watchdog.flag("disabled"), "{watchdog:?}");
    assert!(mutations(&router).is_empty(), "{:?}", router.ops());
    assert_eq!(state.effective_mode(), AuthMode::Router);
    assert_eq!(router.singleton(menu::PPP_AAA).get("use-radius"), Some("no"));
}

#[tokio::test]
async fn configure_on_router_mode_installs_a_disarmed_watchdog() {
    let (harness, router) = harness_with_router("r1", AuthMode::Router);
    harness
        .platform
        .failover()
        .configure_failover(&DeviceId::new("r1"))
        .await
        .unwrap();
    assert!(router.rows(menu::NETWATCH)[0].flag("disabled"));
}

#[tokio::test]
async fn radius_switch_tags_only_the_secrets_it_disables() {
    let (harness, router) = harness_with_router("r1", AuthMode::Router);
    router.seed(menu::PPP_SECRET, &[("name", "alice"), ("comment", "tower 3")]);
    router.seed(menu::PPP_SECRET, &[("name", "bob")]);
    router.seed(
        menu::PPP_SECRET,
        &[("name", "suspended"), ("disabled", "yes"), ("comment", "unpaid")],
    );
    let device = DeviceId::new("r1");
    harness
        .store
        .upsert_entity(
            SyncedEntity::new(device.clone(), EntityType::PppSecret, "suspended")
                .with_active(false),
        )
        .await
        .unwrap();
    let failover = harness.platform.failover();

    failover.switch_to_radius_mode(&device).await.unwrap();

    let comment = |name: &str| {
        router
            .row_named(menu::PPP_SECRET, name)
            .unwrap()
            .get("comment")
            .map(str::to_owned)
    };
    assert_eq!(comment("alice").as_deref(), Some("ispnet-fallback tower 3"));
    assert_eq!(comment("bob").as_deref(), Some(FALLBACK_TAG));
    assert_eq!(comment("suspended").as_deref(), Some("unpaid"));

    let down = router.rows(menu::NETWATCH)[0]
        .get("down-script")
        .unwrap()
        .to_owned();
    assert!(down.contains(&format!("[find comment~\"^{FALLBACK_TAG}\"]")));
    assert!(!down.contains("disabled=yes"));

    // Back to router mode: tags are cleared and the suspended account
    // stays off.
    failover.switch_to_router_mode(&device).await.unwrap();
    assert_eq!(comment("alice").as_deref(), Some("tower 3"));
    assert_eq!(comment("bob").as_deref(), Some(""));
    assert!(router.row_named(menu::PPP_SECRET, "suspended").unwrap().flag("disabled"));
}

#[tokio::test]
async fn radius_switch_refuses_when_server_is_silent() {
    let (harness, router) = harness_with_router("r1", AuthMode::Router);
    router.seed(menu::PPP_SECRET, &[("name", "alice")]);
    router.with_state(|s| s.ping_received = 0);

    let err = harness
        .platform
        .failover()
        .switch_to_radius_mode(&DeviceId::new("r1"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(router.rows(menu::RADIUS).is_empty());
    assert!(router.rows(menu::NETWATCH).is_empty());
    assert_eq!(router.singleton(menu::PPP_AAA).get("use-radius"), Some("no"));
    assert!(!router.row_named(menu::PPP_SECRET, "alice").unwrap().flag("disabled"));
    assert_eq!(recorded_mode(&harness, "r1").await, AuthMode::Router);
    assert!(harness.notifier.events().is_empty());
}

#[tokio::test]
async fn failed_switch_rolls_back_every_step() {
    let (harness, router) = harness_with_router("r1", AuthMode::Router);
    router.seed(menu::PPP_SECRET, &[("name", "alice")]);
    router.seed(menu::PPP_SECRET, &[("name", "bob")]);
    router.fail_when("set /ppp/secret bob");

    let err = harness
        .platform
        .failover()
        .switch_to_radius_mode(&DeviceId::new("r1"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Protocol);

    let aaa = router.singleton(menu::PPP_AAA);
    assert_eq!(aaa.get("use-radius"), Some("no"));
    assert_eq!(aaa.get("accounting"), Some("no"));
    assert_eq!(aaa.get("interim-update"), Some("0s"));
    for name in ["alice", "bob"] {
        assert!(!router.row_named(menu::PPP_SECRET, name).unwrap().flag("disabled"));
    }
    assert!(router.rows(menu::RADIUS).is_empty());
    assert!(router.rows(menu::NETWATCH).is_empty());
    assert_eq!(recorded_mode(&harness, "r1").await, AuthMode::Router);
}

#[tokio::test]
async fn router_switch_restores_locals_but_respects_inactive_records() {
    let (harness, router) = harness_with_router("r1", AuthMode::Radius);
    router.seed(menu::PPP_SECRET, &[("name", "alice"), ("disabled", "yes")]);
    router.seed(menu::PPP_SECRET, &[("name", "carol"), ("disabled", "yes")]);
    router.seed(
        menu::NETWATCH,
        &[("host", "10.9.9.9"), ("disabled", "no"), ("comment", WATCHDOG_COMMENT)],
    );
    router.with_state(|s| {
        s.singletons
            .get_mut(menu::PPP_AAA)
            .unwrap()
            .insert("use-radius", "yes");
    });
    harness
        .store
        .upsert_entity(
            SyncedEntity::new(DeviceId::new("r1"), EntityType::PppSecret, "carol")
                .with_active(false),
        )
        .await
        .unwrap();

    let state = harness
        .platform
        .failover()
        .switch_to_router_mode(&DeviceId::new("r1"))
        .await
        .unwrap();

    assert_eq!(state.effective_mode(), AuthMode::Router);
    assert_eq!(state.local_secrets_enabled, 1);
    assert!(!router.row_named(menu::PPP_SECRET, "alice").unwrap().flag("disabled"));
    assert!(router.row_named(menu::PPP_SECRET, "carol").unwrap().flag("disabled"));
    assert!(router.rows(menu::NETWATCH)[0].flag("disabled"));
    assert_eq!(recorded_mode(&harness, "r1").await, AuthMode::Router);
}

#[tokio::test]
async fn hybrid_keeps_locals_enabled_alongside_radius() {
    let (harness, router) = harness_with_router("r1", AuthMode::Radius);
    router.seed(menu::PPP_SECRET, &[("name", "alice"), ("disabled", "yes")]);

    let state = harness
        .platform
        .failover()
        .switch_to_hybrid_mode(&DeviceId::new("r1"))
        .await
        .unwrap();

    assert_eq!(state.effective_mode(), AuthMode::Hybrid);
    assert_eq!(state.primary_auth, AuthMode::Hybrid);
    assert_eq!(state.local_secrets_enabled, 1);
    assert_eq!(recorded_mode(&harness, "r1").await, AuthMode::Hybrid);
}

#[tokio::test]
async fn status_of_unreachable_router_fails_soft() {
    let (harness, router) = harness_with_router("r1", AuthMode::Hybrid);
    router.set_unreachable(true);

    let state = harness
        .platform
        .failover()
        .get_status(&DeviceId::new("r1"))
        .await
        .unwrap();

    assert!(!state.connected);
    assert_eq!(state.primary_auth, AuthMode::Hybrid);
    assert!(state.error.unwrap().contains("r1"));
}

#[tokio::test]
async fn status_warns_when_router_drifts_from_recorded_mode() {
    let (harness, router) = harness_with_router("r1", AuthMode::Radius);
    router.seed(menu::PPP_SECRET, &[("name", "alice")]);

    let state = harness
        .platform
        .failover()
        .get_status(&DeviceId::new("r1"))
        .await
        .unwrap();

    assert!(state.connected);
    assert_eq!(state.effective_mode(), AuthMode::Router);
    assert_eq!(state.warnings.len(), 1);
}

#[tokio::test]
async fn radius_test_reports_ping_replies() {
    let (harness, router) = harness_with_router("r1", AuthMode::Router);
    let device = DeviceId::new("r1");

    assert!(
        harness
            .platform
            .failover()
            .test_radius_connection(&device)
            .await
            .unwrap()
    );
    router.with_state(|s| s.ping_received = 0);
    assert!(
        !harness
            .platform
            .failover()
            .test_radius_connection(&device)
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn failover_log_returns_newest_marked_lines() {
    let (harness, router) = harness_with_router("r1", AuthMode::Router);
    let up = format!("{LOG_MARKER} RADIUS reachable");
    let down = format!("{LOG_MARKER} RADIUS unreachable");
    router.seed(
        menu::LOG,
        &[("time", "10:00:00"), ("topics", "script,info"), ("message", up.as_str())],
    );
    router.seed(
        menu::LOG,
        &[("time", "10:01:00"), ("topics", "system,info"), ("message", "user admin logged in")],
    );
    router.seed(
        menu::LOG,
        &[("time", "10:02:00"), ("topics", "script,warning"), ("message", down.as_str())],
    );

    let entries = harness
        .platform
        .failover()
        .failover_log(&DeviceId::new("r1"), 1)
        .await
        .unwrap();

    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].time, "10:02:00");
    assert!(entries[0].message.ends_with("RADIUS unreachable"));
}

#[tokio::test]
async fn switching_without_radius_settings_is_a_config_error() {
    let harness = Harness::with_config(vec![router_descriptor("r1")], EngineConfig::default());
    harness.transport.add_router("r1");

    let err = harness
        .platform
        .failover()
        .switch_to_radius_mode(&DeviceId::new("r1"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(err.to_string().contains("radius"));
}

#[tokio::test]
async fn applied_switch_is_recorded_even_when_read_back_fails() {
    let (harness, router) = harness_with_router("r1", AuthMode::Router);
    router.seed(menu::PPP_SECRET, &[("name", "alice"), ("profile", "10M")]);
    router.drop_reads_after("set /ppp/secret alice");

    let err = harness
        .platform
        .failover()
        .switch_to_radius_mode(&DeviceId::new("r1"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Connection);
    // The switch itself landed and was not rolled back.
    assert_eq!(router.singleton(menu::PPP_AAA).get("use-radius"), Some("yes"));
    assert!(router.row_named(menu::PPP_SECRET, "alice").unwrap().flag("disabled"));
    assert_eq!(recorded_mode(&harness, "r1").await, AuthMode::Radius);
}

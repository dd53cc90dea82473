//! Integration tests for the reconciliation controller.
//!
//! # Purpose
//!
//! These tests run the controller end to end against scripted transports
//! and verify what ends up persisted and reported:
//!
//! - Identity resolution from discovery and from the control unit.
//! - Device list filtering.
//! - Host changes forcing a fresh pairing before any session to the new host.
//! - Giving up on an identity that never resolves.
//! - The one-attempt-at-a-time guard.

use std::sync::Arc;
use std::time::Duration;

use bridge_controller::application::pair_bridge::PairingState;
use bridge_controller::infrastructure::network::discovery::{ChannelDiscoveryFeed, DiscoveryFeed};
use bridge_controller::infrastructure::network::mock::{
    CsrBehaviour, MockPairingConnector, MockSessionConnector, StubCredentialGenerator,
    MOCK_CLIENT_CERTIFICATE, MOCK_PRIVATE_KEY, MOCK_ROOT_CERTIFICATE,
};
use bridge_controller::{
    Collaborators, ConnectionStatus, FileStateStore, MemoryStateStore, ModuleConfig,
    ReconcileError, ReconcileOutcome, ReconciliationController, StateStore, StatusSink,
    WatchStatusSink,
};
use bridge_core::{BridgeAddressRecord, BridgeIdentity, CredentialBundle, DeviceRecord};

const OLD_CLIENT: &str = "-----BEGIN CERTIFICATE-----\nb2xkLWNsaWVudA==\n-----END CERTIFICATE-----\n";

struct Harness {
    controller: Arc<ReconciliationController>,
    store: Arc<dyn StateStore>,
    feed: Arc<ChannelDiscoveryFeed>,
    pairing: MockPairingConnector,
    sessions: MockSessionConnector,
    status: Arc<WatchStatusSink>,
}

fn harness_with_store(store: Arc<dyn StateStore>) -> Harness {
    let feed = Arc::new(ChannelDiscoveryFeed::new());
    let pairing = MockPairingConnector::confirming();
    let sessions = MockSessionConnector::new();
    let status = Arc::new(WatchStatusSink::new());
    let controller = Arc::new(ReconciliationController::new(Collaborators {
        store: Arc::clone(&store),
        discovery_feed: Arc::clone(&feed) as Arc<dyn DiscoveryFeed>,
        pairing: Arc::new(pairing.clone()),
        sessions: Arc::new(sessions.clone()),
        generator: Arc::new(StubCredentialGenerator::new()),
        status: Arc::clone(&status) as Arc<dyn StatusSink>,
    }));
    Harness {
        controller,
        store,
        feed,
        pairing,
        sessions,
        status,
    }
}

fn harness(config: ModuleConfig, bundle: Option<CredentialBundle>) -> Harness {
    harness_with_store(Arc::new(MemoryStateStore::with_state(config, bundle)))
}

fn bundle_with_client(client: &str) -> CredentialBundle {
    CredentialBundle::new(MOCK_ROOT_CERTIFICATE, client, MOCK_PRIVATE_KEY).unwrap()
}

fn device(name: &str, serial: &str, device_type: &str, area: Option<&str>) -> DeviceRecord {
    DeviceRecord {
        name: name.to_string(),
        serial_number: serial.to_string(),
        device_type: device_type.to_string(),
        model_number: "M-1".to_string(),
        area: area.map(str::to_string),
    }
}

fn paired_config(host: &str, identity: BridgeIdentity) -> ModuleConfig {
    let mut config = ModuleConfig::default().with_host(host);
    config.identity = Some(identity);
    config
}

/// Announces a record and waits until the pump has applied it.
async fn announce(h: &Harness, address: &str, id: &str) {
    assert!(h.feed.announce(BridgeAddressRecord::new(address, id)).await);
    for _ in 0..100 {
        if h.controller.registry().lookup(address).is_some() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("announcement for {address} was never applied");
}

// ── Identity resolution ───────────────────────────────────────────────────────

/// Stored bundle + pending identity, and the bridge lists control unit `X`:
/// `X` becomes the persisted identity and is absent from the device list.
#[tokio::test]
async fn test_control_unit_serial_is_adopted_and_excluded() {
    // Arrange
    let h = harness(
        paired_config("192.168.1.20", BridgeIdentity::PendingResolution),
        Some(bundle_with_client(MOCK_CLIENT_CERTIFICATE)),
    );
    let lamp = device("Kitchen Pendant", "100", "WallDimmer", Some("Kitchen"));
    h.sessions.set_devices(vec![
        Ok(device("Smart Bridge 2", "0A1B2C3D", "SmartBridge", None)),
        Ok(lamp.clone()),
        Ok(device("Remote", "101", "Pico3ButtonRaiseLower", None)),
    ]);

    // Act
    let outcome = h.controller.start().await.expect("start");

    // Assert
    let x = BridgeIdentity::known("0A1B2C3D");
    assert_eq!(
        outcome,
        ReconcileOutcome::Connected {
            identity: x.clone(),
            device_count: 1,
        }
    );
    assert_eq!(h.store.load_config().unwrap().identity, Some(x));
    assert_eq!(h.controller.devices(), vec![lamp]);
    assert_eq!(h.status.latest().status, ConnectionStatus::Connected);
    assert!(h.controller.is_connected().await);
}

/// Pairing with a discovered address records the discovery id right away.
#[tokio::test]
async fn test_discovered_bridge_identity_is_stored_after_pairing() {
    let h = harness(ModuleConfig::default(), None);
    h.sessions.set_devices(vec![Ok(device("Lamp", "100", "WallDimmer", Some("Hall")))]);
    h.controller.start().await.expect("start with no host");
    announce(&h, "192.168.1.20", "FEEDBEEF").await;

    let outcome = h
        .controller
        .update_config(ModuleConfig::default().with_host("192.168.1.20"))
        .await
        .expect("pair and connect");

    assert_eq!(
        outcome,
        ReconcileOutcome::Connected {
            identity: BridgeIdentity::known("FEEDBEEF"),
            device_count: 1,
        }
    );
    assert_eq!(
        h.store.load_config().unwrap().identity,
        Some(BridgeIdentity::known("FEEDBEEF"))
    );
    assert!(h.store.load_credentials().unwrap().is_some());
}

/// A known identity is kept even when the control unit reports another serial.
#[tokio::test]
async fn test_known_identity_is_never_overwritten() {
    let known = BridgeIdentity::known("FROM-DISCOVERY");
    let h = harness(
        paired_config("192.168.1.20", known.clone()),
        Some(bundle_with_client(MOCK_CLIENT_CERTIFICATE)),
    );
    h.sessions
        .set_devices(vec![Ok(device("Bridge", "FROM-LIST", "SmartBridgePro", None))]);

    h.controller.start().await.expect("start");

    assert_eq!(h.store.load_config().unwrap().identity, Some(known));
}

// ── Host changes ──────────────────────────────────────────────────────────────

/// After pairing with A, switching to B pairs with B before any session to
/// B is opened, and that session presents B's new certificate.
#[tokio::test]
async fn test_host_change_pairs_before_connecting_with_new_bundle() {
    // Arrange: paired and connected to A with an older certificate
    let h = harness(
        paired_config("192.168.1.20", BridgeIdentity::known("AAAA")),
        Some(bundle_with_client(OLD_CLIENT)),
    );
    h.sessions.set_devices(vec![
        Ok(device("Bridge", "BBBB", "SmartBridge", None)),
        Ok(device("Lamp", "100", "WallDimmer", Some("Hall"))),
    ]);
    h.controller.start().await.expect("connect to A");

    // Act
    let outcome = h
        .controller
        .update_config(ModuleConfig::default().with_host("192.168.1.30"))
        .await;

    // Assert
    assert!(matches!(outcome, Ok(ReconcileOutcome::Connected { .. })));
    assert_eq!(h.pairing.connect_calls(), vec![("192.168.1.30".to_string(), 8083)]);

    let calls = h.sessions.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].address, "192.168.1.20");
    assert_eq!(calls[0].client_certificate, OLD_CLIENT);
    assert_eq!(calls[1].address, "192.168.1.30");
    assert_eq!(
        calls[1].client_certificate, MOCK_CLIENT_CERTIFICATE,
        "session to the new host must use the freshly issued certificate"
    );
    assert_eq!(h.sessions.close_count(), 1, "session to A closed");
    assert_eq!(
        h.store.load_credentials().unwrap().unwrap().client_certificate(),
        MOCK_CLIENT_CERTIFICATE
    );
}

/// A failed re-pairing after a host change leaves no credentials behind that
/// could be applied to the new host.
#[tokio::test(start_paused = true)]
async fn test_failed_repairing_after_host_change_clears_old_bundle() {
    let h = harness(
        paired_config("192.168.1.20", BridgeIdentity::known("AAAA")),
        Some(bundle_with_client(OLD_CLIENT)),
    );
    h.pairing.set_csr_behaviour(CsrBehaviour::Silent);

    let result = h
        .controller
        .update_config(ModuleConfig::default().with_host("192.168.1.30"))
        .await;

    assert!(matches!(result, Err(ReconcileError::Pairing(_))));
    assert_eq!(h.store.load_credentials().unwrap(), None);
    assert_eq!(h.store.load_config().unwrap().identity, None);
    assert!(h.sessions.calls().is_empty());
}

/// Changing settings other than the host keeps the pairing.
#[tokio::test]
async fn test_port_change_reconnects_without_pairing() {
    let h = harness(
        paired_config("192.168.1.20", BridgeIdentity::known("AAAA")),
        Some(bundle_with_client(OLD_CLIENT)),
    );
    let mut config = ModuleConfig::default().with_host("192.168.1.20");
    config.port = 9081;

    h.controller.update_config(config).await.expect("reconnect");

    assert!(h.pairing.connect_calls().is_empty());
    assert_eq!(h.sessions.calls()[0].port, 9081);
    assert_eq!(
        h.store.load_config().unwrap().identity,
        Some(BridgeIdentity::known("AAAA"))
    );
}

// ── Unresolvable identity ─────────────────────────────────────────────────────

/// Three consecutive attempts without a control unit discard the
/// credentials and ask for re-pairing.
#[tokio::test]
async fn test_unresolvable_identity_requires_repairing_after_limit() {
    // Arrange
    let h = harness(
        paired_config("192.168.1.20", BridgeIdentity::PendingResolution),
        Some(bundle_with_client(MOCK_CLIENT_CERTIFICATE)),
    );
    h.sessions.set_devices(vec![Ok(device("Lamp", "100", "WallDimmer", Some("Hall")))]);

    // Act
    let first = h.controller.start().await;
    let second = h.controller.start().await;
    let third = h.controller.start().await;

    // Assert
    assert!(first.is_err());
    assert!(second.is_err());
    assert_eq!(third.unwrap(), ReconcileOutcome::NeedsRepairing);
    assert_eq!(h.store.load_credentials().unwrap(), None);
    assert_eq!(h.store.load_config().unwrap().identity, None);
    let latest = h.status.latest();
    assert_eq!(latest.status, ConnectionStatus::BadConfiguration);
    assert_eq!(latest.detail, "needs re-pairing");

    // And after that, a plain start only reports "not paired".
    assert_eq!(h.controller.start().await.unwrap(), ReconcileOutcome::NotPaired);
}

/// Re-pairing on request restores a working connection.
#[tokio::test]
async fn test_request_pairing_recovers_after_repairing_needed() {
    let mut config = paired_config("192.168.1.20", BridgeIdentity::PendingResolution);
    config.max_resolution_attempts = 1;
    let h = harness(config, Some(bundle_with_client(OLD_CLIENT)));
    h.sessions.set_devices(vec![
        Ok(device("Lamp", "100", "WallDimmer", Some("Hall"))),
    ]);
    assert_eq!(h.controller.start().await.unwrap(), ReconcileOutcome::NeedsRepairing);
    h.sessions.set_devices(vec![
        Ok(device("Bridge", "CAFE0001", "SmartBridge", None)),
        Ok(device("Lamp", "100", "WallDimmer", Some("Hall"))),
    ]);

    let outcome = h.controller.request_pairing().await.expect("re-pair");

    assert_eq!(
        outcome,
        ReconcileOutcome::Connected {
            identity: BridgeIdentity::known("CAFE0001"),
            device_count: 1,
        }
    );
}

// ── Concurrency ───────────────────────────────────────────────────────────────

/// While one reconciliation waits for the button, any other call is `Busy`.
#[tokio::test(start_paused = true)]
async fn test_overlapping_reconcile_is_busy() {
    // Arrange
    let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
    let feed = Arc::new(ChannelDiscoveryFeed::new());
    let pairing = MockPairingConnector::new();
    let controller = Arc::new(ReconciliationController::new(Collaborators {
        store,
        discovery_feed: feed,
        pairing: Arc::new(pairing.clone()),
        sessions: Arc::new(MockSessionConnector::new()),
        generator: Arc::new(StubCredentialGenerator::new()),
        status: Arc::new(WatchStatusSink::new()),
    }));
    let mut states = controller.pairing_state();
    let first = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move {
            controller
                .update_config(ModuleConfig::default().with_host("192.168.1.20"))
                .await
        })
    };
    states
        .wait_for(|s| *s == PairingState::AwaitingPhysicalConfirmation)
        .await
        .unwrap();

    // Act
    let second = controller.start().await;

    // Assert
    assert!(matches!(second, Err(ReconcileError::Busy)));
    pairing.push_message(bridge_core::PairingMessage::permissions(["PhysicalAccess"]));
    let first = tokio::time::timeout(Duration::from_secs(60), first)
        .await
        .expect("first attempt finishes")
        .unwrap();
    assert!(first.is_ok() || matches!(first, Err(ReconcileError::Connection(_))));
    assert_eq!(pairing.connect_calls().len(), 1);
}

// ── Persistence ───────────────────────────────────────────────────────────────

/// The full pairing flow persists to disk and survives a restart.
#[tokio::test]
async fn test_file_store_survives_restart() {
    // Arrange
    let dir = std::env::temp_dir().join(format!("bridge_it_{}", uuid::Uuid::new_v4()));
    let h = harness_with_store(Arc::new(FileStateStore::new(&dir)));
    h.sessions.set_devices(vec![
        Ok(device("Bridge", "0A1B2C3D", "SmartBridge", None)),
        Ok(device("Lamp", "100", "WallDimmer", Some("Hall"))),
    ]);

    // Act
    h.controller
        .update_config(ModuleConfig::default().with_host("192.168.1.20"))
        .await
        .expect("pair and connect");
    h.controller.shutdown().await;

    // Assert: a fresh store over the same directory sees the same state
    let reopened = FileStateStore::new(&dir);
    let config = reopened.load_config().unwrap();
    assert_eq!(config.host(), Some("192.168.1.20"));
    assert_eq!(config.identity, Some(BridgeIdentity::known("0A1B2C3D")));
    let bundle = reopened.load_credentials().unwrap().expect("bundle stored");
    assert_eq!(bundle.client_certificate(), MOCK_CLIENT_CERTIFICATE);

    std::fs::remove_dir_all(&dir).ok();
}

/// Shutdown closes the live session and reports disconnected.
#[tokio::test]
async fn test_shutdown_closes_session() {
    let h = harness(
        paired_config("192.168.1.20", BridgeIdentity::known("AAAA")),
        Some(bundle_with_client(OLD_CLIENT)),
    );
    h.controller.start().await.expect("connect");

    h.controller.shutdown().await;

    assert_eq!(h.sessions.close_count(), 1);
    assert!(!h.controller.is_connected().await);
    assert!(h.controller.devices().is_empty());
    assert_eq!(h.status.latest().status, ConnectionStatus::Disconnected);
    assert!(matches!(h.controller.start().await, Err(ReconcileError::ShutDown)));
}

//! ReconcileUseCase: drive the module from its persisted configuration to a
//! live, identified session.
//!
//! # Reconciliation flow (for beginners)
//!
//! Every entry point (`start`, `update_config`, `request_pairing`) runs the
//! same sequence, one attempt at a time:
//!
//! ```text
//!  restart discovery
//!        │
//!  host configured? ── no ──► BadConfiguration "no host configured"
//!        │
//!  host changed? ── yes ──► clear bundle + identity ──► pair ──► resolve identity
//!        │                                                        │
//!        ▼                                                        ▼
//!  bundle stored? ── no ──► BadConfiguration "not paired"     persist bundle, then config
//!        │                                                        │
//!        ▼◄───────────────────────────────────────────────────────┘
//!  connect + enumerate ──► persist adopted identity ──► Connected
//! ```
//!
//! # Identity that never resolves
//!
//! Each `NotConfigured` or `IdentityUnresolvable` from the connection manager
//! increments a counter; any other outcome resets it.  When the counter
//! reaches `max_resolution_attempts`, the stored bundle and identity are
//! discarded and the host is told the bridge needs re-pairing.

use std::sync::{Arc, PoisonError, RwLock};

use bridge_core::{BridgeIdentity, CredentialBundle, CredentialGenerator, DeviceRecord};
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::connect_bridge::{ConnectionError, ConnectionManager};
use super::pair_bridge::{PairingError, PairingState, PairingStateMachine, PairingTimeouts};
use super::resolve_identity::resolve_identity;
use crate::infrastructure::network::discovery::{
    BridgeChoice, DiscoveryFeed, DiscoveryRegistry, DiscoveryService,
};
use crate::infrastructure::network::{PairingConnector, SessionConnector};
use crate::infrastructure::status::{ConnectionStatus, StatusSink};
use crate::infrastructure::storage::config::{ModuleConfig, StateStore, StorageError};

/// Error type for a reconciliation attempt.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("a reconciliation is already in progress")]
    Busy,

    #[error("pairing failed: {0}")]
    Pairing(#[from] PairingError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("state storage failed: {0}")]
    Storage(#[from] StorageError),

    #[error("controller has been shut down")]
    ShutDown,
}

/// How a successful reconciliation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// No host is configured; nothing to do until the user provides one.
    NoHost,
    /// A host is configured but no credentials are stored.
    NotPaired,
    Connected {
        identity: BridgeIdentity,
        device_count: usize,
    },
    /// Identity resolution failed too often; credentials were discarded.
    NeedsRepairing,
}

/// The external collaborators a controller is wired to.
pub struct Collaborators {
    pub store: Arc<dyn StateStore>,
    pub discovery_feed: Arc<dyn DiscoveryFeed>,
    pub pairing: Arc<dyn PairingConnector>,
    pub sessions: Arc<dyn SessionConnector>,
    pub generator: Arc<dyn CredentialGenerator>,
    pub status: Arc<dyn StatusSink>,
}

/// Mutable state owned by the in-flight attempt.
#[derive(Debug, Default)]
struct AttemptState {
    unresolved_attempts: u32,
}

/// Why the sequence is running; decides whether pairing is forced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Startup,
    HostChanged,
    PairingRequested,
}

/// Owns the module's lifecycle: discovery, pairing, connection, persistence.
pub struct ReconciliationController {
    store: Arc<dyn StateStore>,
    discovery: DiscoveryService,
    pairing: PairingStateMachine,
    connection: ConnectionManager,
    status: Arc<dyn StatusSink>,
    cancel: CancellationToken,
    attempt: Mutex<AttemptState>,
    devices: RwLock<Vec<DeviceRecord>>,
}

impl ReconciliationController {
    pub fn new(parts: Collaborators) -> Self {
        let registry = Arc::new(DiscoveryRegistry::new());
        let timeouts = ModuleConfig::default().timeouts;
        Self {
            store: parts.store,
            discovery: DiscoveryService::new(registry, parts.discovery_feed),
            pairing: PairingStateMachine::new(
                parts.pairing,
                parts.generator,
                PairingTimeouts::from(&timeouts),
            ),
            connection: ConnectionManager::new(parts.sessions, timeouts.enumeration()),
            status: parts.status,
            cancel: CancellationToken::new(),
            attempt: Mutex::new(AttemptState::default()),
            devices: RwLock::new(Vec::new()),
        }
    }

    /// Reconciles against the stored configuration.
    ///
    /// Never pairs on its own: a stored host without a bundle reports
    /// "not paired".
    pub async fn start(&self) -> Result<ReconcileOutcome, ReconcileError> {
        let mut attempt = self.begin()?;
        let config = self.store.load_config()?;
        self.run(&mut attempt, config, Trigger::Startup).await
    }

    /// Persists a new configuration and reconciles against it.
    ///
    /// The identity is managed by the controller: the one in `config` is
    /// ignored.  If the host differs from the stored one, the stored bundle
    /// and identity are discarded and a fresh pairing runs before any
    /// session is opened to the new host.  Re-saving the same host while no
    /// bundle is stored pairs again.
    pub async fn update_config(&self, config: ModuleConfig) -> Result<ReconcileOutcome, ReconcileError> {
        let mut attempt = self.begin()?;
        let stored = self.store.load_config()?;

        let mut config = config;
        let trigger = if config.host() != stored.host() {
            info!(
                "host changed from {} to {}",
                stored.host().unwrap_or("<none>"),
                config.host().unwrap_or("<none>")
            );
            config.identity = None;
            Trigger::HostChanged
        } else if config.host().is_some() && matches!(self.store.load_credentials(), Ok(None)) {
            // Re-submitting the host of an unpaired bridge retries pairing.
            info!("host {} is not paired; pairing again", config.host().unwrap_or_default());
            config.identity = None;
            Trigger::PairingRequested
        } else {
            config.identity = stored.identity;
            Trigger::Startup
        };
        self.run(&mut attempt, config, trigger).await
    }

    /// Discards any stored credentials and pairs again with the configured
    /// host.
    pub async fn request_pairing(&self) -> Result<ReconcileOutcome, ReconcileError> {
        let mut attempt = self.begin()?;
        let config = self.store.load_config()?;
        self.run(&mut attempt, config, Trigger::PairingRequested).await
    }

    /// Cancels pending waits, stops discovery, and closes the session.
    ///
    /// Waits for an in-flight attempt to observe the cancellation.  Every
    /// later call on this controller returns [`ReconcileError::ShutDown`].
    pub async fn shutdown(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();

        let _attempt = self.attempt.lock().await;
        self.discovery.stop().await;
        self.connection.disconnect().await;
        self.set_devices(Vec::new());
        self.status.report(ConnectionStatus::Disconnected, "shut down");
        info!("controller shut down");
    }

    /// Devices from the last successful enumeration.
    pub fn devices(&self) -> Vec<DeviceRecord> {
        self.devices.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Discovered bridges, for a selection UI.
    pub fn choices(&self) -> Vec<BridgeChoice> {
        self.discovery.registry().choices()
    }

    pub fn registry(&self) -> &Arc<DiscoveryRegistry> {
        self.discovery.registry()
    }

    pub fn pairing_state(&self) -> watch::Receiver<PairingState> {
        self.pairing.subscribe()
    }

    pub async fn is_connected(&self) -> bool {
        self.connection.is_connected().await
    }

    // ── Sequence ──────────────────────────────────────────────────────────────

    fn begin(&self) -> Result<tokio::sync::MutexGuard<'_, AttemptState>, ReconcileError> {
        if self.cancel.is_cancelled() {
            return Err(ReconcileError::ShutDown);
        }
        self.attempt.try_lock().map_err(|_| {
            warn!("reconciliation rejected: another attempt is in progress");
            ReconcileError::Busy
        })
    }

    async fn run(
        &self,
        attempt: &mut AttemptState,
        mut config: ModuleConfig,
        trigger: Trigger,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        self.status.report(ConnectionStatus::Initializing, "reconciling");

        if let Err(e) = self.discovery.restart().await {
            // Discovery only feeds identity resolution; a connection can
            // proceed without it.
            warn!("discovery unavailable: {e}");
        }

        self.pairing.set_timeouts(PairingTimeouts::from(&config.timeouts));
        self.connection.set_enumeration_timeout(config.timeouts.enumeration());

        let Some(host) = config.host().map(str::to_string) else {
            if trigger == Trigger::HostChanged {
                self.discard_credentials(attempt, &mut config).await?;
            } else {
                self.store.save_config(&config)?;
            }
            self.status.report(ConnectionStatus::BadConfiguration, "no host configured");
            return Ok(ReconcileOutcome::NoHost);
        };

        let bundle = match trigger {
            Trigger::HostChanged | Trigger::PairingRequested => {
                self.discard_credentials(attempt, &mut config).await?;
                Some(self.pair(&host, &mut config).await?)
            }
            Trigger::Startup => {
                self.store.save_config(&config)?;
                self.load_bundle()?
            }
        };

        let Some(bundle) = bundle else {
            self.status.report(ConnectionStatus::BadConfiguration, "not paired");
            return Ok(ReconcileOutcome::NotPaired);
        };

        self.connect(attempt, &host, &bundle, &mut config).await
    }

    /// Clears the stored bundle and identity and closes any session.
    async fn discard_credentials(
        &self,
        attempt: &mut AttemptState,
        config: &mut ModuleConfig,
    ) -> Result<(), ReconcileError> {
        self.connection.disconnect().await;
        self.set_devices(Vec::new());
        attempt.unresolved_attempts = 0;

        config.identity = None;
        self.store.save_credentials(None)?;
        self.store.save_config(config)?;
        info!("stored credentials and identity cleared");
        Ok(())
    }

    async fn pair(&self, host: &str, config: &mut ModuleConfig) -> Result<CredentialBundle, ReconcileError> {
        self.status
            .report(ConnectionStatus::Connecting, &format!("press the button on the bridge at {host}"));

        let bundle = match self.pairing.pair(host, &self.cancel).await {
            Ok(bundle) => bundle,
            Err(PairingError::Cancelled) => {
                self.status.report(ConnectionStatus::Disconnected, "pairing cancelled");
                return Err(ReconcileError::ShutDown);
            }
            Err(e) => {
                self.status.report(ConnectionStatus::ConnectionFailed, &e.to_string());
                return Err(e.into());
            }
        };

        let identity = resolve_identity(self.discovery.registry(), host);
        self.store.save_credentials(Some(&bundle))?;
        config.identity = Some(identity);
        self.store.save_config(config)?;
        Ok(bundle)
    }

    fn load_bundle(&self) -> Result<Option<CredentialBundle>, ReconcileError> {
        match self.store.load_credentials() {
            Ok(bundle) => Ok(bundle),
            Err(e @ StorageError::InvalidBundle(_)) => {
                self.status.report(ConnectionStatus::BadConfiguration, &e.to_string());
                Err(e.into())
            }
            Err(e) => {
                self.status.report(ConnectionStatus::ConnectionFailed, &e.to_string());
                Err(e.into())
            }
        }
    }

    async fn connect(
        &self,
        attempt: &mut AttemptState,
        host: &str,
        bundle: &CredentialBundle,
        config: &mut ModuleConfig,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        self.status
            .report(ConnectionStatus::Connecting, &format!("connecting to {host}:{}", config.port));

        let result = self
            .connection
            .connect(host, config.port, Some(bundle), config.identity.as_ref(), &self.cancel)
            .await;

        match result {
            Ok(outcome) => {
                attempt.unresolved_attempts = 0;
                if config.identity.as_ref() != Some(&outcome.identity) {
                    info!("persisting resolved bridge identity {}", outcome.identity);
                    config.identity = Some(outcome.identity.clone());
                    self.store.save_config(config)?;
                }
                let device_count = outcome.devices.len();
                self.set_devices(outcome.devices);
                self.status
                    .report(ConnectionStatus::Connected, &format!("{device_count} devices"));
                Ok(ReconcileOutcome::Connected {
                    identity: outcome.identity,
                    device_count,
                })
            }
            Err(e @ (ConnectionError::NotConfigured(_) | ConnectionError::IdentityUnresolvable)) => {
                self.set_devices(Vec::new());
                attempt.unresolved_attempts += 1;
                let limit = config.max_resolution_attempts.max(1);
                if attempt.unresolved_attempts >= limit {
                    warn!("{e} ({limit} consecutive attempts); discarding credentials");
                    self.discard_credentials(attempt, config).await?;
                    self.status
                        .report(ConnectionStatus::BadConfiguration, "needs re-pairing");
                    return Ok(ReconcileOutcome::NeedsRepairing);
                }
                self.status.report(ConnectionStatus::BadConfiguration, &e.to_string());
                Err(e.into())
            }
            Err(ConnectionError::Cancelled) => {
                self.status.report(ConnectionStatus::Disconnected, "connection cancelled");
                Err(ReconcileError::ShutDown)
            }
            Err(e) => {
                attempt.unresolved_attempts = 0;
                self.set_devices(Vec::new());
                self.status.report(ConnectionStatus::ConnectionFailed, &e.to_string());
                Err(e.into())
            }
        }
    }

    fn set_devices(&self, devices: Vec<DeviceRecord>) {
        *self.devices.write().unwrap_or_else(PoisonError::into_inner) = devices;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::network::discovery::ChannelDiscoveryFeed;
    use crate::infrastructure::network::mock::{
        MockPairingConnector, MockSessionConnector, StubCredentialGenerator, MOCK_CLIENT_CERTIFICATE,
        MOCK_PRIVATE_KEY, MOCK_ROOT_CERTIFICATE,
    };
    use crate::infrastructure::status::MockStatusSink;
    use crate::infrastructure::storage::config::MemoryStateStore;

    fn bundle() -> CredentialBundle {
        CredentialBundle::new(MOCK_ROOT_CERTIFICATE, MOCK_CLIENT_CERTIFICATE, MOCK_PRIVATE_KEY)
            .unwrap()
    }

    fn controller(store: Arc<MemoryStateStore>, status: MockStatusSink) -> ReconciliationController {
        ReconciliationController::new(Collaborators {
            store,
            discovery_feed: Arc::new(ChannelDiscoveryFeed::new()),
            pairing: Arc::new(MockPairingConnector::new()),
            sessions: Arc::new(MockSessionConnector::new()),
            generator: Arc::new(StubCredentialGenerator::new()),
            status: Arc::new(status),
        })
    }

    fn expect_final_status(sink: &mut MockStatusSink, expected: ConnectionStatus, detail: &'static str) {
        sink.expect_report()
            .withf(move |status, d| *status == expected && d == detail)
            .times(1)
            .return_const(());
        sink.expect_report()
            .withf(move |status, _| *status != expected)
            .return_const(());
    }

    #[tokio::test]
    async fn test_no_host_reports_bad_configuration() {
        // Arrange
        let mut sink = MockStatusSink::new();
        expect_final_status(&mut sink, ConnectionStatus::BadConfiguration, "no host configured");
        let ctl = controller(Arc::new(MemoryStateStore::new()), sink);

        // Act
        let outcome = ctl.start().await.expect("start");

        // Assert
        assert_eq!(outcome, ReconcileOutcome::NoHost);
    }

    #[tokio::test]
    async fn test_host_without_bundle_reports_not_paired() {
        let mut sink = MockStatusSink::new();
        expect_final_status(&mut sink, ConnectionStatus::BadConfiguration, "not paired");
        let store = Arc::new(MemoryStateStore::with_state(
            ModuleConfig::default().with_host("10.0.0.2"),
            None,
        ));
        let ctl = controller(store, sink);

        let outcome = ctl.start().await.expect("start");

        assert_eq!(outcome, ReconcileOutcome::NotPaired);
    }

    #[tokio::test]
    async fn test_bundle_without_identity_counts_toward_repairing() {
        // Arrange: bundle stored but identity lost
        let mut sink = MockStatusSink::new();
        sink.expect_report().return_const(());
        let mut config = ModuleConfig::default().with_host("10.0.0.2");
        config.max_resolution_attempts = 2;
        let store = Arc::new(MemoryStateStore::with_state(config, Some(bundle())));
        let ctl = controller(Arc::clone(&store), sink);

        // Act
        let first = ctl.start().await;
        let second = ctl.start().await;

        // Assert
        assert!(matches!(
            first,
            Err(ReconcileError::Connection(ConnectionError::NotConfigured(_)))
        ));
        assert_eq!(second.unwrap(), ReconcileOutcome::NeedsRepairing);
        assert_eq!(store.load_credentials().unwrap(), None);
    }

    #[tokio::test]
    async fn test_calls_after_shutdown_are_rejected() {
        let mut sink = MockStatusSink::new();
        expect_final_status(&mut sink, ConnectionStatus::Disconnected, "shut down");
        let ctl = controller(Arc::new(MemoryStateStore::new()), sink);

        ctl.shutdown().await;
        ctl.shutdown().await;

        assert!(matches!(ctl.start().await, Err(ReconcileError::ShutDown)));
    }
}

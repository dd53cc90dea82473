//! ConnectBridgeUseCase: open an authenticated session and enumerate devices.
//!
//! The connection manager owns at most one live session.  A successful
//! `connect` keeps the session until [`ConnectionManager::disconnect`] or the
//! next `connect`, which replaces it.
//!
//! # Enumeration filtering
//!
//! ```text
//! list_devices()
//!   ├─ Err(item)            → logged, skipped
//!   ├─ control unit         → serial adopted if identity pending; never listed
//!   ├─ device without area  → skipped
//!   └─ everything else      → returned
//! ```
//!
//! Connectivity is only reported once enumeration has completed; a session
//! that handshakes but cannot enumerate is closed and reported as failed.

use std::sync::{Arc, PoisonError};
use std::time::Duration;

use bridge_core::{BridgeIdentity, CredentialBundle, DeviceRecord, ItemError};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::infrastructure::network::{BridgeSession, SessionConnector};

/// Error type for a connection attempt.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// Credentials or identity are missing; no network I/O was attempted.
    #[error("not configured: {0}")]
    NotConfigured(&'static str),

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("device enumeration did not complete within {}s", .0.as_secs())]
    EnumerationTimeout(Duration),

    /// The identity is pending and the bridge did not report a control unit.
    #[error("bridge identity could not be resolved from its device list")]
    IdentityUnresolvable,

    #[error("connection cancelled")]
    Cancelled,
}

/// Result of a successful connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionOutcome {
    /// The input identity, or the control unit's serial if it was pending.
    pub identity: BridgeIdentity,
    /// Controllable devices: control unit and area-less devices excluded.
    pub devices: Vec<DeviceRecord>,
}

/// Owns the live session with the bridge.
pub struct ConnectionManager {
    connector: Arc<dyn SessionConnector>,
    enumeration_timeout: std::sync::Mutex<Duration>,
    session: Mutex<Option<Box<dyn BridgeSession>>>,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn SessionConnector>, enumeration_timeout: Duration) -> Self {
        Self {
            connector,
            enumeration_timeout: std::sync::Mutex::new(enumeration_timeout),
            session: Mutex::new(None),
        }
    }

    pub fn set_enumeration_timeout(&self, timeout: Duration) {
        *self
            .enumeration_timeout
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = timeout;
    }

    fn enumeration_timeout(&self) -> Duration {
        *self
            .enumeration_timeout
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Connects to `address:port` and returns the resolved identity with the
    /// filtered device list.
    ///
    /// Any previous session is closed first.
    ///
    /// # Errors
    ///
    /// - [`ConnectionError::NotConfigured`] when `bundle` or `identity` is
    ///   absent.
    /// - [`ConnectionError::ConnectionFailed`] when the handshake or the
    ///   enumeration request fails.
    /// - [`ConnectionError::EnumerationTimeout`] when enumeration exceeds the
    ///   configured bound.
    /// - [`ConnectionError::IdentityUnresolvable`] when the identity is pending
    ///   and no control unit was enumerated.
    pub async fn connect(
        &self,
        address: &str,
        port: u16,
        bundle: Option<&CredentialBundle>,
        identity: Option<&BridgeIdentity>,
        cancel: &CancellationToken,
    ) -> Result<ConnectionOutcome, ConnectionError> {
        let Some(bundle) = bundle else {
            return Err(ConnectionError::NotConfigured("no credentials"));
        };
        let Some(identity) = identity else {
            return Err(ConnectionError::NotConfigured("no bridge identity"));
        };

        let mut slot = self.session.lock().await;
        if let Some(mut previous) = slot.take() {
            debug!("closing previous session before reconnecting");
            previous.close().await;
        }

        info!("opening session with {address}:{port}");
        let mut session = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ConnectionError::Cancelled),
            opened = self.connector.connect(address, port, bundle) => {
                opened.map_err(|e| ConnectionError::ConnectionFailed(e.to_string()))?
            }
        };

        let limit = self.enumeration_timeout();
        let listed = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ConnectionError::Cancelled),
            listed = tokio::time::timeout(limit, session.list_devices()) => match listed {
                Ok(Ok(items)) => Ok(items),
                Ok(Err(e)) => Err(ConnectionError::ConnectionFailed(format!("device enumeration failed: {e}"))),
                Err(_) => Err(ConnectionError::EnumerationTimeout(limit)),
            },
        };
        let items = match listed {
            Ok(items) => items,
            Err(e) => {
                session.close().await;
                return Err(e);
            }
        };

        let outcome = filter_devices(identity, items);
        if outcome.identity.is_pending() {
            warn!("no control unit reported by {address}; identity remains unresolved");
            session.close().await;
            return Err(ConnectionError::IdentityUnresolvable);
        }

        info!(
            "connected to bridge {} at {address}:{port} with {} devices",
            outcome.identity,
            outcome.devices.len()
        );
        *slot = Some(session);
        Ok(outcome)
    }

    /// Closes the live session, if any.
    pub async fn disconnect(&self) {
        if let Some(mut session) = self.session.lock().await.take() {
            session.close().await;
            info!("session closed");
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.session.lock().await.is_some()
    }
}

/// Applies the enumeration filtering rules to one device listing.
fn filter_devices(
    identity: &BridgeIdentity,
    items: Vec<Result<DeviceRecord, ItemError>>,
) -> ConnectionOutcome {
    let mut resolved = identity.clone();
    let mut devices = Vec::with_capacity(items.len());

    for item in items {
        let device = match item {
            Ok(device) => device,
            Err(e) => {
                warn!("skipping device: {e}");
                continue;
            }
        };

        if device.is_control_unit() {
            let serial = device.serial_number.trim();
            if resolved.is_pending() && !serial.is_empty() {
                info!("adopting control unit serial {serial} as bridge identity");
                resolved = BridgeIdentity::known(serial);
            }
            continue;
        }

        if !device.has_area() {
            debug!("skipping {} ({}): no area assigned", device.name, device.serial_number);
            continue;
        }
        devices.push(device);
    }

    ConnectionOutcome {
        identity: resolved,
        devices,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

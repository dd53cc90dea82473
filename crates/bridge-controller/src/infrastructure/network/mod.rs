//! Network infrastructure for the controller.
//!
//! # Sub-modules
//!
//! - **`discovery`** – Owns the address → bridge-id registry and the background
//!   task that drains a [`discovery::DiscoveryFeed`] into it.
//!
//! - **`mock`** – Scripted in-memory transports for tests and for hosts that
//!   want to exercise the orchestrator without a bridge.
//!
//! # Transport seams
//!
//! The wire protocol of the bridge is not implemented here.  The orchestrator
//! talks to two collaborators through the traits in this module:
//!
//! ```text
//! PairingConnector ──connect(address, 8083)──► PairingLink   (send / next_message / close)
//! SessionConnector ──connect(address, port, bundle)──► BridgeSession (list_devices / close)
//! ```
//!
//! The host supplies real implementations (TLS + the bridge's message
//! encoding); tests supply the scripted ones from [`mock`].

pub mod discovery;
pub mod mock;

use async_trait::async_trait;
use bridge_core::{CredentialBundle, DeviceRecord, ItemError, PairingMessage, PairingRequest};
use thiserror::Error;

/// Fixed port of the bridge's pairing endpoint.
pub const PAIRING_PORT: u16 = 8083;

/// Default port of the bridge's authenticated session endpoint.
pub const DEFAULT_SESSION_PORT: u16 = 8081;

/// Error type shared by the pairing and session transports.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The connection (or TLS handshake) could not be established.
    #[error("failed to connect to {address}:{port}: {detail}")]
    ConnectFailed {
        address: String,
        port: u16,
        detail: String,
    },
    /// The remote side closed the connection.
    #[error("connection closed by bridge")]
    Closed,
    /// Any other I/O or framing failure on an established connection.
    #[error("transport I/O error: {0}")]
    Io(String),
}

/// Opens connections to a bridge's pairing endpoint.
#[async_trait]
pub trait PairingConnector: Send + Sync {
    async fn connect(&self, address: &str, port: u16) -> Result<Box<dyn PairingLink>, TransportError>;
}

/// An open pairing connection.
#[async_trait]
pub trait PairingLink: Send {
    /// Sends a request to the bridge.
    async fn send(&mut self, request: PairingRequest) -> Result<(), TransportError>;

    /// Waits for the next inbound message.
    ///
    /// Implementations must be cancel-safe: the caller races this future
    /// against a deadline and drops it on timeout.
    async fn next_message(&mut self) -> Result<PairingMessage, TransportError>;

    /// Closes the connection.  Idempotent.
    async fn close(&mut self);
}

/// Opens authenticated sessions using a credential bundle.
#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn connect(
        &self,
        address: &str,
        port: u16,
        bundle: &CredentialBundle,
    ) -> Result<Box<dyn BridgeSession>, TransportError>;
}

/// A live authenticated session with a bridge.
#[async_trait]
pub trait BridgeSession: Send + Sync {
    /// Enumerates every device the bridge knows about.
    ///
    /// A failure for one entry is reported in place as an [`ItemError`]; only
    /// a failure of the whole request is an `Err`.
    async fn list_devices(&mut self) -> Result<Vec<Result<DeviceRecord, ItemError>>, TransportError>;

    /// Closes the session.  Idempotent.
    async fn close(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_failed_message_includes_endpoint() {
        let err = TransportError::ConnectFailed {
            address: "192.168.1.20".to_string(),
            port: PAIRING_PORT,
            detail: "connection refused".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "failed to connect to 192.168.1.20:8083: connection refused"
        );
    }
}

//! PairBridgeUseCase: the interactive pairing handshake.
//!
//! # Pairing lifecycle (for beginners)
//!
//! ```text
//! Idle ──► Connecting ──► AwaitingPhysicalConfirmation ──► GeneratingKeys
//!                                                               │
//!                  Paired ◄── AwaitingSignedCertificate ◄───────┘
//!
//! any state ──► Failed(reason)
//! ```
//!
//! - `Connecting`: open the pairing endpoint on port 8083.
//! - `AwaitingPhysicalConfirmation`: the bridge repeats permission reports;
//!   we wait (at most 30 s by default) for one that grants physical access,
//!   which happens when the user presses the button on the bridge.
//! - `GeneratingKeys`: create a fresh RSA keypair and CSR.  Keys are only
//!   generated once the user has confirmed, never speculatively.
//! - `AwaitingSignedCertificate`: send the CSR under a fresh request tag and
//!   wait (at most 5 s) for the response carrying the same tag.
//! - `Paired`: the three PEM parts form a [`CredentialBundle`].
//!
//! There is no automatic retry: a failed attempt leaves the state machine in
//! `Failed` and the caller decides whether to ask the user again.
//!
//! # One attempt at a time
//!
//! An in-flight guard rejects a second `pair()` call with
//! [`PairingError::Busy`] while the first is running, so two attempts can
//! never interleave their keys and certificates.

use std::sync::{Arc, PoisonError};
use std::time::Duration;

use bridge_core::crypto::csr::CLIENT_COMMON_NAME;
use bridge_core::protocol::{ClientRole, CsrRequest, ResponseStatus, SigningResponse};
use bridge_core::{
    CorrelationError, CorrelationTable, CredentialBundle, CredentialGenerator, PairingMessage,
    PairingRequest, SigningRequest,
};
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::infrastructure::network::{PairingConnector, PairingLink, TransportError, PAIRING_PORT};
use crate::infrastructure::storage::config::TimeoutConfig;

/// Observable state of the pairing state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingState {
    Idle,
    Connecting,
    AwaitingPhysicalConfirmation,
    GeneratingKeys,
    AwaitingSignedCertificate,
    Paired,
    Failed(String),
}

/// Error type for a pairing attempt.
#[derive(Debug, Error, PartialEq)]
pub enum PairingError {
    #[error("key generation failed: {0}")]
    KeyGenerationFailed(String),

    #[error("pairing transport error: {0}")]
    PairingTransportError(#[from] TransportError),

    /// The bridge button was not pressed in time.
    #[error("physical confirmation not received within {}s", .0.as_secs())]
    PairingTimeout(Duration),

    #[error("no response to the signing request within {}s", .0.as_secs())]
    CsrTimeout(Duration),

    /// The bridge refused the CSR.  `raw` is the response as received.
    #[error("signing request rejected with status {status}: {raw}")]
    CsrRejected { status: ResponseStatus, raw: String },

    /// The bridge accepted the CSR but returned unusable certificates.
    #[error("bridge returned unusable certificates: {0}")]
    InvalidCertificates(String),

    #[error(transparent)]
    Correlation(#[from] CorrelationError),

    /// Another pairing attempt is already running.
    #[error("a pairing attempt is already in progress")]
    Busy,

    #[error("pairing cancelled")]
    Cancelled,
}

/// Bounds on the two interactive waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairingTimeouts {
    pub confirmation: Duration,
    pub csr: Duration,
}

impl Default for PairingTimeouts {
    fn default() -> Self {
        Self::from(&TimeoutConfig::default())
    }
}

impl From<&TimeoutConfig> for PairingTimeouts {
    fn from(config: &TimeoutConfig) -> Self {
        Self {
            confirmation: config.confirmation(),
            csr: config.csr(),
        }
    }
}

/// Drives one pairing attempt at a time against a bridge.
pub struct PairingStateMachine {
    connector: Arc<dyn PairingConnector>,
    generator: Arc<dyn CredentialGenerator>,
    timeouts: std::sync::Mutex<PairingTimeouts>,
    state: watch::Sender<PairingState>,
    in_flight: Mutex<()>,
}

impl PairingStateMachine {
    pub fn new(
        connector: Arc<dyn PairingConnector>,
        generator: Arc<dyn CredentialGenerator>,
        timeouts: PairingTimeouts,
    ) -> Self {
        let (state, _) = watch::channel(PairingState::Idle);
        Self {
            connector,
            generator,
            timeouts: std::sync::Mutex::new(timeouts),
            state,
            in_flight: Mutex::new(()),
        }
    }

    /// Replaces the timeouts used by subsequent attempts.
    pub fn set_timeouts(&self, timeouts: PairingTimeouts) {
        *self.timeouts.lock().unwrap_or_else(PoisonError::into_inner) = timeouts;
    }

    pub fn timeouts(&self) -> PairingTimeouts {
        *self.timeouts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> PairingState {
        self.state.borrow().clone()
    }

    /// Subscribes to state transitions.
    pub fn subscribe(&self) -> watch::Receiver<PairingState> {
        self.state.subscribe()
    }

    /// Runs the full handshake against the bridge at `address`.
    ///
    /// On success the returned bundle is complete; on any error nothing is
    /// returned and nothing should be persisted.  The pairing connection is
    /// closed before this function returns, whatever the outcome.
    ///
    /// # Errors
    ///
    /// - [`PairingError::Busy`] if another attempt is running.  The running
    ///   attempt is unaffected.
    /// - [`PairingError::Cancelled`] if `cancel` fires.
    /// - Any failure of the handshake itself; see [`PairingError`].
    pub async fn pair(
        &self,
        address: &str,
        cancel: &CancellationToken,
    ) -> Result<CredentialBundle, PairingError> {
        let Ok(_guard) = self.in_flight.try_lock() else {
            warn!("pairing with {address} rejected: another attempt is in progress");
            return Err(PairingError::Busy);
        };

        let timeouts = self.timeouts();
        self.transition(PairingState::Connecting);
        let connected = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PairingError::Cancelled),
            link = self.connector.connect(address, PAIRING_PORT) => link.map_err(PairingError::from),
        };

        let result = match connected {
            Ok(mut link) => {
                let result = self.handshake(link.as_mut(), timeouts, cancel).await;
                link.close().await;
                result
            }
            Err(e) => Err(e),
        };

        match &result {
            Ok(_) => {
                info!("paired with bridge at {address}");
                self.transition(PairingState::Paired);
            }
            Err(e) => {
                warn!("pairing with {address} failed: {e}");
                self.transition(PairingState::Failed(e.to_string()));
            }
        }
        result
    }

    async fn handshake(
        &self,
        link: &mut dyn PairingLink,
        timeouts: PairingTimeouts,
        cancel: &CancellationToken,
    ) -> Result<CredentialBundle, PairingError> {
        self.transition(PairingState::AwaitingPhysicalConfirmation);
        self.await_confirmation(link, timeouts.confirmation, cancel).await?;

        self.transition(PairingState::GeneratingKeys);
        let request = self.generate_credentials(cancel).await?;

        self.transition(PairingState::AwaitingSignedCertificate);
        let response = self.exchange_csr(link, &request, timeouts.csr, cancel).await?;

        if !response.status.is_success() {
            return Err(PairingError::CsrRejected {
                status: response.status,
                raw: response.raw.to_string(),
            });
        }
        let Some(signed) = response.result else {
            return Err(PairingError::CsrRejected {
                status: response.status,
                raw: response.raw.to_string(),
            });
        };

        CredentialBundle::new(
            signed.root_certificate,
            signed.certificate,
            request.private_key_pem.as_str(),
        )
        .map_err(|e| PairingError::InvalidCertificates(e.to_string()))
    }

    /// Waits for a permission report that includes physical access.
    async fn await_confirmation(
        &self,
        link: &mut dyn PairingLink,
        limit: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), PairingError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PairingError::Cancelled),
            outcome = tokio::time::timeout(limit, next_confirmation(link)) => match outcome {
                Ok(result) => result,
                Err(_) => Err(PairingError::PairingTimeout(limit)),
            },
        }
    }

    /// Runs key generation off the async worker threads.
    async fn generate_credentials(
        &self,
        cancel: &CancellationToken,
    ) -> Result<SigningRequest, PairingError> {
        let generator = Arc::clone(&self.generator);
        let task = tokio::task::spawn_blocking(move || generator.generate());

        let joined = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PairingError::Cancelled),
            joined = task => joined,
        };
        match joined {
            Ok(generated) => generated.map_err(|e| PairingError::KeyGenerationFailed(e.to_string())),
            Err(e) => Err(PairingError::KeyGenerationFailed(format!("generator task failed: {e}"))),
        }
    }

    /// Sends the CSR and waits for the response correlated with it.
    async fn exchange_csr(
        &self,
        link: &mut dyn PairingLink,
        request: &SigningRequest,
        limit: Duration,
        cancel: &CancellationToken,
    ) -> Result<SigningResponse, PairingError> {
        let mut table = CorrelationTable::new();
        let pending = table.register(limit)?;
        let limit = pending.timeout();

        link.send(PairingRequest::SignCertificate(CsrRequest {
            tag: pending.tag().clone(),
            csr_pem: request.csr_pem.clone(),
            display_name: CLIENT_COMMON_NAME.to_string(),
            role: ClientRole::Admin,
        }))
        .await?;
        debug!("sent signing request {}", pending.tag());

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PairingError::Cancelled),
            outcome = tokio::time::timeout(limit, next_correlated_response(link, &mut table)) => match outcome {
                Ok(result) => result,
                Err(_) => Err(PairingError::CsrTimeout(limit)),
            },
        };
        if outcome.is_err() {
            table.cancel();
        }
        outcome
    }

    fn transition(&self, next: PairingState) {
        info!("pairing state: {next:?}");
        self.state.send_replace(next);
    }
}

/// Reads messages until one grants physical access.
async fn next_confirmation(link: &mut dyn PairingLink) -> Result<(), PairingError> {
    loop {
        let message = link.next_message().await?;
        if message.confirms_physical_access() {
            return Ok(());
        }
        debug!("ignoring {} while awaiting physical confirmation", message.kind());
    }
}

/// Reads messages until a signing response resolves the pending entry.
async fn next_correlated_response(
    link: &mut dyn PairingLink,
    table: &mut CorrelationTable,
) -> Result<SigningResponse, PairingError> {
    loop {
        match link.next_message().await? {
            PairingMessage::SigningResponse(response) => {
                if table.resolve(&response.tag).is_some() {
                    return Ok(response);
                }
                debug!("ignoring response to unrelated request {}", response.tag);
            }
            other => debug!("ignoring {} while awaiting signed certificate", other.kind()),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

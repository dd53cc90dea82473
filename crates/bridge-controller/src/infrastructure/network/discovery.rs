//! Bridge discovery: the address → bridge-id registry and its feed pump.
//!
//! Bridges announce themselves on the local network.  How those
//! announcements are received (mDNS, UDP broadcast, a host-side browser) is
//! the job of a [`DiscoveryFeed`]; this module only consumes the resulting
//! [`BridgeAddressRecord`]s.
//!
//! 1. [`DiscoveryService::restart`] starts the feed and spawns a pump task.
//! 2. The pump upserts every record into the shared [`DiscoveryRegistry`] and
//!    logs it.
//! 3. The registry is read by pairing (to resolve the bridge id of the paired
//!    address) and by selection UIs (via [`DiscoveryRegistry::choices`]).
//!
//! Discovery is continuous rather than one-shot: a bridge's DHCP lease may
//! change while the module is running.
//!
//! # Concurrency
//!
//! The registry is the only state written concurrently with the
//! orchestration flow.  Every write is a single-key upsert, and `DashMap`
//! makes each upsert atomic without a registry-wide lock.

use std::sync::Arc;

use async_trait::async_trait;
use bridge_core::{BridgeAddressRecord, BridgeId};
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Capacity of the channel between a feed and the pump task.
const FEED_CHANNEL_CAPACITY: usize = 64;

/// Error type for discovery service operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DiscoveryError {
    /// The underlying feed could not be started.
    #[error("discovery feed failed to start: {0}")]
    StartFailed(String),
}

/// A source of discovery announcements.
#[async_trait]
pub trait DiscoveryFeed: Send + Sync {
    /// Starts listening and returns the stream of announcements.
    ///
    /// The stream ends when [`DiscoveryFeed::stop`] is called.
    async fn start(&self) -> Result<mpsc::Receiver<BridgeAddressRecord>, DiscoveryError>;

    /// Stops listening.  Idempotent.
    async fn stop(&self);
}

// ── Registry ──────────────────────────────────────────────────────────────────

/// A discovered bridge formatted for a selection dropdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeChoice {
    /// The value stored when the user picks this entry (the address).
    pub id: String,
    pub label: String,
}

/// Process-wide mapping from network address to the bridge id announced there.
#[derive(Debug, Default)]
pub struct DiscoveryRegistry {
    records: DashMap<String, BridgeId>,
}

impl DiscoveryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `record` under its trimmed address, replacing any previous id
    /// for that address.
    ///
    /// Returns the id previously recorded for the address, if any.
    pub fn upsert(&self, record: BridgeAddressRecord) -> Option<BridgeId> {
        self.records
            .insert(record.address.trim().to_string(), record.bridge_id)
    }

    /// Returns the id most recently announced at `address`.
    pub fn lookup(&self, address: &str) -> Option<BridgeId> {
        self.records.get(address.trim()).map(|entry| entry.value().clone())
    }

    /// Returns a point-in-time copy of all records, sorted by address.
    pub fn snapshot(&self) -> Vec<BridgeAddressRecord> {
        let mut records: Vec<BridgeAddressRecord> = self
            .records
            .iter()
            .map(|entry| BridgeAddressRecord {
                address: entry.key().clone(),
                bridge_id: entry.value().clone(),
            })
            .collect();
        records.sort_by(|a, b| a.address.cmp(&b.address));
        records
    }

    /// Returns the records as dropdown choices, sorted by address.
    pub fn choices(&self) -> Vec<BridgeChoice> {
        self.snapshot()
            .into_iter()
            .map(|record| BridgeChoice {
                label: format!("{} ({})", record.address, record.bridge_id),
                id: record.address,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

// ── In-process feed ───────────────────────────────────────────────────────────

/// A [`DiscoveryFeed`] the host pushes announcements into.
///
/// Useful when the host already runs its own network browser and simply
/// forwards what it sees.
#[derive(Debug, Default)]
pub struct ChannelDiscoveryFeed {
    sender: Mutex<Option<mpsc::Sender<BridgeAddressRecord>>>,
}

impl ChannelDiscoveryFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forwards an announcement to the running pump.
    ///
    /// Returns `false` when the feed is not started or the pump has gone away.
    pub async fn announce(&self, record: BridgeAddressRecord) -> bool {
        let guard = self.sender.lock().await;
        match guard.as_ref() {
            Some(tx) => tx.send(record).await.is_ok(),
            None => {
                debug!("announcement for {} dropped: feed not started", record.address);
                false
            }
        }
    }
}

#[async_trait]
impl DiscoveryFeed for ChannelDiscoveryFeed {
    async fn start(&self) -> Result<mpsc::Receiver<BridgeAddressRecord>, DiscoveryError> {
        let (tx, rx) = mpsc::channel(FEED_CHANNEL_CAPACITY);
        *self.sender.lock().await = Some(tx);
        Ok(rx)
    }

    async fn stop(&self) {
        // Dropping the sender ends the pump's stream.
        self.sender.lock().await.take();
    }
}

// ── Service ───────────────────────────────────────────────────────────────────

struct Pump {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Runs a [`DiscoveryFeed`] in the background and keeps the registry current.
pub struct DiscoveryService {
    registry: Arc<DiscoveryRegistry>,
    feed: Arc<dyn DiscoveryFeed>,
    pump: Mutex<Option<Pump>>,
}

impl DiscoveryService {
    pub fn new(registry: Arc<DiscoveryRegistry>, feed: Arc<dyn DiscoveryFeed>) -> Self {
        Self {
            registry,
            feed,
            pump: Mutex::new(None),
        }
    }

    pub fn registry(&self) -> &Arc<DiscoveryRegistry> {
        &self.registry
    }

    /// (Re)starts discovery: stops any running pump, starts the feed again,
    /// and spawns a fresh pump task.  Registry contents are kept.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::StartFailed`] if the feed cannot start; the
    /// service is left stopped in that case.
    pub async fn restart(&self) -> Result<(), DiscoveryError> {
        let mut pump = self.pump.lock().await;
        if let Some(old) = pump.take() {
            self.shutdown_pump(old).await;
        }

        let rx = self.feed.start().await?;
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(pump_events(rx, Arc::clone(&self.registry), cancel.clone()));
        *pump = Some(Pump { cancel, handle });

        info!("discovery started ({} bridge(s) already known)", self.registry.len());
        Ok(())
    }

    /// Stops the feed and waits for the pump task to finish.
    pub async fn stop(&self) {
        let mut pump = self.pump.lock().await;
        if let Some(old) = pump.take() {
            self.shutdown_pump(old).await;
            info!("discovery stopped");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.pump
            .lock()
            .await
            .as_ref()
            .is_some_and(|p| !p.handle.is_finished())
    }

    async fn shutdown_pump(&self, pump: Pump) {
        pump.cancel.cancel();
        self.feed.stop().await;
        if let Err(e) = pump.handle.await {
            warn!("discovery pump ended abnormally: {e}");
        }
    }
}

/// Drains announcements into the registry until cancelled or the feed ends.
async fn pump_events(
    mut rx: mpsc::Receiver<BridgeAddressRecord>,
    registry: Arc<DiscoveryRegistry>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            event = rx.recv() => match event {
                Some(record) => {
                    info!("discovered bridge {} at {}", record.bridge_id, record.address);
                    if let Some(previous) = registry.upsert(record.clone()) {
                        if previous != record.bridge_id {
                            debug!(
                                "address {} changed from bridge {previous} to {}",
                                record.address, record.bridge_id
                            );
                        }
                    }
                }
                None => {
                    debug!("discovery feed closed");
                    break;
                }
            },
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

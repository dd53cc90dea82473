//! Reporting connection status to the host.
//!
//! The controller never renders anything itself.  It reports a coarse
//! [`ConnectionStatus`] plus a human-readable detail through a
//! [`StatusSink`]; the host decides how to show it.
//!
//! [`WatchStatusSink`] is the stock sink: it logs every report and keeps the
//! latest one on a `tokio::sync::watch` channel, so any number of UI tasks can
//! observe it without polling the controller.

use std::fmt;

use tokio::sync::watch;
use tracing::{info, warn};

/// Coarse connection state shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    Initializing,
    Connecting,
    Connected,
    /// The user must act: enter a host, pair, or re-pair.
    BadConfiguration,
    /// A transient failure; a later reconcile may succeed.
    ConnectionFailed,
    Disconnected,
}

impl ConnectionStatus {
    pub fn is_error(self) -> bool {
        matches!(self, Self::BadConfiguration | Self::ConnectionFailed)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Initializing => "initializing",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::BadConfiguration => "bad configuration",
            Self::ConnectionFailed => "connection failed",
            Self::Disconnected => "disconnected",
        };
        f.write_str(s)
    }
}

/// One status report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub status: ConnectionStatus,
    pub detail: String,
}

/// Receives status reports from the controller.
#[cfg_attr(test, mockall::automock)]
pub trait StatusSink: Send + Sync {
    fn report(&self, status: ConnectionStatus, detail: &str);
}

/// [`StatusSink`] that publishes the latest report on a watch channel.
#[derive(Debug)]
pub struct WatchStatusSink {
    sender: watch::Sender<StatusUpdate>,
}

impl WatchStatusSink {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(StatusUpdate {
            status: ConnectionStatus::Initializing,
            detail: String::new(),
        });
        Self { sender }
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusUpdate> {
        self.sender.subscribe()
    }

    pub fn latest(&self) -> StatusUpdate {
        self.sender.borrow().clone()
    }
}

impl Default for WatchStatusSink {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusSink for WatchStatusSink {
    fn report(&self, status: ConnectionStatus, detail: &str) {
        if status.is_error() {
            warn!("status: {status} ({detail})");
        } else {
            info!("status: {status} ({detail})");
        }
        // send_replace succeeds even when nobody is subscribed.
        self.sender.send_replace(StatusUpdate {
            status,
            detail: detail.to_string(),
        });
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watch_sink_starts_initializing() {
        let sink = WatchStatusSink::new();
        assert_eq!(sink.latest().status, ConnectionStatus::Initializing);
    }

    #[test]
    fn test_watch_sink_publishes_latest_report() {
        // Arrange
        let sink = WatchStatusSink::new();
        let rx = sink.subscribe();

        // Act
        sink.report(ConnectionStatus::Connecting, "pairing with 10.0.0.2");
        sink.report(ConnectionStatus::Connected, "12 devices");

        // Assert
        let latest = rx.borrow().clone();
        assert_eq!(
            latest,
            StatusUpdate {
                status: ConnectionStatus::Connected,
                detail: "12 devices".to_string(),
            }
        );
    }

    #[test]
    fn test_report_without_subscribers_still_updates() {
        let sink = WatchStatusSink::new();
        sink.report(ConnectionStatus::BadConfiguration, "not paired");
        assert_eq!(sink.latest().status, ConnectionStatus::BadConfiguration);
    }

    #[test]
    fn test_error_statuses() {
        assert!(ConnectionStatus::BadConfiguration.is_error());
        assert!(ConnectionStatus::ConnectionFailed.is_error());
        assert!(!ConnectionStatus::Disconnected.is_error());
    }

    #[test]
    fn test_mock_sink_records_expected_call() {
        let mut sink = MockStatusSink::new();
        sink.expect_report()
            .withf(|status, detail| *status == ConnectionStatus::Connected && detail == "ok")
            .times(1)
            .return_const(());

        sink.report(ConnectionStatus::Connected, "ok");
    }
}

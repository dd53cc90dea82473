//! Bridge identity.
//!
//! The configured identity of the paired bridge has three possible states:
//!
//! ```text
//! (absent) ──pair, address discovered──────────────► Known(serial)
//!    │                                                    ▲
//!    └──pair, address not discovered──► PendingResolution ┘
//!                                        (resolved from the bridge's own
//!                                         control unit on first connect)
//! ```
//!
//! "Absent" is modelled as `Option::<BridgeIdentity>::None` by the owners of
//! the configuration record, so this enum only carries the two present states.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A concrete bridge identifier (the serial-like string a bridge reports).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BridgeId(String);

impl BridgeId {
    /// Wraps a raw identifier.  Surrounding whitespace is trimmed.
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        Self(raw.trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BridgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BridgeId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for BridgeId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// The identity of the paired bridge, once one has been assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BridgeIdentity {
    /// Pairing succeeded but the address was never seen by discovery; the
    /// identifier is adopted from the bridge's self-report on first connect.
    PendingResolution,
    /// The identifier is known.
    Known { serial: BridgeId },
}

impl BridgeIdentity {
    pub fn known(serial: impl Into<String>) -> Self {
        Self::Known {
            serial: BridgeId::new(serial),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::PendingResolution)
    }

    /// Returns the concrete identifier, if resolved.
    pub fn serial(&self) -> Option<&BridgeId> {
        match self {
            Self::PendingResolution => None,
            Self::Known { serial } => Some(serial),
        }
    }
}

impl fmt::Display for BridgeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PendingResolution => f.write_str("pending resolution"),
            Self::Known { serial } => write!(f, "{serial}"),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

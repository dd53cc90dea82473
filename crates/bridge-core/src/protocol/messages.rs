//! Messages exchanged on the pairing connection.
//!
//! # Message flow
//!
//! ```text
//! Controller                                   Bridge
//! ──────────                                   ──────
//! connect(address, 8083)  ───────────────────►
//!                         ◄─────────────────── PermissionReport [Public]
//!             (user presses the bridge button)
//!                         ◄─────────────────── PermissionReport [Public, PhysicalAccess]
//! SignCertificate { tag, csr } ──────────────►
//!                         ◄─────────────────── SigningResponse { tag, 200 OK, certs }
//! ```
//!
//! Inbound messages that are neither a permission report nor a signing
//! response are surfaced as [`PairingMessage::Other`] so the state machine can
//! log and skip them without failing.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::correlation::RequestTag;

/// A permission the bridge grants to the connected client.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    Public,
    /// Granted only while the physical pairing button window is open.
    PhysicalAccess,
    Other(String),
}

impl Permission {
    /// Parses the permission name a bridge reports.
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "Public" => Self::Public,
            "PhysicalAccess" => Self::PhysicalAccess,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Role requested for the client certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientRole {
    Admin,
}

/// A certificate-signing request submitted once physical access is granted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsrRequest {
    /// Correlates the bridge's response with this request.
    pub tag: RequestTag,
    pub csr_pem: String,
    pub display_name: String,
    pub role: ClientRole,
}

/// Requests the controller sends on the pairing connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PairingRequest {
    SignCertificate(CsrRequest),
}

impl PairingRequest {
    pub fn tag(&self) -> &RequestTag {
        match self {
            Self::SignCertificate(req) => &req.tag,
        }
    }
}

/// Status line of a response, e.g. `200 OK`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseStatus {
    pub code: u16,
    pub message: String,
}

impl ResponseStatus {
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Parses a status line such as `"201 Created"`.
    ///
    /// Returns `None` when the line does not start with a numeric code.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        let (code, message) = match line.split_once(' ') {
            Some((code, rest)) => (code, rest.trim()),
            None => (line, ""),
        };
        let code = code.parse().ok()?;
        Some(Self::new(code, message))
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{} {}", self.code, self.message)
        }
    }
}

/// Certificates returned by the bridge for an accepted CSR.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningResult {
    pub root_certificate: String,
    pub certificate: String,
}

/// Response to a [`PairingRequest::SignCertificate`].
#[derive(Debug, Clone, PartialEq)]
pub struct SigningResponse {
    pub tag: RequestTag,
    pub status: ResponseStatus,
    /// Present when the bridge accepted the request.
    pub result: Option<SigningResult>,
    /// The response as received, kept for diagnostics on rejection.
    pub raw: serde_json::Value,
}

/// Messages received on the pairing connection.
#[derive(Debug, Clone, PartialEq)]
pub enum PairingMessage {
    /// The bridge reports which permissions the current connection holds.
    PermissionReport { permissions: Vec<Permission> },
    SigningResponse(SigningResponse),
    /// Anything else; carried only for logging.
    Other { description: String },
}

impl PairingMessage {
    /// Builds a permission report from raw permission names.
    pub fn permissions<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::PermissionReport {
            permissions: names.into_iter().map(|n| Permission::parse(n.as_ref())).collect(),
        }
    }

    /// `true` only for a permission report that includes physical access.
    pub fn confirms_physical_access(&self) -> bool {
        matches!(
            self,
            Self::PermissionReport { permissions } if permissions.contains(&Permission::PhysicalAccess)
        )
    }

    /// Short description used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PermissionReport { .. } => "permission report",
            Self::SigningResponse(_) => "signing response",
            Self::Other { .. } => "other",
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

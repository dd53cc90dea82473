//! # bridge-core
//!
//! Shared library for the bridge orchestrator containing the domain entities,
//! the typed pairing protocol messages, and credential generation.
//!
//! This crate is used by the controller crate and by any host that wants to
//! inspect persisted credentials.  It has no dependency on an async runtime or
//! on network sockets.
//!
//! # Architecture overview (for beginners)
//!
//! A home-automation *bridge* only accepts commands from clients that present
//! a certificate it signed itself.  Getting that certificate is a one-time
//! interactive handshake called *pairing*: the user presses a physical button
//! on the bridge, the controller submits a certificate-signing request (CSR),
//! and the bridge answers with a signed client certificate plus its own root
//! certificate.
//!
//! This crate defines the pieces every layer agrees on:
//!
//! - **`domain`** – Bridge identities, credential bundles, device records, and
//!   discovery records.  Pure data with invariants enforced at construction.
//!
//! - **`protocol`** – The messages exchanged on the pairing connection and the
//!   correlation table that matches a CSR response to the request that caused
//!   it.  The wire encoding itself belongs to the transport.
//!
//! - **`crypto`** – RSA keypair and CSR generation for the fixed client
//!   identity.

pub mod crypto;
pub mod domain;
pub mod protocol;

pub use crypto::csr::{CredentialError, CredentialGenerator, RsaCredentialGenerator, SigningRequest};
pub use domain::credentials::{BundleError, CredentialBundle};
pub use domain::device::{DeviceRecord, ItemError};
pub use domain::discovery::BridgeAddressRecord;
pub use domain::identity::{BridgeId, BridgeIdentity};
pub use protocol::correlation::{CorrelationError, CorrelationTable, RequestTag};
pub use protocol::messages::{PairingMessage, PairingRequest};

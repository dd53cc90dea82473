//! Pairing protocol: typed messages and request correlation.
//!
//! The transport that carries these messages (TLS socket, framing, JSON
//! encoding) is supplied by the host; this module only fixes the *meaning*
//! of the messages the pairing state machine consumes and produces.

pub mod correlation;
pub mod messages;

pub use correlation::{CorrelationError, CorrelationTable, PendingRequest, RequestTag};
pub use messages::{
    ClientRole, CsrRequest, PairingMessage, PairingRequest, Permission, ResponseStatus,
    SigningResponse, SigningResult,
};

//! Application layer use cases for the controller.
//!
//! Use cases in this layer orchestrate `bridge_core` types through the
//! traits in `infrastructure`; they never open sockets or touch files
//! themselves.
//!
//! # Sub-modules
//!
//! - **`pair_bridge`**      – The interactive pairing handshake that produces
//!   a credential bundle.
//!
//! - **`resolve_identity`** – Chooses the identity to persist after pairing.
//!
//! - **`connect_bridge`**   – Opens the authenticated session and filters the
//!   enumerated devices.
//!
//! - **`reconcile`**        – Sequences the above from the persisted
//!   configuration and reports status to the host.

pub mod connect_bridge;
pub mod pair_bridge;
pub mod reconcile;
pub mod resolve_identity;

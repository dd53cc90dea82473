//! Infrastructure layer for the controller.
//!
//! Contains the adapters the use cases are wired to: transport seams and
//! discovery, record persistence, host status reporting, and logging setup.
//!
//! **Dependency rule**: this layer may depend on `bridge_core`, but MUST NOT
//! import anything from `application`.

pub mod network;
pub mod status;
pub mod storage;
pub mod telemetry;

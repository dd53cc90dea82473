//! Storage infrastructure: durable configuration and credential records.
//!
//! Two records are persisted, each written atomically on its own:
//!
//! - `config.toml`  – host, port, timeouts, and the resolved bridge identity.
//! - `secrets.toml` – the credential bundle issued by pairing.
//!
//! Everything else (discovered bridges, device lists, sessions) is rebuilt
//! from the network on every run.

pub mod config;

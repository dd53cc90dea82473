//! bridge-controller library entry point.
//!
//! Pairs with a home-automation bridge, keeps the issued credentials, and
//! maintains an authenticated session with it.  Hosts construct a
//! [`ReconciliationController`] from their transport implementations and
//! drive it with `start`, `update_config`, and `shutdown`.

pub mod application;
pub mod infrastructure;

pub use application::reconcile::{
    Collaborators, ReconcileError, ReconcileOutcome, ReconciliationController,
};
pub use infrastructure::status::{ConnectionStatus, StatusSink, StatusUpdate, WatchStatusSink};
pub use infrastructure::storage::config::{FileStateStore, MemoryStateStore, ModuleConfig, StateStore};
pub use infrastructure::telemetry::init_logging;

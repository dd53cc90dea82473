//! Logging setup for hosts embedding the controller.

use tracing_subscriber::EnvFilter;

/// Installs a formatting subscriber filtered at `level`.
///
/// `RUST_LOG`, when set, takes precedence over `level`.  Returns `false` if
/// a global subscriber was already installed (by the host or an earlier
/// call); the existing one is left in place.
pub fn init_logging(level: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}

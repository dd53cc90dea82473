//! Identity resolution policy applied right after pairing.
//!
//! The discovery id for the paired address wins when one has been seen.
//! Otherwise the identity stays [`BridgeIdentity::PendingResolution`] and the
//! connection manager adopts the control unit's serial on the first
//! successful enumeration.

use bridge_core::BridgeIdentity;
use tracing::info;

use crate::infrastructure::network::discovery::DiscoveryRegistry;

/// Picks the identity to persist for a freshly paired `address`.
pub fn resolve_identity(registry: &DiscoveryRegistry, address: &str) -> BridgeIdentity {
    match registry.lookup(address) {
        Some(id) => {
            info!("bridge at {address} identified as {id} by discovery");
            BridgeIdentity::Known { serial: id }
        }
        None => {
            info!("bridge at {address} not discovered yet; identity pending resolution");
            BridgeIdentity::PendingResolution
        }
    }
}

//! Discovery records.

use serde::{Deserialize, Serialize};

use super::identity::BridgeId;

/// A bridge seen on the network: its address and the identifier it announced.
///
/// The address is the natural key; a later record for the same address
/// replaces the earlier one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeAddressRecord {
    pub address: String,
    pub bridge_id: BridgeId,
}

impl BridgeAddressRecord {
    pub fn new(address: impl Into<String>, bridge_id: impl Into<BridgeId>) -> Self {
        Self {
            address: address.into().trim().to_string(),
            bridge_id: bridge_id.into(),
        }
    }
}

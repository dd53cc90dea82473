//! Devices reported by the bridge during enumeration.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Device types the bridge uses to describe itself.
///
/// The control unit shows up in its own device list; it is never a
/// controllable device and is the authoritative source of the bridge serial.
const CONTROL_UNIT_TYPES: &[&str] = &[
    "SmartBridge",
    "SmartBridgePro",
    "SmartBridgePro2",
    "RA2SelectMainRepeater",
    "RadioRa3Processor",
    "HWQSProcessor",
];

/// One device as reported by the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub name: String,
    pub serial_number: String,
    pub device_type: String,
    pub model_number: String,
    /// The area (room) the device is assigned to.  Devices without one are
    /// not independently controllable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area: Option<String>,
}

impl DeviceRecord {
    /// Returns `true` when this entry is the bridge's own control unit.
    pub fn is_control_unit(&self) -> bool {
        CONTROL_UNIT_TYPES
            .iter()
            .any(|t| t.eq_ignore_ascii_case(self.device_type.trim()))
    }

    pub fn has_area(&self) -> bool {
        self.area.as_deref().is_some_and(|a| !a.trim().is_empty())
    }
}

/// A per-item failure reported by the transport while enumerating devices.
///
/// One bad entry never fails the whole enumeration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("device entry {reference} could not be read: {detail}")]
pub struct ItemError {
    /// Transport-specific reference to the failed entry (href, index, ...).
    pub reference: String,
    pub detail: String,
}

//! Declarative description of a supported USB device variant.

use serde::{Deserialize, Serialize};

use super::native::{ConfigRecord, InterfaceRecord};
use crate::protocol::constants::{ENDPOINT_DIR_IN, VENDOR_SPECIFIC_CLASS};

/// Endpoint direction, taken from bit 7 of the endpoint address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    pub fn of(endpoint: u8) -> Self {
        if endpoint & ENDPOINT_DIR_IN != 0 {
            Direction::In
        } else {
            Direction::Out
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::In => write!(f, "In"),
            Direction::Out => write!(f, "Out"),
        }
    }
}

/// Shape a device must have to be bound to this spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsbDeviceSpec {
    pub name: String,
    pub vendor_id: u16,
    pub product_id: u16,
    /// Required number of interfaces, 0 for any.
    #[serde(default)]
    pub num_interfaces: u8,
    pub interface: u8,
    pub num_endpoints: u8,
    pub ep_out: u8,
    pub ep_in: u8,
}

impl UsbDeviceSpec {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        vendor_id: u16,
        product_id: u16,
        num_interfaces: u8,
        interface: u8,
        num_endpoints: u8,
        ep_out: u8,
        ep_in: u8,
    ) -> Self {
        Self {
            name: name.into(),
            vendor_id,
            product_id,
            num_interfaces,
            interface,
            num_endpoints,
            ep_out,
            ep_in,
        }
    }

    /// Interface this spec binds to, if `config` has the required shape.
    ///
    /// The interface is looked up by its position in the configuration and
    /// must carry the expected number, the vendor-specific class and exactly
    /// the expected number of endpoints.
    pub fn matched_interface<'a>(&self, config: &'a ConfigRecord) -> Option<&'a InterfaceRecord> {
        if self.num_interfaces != 0 && config.num_interfaces() != self.num_interfaces as usize {
            return None;
        }
        let iface = config.interfaces.get(self.interface as usize)?;
        if iface.class != VENDOR_SPECIFIC_CLASS
            || iface.number != self.interface
            || iface.endpoints.len() != self.num_endpoints as usize
        {
            return None;
        }
        Some(iface)
    }

    pub fn matches_ids(&self, vendor_id: u16, product_id: u16) -> bool {
        self.vendor_id == vendor_id && self.product_id == product_id
    }
}

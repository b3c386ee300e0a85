//! Native USB host boundary.
//!
//! The discovery and transfer logic only talks to these traits, allowing
//! different implementations (nusb, mock, etc.).

use std::fmt;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NativeError {
    #[error("No such device (it may have been disconnected)")]
    NoDevice,

    #[error("Operation timed out")]
    Timeout,

    #[error("Resource busy")]
    Busy,

    #[error("Endpoint stalled")]
    Pipe,

    #[error("Access denied")]
    Access,

    #[error("Operation not supported")]
    Unsupported,

    #[error("{0}")]
    Other(String),
}

/// Bus number and device address of a physical device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BusLocation {
    pub bus: u8,
    pub address: u8,
}

impl BusLocation {
    pub fn new(bus: u8, address: u8) -> Self {
        Self { bus, address }
    }

    /// `BBB/DDD` form, the tail of a usbfs device path.
    pub fn devpath(&self) -> String {
        format!("{:03}/{:03}", self.bus, self.address)
    }
}

impl fmt::Display for BusLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.devpath())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointRecord {
    pub address: u8,
    pub max_packet_size: usize,
}

/// First alternate setting of one interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceRecord {
    pub number: u8,
    pub class: u8,
    pub endpoints: Vec<EndpointRecord>,
}

/// Active configuration of a device, interfaces in descriptor order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConfigRecord {
    pub interfaces: Vec<InterfaceRecord>,
}

impl ConfigRecord {
    pub fn num_interfaces(&self) -> usize {
        self.interfaces.len()
    }
}

/// String descriptors read from an open device.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DescriptorStrings {
    pub manufacturer: String,
    pub product: String,
    pub serial: String,
    pub interface: String,
}

/// Enumerates the devices currently attached.
pub trait UsbBus {
    type Device: NativeDevice;

    fn scan(&mut self) -> Result<Vec<Self::Device>, NativeError>;
}

/// A device seen during enumeration (not yet opened).
pub trait NativeDevice: Clone {
    type Handle: NativeHandle;

    fn location(&self) -> BusLocation;

    fn vendor_id(&self) -> u16;

    fn product_id(&self) -> u16;

    /// Descriptors of the active configuration.
    fn configuration(&self) -> Result<ConfigRecord, NativeError>;

    fn open(&self) -> Result<Self::Handle, NativeError>;
}

/// An opened device.
pub trait NativeHandle {
    fn claim_interface(&mut self, interface: u8) -> Result<(), NativeError>;

    fn release_interface(&mut self, interface: u8) -> Result<(), NativeError>;

    /// Detach a kernel driver bound to `interface`, if the platform can.
    fn detach_kernel_driver(&mut self, interface: u8) -> Result<(), NativeError>;

    fn clear_halt(&mut self, endpoint: u8) -> Result<(), NativeError>;

    /// Bulk OUT transfer, returning the number of bytes the device accepted.
    fn bulk_write(&mut self, endpoint: u8, data: &[u8], timeout: Duration)
    -> Result<usize, NativeError>;

    /// Bulk IN transfer into `buf`, returning the number of bytes received.
    fn bulk_read(
        &mut self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, NativeError>;

    fn strings(&mut self, interface: u8) -> Result<DescriptorStrings, NativeError>;

    fn close(&mut self) -> Result<(), NativeError>;
}

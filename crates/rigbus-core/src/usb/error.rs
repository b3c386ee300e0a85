use thiserror::Error;

use super::native::NativeError;
use super::spec::Direction;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UsbError {
    #[error("No matching device")]
    NotFound,

    #[error("Too many matching devices ({count}), narrow the filter")]
    Ambiguous { count: usize },

    #[error("Handle is closed")]
    Closed,

    #[error("Endpoint 0x{endpoint:02X} is not an {expected} endpoint")]
    InvalidDirection { endpoint: u8, expected: Direction },

    #[error("Device disconnected")]
    DeviceGone,

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Short transfer on endpoint 0x{endpoint:02X}: {transferred} of {expected} bytes")]
    ShortTransfer {
        endpoint: u8,
        transferred: usize,
        expected: usize,
    },

    #[error("Endpoint 0x{endpoint:02X} max packet size too large ({size})")]
    PacketSizeTooLarge { endpoint: u8, size: usize },

    #[error("Device has no interface at index {interface}")]
    NoInterface { interface: u8 },

    #[error("Failed to claim interface {interface}: {source}")]
    Claim { interface: u8, source: NativeError },

    #[error("USB {op} failed: {source}")]
    Io {
        op: &'static str,
        source: NativeError,
    },

    #[error("Device enumeration failed: {0}")]
    Enumeration(NativeError),

    #[error("Enumeration lock failed: {0}")]
    Lock(String),
}

impl UsbError {
    pub fn is_device_gone(&self) -> bool {
        matches!(self, UsbError::DeviceGone)
    }
}

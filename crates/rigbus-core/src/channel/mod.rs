//! Channel implementations.

pub mod mock;
pub mod usb;

pub use mock::MockChannel;
pub use usb::UsbChannel;

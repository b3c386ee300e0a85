//! Rigbus-Core: device transactions and USB bulk transport in Rust.
//!
//! This crate drives radio and rotator style controllers that speak short
//! line-framed command/response protocols, over any byte channel, and
//! manages the vendor-specific USB devices such controllers hang off.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: Constants and the reply buffer type
//! - **Transaction**: Channel abstraction and the retrying request/response engine
//! - **Dialect**: Command encoding and reply decoding (GS-232B, raw lines)
//! - **USB**: Device discovery, claiming and bulk transfers (nusb, mock)
//! - **Channel**: Channel implementations (USB bulk pipe, mock)
//! - **Events**: Observer pattern for diagnostics
//! - **Config**: Transport options and TOML link configuration
//!
//! # Example
//!
//! ```no_run
//! use rigbus_core::channel::UsbChannel;
//! use rigbus_core::dialect::Gs232bRotator;
//! use rigbus_core::usb::{DiscoveryContext, UsbDeviceSpec, filter};
//!
//! let specs = [UsbDeviceSpec::new("rotator", 0x1234, 0x0001, 0, 0, 2, 0x02, 0x81)];
//! let mut ctx = DiscoveryContext::system();
//! let handle = ctx.open_one(&specs, &filter::any).expect("no rotator");
//!
//! let mut rotator = Gs232bRotator::new(UsbChannel::new(handle));
//! rotator.set_position(180.0, 30.0).expect("set position failed");
//! ```

pub mod channel;
pub mod config;
pub mod dialect;
pub mod events;
pub mod protocol;
pub mod transaction;
pub mod usb;

// Re-exports for convenience
pub use channel::{MockChannel, UsbChannel};
pub use config::{ConfigError, LinkConfig, TransferTuning, TransportOptions};
pub use dialect::{Dialect, DialectError, Gs232bRotator, LineDialect};
pub use events::{LinkEvent, LinkObserver, NullObserver, TracingObserver};
pub use protocol::Reply;
pub use transaction::{
    Channel, ChannelError, TransactionError, TransactionOutcome, TransactionSettings,
    TransactionSpec, Transactor, transact,
};
pub use usb::{DiscoveryContext, UsbDeviceHandle, UsbDeviceSpec, UsbError};

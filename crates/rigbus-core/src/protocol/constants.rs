use std::time::Duration;

// USB descriptor values
pub const ENDPOINT_DIR_IN: u8 = 0x80;
pub const VENDOR_SPECIFIC_CLASS: u8 = 0xFF;

/// Largest bulk packet size accepted on a matched endpoint (high-speed bulk).
pub const MAX_PACKET_SIZE: usize = 512;
pub const USB2_PACKET_SIZE: usize = 512;

// Short (zero-length) transfer handling
pub const SHORT_TRANSFER_RETRIES: u32 = 10;
pub const SHORT_TRANSFER_PAUSE: Duration = Duration::from_micros(100);

// Stale input drained right after claiming an interface
pub const FLUSH_READ_LEN: usize = 8192;
pub const FLUSH_READ_TIMEOUT: Duration = Duration::from_millis(1);

pub const DEFAULT_USB_TIMEOUT: Duration = Duration::from_millis(500);

// Transaction defaults
pub const DEFAULT_REPLY_CAPACITY: usize = 64;
pub const DEFAULT_ERROR_MARKER: u8 = b'?';
pub const DEFAULT_TRANSACTION_TIMEOUT: Duration = Duration::from_millis(400);
pub const DEFAULT_TRANSACTION_RETRIES: u32 = 3;

/// Environment variable holding whitespace-separated transport options.
pub const OPTIONS_ENV: &str = "RIGBUS_OPTIONS";

/// File name of the cross-process enumeration lock (in the temp directory).
pub const ENUMERATION_LOCK_FILE: &str = "rigbus-usb-enumeration.lock";

/// Spec name used for handles built from a raw device path.
pub const UNNAMED_SPEC: &str = "<none>";

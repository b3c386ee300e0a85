//! Event system for transport observers.
//!
//! Lets callers follow discovery and transfers (for diagnostics or a UI)
//! without coupling them to the transport internals.

use std::fmt;

/// Direction of a packet on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketDirection {
    Tx,
    Rx,
}

impl fmt::Display for PacketDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketDirection::Tx => write!(f, "TX"),
            PacketDirection::Rx => write!(f, "RX"),
        }
    }
}

/// Events emitted by the USB transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// A device matched a spec and was opened.
    DeviceMatched {
        devpath: String,
        vid: u16,
        pid: u16,
        spec: String,
    },
    /// A device matched by ids was left out of the result.
    DeviceSkipped { devpath: String, reason: String },
    /// Interface claimed and ready for transfers.
    DeviceClaimed { devpath: String, interface: u8 },
    DeviceClosed { devpath: String },
    /// The device disappeared during a transfer.
    DeviceGone { devpath: String },
    /// A transfer completed with zero bytes and will be retried.
    ShortTransfer { endpoint: u8, attempt: u32 },
    /// Bulk packet sent or received (first 32 bytes captured).
    Packet {
        direction: PacketDirection,
        endpoint: u8,
        length: usize,
        data: Option<Vec<u8>>,
    },
}

/// Observer trait for receiving transport events.
pub trait LinkObserver: Send + Sync {
    fn on_event(&self, event: &LinkEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl LinkObserver for NullObserver {
    fn on_event(&self, _event: &LinkEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl LinkObserver for TracingObserver {
    fn on_event(&self, event: &LinkEvent) {
        match event {
            LinkEvent::DeviceMatched {
                devpath,
                vid,
                pid,
                spec,
            } => {
                tracing::debug!(devpath = %devpath, vid = %format!("{:04X}", vid), pid = %format!("{:04X}", pid), spec = %spec, "Device matched");
            }
            LinkEvent::DeviceSkipped { devpath, reason } => {
                tracing::warn!(devpath = %devpath, "Skipping device: {}", reason);
            }
            LinkEvent::DeviceClaimed { devpath, interface } => {
                tracing::info!(devpath = %devpath, interface, "Interface claimed");
            }
            LinkEvent::DeviceClosed { devpath } => {
                tracing::debug!(devpath = %devpath, "Device closed");
            }
            LinkEvent::DeviceGone { devpath } => {
                tracing::warn!(devpath = %devpath, "Device disconnected");
            }
            LinkEvent::ShortTransfer { endpoint, attempt } => {
                tracing::warn!(endpoint = %format!("0x{:02X}", endpoint), attempt, "Zero-length transfer");
            }
            LinkEvent::Packet {
                direction,
                endpoint,
                length,
                data,
            } => {
                tracing::trace!(
                    dir = %direction,
                    endpoint = %format!("0x{:02X}", endpoint),
                    len = length,
                    data = ?data,
                    "USB Packet"
                );
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::{LinkEvent, LinkObserver};

    /// Observer that keeps every event for later assertions.
    #[derive(Default)]
    pub struct RecordingObserver {
        events: Mutex<Vec<LinkEvent>>,
    }

    impl RecordingObserver {
        pub fn events(&self) -> Vec<LinkEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    impl LinkObserver for RecordingObserver {
        fn on_event(&self, event: &LinkEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    /// Route `tracing` output through the test harness, honoring `RUST_LOG`.
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }
}

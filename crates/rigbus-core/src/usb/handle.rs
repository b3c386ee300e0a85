//! Runtime handle bound to one physical USB device.
//!
//! Lifecycle: `Discovered` → `Open` → `Claimed` → `Closed`. A handle never
//! leaves `Closed`; operations on it fail with [`UsbError::Closed`].

use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, instrument, warn};

use super::error::UsbError;
use super::native::{
    BusLocation, ConfigRecord, DescriptorStrings, InterfaceRecord, NativeDevice, NativeError,
    NativeHandle,
};
use super::spec::{Direction, UsbDeviceSpec};
use crate::config::{TransferTuning, TransportOptions};
use crate::events::{LinkEvent, LinkObserver, PacketDirection};
use crate::protocol::constants::{FLUSH_READ_LEN, MAX_PACKET_SIZE, USB2_PACKET_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    /// Matched during discovery, native handle not acquired.
    Discovered,
    Open,
    Claimed,
    Closed,
}

/// What filters get to see of a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub location: BusLocation,
    pub vendor_id: u16,
    pub product_id: u16,
    pub strings: DescriptorStrings,
}

impl DeviceIdentity {
    pub fn devpath(&self) -> String {
        self.location.devpath()
    }
}

/// Settings a handle inherits from its discovery context.
#[derive(Clone)]
pub struct HandleSettings {
    pub options: TransportOptions,
    pub tuning: TransferTuning,
    pub observer: Arc<dyn LinkObserver>,
}

/// Smallest max packet size among the spec's endpoints on `iface`.
///
/// Starts from [`MAX_PACKET_SIZE`]; a matched endpoint above it is an error.
pub fn negotiate_packet_size(
    iface: &InterfaceRecord,
    spec: &UsbDeviceSpec,
) -> Result<usize, UsbError> {
    let mut packet_size = MAX_PACKET_SIZE;
    for ep in &iface.endpoints {
        if ep.address != spec.ep_out && ep.address != spec.ep_in {
            continue;
        }
        if ep.max_packet_size > MAX_PACKET_SIZE {
            return Err(UsbError::PacketSizeTooLarge {
                endpoint: ep.address,
                size: ep.max_packet_size,
            });
        }
        packet_size = packet_size.min(ep.max_packet_size);
    }
    Ok(packet_size)
}

pub struct UsbDeviceHandle<D: NativeDevice> {
    device: D,
    native: Option<D::Handle>,
    spec: UsbDeviceSpec,
    identity: DeviceIdentity,
    packet_size: usize,
    state: HandleState,
    settings: HandleSettings,
}

impl<D: NativeDevice> UsbDeviceHandle<D> {
    /// Build a handle for `device` bound to `spec`, without opening it.
    pub fn new(
        device: D,
        spec: UsbDeviceSpec,
        config: &ConfigRecord,
        settings: HandleSettings,
    ) -> Result<Self, UsbError> {
        let iface = config
            .interfaces
            .get(spec.interface as usize)
            .ok_or(UsbError::NoInterface {
                interface: spec.interface,
            })?;
        let packet_size = negotiate_packet_size(iface, &spec)?;
        let identity = DeviceIdentity {
            location: device.location(),
            vendor_id: device.vendor_id(),
            product_id: device.product_id(),
            strings: DescriptorStrings::default(),
        };
        Ok(Self {
            device,
            native: None,
            spec,
            identity,
            packet_size,
            state: HandleState::Discovered,
            settings,
        })
    }

    /// Acquire the native handle and read the descriptor strings.
    pub fn open(&mut self) -> Result<(), UsbError> {
        match self.state {
            HandleState::Closed => return Err(UsbError::Closed),
            HandleState::Open | HandleState::Claimed => return Ok(()),
            HandleState::Discovered => {}
        }
        let native = self.device.open().map_err(|source| {
            error!(devpath = %self.devpath(), error = %source, "Failed to open device");
            UsbError::Io { op: "open", source }
        })?;
        self.native = Some(native);
        self.state = HandleState::Open;
        self.read_strings();
        debug!(
            devpath = %self.devpath(),
            vid = %format!("{:04X}", self.vendor_id()),
            pid = %format!("{:04X}", self.product_id()),
            "Device opened"
        );
        Ok(())
    }

    fn read_strings(&mut self) {
        let interface = self.spec.interface;
        let Some(native) = self.native.as_mut() else {
            return;
        };
        match native.strings(interface) {
            Ok(strings) => self.identity.strings = strings,
            Err(e) => warn!(devpath = %self.identity.devpath(), error = %e, "Failed reading string descriptors"),
        }
    }

    /// Claim the matched interface for exclusive use.
    #[instrument(level = "debug", skip(self), fields(devpath = %self.devpath()))]
    pub fn claim(&mut self) -> Result<(), UsbError> {
        match self.state {
            HandleState::Closed => return Err(UsbError::Closed),
            HandleState::Claimed => return Ok(()),
            HandleState::Discovered => self.open()?,
            HandleState::Open => {}
        }

        let interface = self.spec.interface;
        let native = self.native_mut()?;
        if let Err(e) = native.detach_kernel_driver(interface) {
            debug!(interface, error = %e, "Kernel driver not detached");
        }
        native
            .claim_interface(interface)
            .map_err(|source| UsbError::Claim { interface, source })?;
        self.state = HandleState::Claimed;

        self.read_strings();
        debug!(
            manufacturer = %self.identity.strings.manufacturer,
            product = %self.identity.strings.product,
            serial = %self.identity.strings.serial,
            interface = %self.identity.strings.interface,
            "Interface claimed"
        );

        if self.settings.options.use_clear_halt {
            debug!("Using clear_halt()");
            let (ep_out, ep_in) = (self.spec.ep_out, self.spec.ep_in);
            let native = self.native_mut()?;
            native
                .clear_halt(ep_out)
                .map_err(|source| UsbError::Io {
                    op: "clear halt (out)",
                    source,
                })?;
            native
                .clear_halt(ep_in)
                .map_err(|source| UsbError::Io {
                    op: "clear halt (in)",
                    source,
                })?;
        }

        self.flush_read()?;
        self.emit(LinkEvent::DeviceClaimed {
            devpath: self.devpath(),
            interface,
        });
        Ok(())
    }

    /// Drain stale input; a timeout means nothing was pending.
    pub fn flush_read(&mut self) -> Result<usize, UsbError> {
        let mut scratch = vec![0u8; FLUSH_READ_LEN];
        match self.recv(&mut scratch, self.settings.tuning.flush_timeout()) {
            Ok(n) => {
                debug!(bytes = n, data = ?&scratch[..n.min(32)], "Discarded stale input");
                Ok(n)
            }
            Err(UsbError::Timeout { .. }) => Ok(0),
            Err(e) => {
                error!(error = %e, "Flush read failed");
                Err(e)
            }
        }
    }

    /// Bulk write to the OUT endpoint.
    #[instrument(level = "trace", skip(self, data), fields(len = data.len()))]
    pub fn send(&mut self, data: &[u8], timeout: Duration) -> Result<usize, UsbError> {
        let endpoint = self.spec.ep_out;
        if Direction::of(endpoint) == Direction::In {
            error!(endpoint = %format!("0x{:02X}", endpoint), "send called with an input endpoint");
            return Err(UsbError::InvalidDirection {
                endpoint,
                expected: Direction::Out,
            });
        }
        self.ensure_open()?;

        let mut retries = 0u32;
        loop {
            let result = self.native_mut()?.bulk_write(endpoint, data, timeout);
            match result {
                Ok(0) if !data.is_empty() => {
                    self.emit(LinkEvent::ShortTransfer {
                        endpoint,
                        attempt: retries,
                    });
                    if retries >= self.settings.tuning.short_retries {
                        return Err(UsbError::ShortTransfer {
                            endpoint,
                            transferred: 0,
                            expected: data.len(),
                        });
                    }
                    retries += 1;
                    thread::sleep(self.settings.tuning.short_pause());
                }
                Ok(n) if n != data.len() => {
                    error!(endpoint = %format!("0x{:02X}", endpoint), written = n, expected = data.len(), "Short write");
                    return Err(UsbError::ShortTransfer {
                        endpoint,
                        transferred: n,
                        expected: data.len(),
                    });
                }
                Ok(n) => {
                    self.emit_packet(PacketDirection::Tx, endpoint, data);
                    return Ok(n);
                }
                Err(e) => return Err(self.transfer_error("bulk write", e, timeout)),
            }
        }
    }

    /// Bulk read from the IN endpoint. On failure `buf` is zero-filled.
    #[instrument(level = "trace", skip(self, buf), fields(len = buf.len()))]
    pub fn recv(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, UsbError> {
        let endpoint = self.spec.ep_in;
        if Direction::of(endpoint) == Direction::Out {
            error!(endpoint = %format!("0x{:02X}", endpoint), "recv called with an output endpoint");
            return Err(UsbError::InvalidDirection {
                endpoint,
                expected: Direction::In,
            });
        }
        self.ensure_open()?;

        let mut retries = 0u32;
        loop {
            let result = self.native_mut()?.bulk_read(endpoint, buf, timeout);
            match result {
                Ok(0) if !buf.is_empty() => {
                    self.emit(LinkEvent::ShortTransfer {
                        endpoint,
                        attempt: retries,
                    });
                    if retries >= self.settings.tuning.short_retries {
                        return Err(UsbError::ShortTransfer {
                            endpoint,
                            transferred: 0,
                            expected: buf.len(),
                        });
                    }
                    retries += 1;
                    thread::sleep(self.settings.tuning.short_pause());
                }
                Ok(n) => {
                    self.emit_packet(PacketDirection::Rx, endpoint, &buf[..n]);
                    return Ok(n);
                }
                Err(e) => {
                    buf.fill(0);
                    return Err(self.transfer_error("bulk read", e, timeout));
                }
            }
        }
    }

    /// Release the interface and close the native handle. Idempotent.
    pub fn close(&mut self) {
        if self.state == HandleState::Closed {
            return;
        }
        let interface = self.spec.interface;
        if let Some(mut native) = self.native.take() {
            debug!(spec = %self.spec.name, "Closing interface");
            if self.state == HandleState::Claimed {
                if let Err(e) = native.release_interface(interface) {
                    error!(interface, error = %e, "Releasing interface failed");
                }
            }
            if let Err(e) = native.close() {
                error!(error = %e, "Closing device failed");
            }
        }
        self.state = HandleState::Closed;
        self.emit(LinkEvent::DeviceClosed {
            devpath: self.devpath(),
        });
    }

    fn transfer_error(&mut self, op: &'static str, e: NativeError, timeout: Duration) -> UsbError {
        match e {
            NativeError::NoDevice => {
                debug!(op, "Device gone");
                self.emit(LinkEvent::DeviceGone {
                    devpath: self.devpath(),
                });
                self.close();
                UsbError::DeviceGone
            }
            NativeError::Timeout => UsbError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            },
            source => {
                warn!(op, error = %source, "Transfer failed");
                UsbError::Io { op, source }
            }
        }
    }

    fn ensure_open(&self) -> Result<(), UsbError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(UsbError::Closed)
        }
    }

    fn native_mut(&mut self) -> Result<&mut D::Handle, UsbError> {
        self.native.as_mut().ok_or(UsbError::Closed)
    }

    fn emit(&self, event: LinkEvent) {
        self.settings.observer.on_event(&event);
    }

    fn emit_packet(&self, direction: PacketDirection, endpoint: u8, data: &[u8]) {
        self.emit(LinkEvent::Packet {
            direction,
            endpoint,
            length: data.len(),
            data: Some(data.iter().take(32).copied().collect()),
        });
    }

    pub fn state(&self) -> HandleState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, HandleState::Open | HandleState::Claimed)
    }

    pub fn is_claimed(&self) -> bool {
        self.state == HandleState::Claimed
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn spec(&self) -> &UsbDeviceSpec {
        &self.spec
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn bus(&self) -> u8 {
        self.identity.location.bus
    }

    pub fn device_number(&self) -> u8 {
        self.identity.location.address
    }

    pub fn devpath(&self) -> String {
        self.identity.devpath()
    }

    pub fn interface(&self) -> u8 {
        self.spec.interface
    }

    pub fn vendor_id(&self) -> u16 {
        self.identity.vendor_id
    }

    pub fn product_id(&self) -> u16 {
        self.identity.product_id
    }

    pub fn manufacturer(&self) -> &str {
        &self.identity.strings.manufacturer
    }

    pub fn product(&self) -> &str {
        &self.identity.strings.product
    }

    pub fn serial(&self) -> &str {
        &self.identity.strings.serial
    }

    pub fn interface_string(&self) -> &str {
        &self.identity.strings.interface
    }

    pub fn packet_size(&self) -> usize {
        self.packet_size
    }

    pub fn is_usb2(&self) -> bool {
        self.packet_size == USB2_PACKET_SIZE
    }

    /// Multi-line summary of the handle.
    pub fn describe(&self) -> String {
        format!(
            "USB    Bus/Device:    [{}] ({},{})\n\
             USB    Spec name:     [{}]\n\
             USB    iManufacturer: [{}]\n\
             USB    iProduct:      [{}]\n\
             USB    iSerialNumber: [{}]",
            self.devpath(),
            if self.is_open() { "open" } else { "closed" },
            if self.is_claimed() { "claimed" } else { "unused" },
            self.spec.name,
            self.manufacturer(),
            self.product(),
            self.serial(),
        )
    }

    pub(crate) fn log_info(&self) {
        info!("{}", self);
    }
}

impl<D: NativeDevice> fmt::Display for UsbDeviceHandle<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "usb:{}: ID={:04X}:{:04X} [{} / {} / {}]",
            self.devpath(),
            self.vendor_id(),
            self.product_id(),
            self.manufacturer(),
            self.product(),
            self.serial()
        )
    }
}

impl<D: NativeDevice> fmt::Debug for UsbDeviceHandle<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UsbDeviceHandle")
            .field("devpath", &self.devpath())
            .field("spec", &self.spec.name)
            .field("state", &self.state)
            .field("packet_size", &self.packet_size)
            .finish()
    }
}

impl<D: NativeDevice> Drop for UsbDeviceHandle<D> {
    fn drop(&mut self) {
        self.close();
    }
}

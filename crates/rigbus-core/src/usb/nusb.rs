//! nusb-based native USB host.

use std::time::Duration;

use nusb::transfer::{Bulk, Completion, In, Out, TransferError};
use nusb::{Device, DeviceInfo, Interface, MaybeFuture, list_devices};
use tracing::{debug, trace};

use super::native::{
    BusLocation, ConfigRecord, DescriptorStrings, EndpointRecord, InterfaceRecord, NativeDevice,
    NativeError, NativeHandle, UsbBus,
};
use crate::protocol::constants::ENDPOINT_DIR_IN;

fn map_error(e: nusb::Error) -> NativeError {
    match e.kind() {
        nusb::ErrorKind::Disconnected | nusb::ErrorKind::NotFound => NativeError::NoDevice,
        nusb::ErrorKind::Busy => NativeError::Busy,
        nusb::ErrorKind::PermissionDenied => NativeError::Access,
        nusb::ErrorKind::Unsupported => NativeError::Unsupported,
        _ => NativeError::Other(e.to_string()),
    }
}

fn map_transfer_error(e: TransferError) -> NativeError {
    match e {
        TransferError::Disconnected => NativeError::NoDevice,
        TransferError::Cancelled => NativeError::Timeout,
        TransferError::Stall => NativeError::Pipe,
        other => NativeError::Other(other.to_string()),
    }
}

/// All USB buses of this host.
#[derive(Debug, Clone, Copy, Default)]
pub struct NusbBus;

impl UsbBus for NusbBus {
    type Device = NusbDevice;

    fn scan(&mut self) -> Result<Vec<NusbDevice>, NativeError> {
        let devices = list_devices().wait().map_err(map_error)?;
        Ok(devices.map(|info| NusbDevice { info }).collect())
    }
}

#[derive(Debug, Clone)]
pub struct NusbDevice {
    info: DeviceInfo,
}

impl NusbDevice {
    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }
}

impl NativeDevice for NusbDevice {
    type Handle = NusbHandle;

    fn location(&self) -> BusLocation {
        BusLocation::new(
            self.info.bus_id().parse().unwrap_or(0),
            self.info.device_address(),
        )
    }

    fn vendor_id(&self) -> u16 {
        self.info.vendor_id()
    }

    fn product_id(&self) -> u16 {
        self.info.product_id()
    }

    /// Reading descriptors requires opening the device, so this is only
    /// called once the ids already match.
    fn configuration(&self) -> Result<ConfigRecord, NativeError> {
        let device = self.info.open().wait().map_err(map_error)?;
        let config = device
            .active_configuration()
            .map_err(|e| NativeError::Other(e.to_string()))?;

        let mut interfaces = Vec::new();
        for group in config.interfaces() {
            let Some(alt) = group.alt_settings().next() else {
                continue;
            };
            interfaces.push(InterfaceRecord {
                number: alt.interface_number(),
                class: alt.class(),
                endpoints: alt
                    .endpoints()
                    .map(|ep| EndpointRecord {
                        address: ep.address(),
                        max_packet_size: ep.max_packet_size(),
                    })
                    .collect(),
            });
        }
        Ok(ConfigRecord { interfaces })
    }

    fn open(&self) -> Result<NusbHandle, NativeError> {
        let device = self.info.open().wait().map_err(map_error)?;
        Ok(NusbHandle {
            device,
            info: self.info.clone(),
            interface: None,
        })
    }
}

pub struct NusbHandle {
    device: Device,
    info: DeviceInfo,
    interface: Option<Interface>,
}

impl NusbHandle {
    fn claimed(&self) -> Result<&Interface, NativeError> {
        self.interface
            .as_ref()
            .ok_or_else(|| NativeError::Other("interface not claimed".into()))
    }
}

/// Wait for the single submitted transfer, cancelling it on timeout.
fn wait_completion<Dir: nusb::transfer::EndpointDirection>(
    ep: &mut nusb::Endpoint<Bulk, Dir>,
    timeout: Duration,
) -> Result<Completion, NativeError> {
    match ep.wait_next_complete(timeout) {
        Some(completion) => Ok(completion),
        None => {
            ep.cancel_all();
            Err(NativeError::Timeout)
        }
    }
}

impl NativeHandle for NusbHandle {
    fn claim_interface(&mut self, interface: u8) -> Result<(), NativeError> {
        let claimed = self
            .device
            .claim_interface(interface)
            .wait()
            .map_err(map_error)?;
        self.interface = Some(claimed);
        Ok(())
    }

    fn release_interface(&mut self, _interface: u8) -> Result<(), NativeError> {
        // nusb releases on drop
        self.interface = None;
        Ok(())
    }

    fn detach_kernel_driver(&mut self, interface: u8) -> Result<(), NativeError> {
        #[cfg(any(target_os = "linux", target_os = "android"))]
        {
            self.device
                .detach_kernel_driver(interface)
                .map_err(map_error)
        }
        #[cfg(not(any(target_os = "linux", target_os = "android")))]
        {
            let _ = interface;
            Err(NativeError::Unsupported)
        }
    }

    fn clear_halt(&mut self, endpoint: u8) -> Result<(), NativeError> {
        let iface = self.claimed()?;
        if endpoint & ENDPOINT_DIR_IN != 0 {
            let mut ep = iface.endpoint::<Bulk, In>(endpoint).map_err(map_error)?;
            ep.clear_halt().wait().map_err(map_error)
        } else {
            let mut ep = iface.endpoint::<Bulk, Out>(endpoint).map_err(map_error)?;
            ep.clear_halt().wait().map_err(map_error)
        }
    }

    fn bulk_write(
        &mut self,
        endpoint: u8,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, NativeError> {
        let mut ep = self
            .claimed()?
            .endpoint::<Bulk, Out>(endpoint)
            .map_err(map_error)?;
        ep.submit(data.to_vec().into());
        let completion = wait_completion(&mut ep, timeout)?;
        completion.status.map_err(map_transfer_error)?;
        trace!(bytes = completion.actual_len, "Bulk write complete");
        Ok(completion.actual_len)
    }

    fn bulk_read(
        &mut self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, NativeError> {
        let mut ep = self
            .claimed()?
            .endpoint::<Bulk, In>(endpoint)
            .map_err(map_error)?;
        // IN requests must be a whole number of packets
        let packet = ep.max_packet_size().max(1);
        let requested = buf.len().div_ceil(packet) * packet;
        let mut request = ep.allocate(requested);
        request.set_requested_len(requested);
        ep.submit(request);

        let completion = wait_completion(&mut ep, timeout)?;
        completion.status.map_err(map_transfer_error)?;
        let n = completion.actual_len.min(buf.len());
        buf[..n].copy_from_slice(&completion.buffer[..n]);
        if completion.actual_len > n {
            debug!(
                received = completion.actual_len,
                kept = n,
                "Bulk read overflowed the caller buffer"
            );
        }
        Ok(n)
    }

    fn strings(&mut self, interface: u8) -> Result<DescriptorStrings, NativeError> {
        let interface = self
            .info
            .interfaces()
            .find(|i| i.interface_number() == interface)
            .and_then(|i| i.interface_string())
            .unwrap_or_default()
            .to_string();
        Ok(DescriptorStrings {
            manufacturer: self.info.manufacturer_string().unwrap_or_default().to_string(),
            product: self.info.product_string().unwrap_or_default().to_string(),
            serial: self.info.serial_number().unwrap_or_default().to_string(),
            interface,
        })
    }

    fn close(&mut self) -> Result<(), NativeError> {
        self.interface = None;
        Ok(())
    }
}

//! Mock USB host for testing discovery and transfer logic.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::native::{
    BusLocation, ConfigRecord, DescriptorStrings, EndpointRecord, InterfaceRecord, NativeDevice,
    NativeError, NativeHandle, UsbBus,
};
use crate::protocol::constants::VENDOR_SPECIFIC_CLASS;

/// Scripted outcome of one bulk write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteStep {
    /// Report this many bytes accepted.
    Accept(usize),
    Fail(NativeError),
}

/// Counters and queues shared by every clone of a [`MockDevice`].
#[derive(Debug, Default, Clone)]
pub struct MockDeviceState {
    pub opens: usize,
    pub closes: usize,
    pub claims: Vec<u8>,
    pub releases: Vec<u8>,
    pub detaches: usize,
    pub cleared_halts: Vec<u8>,
    /// Payloads of fully accepted writes.
    pub writes: Vec<Vec<u8>>,
    pub write_attempts: usize,
    pub read_attempts: usize,
    write_script: VecDeque<WriteStep>,
    read_script: VecDeque<Result<Vec<u8>, NativeError>>,
}

#[derive(Debug, Clone, Default)]
struct Faults {
    open: Option<NativeError>,
    config: Option<NativeError>,
    claim: Option<NativeError>,
    release: Option<NativeError>,
    strings: Option<NativeError>,
    no_detach: bool,
}

#[derive(Debug, Clone)]
pub struct MockDevice {
    location: BusLocation,
    vendor_id: u16,
    product_id: u16,
    pub config: ConfigRecord,
    strings: DescriptorStrings,
    faults: Faults,
    state: Arc<Mutex<MockDeviceState>>,
}

impl MockDevice {
    pub fn new(bus: u8, address: u8, vendor_id: u16, product_id: u16) -> Self {
        Self {
            location: BusLocation::new(bus, address),
            vendor_id,
            product_id,
            config: ConfigRecord::default(),
            strings: DescriptorStrings::default(),
            faults: Faults::default(),
            state: Arc::new(Mutex::new(MockDeviceState::default())),
        }
    }

    /// Append an interface with the given `(address, max_packet_size)` endpoints.
    pub fn with_interface(mut self, number: u8, class: u8, endpoints: &[(u8, usize)]) -> Self {
        self.config.interfaces.push(InterfaceRecord {
            number,
            class,
            endpoints: endpoints
                .iter()
                .map(|&(address, max_packet_size)| EndpointRecord {
                    address,
                    max_packet_size,
                })
                .collect(),
        });
        self
    }

    pub fn with_vendor_interface(self, number: u8, endpoints: &[(u8, usize)]) -> Self {
        self.with_interface(number, VENDOR_SPECIFIC_CLASS, endpoints)
    }

    pub fn with_strings(
        mut self,
        manufacturer: &str,
        product: &str,
        serial: &str,
        interface: &str,
    ) -> Self {
        self.strings = DescriptorStrings {
            manufacturer: manufacturer.to_string(),
            product: product.to_string(),
            serial: serial.to_string(),
            interface: interface.to_string(),
        };
        self
    }

    pub fn failing_open(mut self, error: NativeError) -> Self {
        self.faults.open = Some(error);
        self
    }

    pub fn failing_config(mut self, error: NativeError) -> Self {
        self.faults.config = Some(error);
        self
    }

    pub fn failing_claim(mut self, error: NativeError) -> Self {
        self.faults.claim = Some(error);
        self
    }

    pub fn failing_release(mut self, error: NativeError) -> Self {
        self.faults.release = Some(error);
        self
    }

    pub fn failing_strings(mut self, error: NativeError) -> Self {
        self.faults.strings = Some(error);
        self
    }

    pub fn without_kernel_detach(mut self) -> Self {
        self.faults.no_detach = true;
        self
    }

    /// Snapshot of the shared counters.
    pub fn state(&self) -> MockDeviceState {
        self.state.lock().unwrap().clone()
    }

    pub fn queue_write(&self, step: WriteStep) {
        self.state.lock().unwrap().write_script.push_back(step);
    }

    /// Queue the result of the next bulk read. An empty queue times out.
    pub fn queue_read(&self, result: Result<Vec<u8>, NativeError>) {
        self.state.lock().unwrap().read_script.push_back(result);
    }
}

impl NativeDevice for MockDevice {
    type Handle = MockHandle;

    fn location(&self) -> BusLocation {
        self.location
    }

    fn vendor_id(&self) -> u16 {
        self.vendor_id
    }

    fn product_id(&self) -> u16 {
        self.product_id
    }

    fn configuration(&self) -> Result<ConfigRecord, NativeError> {
        match &self.faults.config {
            Some(e) => Err(e.clone()),
            None => Ok(self.config.clone()),
        }
    }

    fn open(&self) -> Result<MockHandle, NativeError> {
        if let Some(e) = &self.faults.open {
            return Err(e.clone());
        }
        self.state.lock().unwrap().opens += 1;
        Ok(MockHandle {
            device: self.clone(),
        })
    }
}

pub struct MockHandle {
    device: MockDevice,
}

impl MockHandle {
    fn with_state<R>(&self, f: impl FnOnce(&mut MockDeviceState) -> R) -> R {
        f(&mut self.device.state.lock().unwrap())
    }
}

impl NativeHandle for MockHandle {
    fn claim_interface(&mut self, interface: u8) -> Result<(), NativeError> {
        if let Some(e) = &self.device.faults.claim {
            return Err(e.clone());
        }
        self.with_state(|s| s.claims.push(interface));
        Ok(())
    }

    fn release_interface(&mut self, interface: u8) -> Result<(), NativeError> {
        self.with_state(|s| s.releases.push(interface));
        match &self.device.faults.release {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    fn detach_kernel_driver(&mut self, _interface: u8) -> Result<(), NativeError> {
        if self.device.faults.no_detach {
            return Err(NativeError::Unsupported);
        }
        self.with_state(|s| s.detaches += 1);
        Ok(())
    }

    fn clear_halt(&mut self, endpoint: u8) -> Result<(), NativeError> {
        self.with_state(|s| s.cleared_halts.push(endpoint));
        Ok(())
    }

    fn bulk_write(
        &mut self,
        _endpoint: u8,
        data: &[u8],
        _timeout: Duration,
    ) -> Result<usize, NativeError> {
        self.with_state(|s| {
            s.write_attempts += 1;
            match s.write_script.pop_front() {
                Some(WriteStep::Fail(e)) => Err(e),
                Some(WriteStep::Accept(n)) => {
                    let n = n.min(data.len());
                    if n == data.len() {
                        s.writes.push(data.to_vec());
                    }
                    Ok(n)
                }
                None => {
                    s.writes.push(data.to_vec());
                    Ok(data.len())
                }
            }
        })
    }

    fn bulk_read(
        &mut self,
        _endpoint: u8,
        buf: &mut [u8],
        _timeout: Duration,
    ) -> Result<usize, NativeError> {
        self.with_state(|s| {
            s.read_attempts += 1;
            match s.read_script.pop_front() {
                Some(Ok(data)) => {
                    let n = data.len().min(buf.len());
                    buf[..n].copy_from_slice(&data[..n]);
                    Ok(n)
                }
                Some(Err(e)) => Err(e),
                None => Err(NativeError::Timeout),
            }
        })
    }

    fn strings(&mut self, _interface: u8) -> Result<DescriptorStrings, NativeError> {
        match &self.device.faults.strings {
            Some(e) => Err(e.clone()),
            None => Ok(self.device.strings.clone()),
        }
    }

    fn close(&mut self) -> Result<(), NativeError> {
        self.with_state(|s| s.closes += 1);
        Ok(())
    }
}

/// Bus with a fixed device list.
#[derive(Debug, Clone, Default)]
pub struct MockBus {
    devices: Vec<MockDevice>,
    scans: Arc<Mutex<usize>>,
    fail_scan: Option<NativeError>,
}

impl MockBus {
    pub fn new(devices: Vec<MockDevice>) -> Self {
        Self {
            devices,
            ..Default::default()
        }
    }

    pub fn failing(error: NativeError) -> Self {
        Self {
            fail_scan: Some(error),
            ..Default::default()
        }
    }

    /// Number of scans performed so far (shared between clones).
    pub fn scan_count(&self) -> usize {
        *self.scans.lock().unwrap()
    }
}

impl UsbBus for MockBus {
    type Device = MockDevice;

    fn scan(&mut self) -> Result<Vec<MockDevice>, NativeError> {
        *self.scans.lock().unwrap() += 1;
        match &self.fail_scan {
            Some(e) => Err(e.clone()),
            None => Ok(self.devices.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_read_queue() {
        let device = MockDevice::new(1, 1, 1, 1);
        let mut handle = device.open().unwrap();
        device.queue_read(Ok(b"abc".to_vec()));

        let mut buf = [0u8; 2];
        let n = handle
            .bulk_read(0x81, &mut buf, Duration::from_millis(1))
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(&buf, b"ab");

        // Queue is empty now
        assert_eq!(
            handle.bulk_read(0x81, &mut buf, Duration::from_millis(1)),
            Err(NativeError::Timeout)
        );
    }

    #[test]
    fn test_mock_write_script() {
        let device = MockDevice::new(1, 1, 1, 1);
        let mut handle = device.open().unwrap();
        device.queue_write(WriteStep::Accept(1));

        assert_eq!(
            handle.bulk_write(0x02, b"xy", Duration::from_millis(1)),
            Ok(1)
        );
        assert_eq!(
            handle.bulk_write(0x02, b"xy", Duration::from_millis(1)),
            Ok(2)
        );

        let state = device.state();
        assert_eq!(state.write_attempts, 2);
        assert_eq!(state.writes, vec![b"xy".to_vec()]);
    }

    #[test]
    fn test_mock_bus_counts_scans() {
        let mut bus = MockBus::new(vec![MockDevice::new(1, 1, 1, 1)]);
        let probe = bus.clone();
        bus.scan().unwrap();
        bus.scan().unwrap();
        assert_eq!(probe.scan_count(), 2);
    }
}

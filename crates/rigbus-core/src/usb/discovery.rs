//! Device discovery.
//!
//! A [`DiscoveryContext`] scans the bus once, lazily, and binds devices to
//! the first [`UsbDeviceSpec`] whose shape they match.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use super::error::UsbError;
use super::filter::by_path;
use super::handle::{DeviceIdentity, HandleSettings, UsbDeviceHandle};
use super::lock::{EnumerationLock, default_lock};
use super::native::{ConfigRecord, NativeDevice, UsbBus};
use super::nusb::NusbBus;
use super::spec::UsbDeviceSpec;
use crate::config::{LinkConfig, TransferTuning, TransportOptions};
use crate::events::{LinkEvent, LinkObserver, TracingObserver};
use crate::protocol::constants::UNNAMED_SPEC;

/// Predicate applied to each opened candidate.
pub type DeviceFilter<'a> = &'a dyn Fn(&DeviceIdentity) -> bool;

pub struct DiscoveryContext<B: UsbBus> {
    bus: B,
    devices: Option<Vec<B::Device>>,
    options: TransportOptions,
    tuning: TransferTuning,
    lock: Box<dyn EnumerationLock>,
    observer: Arc<dyn LinkObserver>,
}

impl DiscoveryContext<NusbBus> {
    /// Context over the host's USB buses, options from `RIGBUS_OPTIONS`.
    pub fn system() -> Self {
        Self::new(NusbBus, TransportOptions::from_env())
    }
}

impl<B: UsbBus> DiscoveryContext<B> {
    pub fn new(bus: B, options: TransportOptions) -> Self {
        Self {
            bus,
            devices: None,
            options,
            tuning: TransferTuning::default(),
            lock: default_lock(options.no_lock),
            observer: Arc::new(TracingObserver),
        }
    }

    pub fn from_config(bus: B, config: &LinkConfig) -> Self {
        Self::new(bus, config.options).with_tuning(config.transfer)
    }

    pub fn with_lock(mut self, lock: Box<dyn EnumerationLock>) -> Self {
        self.lock = lock;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn LinkObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_tuning(mut self, tuning: TransferTuning) -> Self {
        self.tuning = tuning;
        self
    }

    pub fn options(&self) -> &TransportOptions {
        &self.options
    }

    fn settings(&self) -> HandleSettings {
        HandleSettings {
            options: self.options,
            tuning: self.tuning,
            observer: self.observer.clone(),
        }
    }

    fn emit(&self, event: LinkEvent) {
        self.observer.on_event(&event);
    }

    /// Scan the bus on first use; later calls reuse the cached list.
    pub fn ensure_scanned(&mut self) -> Result<&[B::Device], UsbError> {
        if self.devices.is_none() {
            let _guard = if self.options.no_lock {
                None
            } else {
                Some(self.lock.acquire()?)
            };
            let devices = self.bus.scan().map_err(UsbError::Enumeration)?;
            debug!(count = devices.len(), "Bus scanned");
            self.devices = Some(devices);
        }
        Ok(self.devices.as_deref().unwrap_or_default())
    }

    fn skip(&self, device: &B::Device, reason: String) {
        self.emit(LinkEvent::DeviceSkipped {
            devpath: device.location().devpath(),
            reason,
        });
    }

    /// Open every device matching one of `specs` and accepted by `filter`.
    ///
    /// Devices that fail along the way are logged and left out.
    #[instrument(level = "debug", skip_all, fields(specs = specs.len()))]
    pub fn find_by_product(
        &mut self,
        specs: &[UsbDeviceSpec],
        filter: DeviceFilter<'_>,
    ) -> Result<Vec<UsbDeviceHandle<B::Device>>, UsbError> {
        let devices = self.ensure_scanned()?.to_vec();
        let mut found = Vec::new();

        for device in devices {
            let location = device.location();
            debug!(
                "usb:{}: ID={:04X}:{:04X}",
                location,
                device.vendor_id(),
                device.product_id()
            );
            let mut config: Option<ConfigRecord> = None;

            for spec in specs {
                if !spec.matches_ids(device.vendor_id(), device.product_id()) {
                    continue;
                }
                if config.is_none() {
                    match device.configuration() {
                        Ok(c) => config = Some(c),
                        Err(e) => {
                            self.skip(&device, format!("reading configuration: {}", e));
                            break;
                        }
                    }
                }
                let Some(cfg) = config.as_ref() else {
                    break;
                };
                if spec.matched_interface(cfg).is_none() {
                    continue;
                }

                let mut handle = match UsbDeviceHandle::new(
                    device.clone(),
                    spec.clone(),
                    cfg,
                    self.settings(),
                ) {
                    Ok(handle) => handle,
                    Err(e) => {
                        self.skip(&device, e.to_string());
                        break;
                    }
                };
                if let Err(e) = handle.open() {
                    self.skip(&device, e.to_string());
                    break;
                }
                self.emit(LinkEvent::DeviceMatched {
                    devpath: location.devpath(),
                    vid: device.vendor_id(),
                    pid: device.product_id(),
                    spec: spec.name.clone(),
                });
                if !filter(handle.identity()) {
                    debug!(devpath = %location, "Rejected by filter");
                    handle.close();
                    break;
                }
                found.push(handle);
                break;
            }
        }
        Ok(found)
    }

    /// Exactly one matching device, claimed and ready for transfers.
    pub fn open_one(
        &mut self,
        specs: &[UsbDeviceSpec],
        filter: DeviceFilter<'_>,
    ) -> Result<UsbDeviceHandle<B::Device>, UsbError> {
        let mut handle = single(self.find_by_product(specs, filter)?)?;
        if let Err(e) = handle.claim() {
            warn!(devpath = %handle.devpath(), error = %e, "Claim failed");
            handle.close();
            return Err(e);
        }
        handle.log_info();
        Ok(handle)
    }

    /// The single device at `path` matching one of `specs`, not claimed.
    pub fn find_by_path(
        &mut self,
        specs: &[UsbDeviceSpec],
        path: &str,
    ) -> Result<UsbDeviceHandle<B::Device>, UsbError> {
        let filter = by_path(path);
        let found = self.find_by_product(specs, &filter)?;
        if found.len() > 1 {
            warn!(path, extra = found.len() - 1, "Too many matches");
        }
        single(found)
    }

    /// Bind to an arbitrary device by path, without a predefined spec.
    ///
    /// The device's own ids, interface count and the endpoint count of its
    /// first interface fill in a spec named `<none>`.
    pub fn find_interface(
        &mut self,
        path: &str,
        interface: u8,
        ep_out: u8,
        ep_in: u8,
    ) -> Result<UsbDeviceHandle<B::Device>, UsbError> {
        let device = self
            .ensure_scanned()?
            .iter()
            .find(|d| path.starts_with(&d.location().devpath()))
            .cloned()
            .ok_or(UsbError::NotFound)?;
        let config = device.configuration().map_err(|source| UsbError::Io {
            op: "read configuration",
            source,
        })?;
        debug!(
            "Matched device {}: {:X}:{:X}",
            device.location(),
            device.vendor_id(),
            device.product_id()
        );

        let num_endpoints = config
            .interfaces
            .first()
            .map(|iface| iface.endpoints.len())
            .unwrap_or(0);
        let spec = UsbDeviceSpec::new(
            UNNAMED_SPEC,
            device.vendor_id(),
            device.product_id(),
            config.num_interfaces() as u8,
            interface,
            num_endpoints as u8,
            ep_out,
            ep_in,
        );
        let mut handle = UsbDeviceHandle::new(device, spec, &config, self.settings())?;
        handle.open()?;
        Ok(handle)
    }
}

fn single<D: NativeDevice>(
    mut found: Vec<UsbDeviceHandle<D>>,
) -> Result<UsbDeviceHandle<D>, UsbError> {
    match found.len() {
        0 => Err(UsbError::NotFound),
        1 => found.pop().ok_or(UsbError::NotFound),
        count => {
            info!(count, "Too many devices, narrow the filter");
            Err(UsbError::Ambiguous { count })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::events::testing::{RecordingObserver, init_tracing};
    use crate::usb::filter::{any, by_serial};
    use crate::usb::lock::{LockGuard, NoLock};
    use crate::usb::mock::{MockBus, MockDevice};
    use crate::usb::native::NativeError;

    const VID: u16 = 0xE4E4;

    #[derive(Clone, Default)]
    struct CountingLock(Arc<Mutex<usize>>);

    impl EnumerationLock for CountingLock {
        fn acquire(&mut self) -> Result<LockGuard, UsbError> {
            *self.0.lock().unwrap() += 1;
            Ok(LockGuard::new(()))
        }
    }

    fn specs() -> Vec<UsbDeviceSpec> {
        vec![
            UsbDeviceSpec::new("fpga", VID, 0x1162, 1, 0, 2, 0x04, 0x88),
            UsbDeviceSpec::new("fpga-wide", VID, 0x1162, 1, 0, 4, 0x02, 0x86),
            UsbDeviceSpec::new("usb1", VID, 0x1161, 0, 0, 2, 0x04, 0x88),
        ]
    }

    fn astribank(address: u8, serial: &str) -> MockDevice {
        MockDevice::new(1, address, VID, 0x1162)
            .with_vendor_interface(0, &[(0x04, 512), (0x88, 512)])
            .with_strings("Xorcom LTD", "Astribank2", serial, "")
    }

    fn context(devices: Vec<MockDevice>) -> DiscoveryContext<MockBus> {
        init_tracing();
        DiscoveryContext::new(MockBus::new(devices), TransportOptions::default())
            .with_lock(Box::new(NoLock))
            .with_tuning(TransferTuning {
                short_pause_us: 0,
                ..Default::default()
            })
    }

    #[test]
    fn test_find_by_product_binds_matching_devices() {
        let other = MockDevice::new(1, 3, 0x0403, 0x6001)
            .with_vendor_interface(0, &[(0x02, 64), (0x81, 64)]);
        let mut ctx = context(vec![astribank(2, "A"), other, astribank(4, "B")]);

        let found = ctx.find_by_product(&specs(), &any).unwrap();

        assert_eq!(found.len(), 2);
        assert_eq!(found[0].devpath(), "001/002");
        assert_eq!(found[1].devpath(), "001/004");
        assert_eq!(found[0].spec().name, "fpga");
        assert!(found[0].is_open());
        assert!(!found[0].is_claimed());
        assert!(found[0].is_usb2());
        assert_eq!(found[1].serial(), "B");
    }

    #[test]
    fn test_earliest_matching_spec_wins() {
        let device = MockDevice::new(1, 2, VID, 0x1162).with_vendor_interface(
            0,
            &[(0x02, 512), (0x86, 512), (0x04, 512), (0x88, 512)],
        );
        let mut specs = specs();
        specs.push(UsbDeviceSpec::new("late", VID, 0x1162, 0, 0, 4, 0x04, 0x88));
        let mut ctx = context(vec![device]);

        let found = ctx.find_by_product(&specs, &any).unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].spec().name, "fpga-wide");
    }

    #[test]
    fn test_oversize_packet_skips_device() {
        let big = MockDevice::new(1, 2, VID, 0x1162)
            .with_vendor_interface(0, &[(0x04, 1024), (0x88, 512)]);
        let small = MockDevice::new(1, 3, VID, 0x1162)
            .with_vendor_interface(0, &[(0x04, 64), (0x88, 512)]);
        let observer = Arc::new(RecordingObserver::default());
        let mut ctx = context(vec![big.clone(), small]).with_observer(observer.clone());

        let found = ctx.find_by_product(&specs(), &any).unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].devpath(), "001/003");
        assert_eq!(found[0].packet_size(), 64);
        assert!(!found[0].is_usb2());
        assert_eq!(big.state().opens, 0);
        assert!(observer.events().iter().any(|e| matches!(
            e,
            LinkEvent::DeviceSkipped { devpath, .. } if devpath == "001/002"
        )));
    }

    #[test]
    fn test_open_failure_skips_device() {
        let broken = astribank(2, "A").failing_open(NativeError::Access);
        let mut ctx = context(vec![broken, astribank(3, "B")]);

        let found = ctx.find_by_product(&specs(), &any).unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].serial(), "B");
    }

    #[test]
    fn test_matched_event_only_after_open() {
        let broken = astribank(2, "A").failing_open(NativeError::Access);
        let observer = Arc::new(RecordingObserver::default());
        let mut ctx = context(vec![broken, astribank(3, "B")]).with_observer(observer.clone());

        ctx.find_by_product(&specs(), &any).unwrap();

        let matched: Vec<String> = observer
            .events()
            .into_iter()
            .filter_map(|e| match e {
                LinkEvent::DeviceMatched { devpath, .. } => Some(devpath),
                _ => None,
            })
            .collect();
        assert_eq!(matched, vec!["001/003".to_string()]);
        assert!(observer.events().iter().any(|e| matches!(
            e,
            LinkEvent::DeviceSkipped { devpath, .. } if devpath == "001/002"
        )));
    }

    #[test]
    fn test_config_failure_skips_device() {
        let broken = astribank(2, "A").failing_config(NativeError::Other("io".into()));
        let mut ctx = context(vec![broken]);
        assert!(ctx.find_by_product(&specs(), &any).unwrap().is_empty());
    }

    #[test]
    fn test_string_failure_keeps_device() {
        let device = astribank(2, "A").failing_strings(NativeError::Pipe);
        let mut ctx = context(vec![device]);

        let found = ctx.find_by_product(&specs(), &any).unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].serial(), "");
        assert_eq!(found[0].manufacturer(), "");
    }

    #[test]
    fn test_filter_rejection_closes_handle() {
        let rejected = astribank(2, "A");
        let mut ctx = context(vec![rejected.clone(), astribank(3, "B")]);

        let found = ctx.find_by_product(&specs(), &by_serial("B")).unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].serial(), "B");
        assert_eq!(rejected.state().opens, 1);
        assert_eq!(rejected.state().closes, 1);
    }

    #[test]
    fn test_scan_happens_once() {
        let bus = MockBus::new(vec![astribank(2, "A")]);
        let probe = bus.clone();
        let lock = CountingLock::default();
        let mut ctx = DiscoveryContext::new(bus, TransportOptions::default())
            .with_lock(Box::new(lock.clone()));

        ctx.find_by_product(&specs(), &any).unwrap();
        ctx.find_by_product(&specs(), &any).unwrap();
        ctx.find_interface("001/002", 0, 0x04, 0x88).unwrap();

        assert_eq!(probe.scan_count(), 1);
        assert_eq!(*lock.0.lock().unwrap(), 1);
    }

    #[test]
    fn test_no_lock_option_skips_lock() {
        let lock = CountingLock::default();
        let options = TransportOptions::parse("no-lock").unwrap();
        let mut ctx = DiscoveryContext::new(MockBus::new(vec![]), options)
            .with_lock(Box::new(lock.clone()));

        ctx.ensure_scanned().unwrap();

        assert_eq!(*lock.0.lock().unwrap(), 0);
    }

    #[test]
    fn test_scan_failure() {
        let mut ctx = DiscoveryContext::new(
            MockBus::failing(NativeError::Access),
            TransportOptions::default(),
        )
        .with_lock(Box::new(NoLock));

        assert_eq!(
            ctx.find_by_product(&specs(), &any).unwrap_err(),
            UsbError::Enumeration(NativeError::Access)
        );
    }

    #[test]
    fn test_open_one_claims() {
        let device = astribank(2, "A");
        let observer = Arc::new(RecordingObserver::default());
        let mut ctx = context(vec![device.clone()]).with_observer(observer.clone());

        let handle = ctx.open_one(&specs(), &any).unwrap();

        assert!(handle.is_claimed());
        assert_eq!(device.state().claims, vec![0]);
        assert_eq!(device.state().cleared_halts, vec![0x04, 0x88]);
        assert!(observer.events().contains(&LinkEvent::DeviceClaimed {
            devpath: "001/002".into(),
            interface: 0
        }));
    }

    #[test]
    fn test_open_one_without_clear_halt() {
        let device = astribank(2, "A");
        let options = TransportOptions::parse("no-use-clear-halt no-lock").unwrap();
        let mut ctx = DiscoveryContext::new(MockBus::new(vec![device.clone()]), options);

        ctx.open_one(&specs(), &any).unwrap();

        assert!(device.state().cleared_halts.is_empty());
    }

    #[test]
    fn test_open_one_cardinality() {
        let mut ctx = context(vec![]);
        assert_eq!(ctx.open_one(&specs(), &any).unwrap_err(), UsbError::NotFound);

        let (a, b) = (astribank(2, "A"), astribank(3, "B"));
        let mut ctx = context(vec![a.clone(), b.clone()]);
        assert_eq!(
            ctx.open_one(&specs(), &any).unwrap_err(),
            UsbError::Ambiguous { count: 2 }
        );
        assert_eq!(a.state().closes, 1);
        assert_eq!(b.state().closes, 1);
        assert!(a.state().claims.is_empty());
    }

    #[test]
    fn test_open_one_claim_failure_closes() {
        let device = astribank(2, "A").failing_claim(NativeError::Busy);
        let mut ctx = context(vec![device.clone()]);

        let err = ctx.open_one(&specs(), &any).unwrap_err();

        assert_eq!(
            err,
            UsbError::Claim {
                interface: 0,
                source: NativeError::Busy
            }
        );
        assert_eq!(device.state().closes, 1);
    }

    #[test]
    fn test_find_by_path() {
        let mut ctx = context(vec![astribank(2, "A"), astribank(3, "B")]);

        let handle = ctx.find_by_path(&specs(), "/dev/bus/usb/001/003").unwrap();
        assert_eq!(handle.serial(), "B");
        assert!(!handle.is_claimed());

        assert_eq!(
            ctx.find_by_path(&specs(), "/dev/bus/usb/002/003").unwrap_err(),
            UsbError::NotFound
        );
    }

    #[test]
    fn test_find_by_path_requires_single_match() {
        // two entries reporting the same bus location
        let (a, b) = (astribank(2, "A"), astribank(2, "B"));
        let mut ctx = context(vec![a.clone(), b.clone()]);

        let err = ctx.find_by_path(&specs(), "/dev/bus/usb/001/002").unwrap_err();

        assert_eq!(err, UsbError::Ambiguous { count: 2 });
        assert_eq!(a.state().closes, 1);
        assert_eq!(b.state().closes, 1);
    }

    #[test]
    fn test_find_interface_synthesizes_spec() {
        let device = MockDevice::new(2, 9, 0x1234, 0xABCD)
            .with_interface(0, 0x0A, &[(0x01, 64), (0x82, 64), (0x83, 16)])
            .with_interface(1, 0xFF, &[]);
        let mut ctx = context(vec![astribank(2, "A"), device]);

        let handle = ctx.find_interface("002/009", 0, 0x01, 0x82).unwrap();

        let spec = handle.spec();
        assert_eq!(spec.name, "<none>");
        assert_eq!((spec.vendor_id, spec.product_id), (0x1234, 0xABCD));
        assert_eq!(spec.num_interfaces, 2);
        assert_eq!(spec.num_endpoints, 3);
        assert_eq!(handle.packet_size(), 64);
        assert!(handle.is_open());

        assert_eq!(
            ctx.find_interface("003/001", 0, 0x01, 0x82).unwrap_err(),
            UsbError::NotFound
        );
    }
}

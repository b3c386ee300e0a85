//! USB transport: discovery, claiming and bulk transfers.

pub mod discovery;
pub mod error;
pub mod filter;
pub mod handle;
pub mod lock;
pub mod mock;
pub mod native;
pub mod nusb;
pub mod spec;

pub use discovery::{DeviceFilter, DiscoveryContext};
pub use error::UsbError;
pub use handle::{DeviceIdentity, HandleSettings, HandleState, UsbDeviceHandle};
pub use lock::{EnumerationLock, LockGuard, NoLock, default_lock};
#[cfg(unix)]
pub use lock::FileLock;
pub use mock::{MockBus, MockDevice, WriteStep};
pub use native::{
    BusLocation, ConfigRecord, DescriptorStrings, EndpointRecord, InterfaceRecord, NativeDevice,
    NativeError, NativeHandle, UsbBus,
};
pub use self::nusb::{NusbBus, NusbDevice, NusbHandle};
pub use spec::{Direction, UsbDeviceSpec};

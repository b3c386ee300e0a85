//! Ready-made discovery filters.
//!
//! Any `Fn(&DeviceIdentity) -> bool` works as a filter; these cover the
//! common ways of picking one device out of several identical ones.

use tracing::{debug, error};

use super::handle::DeviceIdentity;

/// Last two components of a device path: `/dev/bus/usb/001/005` → `001/005`.
///
/// Returns `None` for a path without any `/`.
pub fn path_tail(path: &str) -> Option<&str> {
    let last = path.rfind('/')?;
    match path[..last].rfind('/') {
        Some(prev) => Some(&path[prev + 1..]),
        None => Some(path),
    }
}

/// Match the device at `path` (a usbfs path or a `BBB/DDD` pair).
pub fn by_path(path: &str) -> impl Fn(&DeviceIdentity) -> bool + '_ {
    let tail = path_tail(path);
    if tail.is_none() {
        error!(path, "Missing a '/' in device path");
    }
    move |identity: &DeviceIdentity| match tail {
        Some(tail) => {
            let devpath = identity.devpath();
            if devpath != tail {
                debug!(devpath = %devpath, wanted = tail, "Device path mismatch");
                return false;
            }
            true
        }
        None => false,
    }
}

/// Match on descriptor strings. `None` accepts any value.
///
/// The product string falls back to a case-insensitive comparison.
pub fn by_strings<'a>(
    manufacturer: Option<&'a str>,
    product: Option<&'a str>,
) -> impl Fn(&DeviceIdentity) -> bool + 'a {
    move |identity: &DeviceIdentity| {
        let strings = &identity.strings;
        if let Some(manufacturer) = manufacturer {
            if strings.manufacturer != manufacturer {
                debug!(got = %strings.manufacturer, wanted = manufacturer, "Manufacturer mismatch");
                return false;
            }
        }
        if let Some(product) = product {
            if strings.product != product && !strings.product.eq_ignore_ascii_case(product) {
                debug!(got = %strings.product, wanted = product, "Product mismatch");
                return false;
            }
        }
        true
    }
}

pub fn by_serial(serial: &str) -> impl Fn(&DeviceIdentity) -> bool + '_ {
    move |identity: &DeviceIdentity| identity.strings.serial == serial
}

/// Accept every device.
pub fn any(_identity: &DeviceIdentity) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usb::native::{BusLocation, DescriptorStrings};

    fn identity() -> DeviceIdentity {
        DeviceIdentity {
            location: BusLocation::new(1, 5),
            vendor_id: 0x0403,
            product_id: 0x6001,
            strings: DescriptorStrings {
                manufacturer: "FTDI".into(),
                product: "FT232R USB UART".into(),
                serial: "A600ABCD".into(),
                interface: String::new(),
            },
        }
    }

    #[test]
    fn test_path_tail() {
        assert_eq!(path_tail("/dev/bus/usb/001/005"), Some("001/005"));
        assert_eq!(path_tail("001/005"), Some("001/005"));
        assert_eq!(path_tail("/005"), Some("/005"));
        assert_eq!(path_tail("005"), None);
    }

    #[test]
    fn test_by_path() {
        assert!(by_path("/dev/bus/usb/001/005")(&identity()));
        assert!(by_path("001/005")(&identity()));
        assert!(!by_path("/dev/bus/usb/001/006")(&identity()));
        assert!(!by_path("005")(&identity()));
    }

    #[test]
    fn test_by_strings() {
        assert!(by_strings(Some("FTDI"), Some("FT232R USB UART"))(&identity()));
        assert!(by_strings(None, Some("ft232r usb uart"))(&identity()));
        assert!(by_strings(Some("FTDI"), None)(&identity()));
        assert!(!by_strings(Some("ftdi"), None)(&identity()));
        assert!(!by_strings(None, Some("FT232R"))(&identity()));
    }

    #[test]
    fn test_by_serial() {
        assert!(by_serial("A600ABCD")(&identity()));
        assert!(!by_serial("A600ABCE")(&identity()));
        assert!(any(&identity()));
    }
}

//! USB record types carried by the protocol
//!
//! These are value-type surrogates for native libusb objects. None of them
//! holds a native handle; a device is re-located on the server through its
//! [`SessionId`].

use std::fmt;
use thiserror::Error;

/// Maximum number of devices carried by one [`DeviceList`]
pub const MAX_DEVICES: usize = 256;

/// Opaque device identity minted by the server
///
/// Derived from the device library's own device identity (`bus << 8 | address`,
/// the libusb `session_data` scheme). Only the server interprets it, and it is
/// not guaranteed to survive re-enumeration. USB bus numbers start at 1, so a
/// real device never has session id 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SessionId(pub i32);

impl SessionId {
    pub fn from_location(bus_number: u8, device_address: u8) -> Self {
        SessionId((i32::from(bus_number) << 8) | i32::from(device_address))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

/// Reflection of a native device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceRef {
    pub bus_number: u8,
    pub device_address: u8,
    pub num_configurations: u8,
    pub session_id: SessionId,
}

impl DeviceRef {
    /// Zero record, sent in place of a device when an operation failed
    pub fn is_zero(&self) -> bool {
        *self == DeviceRef::default()
    }
}

/// Bounded, count-prefixed list of devices
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceList {
    devices: Vec<DeviceRef>,
}

impl DeviceList {
    /// Build a list, silently dropping everything past [`MAX_DEVICES`]
    pub fn new(devices: impl IntoIterator<Item = DeviceRef>) -> Self {
        Self {
            devices: devices.into_iter().take(MAX_DEVICES).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&DeviceRef> {
        self.devices.get(index)
    }

    pub fn first(&self) -> Option<&DeviceRef> {
        self.devices.first()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DeviceRef> {
        self.devices.iter()
    }

    pub fn as_slice(&self) -> &[DeviceRef] {
        &self.devices
    }
}

impl<'a> IntoIterator for &'a DeviceList {
    type Item = &'a DeviceRef;
    type IntoIter = std::slice::Iter<'a, DeviceRef>;

    fn into_iter(self) -> Self::IntoIter {
        self.devices.iter()
    }
}

/// Standard USB device descriptor (USB 2.0 spec, table 9-8)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceDescriptor {
    /// bLength
    pub length: u8,
    /// bDescriptorType
    pub descriptor_type: u8,
    /// bcdUSB
    pub usb_version: u16,
    /// bDeviceClass
    pub device_class: u8,
    /// bDeviceSubClass
    pub device_sub_class: u8,
    /// bDeviceProtocol
    pub device_protocol: u8,
    /// bMaxPacketSize0
    pub max_packet_size0: u8,
    /// idVendor
    pub vendor_id: u16,
    /// idProduct
    pub product_id: u16,
    /// bcdDevice
    pub device_version: u16,
    /// iManufacturer
    pub manufacturer_index: u8,
    /// iProduct
    pub product_index: u8,
    /// iSerialNumber
    pub serial_number_index: u8,
    /// bNumConfigurations
    pub num_configurations: u8,
}

impl DeviceDescriptor {
    /// bLength of every device descriptor
    pub const LENGTH: u8 = 18;
    /// bDescriptorType of a device descriptor
    pub const DESCRIPTOR_TYPE: u8 = 0x01;
}

/// Client-visible view of the single device opened on the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceHandle {
    pub dev: DeviceRef,
}

/// USB error conditions reported by the device library
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UsbError {
    /// Operation timed out
    #[error("operation timed out")]
    Timeout,
    /// Endpoint stalled
    #[error("pipe error")]
    Pipe,
    /// Device was disconnected
    #[error("device disconnected")]
    NoDevice,
    /// Device or session not found
    #[error("entity not found")]
    NotFound,
    /// Device or interface is busy
    #[error("resource busy")]
    Busy,
    /// I/O error
    #[error("input/output error")]
    Io,
    /// Invalid parameter
    #[error("invalid parameter")]
    InvalidParam,
    /// Access denied (permissions)
    #[error("access denied")]
    Access,
    /// No device is open in this session
    #[error("no open device")]
    NotOpen,
    /// Other error with message
    #[error("{message}")]
    Other { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(n: u8) -> DeviceRef {
        DeviceRef {
            bus_number: 1,
            device_address: n,
            num_configurations: 1,
            session_id: SessionId::from_location(1, n),
        }
    }

    #[test]
    fn test_session_id_from_location() {
        assert_eq!(SessionId::from_location(1, 5), SessionId(0x0105));
        assert_eq!(SessionId::from_location(3, 0xff), SessionId(0x03ff));
        assert_eq!(SessionId::from_location(2, 7).to_string(), "0x0207");
    }

    #[test]
    fn test_device_list_truncates() {
        let list = DeviceList::new((0..300).map(|i| device((i % 128) as u8)));
        assert_eq!(list.len(), MAX_DEVICES);

        let exact = DeviceList::new((0..MAX_DEVICES).map(|i| device((i % 128) as u8)));
        assert_eq!(exact.len(), MAX_DEVICES);
    }

    #[test]
    fn test_device_list_preserves_order() {
        let list = DeviceList::new(vec![device(3), device(1), device(2)]);
        let addresses: Vec<u8> = list.iter().map(|d| d.device_address).collect();
        assert_eq!(addresses, vec![3, 1, 2]);
        assert_eq!(list.first(), Some(&device(3)));
    }

    #[test]
    fn test_zero_device_ref() {
        assert!(DeviceRef::default().is_zero());
        assert!(!device(1).is_zero());
    }
}

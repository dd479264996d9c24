//! libusb binding of the device-access interface

use common::UsbBackend;
use protocol::{DeviceDescriptor, DeviceRef, SessionId, UsbError};
use rusb::{Context, Device, DeviceHandle, UsbContext, Version};
use tracing::{debug, info, warn};

/// [`UsbBackend`] backed by a libusb context
///
/// The context is created by Init, or lazily by the first call that needs it.
/// Enumeration only reports devices allowed by the configured VID:PID filters.
pub struct RusbBackend {
    context: Option<Context>,
    allowed_filters: Vec<String>,
}

/// An open libusb handle and the interfaces claimed through it
pub struct RusbHandle {
    handle: DeviceHandle<Context>,
    claimed_interfaces: Vec<u8>,
}

impl RusbBackend {
    pub fn new(allowed_filters: Vec<String>) -> Self {
        Self {
            context: None,
            allowed_filters,
        }
    }

    fn context(&mut self) -> Result<&Context, UsbError> {
        if self.context.is_none() {
            let context = Context::new().map_err(map_rusb_error)?;
            info!("libusb context initialized");
            self.context = Some(context);
        }
        self.context.as_ref().ok_or(UsbError::Io)
    }

    /// Check if a VID/PID pair is allowed by the filters
    pub fn check_filter(vid: u16, pid: u16, filters: &[String]) -> bool {
        // If no filters are defined, all devices are allowed
        if filters.is_empty() {
            return true;
        }

        let matches = |pattern: &str, value: u16| {
            pattern == "*"
                || u16::from_str_radix(
                    pattern.trim_start_matches("0x").trim_start_matches("0X"),
                    16,
                )
                .map(|v| v == value)
                .unwrap_or(false)
        };

        filters.iter().any(|filter| match filter.split_once(':') {
            Some((vid_pattern, pid_pattern)) => {
                matches(vid_pattern, vid) && matches(pid_pattern, pid)
            }
            None => false,
        })
    }
}

impl UsbBackend for RusbBackend {
    type Device = Device<Context>;
    type Handle = RusbHandle;

    fn init(&mut self) -> Result<(), UsbError> {
        self.context().map(|_| ())
    }

    fn devices(&mut self) -> Result<Vec<(DeviceRef, Device<Context>)>, UsbError> {
        let filters = self.allowed_filters.clone();
        let list = self.context()?.devices().map_err(map_rusb_error)?;

        let mut devices = Vec::with_capacity(list.len());
        for device in list.iter() {
            let desc = match device.device_descriptor() {
                Ok(desc) => desc,
                Err(e) => {
                    warn!(
                        "Skipping bus {} address {}: {}",
                        device.bus_number(),
                        device.address(),
                        e
                    );
                    continue;
                }
            };

            if !Self::check_filter(desc.vendor_id(), desc.product_id(), &filters) {
                debug!(
                    "Device ignored by filter: bus={}, addr={}, vid={:#x}, pid={:#x}",
                    device.bus_number(),
                    device.address(),
                    desc.vendor_id(),
                    desc.product_id()
                );
                continue;
            }

            let dev = DeviceRef {
                bus_number: device.bus_number(),
                device_address: device.address(),
                num_configurations: desc.num_configurations(),
                session_id: SessionId::from_location(device.bus_number(), device.address()),
            };
            devices.push((dev, device));
        }

        Ok(devices)
    }

    fn descriptor(&mut self, device: &Device<Context>) -> Result<DeviceDescriptor, UsbError> {
        let desc = device.device_descriptor().map_err(map_rusb_error)?;
        Ok(map_descriptor(&desc))
    }

    fn open(&mut self, device: &Device<Context>) -> Result<RusbHandle, UsbError> {
        let mut handle = device.open().map_err(|e| {
            warn!("Failed to open device: {}", e);
            map_rusb_error(e)
        })?;

        // Not supported on every platform
        if let Err(e) = handle.set_auto_detach_kernel_driver(true) {
            debug!("Kernel driver auto-detach unavailable: {}", e);
        }

        Ok(RusbHandle {
            handle,
            claimed_interfaces: Vec::new(),
        })
    }

    fn close(&mut self, mut handle: RusbHandle) {
        for interface in handle.claimed_interfaces.drain(..) {
            if let Err(e) = handle.handle.release_interface(interface) {
                warn!("Failed to release interface {}: {}", interface, e);
            }
        }
        debug!("Closed device handle");
    }

    fn claim_interface(&mut self, handle: &mut RusbHandle, interface: u8) -> Result<(), UsbError> {
        handle
            .handle
            .claim_interface(interface)
            .map_err(map_rusb_error)?;
        if !handle.claimed_interfaces.contains(&interface) {
            handle.claimed_interfaces.push(interface);
        }
        Ok(())
    }

    fn release_interface(
        &mut self,
        handle: &mut RusbHandle,
        interface: u8,
    ) -> Result<(), UsbError> {
        handle
            .handle
            .release_interface(interface)
            .map_err(map_rusb_error)?;
        handle.claimed_interfaces.retain(|i| *i != interface);
        Ok(())
    }
}

/// Pack a decoded version back into its binary-coded-decimal field
fn version_to_bcd(version: Version) -> u16 {
    let major = u16::from(version.major());
    (major / 10) << 12
        | (major % 10) << 8
        | u16::from(version.minor()) << 4
        | u16::from(version.sub_minor())
}

fn map_descriptor(desc: &rusb::DeviceDescriptor) -> DeviceDescriptor {
    DeviceDescriptor {
        length: DeviceDescriptor::LENGTH,
        descriptor_type: DeviceDescriptor::DESCRIPTOR_TYPE,
        usb_version: version_to_bcd(desc.usb_version()),
        device_class: desc.class_code(),
        device_sub_class: desc.sub_class_code(),
        device_protocol: desc.protocol_code(),
        max_packet_size0: desc.max_packet_size(),
        vendor_id: desc.vendor_id(),
        product_id: desc.product_id(),
        device_version: version_to_bcd(desc.device_version()),
        manufacturer_index: desc.manufacturer_string_index().unwrap_or(0),
        product_index: desc.product_string_index().unwrap_or(0),
        serial_number_index: desc.serial_number_string_index().unwrap_or(0),
        num_configurations: desc.num_configurations(),
    }
}

/// Map rusb errors to protocol errors
pub fn map_rusb_error(err: rusb::Error) -> UsbError {
    match err {
        rusb::Error::Timeout => UsbError::Timeout,
        rusb::Error::Pipe => UsbError::Pipe,
        rusb::Error::NoDevice => UsbError::NoDevice,
        rusb::Error::NotFound => UsbError::NotFound,
        rusb::Error::Busy => UsbError::Busy,
        rusb::Error::Io => UsbError::Io,
        rusb::Error::InvalidParam => UsbError::InvalidParam,
        rusb::Error::Access => UsbError::Access,
        _ => UsbError::Other {
            message: err.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_logic() {
        let filters = vec![
            "0x1234:0x5678".to_string(),
            "0xABCD:*".to_string(),
        ];

        assert!(RusbBackend::check_filter(0x1234, 0x5678, &filters));
        assert!(RusbBackend::check_filter(0xABCD, 0x1111, &filters));
        assert!(RusbBackend::check_filter(0xABCD, 0x9999, &filters));

        assert!(!RusbBackend::check_filter(0x1234, 0x9999, &filters)); // Wrong PID
        assert!(!RusbBackend::check_filter(0x9999, 0x5678, &filters)); // Wrong VID
        assert!(!RusbBackend::check_filter(0x0000, 0x0000, &filters));

        // Empty filters = allow all
        assert!(RusbBackend::check_filter(0x1234, 0x5678, &[]));
    }

    #[test]
    fn test_version_to_bcd() {
        assert_eq!(version_to_bcd(Version(2, 0, 0)), 0x0200);
        assert_eq!(version_to_bcd(Version(1, 1, 0)), 0x0110);
        assert_eq!(version_to_bcd(Version(3, 2, 0)), 0x0320);
        assert_eq!(version_to_bcd(Version(12, 3, 4)), 0x1234);
        assert_eq!(version_to_bcd(Version::from_bcd(0x0201)), 0x0201);
    }

    #[test]
    fn test_map_rusb_error() {
        assert_eq!(map_rusb_error(rusb::Error::Timeout), UsbError::Timeout);
        assert_eq!(map_rusb_error(rusb::Error::Pipe), UsbError::Pipe);
        assert_eq!(map_rusb_error(rusb::Error::NoDevice), UsbError::NoDevice);
        assert_eq!(map_rusb_error(rusb::Error::Access), UsbError::Access);
        assert!(matches!(
            map_rusb_error(rusb::Error::Overflow),
            UsbError::Other { .. }
        ));
    }
}

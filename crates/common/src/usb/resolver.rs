//! Session resolver
//!
//! Maps a session id back to the live native device. Every resolution runs a
//! fresh enumeration and a linear scan: native enumeration order carries no
//! index stability, so nothing is cached between calls. A device unplugged
//! since the client listed it resolves to [`ResolveError::NotFound`].

use super::UsbBackend;
use protocol::{DeviceRef, SessionId, UsbError};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("device not found (session id {0})")]
    NotFound(SessionId),

    #[error("enumeration failed: {0}")]
    Enumeration(UsbError),
}

impl From<ResolveError> for UsbError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::NotFound(_) => UsbError::NotFound,
            ResolveError::Enumeration(e) => e,
        }
    }
}

/// Locate the device carrying `session_id` in the current enumeration
pub fn resolve<B: UsbBackend>(
    backend: &mut B,
    session_id: SessionId,
) -> Result<(DeviceRef, B::Device), ResolveError> {
    let found = backend
        .devices()
        .map_err(ResolveError::Enumeration)?
        .into_iter()
        .find(|(dev, _)| dev.session_id == session_id);

    match found {
        Some(entry) => {
            debug!(
                "Resolved session {} to bus {} address {}",
                session_id, entry.0.bus_number, entry.0.device_address
            );
            Ok(entry)
        }
        None => {
            warn!("Device not found (session id {})", session_id);
            Err(ResolveError::NotFound(session_id))
        }
    }
}

/// Locate the first device, in enumeration order, with this vendor and product id
pub fn find_by_vid_pid<B: UsbBackend>(
    backend: &mut B,
    vendor_id: u16,
    product_id: u16,
) -> Result<(DeviceRef, B::Device), UsbError> {
    for (dev, native) in backend.devices()? {
        match backend.descriptor(&native) {
            Ok(desc) if desc.vendor_id == vendor_id && desc.product_id == product_id => {
                return Ok((dev, native));
            }
            Ok(_) => {}
            Err(e) => debug!("Skipping session {}: {}", dev.session_id, e),
        }
    }

    debug!("No device {:04x}:{:04x}", vendor_id, product_id);
    Err(UsbError::NotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MockBackend, create_mock_device};

    #[test]
    fn test_resolve_present_device() {
        let mut backend = MockBackend::new(vec![
            create_mock_device(1, 2, 0x1111, 0x0001),
            create_mock_device(1, 3, 0x2222, 0x0002),
        ]);

        let (dev, native) = resolve(&mut backend, SessionId::from_location(1, 3)).unwrap();
        assert_eq!(dev.device_address, 3);
        assert_eq!(native, SessionId::from_location(1, 3));
    }

    #[test]
    fn test_resolve_absent_device() {
        let mut backend = MockBackend::new(vec![create_mock_device(1, 2, 0x1111, 0x0001)]);

        let result = resolve(&mut backend, SessionId(0x7777));
        assert!(matches!(result, Err(ResolveError::NotFound(SessionId(0x7777)))));
    }

    #[test]
    fn test_resolve_sees_unplug() {
        let mut backend = MockBackend::new(vec![create_mock_device(1, 2, 0x1111, 0x0001)]);
        let session = SessionId::from_location(1, 2);
        assert!(resolve(&mut backend, session).is_ok());

        backend.unplug(session);
        assert!(matches!(
            resolve(&mut backend, session),
            Err(ResolveError::NotFound(_))
        ));
    }

    #[test]
    fn test_resolve_enumerates_every_time() {
        let mut backend = MockBackend::new(vec![create_mock_device(1, 2, 0x1111, 0x0001)]);
        let session = SessionId::from_location(1, 2);

        resolve(&mut backend, session).unwrap();
        resolve(&mut backend, session).unwrap();
        assert_eq!(backend.enumerations(), 2);
    }

    #[test]
    fn test_resolve_enumeration_failure() {
        let mut backend = MockBackend::new(vec![create_mock_device(1, 2, 0x1111, 0x0001)]);
        backend.fail_enumeration(true);

        let result = resolve(&mut backend, SessionId::from_location(1, 2));
        assert!(matches!(result, Err(ResolveError::Enumeration(UsbError::Io))));
        assert_eq!(UsbError::from(result.unwrap_err()), UsbError::Io);
    }

    #[test]
    fn test_find_by_vid_pid_first_match() {
        let mut backend = MockBackend::new(vec![
            create_mock_device(1, 2, 0x05ac, 0x1281),
            create_mock_device(1, 3, 0x05ac, 0x1281),
        ]);

        let (dev, _) = find_by_vid_pid(&mut backend, 0x05ac, 0x1281).unwrap();
        assert_eq!(dev.device_address, 2);
        assert_eq!(
            find_by_vid_pid(&mut backend, 0x05ac, 0x1227).unwrap_err(),
            UsbError::NotFound
        );
    }
}

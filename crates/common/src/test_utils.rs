//! Test utilities for usbrpc
//!
//! Provides an in-memory [`UsbBackend`] and helper functions for testing
//! across crates.
//!
//! # Example
//!
//! ```
//! use common::test_utils::{MockBackend, create_mock_device};
//!
//! let backend = MockBackend::new(vec![create_mock_device(1, 4, 0x1234, 0x5678)]);
//! assert_eq!(backend.open_handles(), 0);
//! ```

use crate::usb::UsbBackend;
use protocol::{DeviceDescriptor, DeviceRef, SessionId, UsbError};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// A simulated USB device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockDevice {
    pub device: DeviceRef,
    pub descriptor: DeviceDescriptor,
}

/// Create a mock device at `bus`/`address` with the given ids
///
/// # Example
/// ```
/// use common::test_utils::create_mock_device;
/// use protocol::SessionId;
///
/// let dev = create_mock_device(1, 4, 0x1234, 0x5678);
/// assert_eq!(dev.device.session_id, SessionId::from_location(1, 4));
/// assert_eq!(dev.descriptor.vendor_id, 0x1234);
/// ```
pub fn create_mock_device(bus: u8, address: u8, vendor_id: u16, product_id: u16) -> MockDevice {
    MockDevice {
        device: DeviceRef {
            bus_number: bus,
            device_address: address,
            num_configurations: 1,
            session_id: SessionId::from_location(bus, address),
        },
        descriptor: create_mock_descriptor(vendor_id, product_id),
    }
}

/// Create a plausible USB 2.0 device descriptor
pub fn create_mock_descriptor(vendor_id: u16, product_id: u16) -> DeviceDescriptor {
    DeviceDescriptor {
        length: DeviceDescriptor::LENGTH,
        descriptor_type: DeviceDescriptor::DESCRIPTOR_TYPE,
        usb_version: 0x0200,
        device_class: 0x00,
        device_sub_class: 0x00,
        device_protocol: 0x00,
        max_packet_size0: 64,
        vendor_id,
        product_id,
        device_version: 0x0100,
        manufacturer_index: 1,
        product_index: 2,
        serial_number_index: 3,
        num_configurations: 1,
    }
}

/// Create `count` devices on bus 1 with consecutive addresses starting at 1
pub fn create_mock_device_list(count: u8) -> Vec<MockDevice> {
    (1..=count)
        .map(|addr| create_mock_device(1, addr, 0x1234, u16::from(addr)))
        .collect()
}

#[derive(Debug, Default)]
struct MockState {
    devices: Vec<MockDevice>,
    /// handle id -> device it was opened on
    open: HashMap<u64, SessionId>,
    /// (handle id, interface)
    claimed: HashSet<(u64, u8)>,
    next_handle: u64,
    init_calls: usize,
    enumerations: usize,
    fail_init: bool,
    fail_enumeration: bool,
    fail_open: bool,
}

/// Native handle of the mock backend
#[derive(Debug, PartialEq, Eq)]
pub struct MockHandle {
    id: u64,
    session_id: SessionId,
}

/// In-memory [`UsbBackend`]
///
/// Clones share state, so a test can keep one clone to inspect and mutate
/// while the worker thread owns another.
#[derive(Debug, Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<MockState>>,
}

impl MockBackend {
    pub fn new(devices: Vec<MockDevice>) -> Self {
        let state = MockState {
            devices,
            next_handle: 1,
            ..MockState::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Connect a device
    pub fn plug(&self, device: MockDevice) {
        self.lock().devices.push(device);
    }

    /// Disconnect a device
    pub fn unplug(&self, session_id: SessionId) {
        self.lock()
            .devices
            .retain(|d| d.device.session_id != session_id);
    }

    pub fn fail_init(&self, fail: bool) {
        self.lock().fail_init = fail;
    }

    pub fn fail_enumeration(&self, fail: bool) {
        self.lock().fail_enumeration = fail;
    }

    pub fn fail_open(&self, fail: bool) {
        self.lock().fail_open = fail;
    }

    /// Number of native handles currently open
    pub fn open_handles(&self) -> usize {
        self.lock().open.len()
    }

    /// Devices with an open native handle
    pub fn opened_sessions(&self) -> Vec<SessionId> {
        let mut sessions: Vec<_> = self.lock().open.values().copied().collect();
        sessions.sort_by_key(|s| s.0);
        sessions
    }

    /// Whether `interface` is claimed through any handle on this device
    pub fn is_claimed(&self, session_id: SessionId, interface: u8) -> bool {
        let state = self.lock();
        state
            .claimed
            .iter()
            .any(|(id, iface)| *iface == interface && state.open.get(id) == Some(&session_id))
    }

    pub fn init_calls(&self) -> usize {
        self.lock().init_calls
    }

    /// Number of enumerations performed so far
    pub fn enumerations(&self) -> usize {
        self.lock().enumerations
    }
}

impl UsbBackend for MockBackend {
    type Device = SessionId;
    type Handle = MockHandle;

    fn init(&mut self) -> Result<(), UsbError> {
        let mut state = self.lock();
        state.init_calls += 1;
        if state.fail_init {
            return Err(UsbError::Other {
                message: "mock init failure".to_string(),
            });
        }
        Ok(())
    }

    fn devices(&mut self) -> Result<Vec<(DeviceRef, SessionId)>, UsbError> {
        let mut state = self.lock();
        state.enumerations += 1;
        if state.fail_enumeration {
            return Err(UsbError::Io);
        }
        Ok(state
            .devices
            .iter()
            .map(|d| (d.device, d.device.session_id))
            .collect())
    }

    fn descriptor(&mut self, device: &SessionId) -> Result<DeviceDescriptor, UsbError> {
        self.lock()
            .devices
            .iter()
            .find(|d| d.device.session_id == *device)
            .map(|d| d.descriptor)
            .ok_or(UsbError::NoDevice)
    }

    fn open(&mut self, device: &SessionId) -> Result<MockHandle, UsbError> {
        let mut state = self.lock();
        if state.fail_open {
            return Err(UsbError::Access);
        }
        if !state.devices.iter().any(|d| d.device.session_id == *device) {
            return Err(UsbError::NoDevice);
        }
        let id = state.next_handle;
        state.next_handle += 1;
        state.open.insert(id, *device);
        Ok(MockHandle {
            id,
            session_id: *device,
        })
    }

    fn close(&mut self, handle: MockHandle) {
        let mut state = self.lock();
        state.open.remove(&handle.id);
        state.claimed.retain(|(id, _)| *id != handle.id);
    }

    fn claim_interface(&mut self, handle: &mut MockHandle, interface: u8) -> Result<(), UsbError> {
        let mut state = self.lock();
        if !state
            .devices
            .iter()
            .any(|d| d.device.session_id == handle.session_id)
        {
            return Err(UsbError::NoDevice);
        }
        state.claimed.insert((handle.id, interface));
        Ok(())
    }

    fn release_interface(
        &mut self,
        handle: &mut MockHandle,
        interface: u8,
    ) -> Result<(), UsbError> {
        if self.lock().claimed.remove(&(handle.id, interface)) {
            Ok(())
        } else {
            Err(UsbError::NotFound)
        }
    }
}

/// Timeout wrapper for async tests
///
/// Wraps an async operation with a timeout to prevent tests from hanging.
///
/// # Example
/// ```
/// use common::test_utils::{with_timeout, DEFAULT_TEST_TIMEOUT};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let result = with_timeout(DEFAULT_TEST_TIMEOUT, async { 42 }).await.unwrap();
/// assert_eq!(result, 42);
/// # }
/// ```
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
}

/// Error returned when a test times out
#[derive(Debug)]
pub struct TimeoutError {
    /// The timeout duration that was exceeded
    pub duration: Duration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Test timed out after {:?}", self.duration)
    }
}

impl std::error::Error for TimeoutError {}

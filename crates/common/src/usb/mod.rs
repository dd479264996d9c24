//! Device-access capability interface and the USB worker thread
//!
//! The RPC engine never calls the device library directly. It talks to a
//! [`UsbBackend`] owned by the USB worker thread, which the server binds to
//! libusb and tests bind to an in-memory mock.

pub mod resolver;
pub mod worker;

pub use resolver::{ResolveError, find_by_vid_pid, resolve};
pub use worker::{UsbWorkerThread, spawn_usb_worker};

use protocol::{DeviceDescriptor, DeviceRef, UsbError};

/// Capability interface of the device-access library
///
/// Every call is blocking and runs on the USB worker thread.
pub trait UsbBackend {
    /// Native device reference
    type Device;
    /// Native open handle
    type Handle;

    /// Initialize the library context
    fn init(&mut self) -> Result<(), UsbError>;

    /// Enumerate connected devices, in library order
    ///
    /// Each entry pairs the wire surrogate (with its minted session id) with
    /// the native reference it was built from.
    fn devices(&mut self) -> Result<Vec<(DeviceRef, Self::Device)>, UsbError>;

    /// Read the device descriptor
    fn descriptor(&mut self, device: &Self::Device) -> Result<DeviceDescriptor, UsbError>;

    /// Open the device
    fn open(&mut self, device: &Self::Device) -> Result<Self::Handle, UsbError>;

    /// Close a handle, releasing anything still claimed on it
    fn close(&mut self, handle: Self::Handle);

    fn claim_interface(&mut self, handle: &mut Self::Handle, interface: u8)
    -> Result<(), UsbError>;

    fn release_interface(
        &mut self,
        handle: &mut Self::Handle,
        interface: u8,
    ) -> Result<(), UsbError>;
}

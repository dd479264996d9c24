//! USB subsystem
//!
//! Binds the device-access interface to libusb. The worker thread, session
//! resolver and the interface itself live in `common::usb`; this module only
//! supplies the native backend and its device filter.

pub mod rusb_backend;

pub use rusb_backend::{RusbBackend, RusbHandle, map_rusb_error};

//! Common utilities for usbrpc
//!
//! This crate provides shared functionality between the server and client:
//! the RPC engine, the device-access capability interface with its worker
//! thread, error handling, logging setup, and the async channel bridge for
//! USB thread communication.

pub mod channel;
pub mod error;
pub mod logging;
pub mod rpc;
pub mod test_utils;
pub mod usb;

pub use channel::{HandleId, OpenedDevice, UsbBridge, UsbCommand, UsbWorker, create_usb_bridge};
pub use error::{Error, Result};
pub use logging::setup_logging;
pub use rpc::{
    Call, Connection, ConnectionSummary, Peer, RemoteUsb, ServerSession, Timeouts, dispatch,
    serve_connection, wait_for_shutdown,
};
pub use usb::{ResolveError, UsbBackend, spawn_usb_worker};

//! usbrpc server library
//!
//! Exposes USB devices attached to this host to remote clients. The RPC
//! engine itself lives in `common::rpc`; this crate provides configuration,
//! the libusb backend and the TCP accept loop.

pub mod config;
pub mod network;
pub mod usb;

pub use config::ServerConfig;
pub use network::RpcServer;
pub use usb::RusbBackend;

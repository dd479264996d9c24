//! usbrpc client library
//!
//! Configuration and the command-line tools that drive a remote server
//! through `common::RemoteUsb`.

pub mod commands;
pub mod config;

pub use config::ClientConfig;

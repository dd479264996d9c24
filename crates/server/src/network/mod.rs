//! Network subsystem
//!
//! Raw TCP transport for the RPC engine: one connection per client session.

pub mod listener;

pub use listener::RpcServer;

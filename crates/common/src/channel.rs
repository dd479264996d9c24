//! Async channel bridge between Tokio runtime and USB thread
//!
//! The device library context is owned by a single worker thread. Connection
//! tasks never touch it directly; they send a [`UsbCommand`] carrying a oneshot
//! reply channel and await the answer. The bounded command queue serializes
//! all access to the device context.

use async_channel::{Receiver, Sender, bounded};
use protocol::{DeviceDescriptor, DeviceRef, SessionId, UsbError};
use std::fmt;
use tokio::sync::oneshot;

/// Capacity of the command queue
pub const COMMAND_QUEUE_DEPTH: usize = 256;

/// Server-local slot of an open native handle
///
/// Never sent on the wire; clients only ever see the [`DeviceRef`] of the
/// device the handle belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleId(pub u32);

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "h{}", self.0)
    }
}

/// A device opened by the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenedDevice {
    pub handle: HandleId,
    pub device: DeviceRef,
}

/// Reply channel carried by every command
pub type Reply<T> = oneshot::Sender<Result<T, UsbError>>;

/// Commands from Tokio runtime to USB thread
#[derive(Debug)]
pub enum UsbCommand {
    /// Initialize the device library context
    Init { response: Reply<()> },

    /// Enumerate currently connected devices
    ListDevices { response: Reply<Vec<DeviceRef>> },

    /// Read the device descriptor of the device with this session id
    GetDescriptor {
        session_id: SessionId,
        response: Reply<DeviceDescriptor>,
    },

    /// Open the device with this session id
    Open {
        session_id: SessionId,
        response: Reply<OpenedDevice>,
    },

    /// Open the first device matching vendor and product id
    OpenWithVidPid {
        vendor_id: u16,
        product_id: u16,
        response: Reply<OpenedDevice>,
    },

    /// Close an open handle
    Close {
        handle: HandleId,
        response: Reply<()>,
    },

    /// Claim an interface on an open handle
    ClaimInterface {
        handle: HandleId,
        interface: u8,
        response: Reply<()>,
    },

    /// Release an interface on an open handle
    ReleaseInterface {
        handle: HandleId,
        interface: u8,
        response: Reply<()>,
    },

    /// Shutdown the USB thread gracefully
    Shutdown,
}

/// Handle for Tokio runtime (async)
#[derive(Clone)]
pub struct UsbBridge {
    cmd_tx: Sender<UsbCommand>,
}

impl UsbBridge {
    /// Send a command to the USB thread
    pub async fn send_command(&self, cmd: UsbCommand) -> crate::Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Send a command and wait for the worker's reply
    ///
    /// # Example
    /// ```no_run
    /// # async fn demo(bridge: common::UsbBridge) -> common::Result<()> {
    /// use common::UsbCommand;
    ///
    /// let devices = bridge
    ///     .request(|response| UsbCommand::ListDevices { response })
    ///     .await??;
    /// println!("{} devices", devices.len());
    /// # Ok(())
    /// # }
    /// ```
    pub async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> UsbCommand,
    ) -> crate::Result<Result<T, UsbError>> {
        let (tx, rx) = oneshot::channel();
        self.send_command(build(tx)).await?;
        rx.await.map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Ask the USB thread to stop
    pub async fn shutdown(&self) -> crate::Result<()> {
        self.send_command(UsbCommand::Shutdown).await
    }
}

/// Handle for USB thread (blocking)
pub struct UsbWorker {
    cmd_rx: Receiver<UsbCommand>,
}

impl UsbWorker {
    /// Receive a command from Tokio runtime (blocking)
    ///
    /// Fails once every [`UsbBridge`] has been dropped.
    pub fn recv_command(&self) -> crate::Result<UsbCommand> {
        self.cmd_rx
            .recv_blocking()
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }
}

/// Create the channel bridge between Tokio and USB thread
///
/// Returns (UsbBridge for Tokio, UsbWorker for USB thread)
pub fn create_usb_bridge() -> (UsbBridge, UsbWorker) {
    let (cmd_tx, cmd_rx) = bounded(COMMAND_QUEUE_DEPTH);
    (UsbBridge { cmd_tx }, UsbWorker { cmd_rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_bridge() {
        let (bridge, worker) = create_usb_bridge();

        let handle = std::thread::spawn(move || {
            let cmd = worker.recv_command().unwrap();
            match cmd {
                UsbCommand::ListDevices { response } => {
                    let _ = response.send(Ok(Vec::new()));
                    true
                }
                _ => false,
            }
        });

        let devices = bridge
            .request(|response| UsbCommand::ListDevices { response })
            .await
            .unwrap()
            .unwrap();

        assert!(devices.is_empty());
        assert!(handle.join().unwrap());
    }

    #[tokio::test]
    async fn test_request_fails_when_worker_gone() {
        let (bridge, worker) = create_usb_bridge();
        drop(worker);

        let result = bridge
            .request(|response| UsbCommand::Init { response })
            .await;
        assert!(matches!(result, Err(crate::Error::Channel(_))));
    }

    #[tokio::test]
    async fn test_dropped_reply_is_channel_error() {
        let (bridge, worker) = create_usb_bridge();

        let handle = std::thread::spawn(move || {
            // Drop the command, and with it the reply sender
            let _ = worker.recv_command();
        });

        let result = bridge
            .request(|response| UsbCommand::Init { response })
            .await;
        assert!(matches!(result, Err(crate::Error::Channel(_))));
        handle.join().unwrap();
    }

    #[test]
    fn test_worker_sees_closed_bridge() {
        let (bridge, worker) = create_usb_bridge();
        drop(bridge);
        assert!(worker.recv_command().is_err());
    }
}

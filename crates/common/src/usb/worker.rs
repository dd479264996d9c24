//! USB worker thread
//!
//! Dedicated thread that owns the device library context. Connection tasks
//! reach it through the [`UsbBridge`](crate::UsbBridge) command queue, so every
//! device call is serialized on this thread.

use super::{UsbBackend, find_by_vid_pid, resolve};
use crate::channel::{HandleId, OpenedDevice, UsbCommand, UsbWorker};
use protocol::{DeviceRef, UsbError};
use std::collections::HashMap;
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

/// USB worker thread
///
/// Owns the backend and every native handle opened through it. Handles are
/// addressed by [`HandleId`] and never leave this thread.
pub struct UsbWorkerThread<B: UsbBackend> {
    backend: B,
    worker: UsbWorker,
    handles: HashMap<HandleId, B::Handle>,
    next_handle_id: u32,
}

impl<B: UsbBackend> UsbWorkerThread<B> {
    pub fn new(worker: UsbWorker, backend: B) -> Self {
        Self {
            backend,
            worker,
            handles: HashMap::new(),
            next_handle_id: 1,
        }
    }

    /// Run the command loop
    ///
    /// Returns on a Shutdown command or once every bridge has been dropped.
    /// Handles still open at that point are closed.
    pub fn run(mut self) {
        info!("USB worker thread started");

        loop {
            match self.worker.recv_command() {
                Ok(UsbCommand::Shutdown) => {
                    info!("USB worker shutting down");
                    break;
                }
                Ok(cmd) => self.handle_command(cmd),
                Err(_) => {
                    debug!("Command channel closed");
                    break;
                }
            }
        }

        for (id, handle) in self.handles.drain() {
            debug!("Closing leftover handle {}", id);
            self.backend.close(handle);
        }

        info!("USB worker thread stopped");
    }

    /// Number of handles currently open
    pub fn open_handles(&self) -> usize {
        self.handles.len()
    }

    fn handle_command(&mut self, cmd: UsbCommand) {
        // A panic drops the reply sender, which the requester sees as a channel error
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.handle_command_inner(cmd)
        }));

        if let Err(e) = result {
            error!("Panic in USB command handler: {:?}", e);
        }
    }

    fn handle_command_inner(&mut self, cmd: UsbCommand) {
        match cmd {
            UsbCommand::Init { response } => {
                debug!("Initializing device library");
                let _ = response.send(self.backend.init());
            }

            UsbCommand::ListDevices { response } => {
                let result = self
                    .backend
                    .devices()
                    .map(|devices| devices.into_iter().map(|(dev, _)| dev).collect::<Vec<_>>());
                if let Ok(devices) = &result {
                    debug!("Listing {} devices", devices.len());
                }
                let _ = response.send(result);
            }

            UsbCommand::GetDescriptor {
                session_id,
                response,
            } => {
                debug!("Reading descriptor of session {}", session_id);
                let result = resolve(&mut self.backend, session_id)
                    .map_err(UsbError::from)
                    .and_then(|(_, native)| self.backend.descriptor(&native));
                let _ = response.send(result);
            }

            UsbCommand::Open {
                session_id,
                response,
            } => {
                debug!("Opening session {}", session_id);
                let result = resolve(&mut self.backend, session_id)
                    .map_err(UsbError::from)
                    .and_then(|(dev, native)| self.open_native(dev, &native));
                let _ = response.send(result);
            }

            UsbCommand::OpenWithVidPid {
                vendor_id,
                product_id,
                response,
            } => {
                debug!("Opening first {:04x}:{:04x}", vendor_id, product_id);
                let result = find_by_vid_pid(&mut self.backend, vendor_id, product_id)
                    .and_then(|(dev, native)| self.open_native(dev, &native));
                let _ = response.send(result);
            }

            UsbCommand::Close { handle, response } => {
                let result = match self.handles.remove(&handle) {
                    Some(native) => {
                        debug!("Closing handle {}", handle);
                        self.backend.close(native);
                        Ok(())
                    }
                    None => {
                        warn!("Close of unknown handle {}", handle);
                        Err(UsbError::NotFound)
                    }
                };
                let _ = response.send(result);
            }

            UsbCommand::ClaimInterface {
                handle,
                interface,
                response,
            } => {
                debug!("Claiming interface {} on {}", interface, handle);
                let result = match self.handles.get_mut(&handle) {
                    Some(native) => self.backend.claim_interface(native, interface),
                    None => Err(UsbError::NotFound),
                };
                let _ = response.send(result);
            }

            UsbCommand::ReleaseInterface {
                handle,
                interface,
                response,
            } => {
                debug!("Releasing interface {} on {}", interface, handle);
                let result = match self.handles.get_mut(&handle) {
                    Some(native) => self.backend.release_interface(native, interface),
                    None => Err(UsbError::NotFound),
                };
                let _ = response.send(result);
            }

            UsbCommand::Shutdown => {
                // Handled by the command loop
            }
        }
    }

    /// Next free id; 0 is never handed out and live ids are skipped on wrap
    fn allocate_handle_id(&mut self) -> HandleId {
        loop {
            let id = HandleId(self.next_handle_id);
            self.next_handle_id = self.next_handle_id.wrapping_add(1);
            if id.0 != 0 && !self.handles.contains_key(&id) {
                return id;
            }
        }
    }

    fn open_native(
        &mut self,
        device: DeviceRef,
        native: &B::Device,
    ) -> Result<OpenedDevice, UsbError> {
        let handle = self.backend.open(native)?;
        let id = self.allocate_handle_id();
        self.handles.insert(id, handle);
        info!(
            "Opened bus {} address {} as {}",
            device.bus_number, device.device_address, id
        );
        Ok(OpenedDevice { handle: id, device })
    }
}

/// Spawn the USB worker thread
pub fn spawn_usb_worker<B>(worker: UsbWorker, backend: B) -> std::io::Result<JoinHandle<()>>
where
    B: UsbBackend + Send + 'static,
{
    std::thread::Builder::new()
        .name("usb-worker".to_string())
        .spawn(move || UsbWorkerThread::new(worker, backend).run())
}

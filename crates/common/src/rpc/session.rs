//! Per-connection server state

use crate::channel::{HandleId, UsbBridge, UsbCommand};
use protocol::{DeviceDescriptor, DeviceRef, SessionId, UsbError};
use tracing::{debug, info, warn};

/// The one device a session holds open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveHandle {
    pub id: HandleId,
    pub device: DeviceRef,
}

/// Server state for one accepted connection
///
/// Holds at most one live handle. Opening another device closes the current
/// one first; Close, Exit and the end of the connection release it.
pub struct ServerSession {
    bridge: UsbBridge,
    live_handle: Option<LiveHandle>,
}

impl ServerSession {
    pub fn new(bridge: UsbBridge) -> Self {
        Self {
            bridge,
            live_handle: None,
        }
    }

    pub fn live_handle(&self) -> Option<&LiveHandle> {
        self.live_handle.as_ref()
    }

    pub async fn init(&mut self) -> crate::Result<()> {
        Ok(self
            .bridge
            .request(|response| UsbCommand::Init { response })
            .await??)
    }

    pub async fn list_devices(&mut self) -> crate::Result<Vec<DeviceRef>> {
        Ok(self
            .bridge
            .request(|response| UsbCommand::ListDevices { response })
            .await??)
    }

    pub async fn descriptor(&mut self, session_id: SessionId) -> crate::Result<DeviceDescriptor> {
        Ok(self
            .bridge
            .request(|response| UsbCommand::GetDescriptor {
                session_id,
                response,
            })
            .await??)
    }

    /// Open the device with this session id, replacing the live handle
    pub async fn open(&mut self, session_id: SessionId) -> crate::Result<DeviceRef> {
        self.release_live_handle().await;
        let opened = self
            .bridge
            .request(|response| UsbCommand::Open {
                session_id,
                response,
            })
            .await??;
        Ok(self.adopt(opened.handle, opened.device))
    }

    /// Open the first device matching the ids, replacing the live handle
    pub async fn open_with_vid_pid(
        &mut self,
        vendor_id: u16,
        product_id: u16,
    ) -> crate::Result<DeviceRef> {
        self.release_live_handle().await;
        let opened = self
            .bridge
            .request(|response| UsbCommand::OpenWithVidPid {
                vendor_id,
                product_id,
                response,
            })
            .await??;
        Ok(self.adopt(opened.handle, opened.device))
    }

    /// Close the live handle
    pub async fn close(&mut self) -> crate::Result<()> {
        let live = self.live_handle.take().ok_or(UsbError::NotOpen)?;
        self.close_handle(live).await
    }

    pub async fn claim_interface(&mut self, interface: u8) -> crate::Result<()> {
        let handle = self.live_id()?;
        Ok(self
            .bridge
            .request(|response| UsbCommand::ClaimInterface {
                handle,
                interface,
                response,
            })
            .await??)
    }

    pub async fn release_interface(&mut self, interface: u8) -> crate::Result<()> {
        let handle = self.live_id()?;
        Ok(self
            .bridge
            .request(|response| UsbCommand::ReleaseInterface {
                handle,
                interface,
                response,
            })
            .await??)
    }

    /// Release the live handle on Exit
    pub async fn exit(&mut self) {
        self.release_live_handle().await;
    }

    /// Release everything the session holds when its connection ends
    pub async fn finish(&mut self) {
        self.release_live_handle().await;
    }

    fn live_id(&self) -> crate::Result<HandleId> {
        self.live_handle
            .map(|live| live.id)
            .ok_or_else(|| UsbError::NotOpen.into())
    }

    fn adopt(&mut self, id: HandleId, device: DeviceRef) -> DeviceRef {
        info!(
            "Session opened bus {} address {} ({})",
            device.bus_number, device.device_address, id
        );
        self.live_handle = Some(LiveHandle { id, device });
        device
    }

    async fn release_live_handle(&mut self) {
        if let Some(live) = self.live_handle.take()
            && let Err(e) = self.close_handle(live).await
        {
            warn!("Failed to close {}: {}", live.id, e);
        }
    }

    async fn close_handle(&mut self, live: LiveHandle) -> crate::Result<()> {
        debug!("Closing {} (session {})", live.id, live.device.session_id);
        Ok(self
            .bridge
            .request(|response| UsbCommand::Close {
                handle: live.id,
                response,
            })
            .await??)
    }
}

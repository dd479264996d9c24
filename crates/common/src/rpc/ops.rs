//! One self-contained unit per remote operation
//!
//! Each operation knows both halves of its exchange. The client half runs
//! after the dispatcher has written the function id; it writes the inputs,
//! reads the whole response into temporaries and only then commits the
//! outputs. The server half reads the inputs, performs the device operation
//! through its [`ServerSession`] and always writes a well-formed response:
//! device and resolution failures become zero records plus `Failure`.

use super::connection::Connection;
use super::session::ServerSession;
use protocol::{
    DeviceDescriptor, DeviceHandle, DeviceList, DeviceRef, FunctionId, MAX_DEVICES, RetVal,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

/// Both halves of one remote operation
pub(crate) trait Operation {
    async fn client_side<S>(&mut self, conn: &mut Connection<S>) -> protocol::Result<RetVal>
    where
        S: AsyncRead + AsyncWrite + Unpin;

    async fn server_side<S>(
        &mut self,
        conn: &mut Connection<S>,
        session: &mut ServerSession,
    ) -> protocol::Result<RetVal>
    where
        S: AsyncRead + AsyncWrite + Unpin;
}

fn report<T>(function: FunctionId, result: &crate::Result<T>) -> RetVal {
    if let Err(e) = result {
        warn!("{} failed: {}", function, e);
    }
    RetVal::from_result(result)
}

/// Narrow an integer argument the device library would reject
///
/// A value that does not fit is a failed call, not a malformed record.
fn argument<T: TryFrom<i32>>(function: FunctionId, field: &str, raw: i32) -> Option<T> {
    let value = T::try_from(raw).ok();
    if value.is_none() {
        warn!("{} failed: {} {} out of range", function, field, raw);
    }
    value
}

/// Initialize the device library
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Init;

impl Operation for Init {
    async fn client_side<S>(&mut self, conn: &mut Connection<S>) -> protocol::Result<RetVal>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        conn.recv().await
    }

    async fn server_side<S>(
        &mut self,
        conn: &mut Connection<S>,
        session: &mut ServerSession,
    ) -> protocol::Result<RetVal>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let retval = report(FunctionId::Init, &session.init().await);
        conn.send(&retval).await?;
        Ok(retval)
    }
}

/// End of the client's work; releases the live handle, expects no answer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Exit;

impl Operation for Exit {
    async fn client_side<S>(&mut self, _conn: &mut Connection<S>) -> protocol::Result<RetVal>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        Ok(RetVal::Success)
    }

    async fn server_side<S>(
        &mut self,
        _conn: &mut Connection<S>,
        session: &mut ServerSession,
    ) -> protocol::Result<RetVal>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        session.exit().await;
        Ok(RetVal::Success)
    }
}

/// Enumerate the server's devices
///
/// The wire carries no retval. A failed enumeration is sent as an empty list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListDevices {
    pub devices: DeviceList,
}

impl Operation for ListDevices {
    async fn client_side<S>(&mut self, conn: &mut Connection<S>) -> protocol::Result<RetVal>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        self.devices = conn.recv_device_list().await?;
        Ok(RetVal::Success)
    }

    async fn server_side<S>(
        &mut self,
        conn: &mut Connection<S>,
        session: &mut ServerSession,
    ) -> protocol::Result<RetVal>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let result = session.list_devices().await;
        let retval = report(FunctionId::ListDevices, &result);
        let devices = result.unwrap_or_default();
        if devices.len() > MAX_DEVICES {
            debug!("Truncating {} devices to {}", devices.len(), MAX_DEVICES);
        }
        self.devices = DeviceList::new(devices);
        conn.send(&self.devices).await?;
        Ok(retval)
    }
}

/// Read the device descriptor of a listed device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GetDescriptor {
    pub device: DeviceRef,
    pub descriptor: DeviceDescriptor,
}

impl Operation for GetDescriptor {
    async fn client_side<S>(&mut self, conn: &mut Connection<S>) -> protocol::Result<RetVal>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        conn.send(&self.device).await?;
        let descriptor: DeviceDescriptor = conn.recv().await?;
        let retval: RetVal = conn.recv().await?;
        self.descriptor = descriptor;
        Ok(retval)
    }

    async fn server_side<S>(
        &mut self,
        conn: &mut Connection<S>,
        session: &mut ServerSession,
    ) -> protocol::Result<RetVal>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        self.device = conn.recv().await?;
        let result = session.descriptor(self.device.session_id).await;
        let retval = report(FunctionId::GetDescriptor, &result);
        self.descriptor = result.unwrap_or_default();
        conn.send(&self.descriptor).await?;
        conn.send(&retval).await?;
        Ok(retval)
    }
}

/// Open a listed device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Open {
    pub device: DeviceRef,
    pub handle: DeviceHandle,
}

impl Operation for Open {
    async fn client_side<S>(&mut self, conn: &mut Connection<S>) -> protocol::Result<RetVal>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        conn.send(&self.device).await?;
        let handle: DeviceHandle = conn.recv().await?;
        let retval: RetVal = conn.recv().await?;
        self.handle = handle;
        Ok(retval)
    }

    async fn server_side<S>(
        &mut self,
        conn: &mut Connection<S>,
        session: &mut ServerSession,
    ) -> protocol::Result<RetVal>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        self.device = conn.recv().await?;
        let result = session.open(self.device.session_id).await;
        let retval = report(FunctionId::Open, &result);
        self.handle = DeviceHandle {
            dev: result.unwrap_or_default(),
        };
        conn.send(&self.handle).await?;
        conn.send(&retval).await?;
        Ok(retval)
    }
}

/// Open the first device with the given vendor and product id
///
/// The wire carries no retval; an all-zero handle means failure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenWithVidPid {
    pub vendor_id: u16,
    pub product_id: u16,
    pub handle: DeviceHandle,
}

impl Operation for OpenWithVidPid {
    async fn client_side<S>(&mut self, conn: &mut Connection<S>) -> protocol::Result<RetVal>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        conn.send(&(self.vendor_id, self.product_id)).await?;
        let handle: DeviceHandle = conn.recv().await?;
        self.handle = handle;
        Ok(if handle.dev.is_zero() {
            RetVal::Failure
        } else {
            RetVal::Success
        })
    }

    async fn server_side<S>(
        &mut self,
        conn: &mut Connection<S>,
        session: &mut ServerSession,
    ) -> protocol::Result<RetVal>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (raw_vid, raw_pid): (i32, i32) = conn.recv().await?;
        let function = FunctionId::OpenWithVidPid;
        let ids = argument(function, "vendor id", raw_vid)
            .zip(argument(function, "product id", raw_pid));
        let (retval, dev) = match ids {
            Some((vendor_id, product_id)) => {
                self.vendor_id = vendor_id;
                self.product_id = product_id;
                let result = session.open_with_vid_pid(vendor_id, product_id).await;
                (report(function, &result), result.unwrap_or_default())
            }
            None => (RetVal::Failure, DeviceRef::default()),
        };
        self.handle = DeviceHandle { dev };
        conn.send(&self.handle).await?;
        Ok(retval)
    }
}

/// Close the session's live handle; no payload either way
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Close;

impl Operation for Close {
    async fn client_side<S>(&mut self, _conn: &mut Connection<S>) -> protocol::Result<RetVal>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        Ok(RetVal::Success)
    }

    async fn server_side<S>(
        &mut self,
        _conn: &mut Connection<S>,
        session: &mut ServerSession,
    ) -> protocol::Result<RetVal>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        Ok(report(FunctionId::Close, &session.close().await))
    }
}

/// Claim an interface on the live handle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClaimInterface {
    pub interface: u8,
}

impl Operation for ClaimInterface {
    async fn client_side<S>(&mut self, conn: &mut Connection<S>) -> protocol::Result<RetVal>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        conn.send(&self.interface).await?;
        conn.recv().await
    }

    async fn server_side<S>(
        &mut self,
        conn: &mut Connection<S>,
        session: &mut ServerSession,
    ) -> protocol::Result<RetVal>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let raw: i32 = conn.recv().await?;
        let retval = match argument(FunctionId::ClaimInterface, "interface", raw) {
            Some(interface) => {
                self.interface = interface;
                report(FunctionId::ClaimInterface, &session.claim_interface(interface).await)
            }
            None => RetVal::Failure,
        };
        conn.send(&retval).await?;
        Ok(retval)
    }
}

/// Release an interface on the live handle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReleaseInterface {
    pub interface: u8,
}

impl Operation for ReleaseInterface {
    async fn client_side<S>(&mut self, conn: &mut Connection<S>) -> protocol::Result<RetVal>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        conn.send(&self.interface).await?;
        conn.recv().await
    }

    async fn server_side<S>(
        &mut self,
        conn: &mut Connection<S>,
        session: &mut ServerSession,
    ) -> protocol::Result<RetVal>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let raw: i32 = conn.recv().await?;
        let retval = match argument(FunctionId::ReleaseInterface, "interface", raw) {
            Some(interface) => {
                self.interface = interface;
                report(FunctionId::ReleaseInterface, &session.release_interface(interface).await)
            }
            None => RetVal::Failure,
        };
        conn.send(&retval).await?;
        Ok(retval)
    }
}

/// A declared function with no device binding
///
/// No request payload; always answered with `Failure`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inert {
    pub function: FunctionId,
}

impl Operation for Inert {
    async fn client_side<S>(&mut self, conn: &mut Connection<S>) -> protocol::Result<RetVal>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        conn.recv().await
    }

    async fn server_side<S>(
        &mut self,
        conn: &mut Connection<S>,
        _session: &mut ServerSession,
    ) -> protocol::Result<RetVal>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        debug!("{} is not supported", self.function);
        conn.send(&RetVal::Failure).await?;
        Ok(RetVal::Failure)
    }
}

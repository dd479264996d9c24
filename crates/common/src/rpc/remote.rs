//! Client call surface
//!
//! Thin wrappers that build a [`Call`], dispatch it with the client role and
//! hand back the retval with the outputs.

use super::ops::{ClaimInterface, GetDescriptor, Init, Open, OpenWithVidPid, ReleaseInterface};
use super::{Call, Connection, Peer, Timeouts, dispatch};
use protocol::{
    DeviceDescriptor, DeviceHandle, DeviceList, DeviceRef, FunctionId, ProtocolError,
    ProtocolVersion, RetVal,
};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::{debug, info, warn};

/// A connection to a usbrpc server
///
/// A call that fails leaves the stream at an unknown point of an exchange,
/// so the connection is unusable afterwards: every later call fails with
/// [`ProtocolError::ConnectionClosed`] without touching the stream.
pub struct RemoteUsb<S = TcpStream> {
    conn: Connection<S>,
    server_version: ProtocolVersion,
    broken: bool,
}

impl RemoteUsb<TcpStream> {
    /// Connect over TCP and run the handshake
    pub async fn connect<A: ToSocketAddrs>(
        addr: A,
        timeouts: Timeouts,
        connect_timeout: Option<Duration>,
    ) -> protocol::Result<Self> {
        let connecting = TcpStream::connect(addr);
        let stream = match connect_timeout {
            Some(limit) => tokio::time::timeout(limit, connecting)
                .await
                .map_err(|_| ProtocolError::Timeout(limit))??,
            None => connecting.await?,
        };
        stream.set_nodelay(true)?;
        if let Ok(peer) = stream.peer_addr() {
            info!("Connected to {}", peer);
        }
        Self::handshake(stream, timeouts).await
    }
}

impl<S> RemoteUsb<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Run the handshake over an established stream
    pub async fn handshake(stream: S, timeouts: Timeouts) -> protocol::Result<Self> {
        let mut conn = Connection::new(stream, timeouts);
        let server_version = conn.client_handshake().await?;
        Ok(Self {
            conn,
            server_version,
            broken: false,
        })
    }

    pub fn server_version(&self) -> ProtocolVersion {
        self.server_version
    }

    /// False once a call has failed
    pub fn is_usable(&self) -> bool {
        !self.broken
    }

    /// Dispatch an arbitrary call
    pub async fn call(&mut self, call: &mut Call) -> protocol::Result<RetVal> {
        if self.broken {
            return Err(ProtocolError::ConnectionClosed);
        }
        match dispatch(Peer::Client(&mut self.conn), call).await {
            Ok(retval) => {
                debug!("{} -> {:?}", call.function(), retval);
                Ok(retval)
            }
            Err(e) => {
                warn!("{} failed, dropping connection: {}", call.function(), e);
                self.broken = true;
                Err(e)
            }
        }
    }

    pub async fn init(&mut self) -> protocol::Result<RetVal> {
        self.call(&mut Call::Init(Init)).await
    }

    /// List the server's devices in enumeration order
    pub async fn list_devices(&mut self) -> protocol::Result<DeviceList> {
        let mut call = Call::empty(FunctionId::ListDevices);
        self.call(&mut call).await?;
        match call {
            Call::ListDevices(op) => Ok(op.devices),
            _ => Ok(DeviceList::default()),
        }
    }

    /// Read a device descriptor; a failure comes back with a zero descriptor
    pub async fn device_descriptor(
        &mut self,
        device: &DeviceRef,
    ) -> protocol::Result<(RetVal, DeviceDescriptor)> {
        let mut call = Call::GetDescriptor(GetDescriptor {
            device: *device,
            ..Default::default()
        });
        let retval = self.call(&mut call).await?;
        let descriptor = match call {
            Call::GetDescriptor(op) => op.descriptor,
            _ => DeviceDescriptor::default(),
        };
        Ok((retval, descriptor))
    }

    /// Open a device, replacing whatever this connection had open
    pub async fn open(&mut self, device: &DeviceRef) -> protocol::Result<(RetVal, DeviceHandle)> {
        let mut call = Call::Open(Open {
            device: *device,
            ..Default::default()
        });
        let retval = self.call(&mut call).await?;
        let handle = match call {
            Call::Open(op) => op.handle,
            _ => DeviceHandle::default(),
        };
        Ok((retval, handle))
    }

    /// Open the first device with these ids
    pub async fn open_with_vid_pid(
        &mut self,
        vendor_id: u16,
        product_id: u16,
    ) -> protocol::Result<(RetVal, DeviceHandle)> {
        let mut call = Call::OpenWithVidPid(OpenWithVidPid {
            vendor_id,
            product_id,
            ..Default::default()
        });
        let retval = self.call(&mut call).await?;
        let handle = match call {
            Call::OpenWithVidPid(op) => op.handle,
            _ => DeviceHandle::default(),
        };
        Ok((retval, handle))
    }

    /// Close the open device (no answer on the wire)
    pub async fn close(&mut self) -> protocol::Result<()> {
        self.call(&mut Call::empty(FunctionId::Close)).await?;
        Ok(())
    }

    pub async fn claim_interface(&mut self, interface: u8) -> protocol::Result<RetVal> {
        self.call(&mut ClaimInterface { interface }.into()).await
    }

    pub async fn release_interface(&mut self, interface: u8) -> protocol::Result<RetVal> {
        self.call(&mut ReleaseInterface { interface }.into()).await
    }

    /// Tell the server this client is done (no answer on the wire)
    pub async fn exit(&mut self) -> protocol::Result<()> {
        self.call(&mut Call::empty(FunctionId::Exit)).await?;
        Ok(())
    }

    /// Close the connection
    pub async fn disconnect(mut self) -> protocol::Result<()> {
        self.conn.shutdown().await
    }
}

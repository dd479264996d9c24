//! Connection wrapper with per-record deadlines

use protocol::{
    CURRENT_VERSION, DeviceList, Encode, FixedRecord, FunctionId, Hello, HelloAck,
    ProtocolError, ProtocolVersion, RetVal, read_device_list, read_function_id, read_record,
    validate_version, write_record,
};
use std::future::Future;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

/// Deadlines applied to a connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timeouts {
    /// Per record read or write inside a call
    pub io: Option<Duration>,
    /// Waiting for the next function id (server only)
    pub idle: Option<Duration>,
}

impl Timeouts {
    /// Build from config seconds, where 0 means no deadline
    pub fn from_secs(io_secs: u64, idle_secs: u64) -> Self {
        let non_zero = |secs| (secs > 0).then(|| Duration::from_secs(secs));
        Self {
            io: non_zero(io_secs),
            idle: non_zero(idle_secs),
        }
    }
}

/// One side of an RPC connection
///
/// Wraps the single stream meaningful to this process's role. Created once
/// per connection and reused for every call on it.
#[derive(Debug)]
pub struct Connection<S> {
    stream: S,
    timeouts: Timeouts,
}

async fn with_deadline<T, F>(limit: Option<Duration>, fut: F) -> protocol::Result<T>
where
    F: Future<Output = protocol::Result<T>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| ProtocolError::Timeout(limit))?,
        None => fut.await,
    }
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, timeouts: Timeouts) -> Self {
        Self { stream, timeouts }
    }

    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    /// Write one record
    pub async fn send<T: Encode>(&mut self, record: &T) -> protocol::Result<()> {
        with_deadline(self.timeouts.io, write_record(&mut self.stream, record)).await
    }

    /// Read one fixed-size record
    pub async fn recv<T: FixedRecord>(&mut self) -> protocol::Result<T> {
        with_deadline(self.timeouts.io, read_record(&mut self.stream)).await
    }

    /// Read a count-prefixed device list
    pub async fn recv_device_list(&mut self) -> protocol::Result<DeviceList> {
        with_deadline(self.timeouts.io, read_device_list(&mut self.stream)).await
    }

    /// Write the function id that opens a call
    pub async fn send_function(&mut self, function: FunctionId) -> protocol::Result<()> {
        self.send(&function).await
    }

    /// Wait for the next function id
    ///
    /// Returns `None` when the peer closed the stream between calls. The raw
    /// integer is returned so the caller can answer an unknown id.
    pub async fn next_function(&mut self) -> protocol::Result<Option<i32>> {
        with_deadline(self.timeouts.idle, read_function_id(&mut self.stream)).await
    }

    /// Client half of the version handshake
    ///
    /// Returns the server's version.
    pub async fn client_handshake(&mut self) -> protocol::Result<ProtocolVersion> {
        self.send(&Hello {
            version: CURRENT_VERSION,
        })
        .await?;
        let ack: HelloAck = self.recv().await?;

        if !ack.retval.is_success() {
            return Err(ProtocolError::HandshakeRejected {
                major: ack.version.major,
                minor: ack.version.minor,
            });
        }
        validate_version(&ack.version)?;

        debug!(
            "Handshake complete (server {}.{}.{})",
            ack.version.major, ack.version.minor, ack.version.patch
        );
        Ok(ack.version)
    }

    /// Server half of the version handshake
    ///
    /// An incompatible client is answered with `Failure` before the error is
    /// returned. A bad magic gets no answer.
    pub async fn server_handshake(&mut self) -> protocol::Result<ProtocolVersion> {
        let hello: Hello = self.recv().await?;

        let verdict = validate_version(&hello.version);
        let retval = RetVal::from_result(&verdict);
        self.send(&HelloAck {
            version: CURRENT_VERSION,
            retval,
        })
        .await?;

        if let Err(e) = verdict {
            warn!("Rejecting client: {}", e);
            return Err(e);
        }
        Ok(hello.version)
    }

    /// Flush and close the write half
    pub async fn shutdown(&mut self) -> protocol::Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::{DeviceRef, MAGIC};
    use tokio::io::{AsyncReadExt, duplex};

    fn pair() -> (
        Connection<tokio::io::DuplexStream>,
        Connection<tokio::io::DuplexStream>,
    ) {
        let (a, b) = duplex(4096);
        (
            Connection::new(a, Timeouts::default()),
            Connection::new(b, Timeouts::default()),
        )
    }

    #[test]
    fn test_timeouts_from_secs() {
        let t = Timeouts::from_secs(30, 0);
        assert_eq!(t.io, Some(Duration::from_secs(30)));
        assert_eq!(t.idle, None);
    }

    #[tokio::test]
    async fn test_handshake() {
        let (mut client, mut server) = pair();

        let (client_side, server_side) =
            tokio::join!(client.client_handshake(), server.server_handshake());
        assert_eq!(client_side.unwrap(), CURRENT_VERSION);
        assert_eq!(server_side.unwrap(), CURRENT_VERSION);
    }

    #[tokio::test]
    async fn test_handshake_major_mismatch() {
        let (a, b) = duplex(4096);
        let mut server = Connection::new(b, Timeouts::default());
        let mut raw = a;

        let mut hello = Vec::new();
        for v in [MAGIC, i32::from(CURRENT_VERSION.major) + 1, 0, 0] {
            hello.extend_from_slice(&v.to_le_bytes());
        }
        raw.write_all(&hello).await.unwrap();

        let result = server.server_handshake().await;
        assert!(matches!(
            result,
            Err(ProtocolError::IncompatibleVersion { .. })
        ));

        let mut ack = [0u8; 16];
        raw.read_exact(&mut ack).await.unwrap();
        assert_eq!(i32::from_le_bytes([ack[12], ack[13], ack[14], ack[15]]), -1);
    }

    #[tokio::test]
    async fn test_handshake_rejected_on_client() {
        let (a, b) = duplex(4096);
        let mut client = Connection::new(a, Timeouts::default());
        let mut raw = b;

        let server = async move {
            let mut hello = [0u8; 16];
            raw.read_exact(&mut hello).await.unwrap();
            let mut ack = Vec::new();
            for v in [1, 0, 0, -1] {
                ack.extend_from_slice(&i32::to_le_bytes(v));
            }
            raw.write_all(&ack).await.unwrap();
            raw
        };

        let (result, _raw) = tokio::join!(client.client_handshake(), server);
        assert!(matches!(
            result,
            Err(ProtocolError::HandshakeRejected { major: 1, minor: 0 })
        ));
    }

    #[tokio::test]
    async fn test_bad_magic() {
        let (a, b) = duplex(4096);
        let mut server = Connection::new(b, Timeouts::default());
        let mut raw = a;
        raw.write_all(&[0u8; 16]).await.unwrap();

        assert!(matches!(
            server.server_handshake().await,
            Err(ProtocolError::BadMagic(0))
        ));
    }

    #[tokio::test]
    async fn test_io_timeout() {
        let (a, _b) = duplex(4096);
        let mut conn = Connection::new(
            a,
            Timeouts {
                io: Some(Duration::from_millis(20)),
                idle: None,
            },
        );

        let result = conn.recv::<DeviceRef>().await;
        assert!(matches!(result, Err(ProtocolError::Timeout(_))));
        assert!(result.unwrap_err().is_transport());
    }

    #[tokio::test]
    async fn test_next_function_eof() {
        let (mut client, mut server) = pair();
        client.shutdown().await.unwrap();
        drop(client);

        assert_eq!(server.next_function().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_next_function_idle_timeout() {
        let (a, _b) = duplex(4096);
        let mut conn = Connection::new(
            a,
            Timeouts {
                io: None,
                idle: Some(Duration::from_millis(20)),
            },
        );

        assert!(matches!(
            conn.next_function().await,
            Err(ProtocolError::Timeout(_))
        ));
    }
}

//! Protocol error types

use std::time::Duration;
use thiserror::Error;

/// Protocol-level errors
///
/// Transport failures (`ConnectionClosed`, `Io`, `Timeout`) end the connection.
/// The remaining variants describe a peer that spoke the protocol incorrectly.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Peer closed the stream, possibly in the middle of a record
    #[error("Connection closed by peer")]
    ConnectionClosed,

    /// I/O error on the underlying stream
    #[error("I/O error: {0}")]
    Io(std::io::Error),

    /// A read or write did not complete before its deadline
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Function identifier outside the declared set
    #[error("Unknown function id: {0}")]
    UnknownFunction(i32),

    /// Buffer ended before a whole record was available
    #[error("Incomplete record: expected {expected} bytes, got {actual}")]
    IncompleteRecord { expected: usize, actual: usize },

    /// Device list count outside `0..=max`
    #[error("Invalid device count: {count} (max: {max})")]
    InvalidCount { count: i32, max: usize },

    /// Integer does not fit the typed field it decodes into
    #[error("Field {field} out of range: {value}")]
    FieldOutOfRange { field: &'static str, value: i32 },

    /// Handshake did not start with the protocol magic
    #[error("Bad handshake magic: {0:#010x}")]
    BadMagic(i32),

    /// Incompatible protocol version detected
    #[error(
        "Incompatible protocol version: {major}.{minor} (expected {expected_major}.{expected_minor})"
    )]
    IncompatibleVersion {
        major: u8,
        minor: u8,
        expected_major: u8,
        expected_minor: u8,
    },

    /// Server answered the handshake with a failure retval
    #[error("Handshake rejected by server (server version {major}.{minor})")]
    HandshakeRejected { major: u8, minor: u8 },
}

impl ProtocolError {
    /// True for failures of the channel itself, as opposed to a malformed peer
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ProtocolError::ConnectionClosed | ProtocolError::Io(_) | ProtocolError::Timeout(_)
        )
    }
}

impl From<std::io::Error> for ProtocolError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::UnexpectedEof
            | ErrorKind::BrokenPipe
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted => ProtocolError::ConnectionClosed,
            _ => ProtocolError::Io(err),
        }
    }
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;

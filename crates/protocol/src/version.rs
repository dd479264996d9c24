//! Protocol version management and the connection handshake
//!
//! Before the first function id, the client sends a [`Hello`] and the server
//! answers with a [`HelloAck`]:
//!
//! ```text
//! client -> server   [magic][major][minor][patch]
//! server -> client   [major][minor][patch][retval]
//! ```

use crate::error::{ProtocolError, Result};
use crate::function::RetVal;
use crate::wire::{Encode, FixedRecord, ensure_remaining, narrow};
use bytes::{Buf, BufMut, BytesMut};

/// First integer of every connection ("IRPC")
pub const MAGIC: i32 = 0x4952_5043;

/// Protocol version using semantic versioning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

/// Current protocol version
pub const CURRENT_VERSION: ProtocolVersion = ProtocolVersion {
    major: 1,
    minor: 0,
    patch: 0,
};

impl ProtocolVersion {
    /// Check if this version is compatible with another version
    pub fn is_compatible_with(&self, other: &ProtocolVersion) -> bool {
        self.major == other.major && self.minor >= other.minor
    }

    fn put(&self, buf: &mut BytesMut) {
        buf.put_i32_le(i32::from(self.major));
        buf.put_i32_le(i32::from(self.minor));
        buf.put_i32_le(i32::from(self.patch));
    }

    fn get<B: Buf>(buf: &mut B) -> Result<Self> {
        Ok(ProtocolVersion {
            major: narrow("major", buf.get_i32_le())?,
            minor: narrow("minor", buf.get_i32_le())?,
            patch: narrow("patch", buf.get_i32_le())?,
        })
    }
}

/// Validate protocol version compatibility
///
/// Compatible if major versions match. Minor version differences are allowed.
pub fn validate_version(peer_version: &ProtocolVersion) -> Result<()> {
    if peer_version.major != CURRENT_VERSION.major {
        return Err(ProtocolError::IncompatibleVersion {
            major: peer_version.major,
            minor: peer_version.minor,
            expected_major: CURRENT_VERSION.major,
            expected_minor: CURRENT_VERSION.minor,
        });
    }
    Ok(())
}

/// Client greeting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hello {
    pub version: ProtocolVersion,
}

impl Encode for Hello {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_i32_le(MAGIC);
        self.version.put(buf);
    }

    fn encoded_len(&self) -> usize {
        Self::WIRE_LEN
    }
}

impl FixedRecord for Hello {
    const INTS: usize = 4;

    fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        ensure_remaining(buf, Self::WIRE_LEN)?;
        let magic = buf.get_i32_le();
        if magic != MAGIC {
            return Err(ProtocolError::BadMagic(magic));
        }
        Ok(Hello {
            version: ProtocolVersion::get(buf)?,
        })
    }
}

/// Server answer to [`Hello`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HelloAck {
    pub version: ProtocolVersion,
    pub retval: RetVal,
}

impl Encode for HelloAck {
    fn encode(&self, buf: &mut BytesMut) {
        self.version.put(buf);
        self.retval.encode(buf);
    }

    fn encoded_len(&self) -> usize {
        Self::WIRE_LEN
    }
}

impl FixedRecord for HelloAck {
    const INTS: usize = 4;

    fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        ensure_remaining(buf, Self::WIRE_LEN)?;
        let version = ProtocolVersion::get(buf)?;
        let retval = RetVal::from_i32(buf.get_i32_le());
        Ok(HelloAck { version, retval })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::encode_to_vec;

    #[test]
    fn test_version_compatibility() {
        let v1_0_0 = ProtocolVersion {
            major: 1,
            minor: 0,
            patch: 0,
        };
        let v1_1_0 = ProtocolVersion {
            major: 1,
            minor: 1,
            patch: 0,
        };
        let v2_0_0 = ProtocolVersion {
            major: 2,
            minor: 0,
            patch: 0,
        };

        assert!(v1_1_0.is_compatible_with(&v1_0_0));
        assert!(!v1_0_0.is_compatible_with(&v1_1_0));
        assert!(!v2_0_0.is_compatible_with(&v1_0_0));
    }

    #[test]
    fn test_validate_version() {
        assert!(validate_version(&CURRENT_VERSION).is_ok());

        let newer_minor = ProtocolVersion {
            major: CURRENT_VERSION.major,
            minor: CURRENT_VERSION.minor + 5,
            patch: 0,
        };
        assert!(validate_version(&newer_minor).is_ok());

        let other_major = ProtocolVersion {
            major: CURRENT_VERSION.major + 1,
            minor: 0,
            patch: 0,
        };
        assert!(matches!(
            validate_version(&other_major),
            Err(ProtocolError::IncompatibleVersion { .. })
        ));
    }

    #[test]
    fn test_hello_starts_with_magic() {
        let bytes = encode_to_vec(&Hello {
            version: CURRENT_VERSION,
        });
        assert_eq!(&bytes[..4], b"CPRI");
        let decoded = Hello::decode(&mut bytes.as_slice()).unwrap();
        assert_eq!(decoded.version, CURRENT_VERSION);
    }

    #[test]
    fn test_hello_bad_magic() {
        let mut bytes = encode_to_vec(&Hello {
            version: CURRENT_VERSION,
        });
        bytes[0] = 0;
        assert!(matches!(
            Hello::decode(&mut bytes.as_slice()),
            Err(ProtocolError::BadMagic(_))
        ));
    }

    #[test]
    fn test_hello_ack_roundtrip() {
        let ack = HelloAck {
            version: CURRENT_VERSION,
            retval: RetVal::Failure,
        };
        let bytes = encode_to_vec(&ack);
        assert_eq!(HelloAck::decode(&mut bytes.as_slice()).unwrap(), ack);
    }
}

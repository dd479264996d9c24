//! Protocol library for usbrpc
//!
//! This crate defines the wire protocol spoken between the USB server and its
//! clients: the function identifiers, the USB records exchanged by each
//! function, the little-endian integer codec, and the version handshake.
//!
//! # Example
//!
//! ```
//! use protocol::{DeviceList, DeviceRef, SessionId, decode_device_list, encode_to_vec};
//!
//! let list = DeviceList::new(vec![DeviceRef {
//!     bus_number: 1,
//!     device_address: 7,
//!     num_configurations: 1,
//!     session_id: SessionId::from_location(1, 7),
//! }]);
//!
//! let bytes = encode_to_vec(&list);
//! let decoded = decode_device_list(&mut bytes.as_slice()).unwrap();
//! assert_eq!(decoded, list);
//! ```
//!
//! # Portability
//!
//! All integers are encoded as 32-bit little-endian regardless of the host,
//! so client and server need not share an architecture.

pub mod error;
pub mod function;
pub mod types;
pub mod version;
pub mod wire;

pub use error::{ProtocolError, Result};
pub use function::{FunctionId, RetVal, Role};
pub use types::{
    DeviceDescriptor, DeviceHandle, DeviceList, DeviceRef, MAX_DEVICES, SessionId, UsbError,
};
pub use version::{CURRENT_VERSION, Hello, HelloAck, MAGIC, ProtocolVersion, validate_version};
pub use wire::{Encode, FixedRecord, INT_WIDTH, check_count, decode_device_list, encode_to_vec};

#[cfg(feature = "async")]
pub use wire::{read_device_list, read_function_id, read_record, write_record};

//! Wire codec for fixed-layout records and count-prefixed arrays
//!
//! Every value on the wire is a sequence of 32-bit signed integers in
//! little-endian byte order. There is no framing: the receiver knows the shape
//! of each response from the function id it sent.
//!
//! # Record Layouts
//!
//! ```text
//! scalar           [i32]
//! DeviceRef        [bus][address][num_configurations][session_id]
//! DeviceDescriptor [14 x i32, field order of the USB device descriptor]
//! DeviceList       [count][count x DeviceRef]        count in 0..=256
//! ```
//!
//! Decoding into narrower typed fields (u8, u16) is range checked; an out of
//! range value is a protocol error, never a silent truncation.

use crate::error::{ProtocolError, Result};
use crate::function::{FunctionId, RetVal};
use crate::types::{
    DeviceDescriptor, DeviceHandle, DeviceList, DeviceRef, MAX_DEVICES, SessionId,
};
use bytes::{Buf, BufMut, BytesMut};

#[cfg(feature = "async")]
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Width in bytes of every integer on the wire
pub const INT_WIDTH: usize = 4;

/// A value that can be written to the wire
pub trait Encode {
    /// Append the wire representation to `buf`
    fn encode(&self, buf: &mut BytesMut);

    /// Number of bytes [`Encode::encode`] appends
    fn encoded_len(&self) -> usize;
}

/// A record whose wire width does not depend on its contents
pub trait FixedRecord: Encode + Sized {
    /// Number of integers the record occupies
    const INTS: usize;

    /// Number of bytes the record occupies
    const WIRE_LEN: usize = Self::INTS * INT_WIDTH;

    /// Decode one record from the front of `buf`
    fn decode<B: Buf>(buf: &mut B) -> Result<Self>;
}

pub(crate) fn ensure_remaining<B: Buf>(buf: &B, needed: usize) -> Result<()> {
    if buf.remaining() < needed {
        return Err(ProtocolError::IncompleteRecord {
            expected: needed,
            actual: buf.remaining(),
        });
    }
    Ok(())
}

pub(crate) fn narrow<T: TryFrom<i32>>(field: &'static str, value: i32) -> Result<T> {
    T::try_from(value).map_err(|_| ProtocolError::FieldOutOfRange { field, value })
}

/// Validate a received device count before anything is allocated for it
pub fn check_count(count: i32) -> Result<usize> {
    usize::try_from(count)
        .ok()
        .filter(|n| *n <= MAX_DEVICES)
        .ok_or(ProtocolError::InvalidCount {
            count,
            max: MAX_DEVICES,
        })
}

impl Encode for i32 {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_i32_le(*self);
    }

    fn encoded_len(&self) -> usize {
        INT_WIDTH
    }
}

impl FixedRecord for i32 {
    const INTS: usize = 1;

    fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        ensure_remaining(buf, Self::WIRE_LEN)?;
        Ok(buf.get_i32_le())
    }
}

impl Encode for u8 {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_i32_le(i32::from(*self));
    }

    fn encoded_len(&self) -> usize {
        INT_WIDTH
    }
}

impl FixedRecord for u8 {
    const INTS: usize = 1;

    fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        narrow("u8", i32::decode(buf)?)
    }
}

impl Encode for u16 {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_i32_le(i32::from(*self));
    }

    fn encoded_len(&self) -> usize {
        INT_WIDTH
    }
}

impl FixedRecord for u16 {
    const INTS: usize = 1;

    fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        narrow("u16", i32::decode(buf)?)
    }
}

impl Encode for FunctionId {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_i32_le(self.as_i32());
    }

    fn encoded_len(&self) -> usize {
        INT_WIDTH
    }
}

impl Encode for RetVal {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_i32_le(self.as_i32());
    }

    fn encoded_len(&self) -> usize {
        INT_WIDTH
    }
}

impl FixedRecord for RetVal {
    const INTS: usize = 1;

    fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        Ok(RetVal::from_i32(i32::decode(buf)?))
    }
}

impl Encode for DeviceRef {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_i32_le(i32::from(self.bus_number));
        buf.put_i32_le(i32::from(self.device_address));
        buf.put_i32_le(i32::from(self.num_configurations));
        buf.put_i32_le(self.session_id.0);
    }

    fn encoded_len(&self) -> usize {
        Self::WIRE_LEN
    }
}

impl FixedRecord for DeviceRef {
    const INTS: usize = 4;

    fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        ensure_remaining(buf, Self::WIRE_LEN)?;
        Ok(DeviceRef {
            bus_number: narrow("bus_number", buf.get_i32_le())?,
            device_address: narrow("device_address", buf.get_i32_le())?,
            num_configurations: narrow("num_configurations", buf.get_i32_le())?,
            session_id: SessionId(buf.get_i32_le()),
        })
    }
}

impl Encode for DeviceHandle {
    fn encode(&self, buf: &mut BytesMut) {
        self.dev.encode(buf);
    }

    fn encoded_len(&self) -> usize {
        Self::WIRE_LEN
    }
}

impl FixedRecord for DeviceHandle {
    const INTS: usize = DeviceRef::INTS;

    fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        Ok(DeviceHandle {
            dev: DeviceRef::decode(buf)?,
        })
    }
}

impl Encode for DeviceDescriptor {
    fn encode(&self, buf: &mut BytesMut) {
        for value in [
            i32::from(self.length),
            i32::from(self.descriptor_type),
            i32::from(self.usb_version),
            i32::from(self.device_class),
            i32::from(self.device_sub_class),
            i32::from(self.device_protocol),
            i32::from(self.max_packet_size0),
            i32::from(self.vendor_id),
            i32::from(self.product_id),
            i32::from(self.device_version),
            i32::from(self.manufacturer_index),
            i32::from(self.product_index),
            i32::from(self.serial_number_index),
            i32::from(self.num_configurations),
        ] {
            buf.put_i32_le(value);
        }
    }

    fn encoded_len(&self) -> usize {
        Self::WIRE_LEN
    }
}

impl FixedRecord for DeviceDescriptor {
    const INTS: usize = 14;

    fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        ensure_remaining(buf, Self::WIRE_LEN)?;
        Ok(DeviceDescriptor {
            length: narrow("bLength", buf.get_i32_le())?,
            descriptor_type: narrow("bDescriptorType", buf.get_i32_le())?,
            usb_version: narrow("bcdUSB", buf.get_i32_le())?,
            device_class: narrow("bDeviceClass", buf.get_i32_le())?,
            device_sub_class: narrow("bDeviceSubClass", buf.get_i32_le())?,
            device_protocol: narrow("bDeviceProtocol", buf.get_i32_le())?,
            max_packet_size0: narrow("bMaxPacketSize0", buf.get_i32_le())?,
            vendor_id: narrow("idVendor", buf.get_i32_le())?,
            product_id: narrow("idProduct", buf.get_i32_le())?,
            device_version: narrow("bcdDevice", buf.get_i32_le())?,
            manufacturer_index: narrow("iManufacturer", buf.get_i32_le())?,
            product_index: narrow("iProduct", buf.get_i32_le())?,
            serial_number_index: narrow("iSerialNumber", buf.get_i32_le())?,
            num_configurations: narrow("bNumConfigurations", buf.get_i32_le())?,
        })
    }
}

impl Encode for DeviceList {
    fn encode(&self, buf: &mut BytesMut) {
        // DeviceList::new already bounds the length to MAX_DEVICES
        buf.put_i32_le(self.len() as i32);
        for device in self.iter() {
            device.encode(buf);
        }
    }

    fn encoded_len(&self) -> usize {
        INT_WIDTH + self.len() * DeviceRef::WIRE_LEN
    }
}

/// Decode a count-prefixed device list from an in-memory buffer
pub fn decode_device_list<B: Buf>(buf: &mut B) -> Result<DeviceList> {
    let count = check_count(i32::decode(buf)?)?;
    ensure_remaining(buf, count * DeviceRef::WIRE_LEN)?;
    let devices = (0..count)
        .map(|_| DeviceRef::decode(buf))
        .collect::<Result<Vec<_>>>()?;
    Ok(DeviceList::new(devices))
}

impl<A: Encode, B: Encode> Encode for (A, B) {
    fn encode(&self, buf: &mut BytesMut) {
        self.0.encode(buf);
        self.1.encode(buf);
    }

    fn encoded_len(&self) -> usize {
        self.0.encoded_len() + self.1.encoded_len()
    }
}

impl<A: FixedRecord, B: FixedRecord> FixedRecord for (A, B) {
    const INTS: usize = A::INTS + B::INTS;

    fn decode<Bf: Buf>(buf: &mut Bf) -> Result<Self> {
        let first = A::decode(buf)?;
        let second = B::decode(buf)?;
        Ok((first, second))
    }
}

/// Encode any value into a freshly allocated buffer
///
/// # Example
/// ```
/// use protocol::{DeviceRef, SessionId, encode_to_vec};
///
/// let dev = DeviceRef {
///     bus_number: 1,
///     device_address: 4,
///     num_configurations: 1,
///     session_id: SessionId(0x104),
/// };
/// let bytes = encode_to_vec(&dev);
/// assert_eq!(bytes.len(), 16);
/// assert_eq!(&bytes[..4], &[1, 0, 0, 0]);
/// ```
pub fn encode_to_vec<T: Encode + ?Sized>(value: &T) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(value.encoded_len());
    value.encode(&mut buf);
    buf.to_vec()
}

/// Write one value and flush
#[cfg(feature = "async")]
pub async fn write_record<W, T>(writer: &mut W, record: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Encode + ?Sized,
{
    let mut buf = BytesMut::with_capacity(record.encoded_len());
    record.encode(&mut buf);
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

/// Read exactly one fixed-width record
#[cfg(feature = "async")]
pub async fn read_record<R, T>(reader: &mut R) -> Result<T>
where
    R: AsyncRead + Unpin,
    T: FixedRecord,
{
    let mut bytes = vec![0u8; T::WIRE_LEN];
    reader.read_exact(&mut bytes).await?;
    T::decode(&mut bytes.as_slice())
}

/// Read a count-prefixed device list
///
/// The count is validated against [`MAX_DEVICES`] before the elements are read.
#[cfg(feature = "async")]
pub async fn read_device_list<R>(reader: &mut R) -> Result<DeviceList>
where
    R: AsyncRead + Unpin,
{
    let count = check_count(read_record::<R, i32>(reader).await?)?;
    let mut bytes = vec![0u8; count * DeviceRef::WIRE_LEN];
    reader.read_exact(&mut bytes).await?;

    let mut slice = bytes.as_slice();
    let devices = (0..count)
        .map(|_| DeviceRef::decode(&mut slice))
        .collect::<Result<Vec<_>>>()?;
    Ok(DeviceList::new(devices))
}

/// Read the leading integer of the next exchange
///
/// Returns `None` when the peer closed the stream cleanly between exchanges.
/// A close after a partial integer is [`ProtocolError::ConnectionClosed`].
#[cfg(feature = "async")]
pub async fn read_function_id<R>(reader: &mut R) -> Result<Option<i32>>
where
    R: AsyncRead + Unpin,
{
    let mut bytes = [0u8; INT_WIDTH];
    let n = reader.read(&mut bytes).await?;
    if n == 0 {
        return Ok(None);
    }
    reader.read_exact(&mut bytes[n..]).await?;
    Ok(Some(i32::from_le_bytes(bytes)))
}

//! Wire-level field primitives shared by every packet codec: length-prefixed
//! strings and byte arrays, uuids, and the fixed-width integers, all over
//! `bytes` cursors. Reads are bounds-checked; a field running past the frame
//! is a framing error, never a panic.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use uuid::Uuid;

use crate::core::varint::{get_varint, put_varint};
use crate::error::{constants, ProtocolError, Result};

/// Longest string the protocol accepts, in UTF-8 bytes.
pub const MAX_STRING_LEN: usize = 32_767;

fn ensure(buf: &impl Buf, needed: usize) -> Result<()> {
    if buf.remaining() < needed {
        return Err(ProtocolError::Framing(
            constants::ERR_TRUNCATED_FIELD.to_string(),
        ));
    }
    Ok(())
}

/// Read a varint-length-prefixed UTF-8 string.
pub fn get_string(buf: &mut Bytes) -> Result<String> {
    let len = get_varint(buf)? as usize;
    if len > MAX_STRING_LEN {
        return Err(ProtocolError::Framing(format!(
            "String length {len} exceeds maximum {MAX_STRING_LEN}"
        )));
    }
    ensure(buf, len)?;
    let raw = buf.split_to(len);
    String::from_utf8(raw.to_vec())
        .map_err(|_| ProtocolError::Framing("String is not valid UTF-8".to_string()))
}

/// Write a varint-length-prefixed UTF-8 string.
pub fn put_string(buf: &mut BytesMut, value: &str) {
    put_varint(buf, value.len() as u32);
    buf.put_slice(value.as_bytes());
}

/// Read a varint-length-prefixed byte array.
pub fn get_byte_array(buf: &mut Bytes) -> Result<Vec<u8>> {
    let len = get_varint(buf)? as usize;
    ensure(buf, len)?;
    Ok(buf.split_to(len).to_vec())
}

/// Write a varint-length-prefixed byte array.
pub fn put_byte_array(buf: &mut BytesMut, value: &[u8]) {
    put_varint(buf, value.len() as u32);
    buf.put_slice(value);
}

/// Read a 128-bit uuid, big-endian.
pub fn get_uuid(buf: &mut Bytes) -> Result<Uuid> {
    ensure(buf, 16)?;
    Ok(Uuid::from_u128(buf.get_u128()))
}

/// Write a 128-bit uuid, big-endian.
pub fn put_uuid(buf: &mut BytesMut, value: &Uuid) {
    buf.put_u128(value.as_u128());
}

pub fn get_bool(buf: &mut Bytes) -> Result<bool> {
    ensure(buf, 1)?;
    Ok(buf.get_u8() != 0)
}

pub fn put_bool(buf: &mut BytesMut, value: bool) {
    buf.put_u8(u8::from(value));
}

pub fn get_u16(buf: &mut Bytes) -> Result<u16> {
    ensure(buf, 2)?;
    Ok(buf.get_u16())
}

pub fn get_i64(buf: &mut Bytes) -> Result<i64> {
    ensure(buf, 8)?;
    Ok(buf.get_i64())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_string_roundtrip() {
        let mut buf = BytesMut::new();
        put_string(&mut buf, "Alice");
        let mut bytes = Bytes::from(buf);
        assert_eq!(get_string(&mut bytes).unwrap(), "Alice");
        assert!(bytes.is_empty());
    }

    #[test]
    fn test_string_unicode() {
        let mut buf = BytesMut::new();
        put_string(&mut buf, "víðir_åke");
        let mut bytes = Bytes::from(buf);
        assert_eq!(get_string(&mut bytes).unwrap(), "víðir_åke");
    }

    #[test]
    fn test_string_truncated_rejected() {
        let mut buf = BytesMut::new();
        put_string(&mut buf, "truncate-me");
        let mut short = Bytes::from(buf).slice(..4);
        assert!(get_string(&mut short).is_err());
    }

    #[test]
    fn test_byte_array_roundtrip() {
        let payload = vec![0u8, 1, 2, 254, 255];
        let mut buf = BytesMut::new();
        put_byte_array(&mut buf, &payload);
        let mut bytes = Bytes::from(buf);
        assert_eq!(get_byte_array(&mut bytes).unwrap(), payload);
    }

    #[test]
    fn test_uuid_roundtrip() {
        let id = Uuid::new_v4();
        let mut buf = BytesMut::new();
        put_uuid(&mut buf, &id);
        assert_eq!(buf.len(), 16);
        let mut bytes = Bytes::from(buf);
        assert_eq!(get_uuid(&mut bytes).unwrap(), id);
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        let mut buf = BytesMut::new();
        put_byte_array(&mut buf, &[0xff, 0xfe, 0xfd]);
        let mut bytes = Bytes::from(buf);
        assert!(get_string(&mut bytes).is_err());
    }
}

//! Variable-length integer encoding.
//!
//! Unsigned values use LEB128: 7 bits per byte, least significant group
//! first, high bit set on every byte except the last. Signed values are
//! zig-zag mapped first so small magnitudes of either sign stay short.
//! These routines run once per posting and once per dictionary entry, so
//! the `put_*` variants append into a caller-owned buffer instead of
//! allocating.

use std::io::{Read, Write};

use byteorder::ReadBytesExt;

use crate::error::{Result, StrataError};

/// Maximum encoded length of a u32.
pub const MAX_VARINT_U32_LEN: usize = 5;

/// Maximum encoded length of a u64.
pub const MAX_VARINT_U64_LEN: usize = 10;

/// Append a u64 to `buf` in variable-length form.
#[inline]
pub fn put_u64(buf: &mut Vec<u8>, value: u64) {
    let mut val = value;
    loop {
        let byte = (val & 0x7F) as u8;
        val >>= 7;
        if val == 0 {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

/// Append a u32 to `buf` in variable-length form.
#[inline]
pub fn put_u32(buf: &mut Vec<u8>, value: u32) {
    put_u64(buf, value as u64)
}

/// Append a signed value to `buf` using zig-zag encoding.
#[inline]
pub fn put_i64(buf: &mut Vec<u8>, value: i64) {
    put_u64(buf, zigzag_encode(value))
}

/// Encode a u32 value using variable-length encoding.
pub fn encode_u32(value: u32) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(MAX_VARINT_U32_LEN);
    put_u32(&mut bytes, value);
    bytes
}

/// Encode a u64 value using variable-length encoding.
pub fn encode_u64(value: u64) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(MAX_VARINT_U64_LEN);
    put_u64(&mut bytes, value);
    bytes
}

/// Encode a signed value using zig-zag plus variable-length encoding.
pub fn encode_i64(value: i64) -> Vec<u8> {
    encode_u64(zigzag_encode(value))
}

/// Decode a u64 from the front of `bytes`, returning the value and the
/// number of bytes consumed.
#[inline]
pub fn decode_u64(bytes: &[u8]) -> Result<(u64, usize)> {
    let mut result = 0u64;
    let mut shift = 0u32;

    for (i, &byte) in bytes.iter().enumerate() {
        if shift >= 64 || (shift == 63 && byte > 1) {
            return Err(StrataError::corrupt("VarInt overflow"));
        }
        result |= ((byte & 0x7F) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok((result, i + 1));
        }
        shift += 7;
    }

    Err(StrataError::corrupt("Incomplete VarInt"))
}

/// Decode a u32 from the front of `bytes`.
#[inline]
pub fn decode_u32(bytes: &[u8]) -> Result<(u32, usize)> {
    let (value, read) = decode_u64(bytes)?;
    if read > MAX_VARINT_U32_LEN || value > u32::MAX as u64 {
        return Err(StrataError::corrupt("VarInt overflow"));
    }
    Ok((value as u32, read))
}

/// Decode a zig-zag encoded signed value from the front of `bytes`.
pub fn decode_i64(bytes: &[u8]) -> Result<(i64, usize)> {
    let (value, read) = decode_u64(bytes)?;
    Ok((zigzag_decode(value), read))
}

/// Write a variable-length encoded u32 to a writer.
pub fn write_u32<W: Write>(writer: &mut W, value: u32) -> Result<usize> {
    let bytes = encode_u32(value);
    writer.write_all(&bytes)?;
    Ok(bytes.len())
}

/// Write a variable-length encoded u64 to a writer.
pub fn write_u64<W: Write>(writer: &mut W, value: u64) -> Result<usize> {
    let bytes = encode_u64(value);
    writer.write_all(&bytes)?;
    Ok(bytes.len())
}

/// Read a variable-length encoded u32 from a reader.
pub fn read_u32<R: Read>(reader: &mut R) -> Result<u32> {
    let value = read_u64(reader)?;
    u32::try_from(value).map_err(|_| StrataError::corrupt("VarInt overflow"))
}

/// Read a variable-length encoded u64 from a reader.
pub fn read_u64<R: Read>(reader: &mut R) -> Result<u64> {
    let mut result = 0u64;
    let mut shift = 0u32;

    loop {
        let byte = reader.read_u8()?;

        if shift >= 64 || (shift == 63 && byte > 1) {
            return Err(StrataError::corrupt("VarInt overflow"));
        }

        result |= ((byte & 0x7F) as u64) << shift;

        if byte & 0x80 == 0 {
            return Ok(result);
        }

        shift += 7;
    }
}

#[inline]
fn zigzag_encode(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

#[inline]
fn zigzag_decode(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_encode_decode_u32() {
        let test_values = [0, 1, 127, 128, 255, 256, 16383, 16384, u32::MAX];

        for &value in &test_values {
            let encoded = encode_u32(value);
            let (decoded, bytes_read) = decode_u32(&encoded).unwrap();

            assert_eq!(value, decoded);
            assert_eq!(encoded.len(), bytes_read);
        }
    }

    #[test]
    fn test_encode_decode_u64() {
        let test_values = [0, 1, 127, 128, 255, 256, 16383, 16384, u64::MAX];

        for &value in &test_values {
            let encoded = encode_u64(value);
            let (decoded, bytes_read) = decode_u64(&encoded).unwrap();

            assert_eq!(value, decoded);
            assert_eq!(encoded.len(), bytes_read);
        }
    }

    #[test]
    fn test_signed_values() {
        for value in [0i64, 1, -1, 63, -64, 64, i64::MAX, i64::MIN] {
            let encoded = encode_i64(value);
            let (decoded, read) = decode_i64(&encoded).unwrap();
            assert_eq!(value, decoded);
            assert_eq!(encoded.len(), read);
        }
        // Small magnitudes of either sign fit in one byte.
        assert_eq!(encode_i64(-1).len(), 1);
        assert_eq!(encode_i64(63).len(), 1);
    }

    #[test]
    fn test_put_appends() {
        let mut buf = vec![0xAA];
        put_u32(&mut buf, 300);
        put_u64(&mut buf, 1);
        assert_eq!(buf, vec![0xAA, 0xAC, 0x02, 0x01]);
    }

    #[test]
    fn test_write_read_stream() {
        let mut buffer = Vec::new();
        let written = write_u32(&mut buffer, 12345).unwrap() + write_u64(&mut buffer, 1 << 40).unwrap();
        assert_eq!(written, buffer.len());

        let mut cursor = Cursor::new(buffer);
        assert_eq!(read_u32(&mut cursor).unwrap(), 12345);
        assert_eq!(read_u64(&mut cursor).unwrap(), 1 << 40);
    }

    #[test]
    fn test_encoding_efficiency() {
        assert_eq!(encode_u32(0).len(), 1);
        assert_eq!(encode_u32(127).len(), 1);
        assert_eq!(encode_u32(128).len(), 2);
        assert_eq!(encode_u32(16383).len(), 2);
        assert_eq!(encode_u32(16384).len(), 3);
        assert_eq!(encode_u32(u32::MAX).len(), MAX_VARINT_U32_LEN);
        assert_eq!(encode_u64(u64::MAX).len(), MAX_VARINT_U64_LEN);
    }

    #[test]
    fn test_incomplete_varint() {
        let incomplete = vec![0x80];
        assert!(decode_u32(&incomplete).unwrap_err().is_corruption());
        assert!(decode_u64(&incomplete).unwrap_err().is_corruption());
    }

    #[test]
    fn test_overflow() {
        let overflow_data = vec![0xFF; 11];
        assert!(decode_u64(&overflow_data).is_err());
        assert!(decode_u32(&encode_u64(u32::MAX as u64 + 1)).is_err());
    }
}

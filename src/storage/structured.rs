//! Structured binary I/O for index files.
//!
//! Every index file is produced by a [`StructWriter`], which keeps a running
//! CRC-32 over all bytes written and appends it on [`StructWriter::close`].
//! Files are read back whole and decoded with [`SliceReader`];
//! [`verify_checksum`] strips and checks the trailing CRC.

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use crc32fast::Hasher;

use crate::error::{Result, StrataError};
use crate::storage::StorageOutput;
use crate::util::varint::{decode_u32, decode_u64, put_u64};

/// Length of the trailing checksum written by [`StructWriter::close`].
pub const CHECKSUM_LEN: usize = 4;

/// A checksumming writer for binary data.
pub struct StructWriter<W: StorageOutput> {
    writer: W,
    hasher: Hasher,
    position: u64,
    scratch: Vec<u8>,
}

impl<W: StorageOutput> StructWriter<W> {
    /// Create a new structured file writer.
    pub fn new(writer: W) -> Self {
        StructWriter {
            writer,
            hasher: Hasher::new(),
            position: 0,
            scratch: Vec::with_capacity(16),
        }
    }

    /// Write a u8 value.
    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.write_raw(&[value])
    }

    /// Write a u32 value (little-endian).
    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.write_raw(&value.to_le_bytes())
    }

    /// Write a u64 value (little-endian).
    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        self.write_raw(&value.to_le_bytes())
    }

    /// Write a f32 value (little-endian).
    pub fn write_f32(&mut self, value: f32) -> Result<()> {
        self.write_raw(&value.to_le_bytes())
    }

    /// Write a variable-length integer.
    pub fn write_varint(&mut self, value: u64) -> Result<()> {
        let mut scratch = std::mem::take(&mut self.scratch);
        scratch.clear();
        put_u64(&mut scratch, value);
        let result = self.write_raw(&scratch);
        self.scratch = scratch;
        result
    }

    /// Write a string with length prefix.
    pub fn write_string(&mut self, value: &str) -> Result<()> {
        self.write_bytes(value.as_bytes())
    }

    /// Write raw bytes with length prefix.
    pub fn write_bytes(&mut self, value: &[u8]) -> Result<()> {
        self.write_varint(value.len() as u64)?;
        self.write_raw(value)
    }

    /// Write raw bytes without length prefix.
    pub fn write_raw(&mut self, value: &[u8]) -> Result<()> {
        self.writer.write_all(value)?;
        self.hasher.update(value);
        self.position += value.len() as u64;
        Ok(())
    }

    /// Get current file position.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Append the checksum, then flush and close the output.
    pub fn close(mut self) -> Result<u64> {
        let checksum = self.hasher.clone().finalize();
        self.writer.write_u32::<LittleEndian>(checksum)?;
        self.writer.flush_and_sync()?;
        self.writer.close()?;
        Ok(self.position + CHECKSUM_LEN as u64)
    }
}

/// Check the trailing CRC-32 of a whole file and return the body.
pub fn verify_checksum<'a>(data: &'a [u8], name: &str) -> Result<&'a [u8]> {
    if data.len() < CHECKSUM_LEN {
        return Err(StrataError::corrupt(format!("{name}: file too short for checksum")));
    }
    let (body, tail) = data.split_at(data.len() - CHECKSUM_LEN);
    let stored = LittleEndian::read_u32(tail);
    let actual = crc32fast::hash(body);
    if stored != actual {
        return Err(StrataError::corrupt(format!(
            "{name}: checksum mismatch (stored {stored:08x}, computed {actual:08x})"
        )));
    }
    Ok(body)
}

/// Bounds-checked decoder over an in-memory byte slice.
#[derive(Debug, Clone)]
pub struct SliceReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SliceReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        SliceReader { data, pos: 0 }
    }

    /// Start reading at `pos`.
    pub fn at(data: &'a [u8], pos: usize) -> Result<Self> {
        if pos > data.len() {
            return Err(StrataError::corrupt(format!(
                "offset {pos} beyond end of data ({})",
                data.len()
            )));
        }
        Ok(SliceReader { data, pos })
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Borrow the next `len` bytes.
    pub fn read_raw(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| {
                StrataError::corrupt(format!(
                    "read of {len} bytes at {} overruns {} bytes",
                    self.pos,
                    self.data.len()
                ))
            })?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_raw(1)?[0])
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.read_raw(4)?))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(LittleEndian::read_u64(self.read_raw(8)?))
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(LittleEndian::read_f32(self.read_raw(4)?))
    }

    pub fn read_varint(&mut self) -> Result<u64> {
        let (value, read) = decode_u64(&self.data[self.pos..])?;
        self.pos += read;
        Ok(value)
    }

    pub fn read_varint_u32(&mut self) -> Result<u32> {
        let (value, read) = decode_u32(&self.data[self.pos..])?;
        self.pos += read;
        Ok(value)
    }

    /// Read a length-prefixed byte string.
    pub fn read_bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.read_varint()? as usize;
        self.read_raw(len)
    }

    /// Read a length-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> Result<&'a str> {
        let bytes = self.read_bytes()?;
        std::str::from_utf8(bytes).map_err(|e| StrataError::corrupt(format!("Invalid UTF-8: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStorage, Storage};

    #[test]
    fn test_struct_writer_slice_reader() {
        let storage = MemoryStorage::new();

        let output = storage.create_output("test.struct").unwrap();
        let mut writer = StructWriter::new(output);
        writer.write_u8(42).unwrap();
        writer.write_u32(5678).unwrap();
        writer.write_u64(9876543210).unwrap();
        writer.write_varint(12345).unwrap();
        writer.write_f32(std::f32::consts::PI).unwrap();
        writer.write_string("Hello, World!").unwrap();
        writer.write_bytes(b"binary data").unwrap();
        let position = writer.position();
        let total = writer.close().unwrap();
        assert_eq!(total, position + CHECKSUM_LEN as u64);

        let data = storage.read_all("test.struct").unwrap();
        assert_eq!(data.len() as u64, total);
        let body = verify_checksum(&data, "test.struct").unwrap();

        let mut reader = SliceReader::new(body);
        assert_eq!(reader.read_u8().unwrap(), 42);
        assert_eq!(reader.read_u32().unwrap(), 5678);
        assert_eq!(reader.read_u64().unwrap(), 9876543210);
        assert_eq!(reader.read_varint().unwrap(), 12345);
        assert_eq!(reader.read_f32().unwrap(), std::f32::consts::PI);
        assert_eq!(reader.read_string().unwrap(), "Hello, World!");
        assert_eq!(reader.read_bytes().unwrap(), b"binary data");
        assert!(reader.is_empty());
    }

    #[test]
    fn test_checksum_detects_flipped_byte() {
        let storage = MemoryStorage::new();
        let mut writer = StructWriter::new(storage.create_output("f").unwrap());
        writer.write_raw(b"some payload bytes").unwrap();
        writer.close().unwrap();

        let mut data = storage.read_all("f").unwrap().to_vec();
        data[3] ^= 0x40;
        assert!(verify_checksum(&data, "f").unwrap_err().is_corruption());
        assert!(verify_checksum(&[1, 2], "f").is_err());
    }

    #[test]
    fn test_slice_reader_bounds() {
        let data = [1u8, 2, 3];
        let mut reader = SliceReader::new(&data);
        assert!(reader.read_u32().unwrap_err().is_corruption());
        assert!(SliceReader::at(&data, 4).is_err());

        let mut reader = SliceReader::at(&data, 1).unwrap();
        assert_eq!(reader.remaining(), 2);
        assert_eq!(reader.read_raw(2).unwrap(), &[2, 3]);
    }
}

//! Stored-fields store.
//!
//! One record per document in id order, followed by an offset table giving
//! O(1) access to any record. Stored fields use it with a
//! `BTreeMap<String, FieldValue>` record; term vectors reuse the same file
//! layout with a different record type.

use std::collections::BTreeMap;
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::document::FieldValue;
use crate::error::{Result, StrataError};
use crate::storage::structured::{SliceReader, StructWriter, verify_checksum};
use crate::storage::{Storage, StorageOutput};

const RECORDS_MAGIC: u32 = 0x5354_4F52; // "STOR"
const RECORDS_VERSION: u32 = 1;
const FOOTER_LEN: usize = 12;

/// Stored values of one document.
pub type StoredFields = BTreeMap<String, FieldValue>;

/// Term vector of one document: per field, sorted `(term, weight)` pairs.
pub type TermVectors = BTreeMap<String, Vec<(Vec<u8>, f32)>>;

/// Streams records into a new file.
pub struct RecordWriter {
    writer: StructWriter<Box<dyn StorageOutput>>,
    offsets: Vec<u64>,
}

impl RecordWriter {
    pub fn create(storage: &dyn Storage, name: &str) -> Result<Self> {
        let mut writer = StructWriter::new(storage.create_output(name)?);
        writer.write_u32(RECORDS_MAGIC)?;
        writer.write_u32(RECORDS_VERSION)?;
        let start = writer.position();
        Ok(RecordWriter {
            writer,
            offsets: vec![start],
        })
    }

    /// Append an already serialized record.
    pub fn add_raw(&mut self, record: &[u8]) -> Result<()> {
        self.writer.write_raw(record)?;
        self.offsets.push(self.writer.position());
        Ok(())
    }

    /// Serialize and append a record.
    pub fn add<T: Serialize>(&mut self, record: &T) -> Result<()> {
        let bytes = bincode::serialize(record)?;
        self.add_raw(&bytes)
    }

    pub fn doc_count(&self) -> u32 {
        (self.offsets.len() - 1) as u32
    }

    /// Write the offset table and footer, then close the file.
    pub fn finish(mut self) -> Result<u64> {
        let index_offset = self.writer.position();
        let doc_count = self.doc_count();
        for offset in &self.offsets {
            self.writer.write_u64(*offset)?;
        }
        self.writer.write_u64(index_offset)?;
        self.writer.write_u32(doc_count)?;
        self.writer.close()
    }
}

/// Random access to the records of one file.
#[derive(Debug, Clone)]
pub struct RecordReader {
    data: Arc<[u8]>,
    index_offset: usize,
    doc_count: u32,
}

impl RecordReader {
    pub fn open(data: Arc<[u8]>, name: &str) -> Result<Self> {
        let body = verify_checksum(&data, name)?;
        if body.len() < 8 + FOOTER_LEN {
            return Err(StrataError::corrupt(format!("{name}: record file too short")));
        }

        let mut header = SliceReader::new(body);
        if header.read_u32()? != RECORDS_MAGIC {
            return Err(StrataError::corrupt(format!("{name}: not a record file")));
        }
        let version = header.read_u32()?;
        if version != RECORDS_VERSION {
            return Err(StrataError::corrupt(format!(
                "{name}: unsupported record file version {version}"
            )));
        }

        let mut footer = SliceReader::at(body, body.len() - FOOTER_LEN)?;
        let index_offset = footer.read_u64()? as usize;
        let doc_count = footer.read_u32()?;

        let index_len = (doc_count as usize + 1) * 8;
        if index_offset.checked_add(index_len) != Some(body.len() - FOOTER_LEN) {
            return Err(StrataError::corrupt(format!("{name}: bad record index location")));
        }

        Ok(RecordReader {
            data,
            index_offset,
            doc_count,
        })
    }

    pub fn doc_count(&self) -> u32 {
        self.doc_count
    }

    fn offset(&self, slot: u32) -> usize {
        let at = self.index_offset + slot as usize * 8;
        LittleEndian::read_u64(&self.data[at..at + 8]) as usize
    }

    /// Serialized record of document `doc`.
    pub fn get_raw(&self, doc: u32) -> Result<&[u8]> {
        if doc >= self.doc_count {
            return Err(StrataError::NoSuchDocument(doc as u64));
        }
        let start = self.offset(doc);
        let end = self.offset(doc + 1);
        if start > end || end > self.index_offset {
            return Err(StrataError::corrupt(format!("record {doc} has invalid bounds")));
        }
        Ok(&self.data[start..end])
    }

    /// Deserialized record of document `doc`.
    pub fn get<T: DeserializeOwned>(&self, doc: u32) -> Result<T> {
        bincode::deserialize(self.get_raw(doc)?)
            .map_err(|e| StrataError::corrupt(format!("record {doc}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn fields(pairs: &[(&str, FieldValue)]) -> StoredFields {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_random_access() {
        let storage = MemoryStorage::new();
        let mut writer = RecordWriter::create(&storage, "s.sto").unwrap();
        let docs = vec![
            fields(&[("id", FieldValue::Integer(1)), ("title", "alfa".into())]),
            StoredFields::new(),
            fields(&[("id", FieldValue::Integer(3))]),
        ];
        for doc in &docs {
            writer.add(doc).unwrap();
        }
        assert_eq!(writer.doc_count(), 3);
        writer.finish().unwrap();

        let reader = RecordReader::open(storage.read_all("s.sto").unwrap(), "s.sto").unwrap();
        assert_eq!(reader.doc_count(), 3);
        assert_eq!(reader.get::<StoredFields>(2).unwrap(), docs[2]);
        assert_eq!(reader.get::<StoredFields>(0).unwrap(), docs[0]);
        assert!(reader.get::<StoredFields>(1).unwrap().is_empty());
        assert!(matches!(
            reader.get::<StoredFields>(3),
            Err(StrataError::NoSuchDocument(3))
        ));
    }

    #[test]
    fn test_empty_store() {
        let storage = MemoryStorage::new();
        RecordWriter::create(&storage, "e.sto").unwrap().finish().unwrap();
        let reader = RecordReader::open(storage.read_all("e.sto").unwrap(), "e.sto").unwrap();
        assert_eq!(reader.doc_count(), 0);
        assert!(reader.get_raw(0).is_err());
    }

    #[test]
    fn test_corruption_detected_on_open() {
        let storage = MemoryStorage::new();
        let mut writer = RecordWriter::create(&storage, "c.sto").unwrap();
        writer.add(&fields(&[("a", "b".into())])).unwrap();
        writer.finish().unwrap();

        let mut data = storage.read_all("c.sto").unwrap().to_vec();
        data[10] ^= 1;
        let err = RecordReader::open(Arc::from(data), "c.sto").unwrap_err();
        assert!(err.is_corruption());
    }
}

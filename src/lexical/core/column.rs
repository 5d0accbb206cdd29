//! Columnar per-document values for sorting and faceting.
//!
//! Each segment has one `.col` file holding every column of the segment plus
//! the per-field document lengths used by scoring. A column stores one slot
//! per document so a value is found by position alone:
//!
//! ```text
//! presence bitmap  ceil(doc_count / 8) bytes, bit set = value present
//! Int / Float      doc_count * 8 bytes (little-endian i64 / f64)
//! Bytes            (doc_count + 1) * u32 offsets, then the data
//! ```
//!
//! An absent slot reads as `None` (MISSING), distinct from `0` or `b""`.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use ahash::AHashMap;
use bit_vec::BitVec;
use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StrataError};
use crate::storage::structured::{SliceReader, StructWriter, verify_checksum};
use crate::storage::Storage;

const COLUMNS_MAGIC: u32 = 0x434F_4C53; // "COLS"
const COLUMNS_VERSION: u32 = 1;

/// Physical type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnKind {
    Int,
    Float,
    Bytes,
}

impl ColumnKind {
    fn code(self) -> u8 {
        match self {
            ColumnKind::Int => 0,
            ColumnKind::Float => 1,
            ColumnKind::Bytes => 2,
        }
    }

    fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(ColumnKind::Int),
            1 => Ok(ColumnKind::Float),
            2 => Ok(ColumnKind::Bytes),
            _ => Err(StrataError::corrupt(format!("unknown column kind {code}"))),
        }
    }
}

/// A single column slot value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColumnValue {
    Int(i64),
    Float(f64),
    Bytes(Vec<u8>),
}

impl ColumnValue {
    pub fn kind(&self) -> ColumnKind {
        match self {
            ColumnValue::Int(_) => ColumnKind::Int,
            ColumnValue::Float(_) => ColumnKind::Float,
            ColumnValue::Bytes(_) => ColumnKind::Bytes,
        }
    }

    /// Total order used for sorting: values of one kind compare naturally
    /// (floats by `total_cmp`), different kinds by kind.
    pub fn compare(&self, other: &ColumnValue) -> Ordering {
        match (self, other) {
            (ColumnValue::Int(a), ColumnValue::Int(b)) => a.cmp(b),
            (ColumnValue::Float(a), ColumnValue::Float(b)) => a.total_cmp(b),
            (ColumnValue::Bytes(a), ColumnValue::Bytes(b)) => a.cmp(b),
            _ => self.kind().code().cmp(&other.kind().code()),
        }
    }

    /// Bytes usable as a grouping key.
    pub fn to_key(&self) -> Vec<u8> {
        match self {
            ColumnValue::Int(v) => crate::util::numeric::encode_i64(*v).to_vec(),
            ColumnValue::Float(v) => v.to_bits().to_be_bytes().to_vec(),
            ColumnValue::Bytes(b) => b.clone(),
        }
    }
}

/// Accumulates column values and field lengths for one segment.
#[derive(Debug, Default)]
pub struct ColumnsBuilder {
    columns: BTreeMap<String, (ColumnKind, Vec<Option<ColumnValue>>)>,
    lengths: BTreeMap<String, Vec<u32>>,
}

impl ColumnsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a column so it is written even when every slot is missing.
    pub fn declare(&mut self, field: &str, kind: ColumnKind) {
        self.columns
            .entry(field.to_string())
            .or_insert_with(|| (kind, Vec::new()));
    }

    /// Set the value of `field` for document `doc`.
    pub fn set(&mut self, field: &str, kind: ColumnKind, doc: u32, value: ColumnValue) -> Result<()> {
        if value.kind() != kind {
            return Err(StrataError::schema(format!(
                "column '{field}' holds {kind:?} values, got {:?}",
                value.kind()
            )));
        }
        let (column_kind, slots) = self
            .columns
            .entry(field.to_string())
            .or_insert_with(|| (kind, Vec::new()));
        if *column_kind != kind {
            return Err(StrataError::schema(format!(
                "column '{field}' declared as {column_kind:?}, got {kind:?}"
            )));
        }
        let doc = doc as usize;
        if slots.len() <= doc {
            slots.resize(doc + 1, None);
        }
        slots[doc] = Some(value);
        Ok(())
    }

    /// Set the token count of `field` in document `doc`.
    pub fn set_length(&mut self, field: &str, doc: u32, length: u32) {
        let lengths = self.lengths.entry(field.to_string()).or_default();
        let doc = doc as usize;
        if lengths.len() <= doc {
            lengths.resize(doc + 1, 0);
        }
        lengths[doc] = length;
    }

    /// Write the `.col` file for a segment of `doc_count` documents.
    pub fn write(&self, storage: &dyn Storage, name: &str, doc_count: u32) -> Result<u64> {
        let mut encoded_columns = Vec::with_capacity(self.columns.len());
        for (field, (kind, slots)) in &self.columns {
            encoded_columns.push((field, *kind, encode_column(*kind, slots, doc_count)?));
        }

        let mut writer = StructWriter::new(storage.create_output(name)?);
        writer.write_u32(COLUMNS_MAGIC)?;
        writer.write_u32(COLUMNS_VERSION)?;
        writer.write_u32(doc_count)?;

        writer.write_varint(encoded_columns.len() as u64)?;
        for (field, kind, data) in &encoded_columns {
            writer.write_string(field)?;
            writer.write_u8(kind.code())?;
            writer.write_bytes(data)?;
        }

        writer.write_varint(self.lengths.len() as u64)?;
        for (field, lengths) in &self.lengths {
            writer.write_string(field)?;
            for doc in 0..doc_count as usize {
                writer.write_u32(lengths.get(doc).copied().unwrap_or(0))?;
            }
        }

        writer.close()
    }
}

fn encode_column(kind: ColumnKind, slots: &[Option<ColumnValue>], doc_count: u32) -> Result<Vec<u8>> {
    if slots.len() > doc_count as usize {
        return Err(StrataError::invalid_argument(format!(
            "column has {} slots for {doc_count} documents",
            slots.len()
        )));
    }

    let slot = |doc: usize| slots.get(doc).and_then(|v| v.as_ref());
    let mut presence = BitVec::from_elem(doc_count as usize, false);
    for doc in 0..doc_count as usize {
        if slot(doc).is_some() {
            presence.set(doc, true);
        }
    }

    let mut data = presence.to_bytes();
    match kind {
        ColumnKind::Int | ColumnKind::Float => {
            for doc in 0..doc_count as usize {
                let bits = match slot(doc) {
                    Some(ColumnValue::Int(v)) => *v as u64,
                    Some(ColumnValue::Float(v)) => v.to_bits(),
                    _ => 0,
                };
                data.extend_from_slice(&bits.to_le_bytes());
            }
        }
        ColumnKind::Bytes => {
            let mut offset = 0u32;
            let mut payload = Vec::new();
            data.extend_from_slice(&offset.to_le_bytes());
            for doc in 0..doc_count as usize {
                if let Some(ColumnValue::Bytes(bytes)) = slot(doc) {
                    payload.extend_from_slice(bytes);
                    offset = u32::try_from(payload.len())
                        .map_err(|_| StrataError::invalid_argument("byte column exceeds 4 GiB"))?;
                }
                data.extend_from_slice(&offset.to_le_bytes());
            }
            data.extend_from_slice(&payload);
        }
    }
    Ok(data)
}

/// Read access to every column and field-length table of one segment.
#[derive(Debug)]
pub struct ColumnsReader {
    doc_count: u32,
    columns: AHashMap<String, ColumnAccessor>,
    lengths: AHashMap<String, Arc<[u32]>>,
}

impl ColumnsReader {
    /// Parse a `.col` file.
    pub fn open(data: Arc<[u8]>, name: &str) -> Result<Self> {
        let body_len = verify_checksum(&data, name)?.len();
        let mut reader = SliceReader::new(&data[..body_len]);

        if reader.read_u32()? != COLUMNS_MAGIC {
            return Err(StrataError::corrupt(format!("{name}: not a columns file")));
        }
        let version = reader.read_u32()?;
        if version != COLUMNS_VERSION {
            return Err(StrataError::corrupt(format!(
                "{name}: unsupported columns version {version}"
            )));
        }
        let doc_count = reader.read_u32()?;

        let column_count = reader.read_varint()? as usize;
        let mut columns = AHashMap::with_capacity(column_count);
        for _ in 0..column_count {
            let field = reader.read_string()?.to_string();
            let kind = ColumnKind::from_code(reader.read_u8()?)?;
            let len = reader.read_varint()? as usize;
            let start = reader.position();
            reader.read_raw(len)?;
            let accessor = ColumnAccessor::new(Arc::clone(&data), start, len, kind, doc_count)?;
            columns.insert(field, accessor);
        }

        let length_count = reader.read_varint()? as usize;
        let mut lengths = AHashMap::with_capacity(length_count);
        for _ in 0..length_count {
            let field = reader.read_string()?.to_string();
            let raw = reader.read_raw(doc_count as usize * 4)?;
            let values: Vec<u32> = raw.chunks_exact(4).map(LittleEndian::read_u32).collect();
            lengths.insert(field, Arc::from(values));
        }

        Ok(ColumnsReader {
            doc_count,
            columns,
            lengths,
        })
    }

    pub fn doc_count(&self) -> u32 {
        self.doc_count
    }

    /// Accessor for `field`, or `None` if the segment has no such column.
    pub fn column(&self, field: &str) -> Option<&ColumnAccessor> {
        self.columns.get(field)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(|k| k.as_str())
    }

    /// Token count of `field` in `doc`; 0 when not recorded.
    #[inline]
    pub fn field_length(&self, field: &str, doc: u32) -> u32 {
        self.lengths
            .get(field)
            .and_then(|lengths| lengths.get(doc as usize).copied())
            .unwrap_or(0)
    }

    pub fn field_lengths(&self, field: &str) -> Option<Arc<[u32]>> {
        self.lengths.get(field).cloned()
    }

    pub fn length_fields(&self) -> impl Iterator<Item = &str> {
        self.lengths.keys().map(|k| k.as_str())
    }
}

/// Positional access to one column.
#[derive(Debug, Clone)]
pub struct ColumnAccessor {
    data: Arc<[u8]>,
    kind: ColumnKind,
    doc_count: u32,
    presence_start: usize,
    values_start: usize,
    payload_start: usize,
}

impl ColumnAccessor {
    fn new(data: Arc<[u8]>, start: usize, len: usize, kind: ColumnKind, doc_count: u32) -> Result<Self> {
        let presence_len = (doc_count as usize).div_ceil(8);
        let values_start = start + presence_len;
        let (values_len, payload_start) = match kind {
            ColumnKind::Int | ColumnKind::Float => (doc_count as usize * 8, start + len),
            ColumnKind::Bytes => {
                let table = (doc_count as usize + 1) * 4;
                (table, values_start + table)
            }
        };
        if presence_len + values_len > len {
            return Err(StrataError::corrupt("column shorter than its slot table"));
        }

        let accessor = ColumnAccessor {
            data,
            kind,
            doc_count,
            presence_start: start,
            values_start,
            payload_start,
        };
        if kind == ColumnKind::Bytes {
            let payload_len = accessor.offset(doc_count as usize) as usize;
            if payload_start + payload_len > start + len {
                return Err(StrataError::corrupt("byte column payload out of bounds"));
            }
        }
        Ok(accessor)
    }

    pub fn kind(&self) -> ColumnKind {
        self.kind
    }

    pub fn len(&self) -> u32 {
        self.doc_count
    }

    pub fn is_empty(&self) -> bool {
        self.doc_count == 0
    }

    #[inline]
    fn offset(&self, slot: usize) -> u32 {
        let at = self.values_start + slot * 4;
        LittleEndian::read_u32(&self.data[at..at + 4])
    }

    /// Whether document `doc` has a value.
    #[inline]
    pub fn is_present(&self, doc: u32) -> bool {
        if doc >= self.doc_count {
            return false;
        }
        let byte = self.data[self.presence_start + doc as usize / 8];
        // bit-vec stores the first bit in the most significant position
        byte & (0x80 >> (doc % 8)) != 0
    }

    /// Value of document `doc`, or `None` when the slot is MISSING.
    pub fn get(&self, doc: u32) -> Result<Option<ColumnValue>> {
        if doc >= self.doc_count {
            return Err(StrataError::NoSuchDocument(doc as u64));
        }
        if !self.is_present(doc) {
            return Ok(None);
        }

        let value = match self.kind {
            ColumnKind::Int | ColumnKind::Float => {
                let at = self.values_start + doc as usize * 8;
                let bits = LittleEndian::read_u64(&self.data[at..at + 8]);
                if self.kind == ColumnKind::Int {
                    ColumnValue::Int(bits as i64)
                } else {
                    ColumnValue::Float(f64::from_bits(bits))
                }
            }
            ColumnKind::Bytes => {
                let start = self.offset(doc as usize) as usize;
                let end = self.offset(doc as usize + 1) as usize;
                if start > end {
                    return Err(StrataError::corrupt("byte column offsets out of order"));
                }
                ColumnValue::Bytes(self.data[self.payload_start + start..self.payload_start + end].to_vec())
            }
        };
        Ok(Some(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn write_and_open(builder: &ColumnsBuilder, doc_count: u32) -> ColumnsReader {
        let storage = MemoryStorage::new();
        builder.write(&storage, "s.col", doc_count).unwrap();
        ColumnsReader::open(storage.read_all("s.col").unwrap(), "s.col").unwrap()
    }

    #[test]
    fn test_missing_is_distinct_from_zero() {
        let mut builder = ColumnsBuilder::new();
        builder.set("price", ColumnKind::Int, 0, ColumnValue::Int(0)).unwrap();
        builder.set("price", ColumnKind::Int, 2, ColumnValue::Int(-7)).unwrap();
        builder.set("tag", ColumnKind::Bytes, 1, ColumnValue::Bytes(Vec::new())).unwrap();
        builder.set("tag", ColumnKind::Bytes, 2, ColumnValue::Bytes(b"red".to_vec())).unwrap();
        builder.set("score", ColumnKind::Float, 9, ColumnValue::Float(0.5)).unwrap();

        let reader = write_and_open(&builder, 10);
        let price = reader.column("price").unwrap();
        assert_eq!(price.get(0).unwrap(), Some(ColumnValue::Int(0)));
        assert_eq!(price.get(1).unwrap(), None);
        assert_eq!(price.get(2).unwrap(), Some(ColumnValue::Int(-7)));
        assert_eq!(price.get(9).unwrap(), None);

        let tag = reader.column("tag").unwrap();
        assert_eq!(tag.get(0).unwrap(), None);
        assert_eq!(tag.get(1).unwrap(), Some(ColumnValue::Bytes(Vec::new())));
        assert_eq!(tag.get(2).unwrap(), Some(ColumnValue::Bytes(b"red".to_vec())));

        let score = reader.column("score").unwrap();
        assert_eq!(score.get(9).unwrap(), Some(ColumnValue::Float(0.5)));
        assert!(!score.is_present(8));

        assert!(reader.column("nope").is_none());
        assert!(matches!(price.get(10), Err(StrataError::NoSuchDocument(10))));
    }

    #[test]
    fn test_declared_empty_column_and_lengths() {
        let mut builder = ColumnsBuilder::new();
        builder.declare("empty", ColumnKind::Bytes);
        builder.set_length("body", 0, 3);
        builder.set_length("body", 2, 5);

        let reader = write_and_open(&builder, 3);
        let empty = reader.column("empty").unwrap();
        assert_eq!(empty.len(), 3);
        assert!((0..3).all(|d| empty.get(d).unwrap().is_none()));

        assert_eq!(reader.field_length("body", 0), 3);
        assert_eq!(reader.field_length("body", 1), 0);
        assert_eq!(reader.field_length("body", 2), 5);
        assert_eq!(reader.field_length("title", 0), 0);
    }

    #[test]
    fn test_kind_mismatch_rejected() {
        let mut builder = ColumnsBuilder::new();
        assert!(builder.set("n", ColumnKind::Int, 0, ColumnValue::Float(1.0)).is_err());
        builder.set("n", ColumnKind::Int, 0, ColumnValue::Int(1)).unwrap();
        assert!(builder.set("n", ColumnKind::Float, 1, ColumnValue::Float(1.0)).is_err());
    }

    #[test]
    fn test_value_ordering() {
        assert_eq!(ColumnValue::Int(1).compare(&ColumnValue::Int(2)), Ordering::Less);
        assert_eq!(
            ColumnValue::Float(f64::NAN).compare(&ColumnValue::Float(1.0)),
            Ordering::Greater
        );
        assert_eq!(
            ColumnValue::Bytes(b"b".to_vec()).compare(&ColumnValue::Bytes(b"a".to_vec())),
            Ordering::Greater
        );
    }
}

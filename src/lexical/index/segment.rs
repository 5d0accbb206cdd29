//! Segment metadata and read access to one immutable segment.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, StrataError};
use crate::lexical::core::column::{ColumnAccessor, ColumnsReader};
use crate::lexical::core::deletion::DeletionBitmap;
use crate::lexical::core::posting::{DocId, PostingMatcher};
use crate::lexical::core::stored::{RecordReader, StoredFields, TermVectors};
use crate::lexical::core::terms::{PostingsRef, TermDictionary, TermInfo};
use crate::schema::{PostingFormat, Schema};
use crate::storage::Storage;
use crate::storage::structured::CHECKSUM_LEN;

pub const TERMS_EXT: &str = "trm";
pub const POSTINGS_EXT: &str = "pst";
pub const STORED_EXT: &str = "sto";
pub const COLUMNS_EXT: &str = "col";
pub const VECTORS_EXT: &str = "vec";
pub const DELETION_EXT: &str = "del";

pub(crate) const POSTINGS_MAGIC: u32 = 0x5053_5447; // "PSTG"
pub(crate) const POSTINGS_VERSION: u32 = 1;

/// Name of one of a segment's data files.
pub fn segment_file(segment: &str, ext: &str) -> String {
    format!("{segment}.{ext}")
}

/// Name of a segment's deletion file for deletion generation `del_gen`.
pub fn deletion_file(segment: &str, del_gen: u64) -> String {
    format!("{segment}_{del_gen}.{DELETION_EXT}")
}

/// Every data file a segment called `segment` may have, deletion files
/// excluded.
pub fn data_files(segment: &str) -> Vec<String> {
    [TERMS_EXT, POSTINGS_EXT, STORED_EXT, COLUMNS_EXT, VECTORS_EXT]
        .iter()
        .map(|ext| segment_file(segment, ext))
        .collect()
}

/// New unique segment name.
pub fn segment_name(counter: u64) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("seg{counter:06}_{}", &suffix[..8])
}

/// Per-field length totals of a segment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldStats {
    /// Sum of the field's length over all documents.
    pub total_length: u64,
    /// Documents with a non-zero length.
    pub doc_count: u32,
    pub max_length: u32,
}

impl FieldStats {
    pub fn add_length(&mut self, length: u32) {
        if length > 0 {
            self.total_length += length as u64;
            self.doc_count += 1;
            self.max_length = self.max_length.max(length);
        }
    }

    pub fn merge(&mut self, other: &FieldStats) {
        self.total_length += other.total_length;
        self.doc_count += other.doc_count;
        self.max_length = self.max_length.max(other.max_length);
    }
}

/// Description of a segment as recorded in the table of contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentInfo {
    pub name: String,
    /// Documents in the segment, deleted ones included.
    pub doc_count_all: u32,
    pub deleted_count: u32,
    /// Generation of the deletion file; 0 when the segment has none.
    pub del_gen: u64,
    pub has_vectors: bool,
    /// Posting format each indexed field was written with.
    pub posting_formats: BTreeMap<String, PostingFormat>,
    pub field_stats: BTreeMap<String, FieldStats>,
    /// Schema epoch of every field the segment was written with.
    #[serde(default)]
    pub field_epochs: BTreeMap<String, u64>,
    pub created_at: DateTime<Utc>,
}

impl SegmentInfo {
    pub fn doc_count(&self) -> u32 {
        self.doc_count_all - self.deleted_count
    }

    pub fn has_deletions(&self) -> bool {
        self.deleted_count > 0
    }

    pub fn deletion_ratio(&self) -> f64 {
        if self.doc_count_all == 0 {
            0.0
        } else {
            self.deleted_count as f64 / self.doc_count_all as f64
        }
    }

    /// Whether the segment's data for `field` belongs to the field of that
    /// name in `schema`, rather than to an earlier field since removed.
    pub fn has_field(&self, schema: &Schema, field: &str) -> bool {
        match (schema.epoch(field), self.field_epochs.get(field)) {
            (Some(current), Some(written)) => current == *written,
            _ => false,
        }
    }

    pub fn deletion_file(&self) -> Option<String> {
        (self.del_gen > 0).then(|| deletion_file(&self.name, self.del_gen))
    }

    /// Every file this segment needs.
    pub fn files(&self) -> Vec<String> {
        let mut files = vec![
            segment_file(&self.name, TERMS_EXT),
            segment_file(&self.name, POSTINGS_EXT),
            segment_file(&self.name, STORED_EXT),
            segment_file(&self.name, COLUMNS_EXT),
        ];
        if self.has_vectors {
            files.push(segment_file(&self.name, VECTORS_EXT));
        }
        files.extend(self.deletion_file());
        files
    }
}

/// Read access to one segment.
///
/// Fields absent from `schema`, or written under an older epoch of the
/// field, are invisible: their terms, stored values and columns are skipped.
#[derive(Debug)]
pub struct SegmentReader {
    info: SegmentInfo,
    schema: Arc<Schema>,
    terms: TermDictionary,
    postings: Arc<[u8]>,
    stored: RecordReader,
    vectors: Option<RecordReader>,
    columns: ColumnsReader,
    deletions: Option<Arc<DeletionBitmap>>,
}

impl SegmentReader {
    pub fn open(storage: &dyn Storage, info: SegmentInfo, schema: Arc<Schema>) -> Result<Self> {
        let name = &info.name;

        let terms_file = segment_file(name, TERMS_EXT);
        let terms = TermDictionary::open(storage.read_all(&terms_file)?, &terms_file)?;

        let postings_file = segment_file(name, POSTINGS_EXT);
        let postings = storage.read_all(&postings_file)?;
        if postings.len() < 8 + CHECKSUM_LEN
            || postings[..4] != POSTINGS_MAGIC.to_le_bytes()
            || postings[4..8] != POSTINGS_VERSION.to_le_bytes()
        {
            return Err(StrataError::corrupt(format!("{postings_file}: not a postings file")));
        }

        let stored_file = segment_file(name, STORED_EXT);
        let stored = RecordReader::open(storage.read_all(&stored_file)?, &stored_file)?;

        let vectors = if info.has_vectors {
            let file = segment_file(name, VECTORS_EXT);
            Some(RecordReader::open(storage.read_all(&file)?, &file)?)
        } else {
            None
        };

        let columns_file = segment_file(name, COLUMNS_EXT);
        let columns = ColumnsReader::open(storage.read_all(&columns_file)?, &columns_file)?;

        let deletions = match info.deletion_file() {
            Some(file) => {
                let bitmap = DeletionBitmap::read(storage, &file)?;
                if bitmap.total_docs() != info.doc_count_all {
                    return Err(StrataError::corrupt(format!(
                        "{file}: bitmap covers {} documents, segment has {}",
                        bitmap.total_docs(),
                        info.doc_count_all
                    )));
                }
                Some(Arc::new(bitmap))
            }
            None => None,
        };

        if stored.doc_count() != info.doc_count_all || columns.doc_count() != info.doc_count_all {
            return Err(StrataError::corrupt(format!(
                "segment {name}: file document counts disagree with metadata"
            )));
        }

        Ok(SegmentReader {
            info,
            schema,
            terms,
            postings,
            stored,
            vectors,
            columns,
            deletions,
        })
    }

    pub fn info(&self) -> &SegmentInfo {
        &self.info
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn doc_count_all(&self) -> u32 {
        self.info.doc_count_all
    }

    pub fn doc_count(&self) -> u32 {
        self.info.doc_count_all - self.deleted_count()
    }

    pub fn deleted_count(&self) -> u32 {
        self.deletions.as_ref().map_or(0, |d| d.deleted_count())
    }

    pub fn has_deletions(&self) -> bool {
        self.deleted_count() > 0
    }

    #[inline]
    pub fn is_deleted(&self, doc: DocId) -> bool {
        self.deletions.as_ref().is_some_and(|d| d.is_deleted(doc))
    }

    pub fn deletions(&self) -> Option<&Arc<DeletionBitmap>> {
        self.deletions.as_ref()
    }

    /// Live local ids in ascending order.
    pub fn live_docs(&self) -> impl Iterator<Item = DocId> + '_ {
        (0..self.info.doc_count_all).filter(move |doc| !self.is_deleted(*doc))
    }

    pub fn terms(&self) -> &TermDictionary {
        &self.terms
    }

    /// Whether data of `field` in this segment is visible under the
    /// reader's schema.
    pub fn has_field(&self, field: &str) -> bool {
        self.info.has_field(&self.schema, field)
    }

    /// Format the postings of `field` were written with, if the field is
    /// indexed and still part of the schema.
    pub fn posting_format(&self, field: &str) -> Option<PostingFormat> {
        if !self.has_field(field) {
            return None;
        }
        self.info.posting_formats.get(field).copied()
    }

    pub fn term_info(&self, field: &str, term: &[u8]) -> Result<Option<TermInfo>> {
        if self.posting_format(field).is_none() {
            return Ok(None);
        }
        self.terms.get(field, term)
    }

    /// Matcher over the postings described by `info`.
    pub fn matcher(&self, field: &str, info: &TermInfo) -> Result<PostingMatcher> {
        let format = self
            .posting_format(field)
            .ok_or_else(|| StrataError::invalid_argument(format!("field '{field}' is not indexed")))?;
        match &info.postings {
            PostingsRef::Inline(posting) => Ok(PostingMatcher::inline(posting.clone(), format)),
            PostingsRef::Block { offset, length } => {
                let limit = self.postings.len() - CHECKSUM_LEN;
                if *offset as usize + *length as usize > limit {
                    return Err(StrataError::corrupt(format!(
                        "segment {}: postings pointer beyond file end",
                        self.info.name
                    )));
                }
                PostingMatcher::from_blocks(
                    self.postings.clone(),
                    *offset as usize,
                    *length as usize,
                    format,
                    info.doc_frequency,
                )
            }
        }
    }

    /// Matcher over the postings of a term, deleted documents included.
    pub fn postings(&self, field: &str, term: &[u8]) -> Result<Option<PostingMatcher>> {
        match self.term_info(field, term)? {
            Some(info) => Ok(Some(self.matcher(field, &info)?)),
            None => Ok(None),
        }
    }

    /// Stored values of a document, restricted to fields in the schema.
    pub fn stored_fields(&self, doc: DocId) -> Result<StoredFields> {
        let mut fields: StoredFields = self.stored.get(doc)?;
        fields.retain(|name, _| self.has_field(name));
        Ok(fields)
    }

    /// Serialized stored record, as written.
    pub(crate) fn stored_raw(&self, doc: DocId) -> Result<&[u8]> {
        self.stored.get_raw(doc)
    }

    pub fn term_vectors(&self, doc: DocId) -> Result<TermVectors> {
        match &self.vectors {
            Some(vectors) => {
                let mut all: TermVectors = vectors.get(doc)?;
                all.retain(|name, _| self.has_field(name));
                Ok(all)
            }
            None if doc < self.info.doc_count_all => Ok(TermVectors::new()),
            None => Err(StrataError::NoSuchDocument(doc as u64)),
        }
    }

    /// Term vector of one field of a document.
    pub fn vector(&self, doc: DocId, field: &str) -> Result<Option<Vec<(Vec<u8>, f32)>>> {
        Ok(self.term_vectors(doc)?.remove(field))
    }

    pub fn column(&self, field: &str) -> Option<&ColumnAccessor> {
        if !self.has_field(field) {
            return None;
        }
        self.columns.column(field)
    }

    pub fn field_length(&self, field: &str, doc: DocId) -> u32 {
        if !self.has_field(field) {
            return 0;
        }
        self.columns.field_length(field, doc)
    }

    pub fn field_stats(&self, field: &str) -> Option<&FieldStats> {
        if !self.has_field(field) {
            return None;
        }
        self.info.field_stats.get(field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldConfig;

    fn info(name: &str, all: u32, deleted: u32) -> SegmentInfo {
        SegmentInfo {
            name: name.to_string(),
            doc_count_all: all,
            deleted_count: deleted,
            del_gen: if deleted > 0 { 2 } else { 0 },
            has_vectors: false,
            posting_formats: BTreeMap::new(),
            field_stats: BTreeMap::new(),
            field_epochs: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_counts_and_files() {
        let seg = info("seg000001_abcd", 10, 4);
        assert_eq!(seg.doc_count(), 6);
        assert!((seg.deletion_ratio() - 0.4).abs() < 1e-9);
        assert_eq!(
            seg.files(),
            vec![
                "seg000001_abcd.trm",
                "seg000001_abcd.pst",
                "seg000001_abcd.sto",
                "seg000001_abcd.col",
                "seg000001_abcd_2.del",
            ]
        );
        assert!(info("s", 3, 0).deletion_file().is_none());
    }

    #[test]
    fn test_field_visibility_follows_epochs() {
        let mut schema = Schema::new()
            .with_field("tag", FieldConfig::keyword())
            .unwrap();
        let mut seg = info("s", 1, 0);
        seg.field_epochs.insert("tag".to_string(), 0);
        assert!(seg.has_field(&schema, "tag"));
        assert!(!seg.has_field(&schema, "other"));

        schema.remove_field("tag").unwrap();
        assert!(!seg.has_field(&schema, "tag"));
        schema.add_field("tag", FieldConfig::keyword()).unwrap();
        assert!(!seg.has_field(&schema, "tag"));
    }

    #[test]
    fn test_segment_names_are_unique() {
        let a = segment_name(7);
        let b = segment_name(7);
        assert!(a.starts_with("seg000007_"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_field_stats() {
        let mut stats = FieldStats::default();
        stats.add_length(3);
        stats.add_length(0);
        stats.add_length(5);
        assert_eq!(stats.total_length, 8);
        assert_eq!(stats.doc_count, 2);
        assert_eq!(stats.max_length, 5);
    }
}

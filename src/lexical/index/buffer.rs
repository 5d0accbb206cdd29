//! In-memory buffer of documents not yet written to a segment.
//!
//! Adding a document is split in two steps. [`SegmentBuffer::stage`] does
//! all the work that can fail (schema checks, token consumption, column
//! kinds) without touching the buffer. [`SegmentBuffer::append`] cannot fail,
//! so a rejected document never leaves partial state behind.

use std::collections::BTreeMap;

use ahash::AHashMap;

use crate::config::WriterConfig;
use crate::document::Document;
use crate::error::{Result, StrataError};
use crate::lexical::core::deletion::DeletionBitmap;
use crate::lexical::core::posting::{DocId, Posting};
use crate::lexical::core::terms::{split_key, term_key};
use crate::lexical::index::builder::{DocumentData, SegmentBuilder};
use crate::lexical::index::segment::SegmentInfo;
use crate::schema::{PostingFormat, Schema};
use crate::storage::Storage;
use crate::util::varint::put_u32;

/// A fully analyzed document, ready to be appended.
#[derive(Debug, Default)]
pub struct StagedDocument {
    /// `(dictionary key, posting)` with the posting's doc id unset.
    postings: Vec<(Vec<u8>, Posting)>,
    data: DocumentData,
    /// Terms of unique fields, as `(field, term)`.
    unique_terms: Vec<(String, Vec<u8>)>,
}

impl StagedDocument {
    pub fn unique_terms(&self) -> &[(String, Vec<u8>)] {
        &self.unique_terms
    }
}

#[derive(Default)]
struct TermAccumulator {
    weight: f32,
    positions: Vec<u32>,
    offsets: Vec<(u32, u32)>,
}

fn offsets_value(offsets: &[(u32, u32)]) -> Vec<u8> {
    let mut value = Vec::with_capacity(offsets.len() * 2);
    for (start, end) in offsets {
        put_u32(&mut value, *start);
        put_u32(&mut value, *end);
    }
    value
}

/// Buffered documents of one writer.
#[derive(Debug, Default)]
pub struct SegmentBuffer {
    postings: AHashMap<Vec<u8>, Vec<Posting>>,
    docs: Vec<DocumentData>,
    deleted: Vec<bool>,
    deleted_count: u32,
}

impl SegmentBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn doc_count(&self) -> u32 {
        self.docs.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn deleted_count(&self) -> u32 {
        self.deleted_count
    }

    pub fn is_deleted(&self, doc: DocId) -> bool {
        self.deleted.get(doc as usize).copied().unwrap_or(false)
    }

    /// Analyze a document against `schema`.
    pub fn stage(&self, schema: &Schema, document: Document) -> Result<StagedDocument> {
        let mut staged = StagedDocument::default();

        for (name, input) in document.into_fields() {
            let config = schema.field(&name)?;

            if let (Some(value), true) = (input.stored, config.stored) {
                staged.data.stored.insert(name.clone(), value);
            }

            if let (Some(value), Some(kind)) = (input.column, config.column) {
                if value.kind() != kind {
                    return Err(StrataError::schema(format!(
                        "field '{name}' has a {kind:?} column, got a {:?} value",
                        value.kind()
                    )));
                }
                staged.data.columns.push((name.clone(), value));
            }

            let Some(format) = config.indexed else {
                continue;
            };

            let mut terms: BTreeMap<Vec<u8>, TermAccumulator> = BTreeMap::new();
            let mut length = 0u32;
            for stream in input.tokens {
                for token in stream {
                    length += 1;
                    let acc = terms.entry(token.text).or_default();
                    acc.weight += token.boost;
                    acc.positions.push(token.position);
                    acc.offsets.push((token.start_offset, token.end_offset));
                }
            }

            if config.scorable {
                staged.data.lengths.push((name.clone(), length));
            }
            if config.vector {
                let vector = terms
                    .iter()
                    .map(|(term, acc)| (term.clone(), acc.weight))
                    .collect();
                staged.data.vectors.insert(name.clone(), vector);
            }

            for (term, mut acc) in terms {
                if config.unique {
                    staged.unique_terms.push((name.clone(), term.clone()));
                }
                let mut posting = Posting::new(0).with_weight(acc.weight);
                if format.has_positions() {
                    acc.positions.sort_unstable();
                    posting = posting.with_positions(acc.positions);
                }
                if format == PostingFormat::PositionsWithPayload {
                    posting = posting.with_value(offsets_value(&acc.offsets));
                }
                staged.postings.push((term_key(&name, &term), posting.conform(format)));
            }
        }

        Ok(staged)
    }

    /// Append a staged document and return its local id.
    pub fn append(&mut self, staged: StagedDocument) -> DocId {
        let doc = self.docs.len() as DocId;
        for (key, mut posting) in staged.postings {
            posting.doc_id = doc;
            self.postings.entry(key).or_default().push(posting);
        }
        self.docs.push(staged.data);
        self.deleted.push(false);
        doc
    }

    /// Buffered documents containing `(field, term)`, deleted ones included.
    pub fn docs_with_term(&self, field: &str, term: &[u8]) -> Vec<DocId> {
        self.postings
            .get(&term_key(field, term))
            .map(|postings| postings.iter().map(|p| p.doc_id).collect())
            .unwrap_or_default()
    }

    /// Mark a buffered document deleted. Returns `true` when it was live.
    pub fn delete(&mut self, doc: DocId) -> Result<bool> {
        let slot = self
            .deleted
            .get_mut(doc as usize)
            .ok_or(StrataError::NoSuchDocument(doc as u64))?;
        if *slot {
            return Ok(false);
        }
        *slot = true;
        self.deleted_count += 1;
        Ok(true)
    }

    /// Write the buffer as segment `name` and empty it, also on failure.
    /// Deleted documents are written too and reported in the returned
    /// bitmap, so ids handed out earlier stay valid.
    pub fn flush(
        &mut self,
        storage: &dyn Storage,
        name: &str,
        schema: &Schema,
        config: &WriterConfig,
    ) -> Result<(SegmentInfo, DeletionBitmap)> {
        let result = self.write_segment(storage, name, schema, config);
        self.clear();
        result
    }

    fn write_segment(
        &mut self,
        storage: &dyn Storage,
        name: &str,
        schema: &Schema,
        config: &WriterConfig,
    ) -> Result<(SegmentInfo, DeletionBitmap)> {
        let mut builder = SegmentBuilder::create(storage, name, schema, config)?;
        for data in std::mem::take(&mut self.docs) {
            builder.add_document(data)?;
        }

        let mut postings: Vec<(Vec<u8>, Vec<Posting>)> =
            std::mem::take(&mut self.postings).into_iter().collect();
        postings.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        for (key, list) in postings {
            let (field, term) = split_key(&key)?;
            builder.add_term(field, term, list)?;
        }

        let info = builder.finish()?;
        let mut deletions = DeletionBitmap::new(info.doc_count_all);
        for (doc, deleted) in self.deleted.iter().enumerate() {
            if *deleted {
                deletions.delete_document(doc as DocId)?;
            }
        }
        Ok((info, deletions))
    }

    /// Drop everything buffered.
    pub fn clear(&mut self) {
        self.postings.clear();
        self.docs.clear();
        self.deleted.clear();
        self.deleted_count = 0;
    }
}

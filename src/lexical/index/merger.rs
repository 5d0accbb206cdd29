//! Merges several segments into one, dropping deleted documents.
//!
//! Live documents are renumbered in input order. Term keys of all inputs are
//! merged through a binary heap, and the live postings of each term are
//! merged the same way by their new document id.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use tracing::debug;

use crate::config::WriterConfig;
use crate::error::Result;
use crate::lexical::core::deletion::DeletionBitmap;
use crate::lexical::core::posting::{DocId, Posting};
use crate::lexical::core::stored::{StoredFields, TermVectors};
use crate::lexical::core::terms::{TermInfo, TermMerge, split_key};
use crate::lexical::index::builder::{DocumentData, SegmentBuilder};
use crate::lexical::index::segment::{SegmentInfo, SegmentReader};
use crate::schema::Schema;
use crate::storage::Storage;

/// One segment to merge, with the deletions to apply.
#[derive(Debug, Clone, Copy)]
pub struct MergeInput<'a> {
    pub reader: &'a SegmentReader,
    /// Overrides the reader's own deletions when set.
    pub deletions: Option<&'a DeletionBitmap>,
}

impl<'a> MergeInput<'a> {
    pub fn new(reader: &'a SegmentReader) -> Self {
        MergeInput {
            reader,
            deletions: None,
        }
    }

    pub fn with_deletions(reader: &'a SegmentReader, deletions: &'a DeletionBitmap) -> Self {
        MergeInput {
            reader,
            deletions: Some(deletions),
        }
    }

    fn is_deleted(&self, doc: DocId) -> bool {
        match self.deletions {
            Some(deletions) => deletions.is_deleted(doc),
            None => self.reader.is_deleted(doc),
        }
    }
}

/// Writes merged segments.
pub struct SegmentMerger<'a> {
    storage: &'a dyn Storage,
    schema: &'a Schema,
    config: &'a WriterConfig,
}

impl<'a> SegmentMerger<'a> {
    pub fn new(storage: &'a dyn Storage, schema: &'a Schema, config: &'a WriterConfig) -> Self {
        SegmentMerger {
            storage,
            schema,
            config,
        }
    }

    /// Merge `inputs` into a new segment called `name`.
    pub fn merge(&self, inputs: &[MergeInput<'_>], name: &str) -> Result<SegmentInfo> {
        let doc_maps: Vec<Vec<Option<DocId>>> = {
            let mut next: DocId = 0;
            inputs
                .iter()
                .map(|input| {
                    (0..input.reader.doc_count_all())
                        .map(|doc| {
                            if input.is_deleted(doc) {
                                None
                            } else {
                                next += 1;
                                Some(next - 1)
                            }
                        })
                        .collect()
                })
                .collect()
        };

        let mut builder = SegmentBuilder::create(self.storage, name, self.schema, self.config)?;
        for (input, doc_map) in inputs.iter().zip(&doc_maps) {
            for (doc, new_id) in doc_map.iter().enumerate() {
                if new_id.is_some() {
                    builder.add_document(self.document_data(input.reader, doc as DocId)?)?;
                }
            }
        }

        let mut terms_written = 0u64;
        let mut keys = TermMerge::new(inputs.iter().map(|input| input.reader.terms().entries()).collect())?;
        while let Some((key, sources)) = keys.next_group()? {
            let (field, term) = split_key(&key)?;
            if !self.schema.get(field).is_some_and(|config| config.is_indexed()) {
                continue;
            }
            let postings = merge_postings(inputs, &doc_maps, self.schema, field, &sources)?;
            if builder.add_term(field, term, postings)? {
                terms_written += 1;
            }
        }

        let info = builder.finish()?;
        debug!(
            segment = %info.name,
            inputs = inputs.len(),
            docs = info.doc_count_all,
            terms = terms_written,
            "merged segments"
        );
        Ok(info)
    }

    /// Values of a document, restricted to fields the input wrote under
    /// the epoch they have in the target schema.
    fn document_data(&self, reader: &SegmentReader, doc: DocId) -> Result<DocumentData> {
        let current = |field: &str| reader.info().has_field(self.schema, field);
        let mut stored: StoredFields = reader.stored_fields(doc)?;
        stored.retain(|field, _| current(field));
        let mut vectors: TermVectors = reader.term_vectors(doc)?;
        vectors.retain(|field, _| current(field));
        let mut columns = Vec::new();
        let mut lengths = Vec::new();
        for (field, config) in self.schema.fields() {
            if !current(field) {
                continue;
            }
            if config.column.is_some() {
                if let Some(value) = reader.column(field).map(|c| c.get(doc)).transpose()?.flatten() {
                    columns.push((field.to_string(), value));
                }
            }
            if config.scorable {
                lengths.push((field.to_string(), reader.field_length(field, doc)));
            }
        }
        Ok(DocumentData {
            stored,
            vectors,
            columns,
            lengths,
        })
    }
}

/// Live postings of one term over several inputs, by new document id.
fn merge_postings(
    inputs: &[MergeInput<'_>],
    doc_maps: &[Vec<Option<DocId>>],
    schema: &Schema,
    field: &str,
    sources: &[(usize, TermInfo)],
) -> Result<Vec<Posting>> {
    let mut streams = Vec::with_capacity(sources.len());
    for (input, info) in sources {
        let reader = inputs[*input].reader;
        if !reader.info().has_field(schema, field) || reader.posting_format(field).is_none() {
            continue;
        }
        let mut matcher = reader.matcher(field, info)?;
        let mut live = Vec::new();
        while matcher.is_active() {
            if let Some(new_id) = doc_maps[*input].get(matcher.id()? as usize).copied().flatten() {
                let mut posting = matcher.posting()?;
                posting.doc_id = new_id;
                live.push(posting);
            }
            matcher.next()?;
        }
        streams.push(live.into_iter());
    }

    let mut heap = BinaryHeap::new();
    let mut heads: Vec<Option<Posting>> = streams.iter_mut().map(|s| s.next()).collect();
    for (i, head) in heads.iter().enumerate() {
        if let Some(posting) = head {
            heap.push(Reverse((posting.doc_id, i)));
        }
    }

    let mut merged = Vec::new();
    while let Some(Reverse((_, i))) = heap.pop() {
        if let Some(posting) = heads[i].take() {
            merged.push(posting);
        }
        heads[i] = streams[i].next();
        if let Some(posting) = &heads[i] {
            heap.push(Reverse((posting.doc_id, i)));
        }
    }
    Ok(merged)
}

//! Writes the files of a new segment.
//!
//! Documents are added first (stored record, term vector, column values and
//! field lengths), then terms in ascending `(field, term)` order. Term
//! statistics need the field lengths, hence the ordering.

use std::collections::BTreeMap;

use ahash::AHashMap;
use chrono::Utc;
use tracing::debug;

use crate::config::WriterConfig;
use crate::error::{Result, StrataError};
use crate::lexical::core::column::{ColumnValue, ColumnsBuilder};
use crate::lexical::core::posting::{DocId, Posting, encode_postings};
use crate::lexical::core::stored::{RecordWriter, StoredFields, TermVectors};
use crate::lexical::core::terms::{PostingsRef, TermDictionaryWriter, TermInfo};
use crate::lexical::index::segment::{
    COLUMNS_EXT, FieldStats, POSTINGS_EXT, POSTINGS_MAGIC, POSTINGS_VERSION, STORED_EXT,
    SegmentInfo, TERMS_EXT, VECTORS_EXT, data_files, segment_file,
};
use crate::schema::{PostingFormat, Schema};
use crate::storage::structured::StructWriter;
use crate::storage::{Storage, StorageOutput};

/// Everything a segment keeps for one document besides its postings.
#[derive(Debug, Default)]
pub struct DocumentData {
    pub stored: StoredFields,
    pub vectors: TermVectors,
    pub columns: Vec<(String, ColumnValue)>,
    pub lengths: Vec<(String, u32)>,
}

/// Streams one segment to storage.
pub struct SegmentBuilder<'a> {
    storage: &'a dyn Storage,
    name: String,
    schema: &'a Schema,
    block_size: usize,
    terms: TermDictionaryWriter,
    postings: StructWriter<Box<dyn StorageOutput>>,
    stored: RecordWriter,
    vectors: Option<RecordWriter>,
    columns: ColumnsBuilder,
    lengths: AHashMap<String, Vec<u32>>,
    field_stats: BTreeMap<String, FieldStats>,
    posting_formats: BTreeMap<String, PostingFormat>,
    doc_count: u32,
    last_term: Option<(String, Vec<u8>)>,
}

impl<'a> SegmentBuilder<'a> {
    pub fn create(
        storage: &'a dyn Storage,
        name: &str,
        schema: &'a Schema,
        config: &WriterConfig,
    ) -> Result<Self> {
        let terms = TermDictionaryWriter::create(
            storage,
            &segment_file(name, TERMS_EXT),
            config.dictionary_block_size,
        )?;

        let mut postings = StructWriter::new(storage.create_output(&segment_file(name, POSTINGS_EXT))?);
        postings.write_u32(POSTINGS_MAGIC)?;
        postings.write_u32(POSTINGS_VERSION)?;

        let stored = RecordWriter::create(storage, &segment_file(name, STORED_EXT))?;
        let vectors = if schema.fields().any(|(_, config)| config.vector) {
            Some(RecordWriter::create(storage, &segment_file(name, VECTORS_EXT))?)
        } else {
            None
        };

        let mut columns = ColumnsBuilder::new();
        for (field, config) in schema.fields() {
            if let Some(kind) = config.column {
                columns.declare(field, kind);
            }
        }

        Ok(SegmentBuilder {
            storage,
            name: name.to_string(),
            schema,
            block_size: config.posting_block_size,
            terms,
            postings,
            stored,
            vectors,
            columns,
            lengths: AHashMap::new(),
            field_stats: BTreeMap::new(),
            posting_formats: BTreeMap::new(),
            doc_count: 0,
            last_term: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn doc_count(&self) -> u32 {
        self.doc_count
    }

    /// Add the next document. Values of fields missing from the schema, or
    /// not configured for them, are dropped.
    pub fn add_document(&mut self, mut data: DocumentData) -> Result<DocId> {
        if self.last_term.is_some() {
            return Err(StrataError::invalid_state("documents must be added before terms"));
        }
        let doc = self.doc_count;
        let schema = self.schema;

        data.stored
            .retain(|field, _| schema.get(field).is_some_and(|config| config.stored));
        self.stored.add(&data.stored)?;

        if let Some(vectors) = self.vectors.as_mut() {
            data.vectors
                .retain(|field, _| schema.get(field).is_some_and(|config| config.vector));
            vectors.add(&data.vectors)?;
        }

        for (field, value) in data.columns {
            if let Some(kind) = schema.get(&field).and_then(|config| config.column) {
                self.columns.set(&field, kind, doc, value)?;
            }
        }

        for (field, length) in data.lengths {
            if !schema.get(&field).is_some_and(|config| config.scorable) {
                continue;
            }
            self.columns.set_length(&field, doc, length);
            self.field_stats.entry(field.clone()).or_default().add_length(length);
            let lengths = self.lengths.entry(field).or_default();
            if lengths.len() <= doc as usize {
                lengths.resize(doc as usize + 1, 0);
            }
            lengths[doc as usize] = length;
        }

        self.doc_count += 1;
        Ok(doc)
    }

    /// Add the postings of one term. Calls must be in ascending
    /// `(field, term)` order; empty lists and fields that are not indexed are
    /// skipped. Returns whether the term was written.
    pub fn add_term(&mut self, field: &str, term: &[u8], postings: Vec<Posting>) -> Result<bool> {
        let Some(format) = self.schema.get(field).and_then(|config| config.indexed) else {
            return Ok(false);
        };
        if postings.is_empty() {
            return Ok(false);
        }
        if let Some(last) = postings.last() {
            if last.doc_id >= self.doc_count {
                return Err(StrataError::invalid_argument(format!(
                    "posting for document {} in a segment of {} documents",
                    last.doc_id, self.doc_count
                )));
            }
        }

        let postings: Vec<Posting> = postings.into_iter().map(|p| p.conform(format)).collect();
        let pointer = if postings.len() == 1 {
            PostingsRef::Inline(postings[0].clone())
        } else {
            let encoded = encode_postings(format, &postings, self.block_size)?;
            let offset = self.postings.position();
            self.postings.write_raw(&encoded)?;
            PostingsRef::Block {
                offset,
                length: encoded.len() as u64,
            }
        };

        let lengths = self.lengths.get(field);
        let info = TermInfo::summarize(
            &postings,
            |doc| lengths.and_then(|l| l.get(doc as usize).copied()).unwrap_or(0),
            pointer,
        );
        self.terms.add(field, term, &info)?;
        self.posting_formats.insert(field.to_string(), format);
        self.last_term = Some((field.to_string(), term.to_vec()));
        Ok(true)
    }

    /// Close every file and describe the segment.
    pub fn finish(self) -> Result<SegmentInfo> {
        let term_count = self.terms.term_count();
        self.terms.finish()?;
        self.postings.close()?;
        self.stored.finish()?;
        let has_vectors = match self.vectors {
            Some(vectors) => {
                vectors.finish()?;
                true
            }
            None => false,
        };
        self.columns.write(
            self.storage,
            &segment_file(&self.name, COLUMNS_EXT),
            self.doc_count,
        )?;

        debug!(
            segment = %self.name,
            docs = self.doc_count,
            terms = term_count,
            "wrote segment"
        );

        let field_epochs = self
            .schema
            .field_names()
            .iter()
            .filter_map(|field| self.schema.epoch(field).map(|epoch| (field.clone(), epoch)))
            .collect();

        Ok(SegmentInfo {
            name: self.name,
            doc_count_all: self.doc_count,
            deleted_count: 0,
            del_gen: 0,
            has_vectors,
            posting_formats: self.posting_formats,
            field_stats: self.field_stats,
            field_epochs,
            created_at: Utc::now(),
        })
    }
}

/// Remove whatever files a segment may have, ignoring missing ones.
pub(crate) fn remove_segment_files(storage: &dyn Storage, name: &str) -> Result<()> {
    for file in data_files(name) {
        storage.delete_file(&file)?;
    }
    Ok(())
}

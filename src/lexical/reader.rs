//! Read access to one generation of an index.
//!
//! An [`IndexReader`] is a snapshot: it keeps the segments of the generation
//! it was opened on, and leases their files, no matter what later commits
//! do. Documents are addressed by global id, the position of the document
//! across the segments of the snapshot.

use std::ops::Bound;
use std::sync::Arc;

use crate::error::{Result, StrataError};
use crate::lexical::core::column::ColumnValue;
use crate::lexical::core::posting::{DocId, PostingMatcher};
use crate::lexical::core::stored::StoredFields;
use crate::lexical::core::terms::{KeyIter, TermInfo, TermIter, TermMerge, split_key};
use crate::lexical::index::index::Index;
use crate::lexical::index::refs::FileLease;
use crate::lexical::index::segment::SegmentReader;
use crate::lexical::index::toc::Toc;
use crate::lexical::search::Searcher;
use crate::schema::Schema;

/// Statistics of a term summed over the segments of a reader. Deleted
/// documents still count until their segment is merged.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TermStats {
    pub doc_frequency: u64,
    pub total_weight: f64,
    pub min_length: u32,
    pub max_length: u32,
    pub max_weight: f32,
}

impl TermStats {
    fn add(&mut self, info: &TermInfo) {
        self.min_length = if self.doc_frequency == 0 {
            info.min_length
        } else {
            self.min_length.min(info.min_length)
        };
        self.doc_frequency += info.doc_frequency as u64;
        self.total_weight += info.total_weight as f64;
        self.max_length = self.max_length.max(info.max_length);
        self.max_weight = self.max_weight.max(info.max_weight);
    }

    fn from_infos<'a>(infos: impl IntoIterator<Item = &'a TermInfo>) -> Self {
        let mut stats = TermStats::default();
        for info in infos {
            stats.add(info);
        }
        stats
    }
}

/// Snapshot reader over every segment of one generation.
#[derive(Debug, Clone)]
pub struct IndexReader {
    index: Index,
    toc: Arc<Toc>,
    schema: Arc<Schema>,
    segments: Vec<Arc<SegmentReader>>,
    /// Global id of the first document of each segment, plus the total.
    offsets: Vec<u64>,
    _lease: Arc<FileLease>,
}

impl IndexReader {
    pub(crate) fn open(index: &Index) -> Result<Self> {
        let (snapshot, lease) = index.acquire();
        let mut segments = Vec::with_capacity(snapshot.toc.segments.len());
        let mut offsets = Vec::with_capacity(snapshot.toc.segments.len() + 1);
        let mut base = 0u64;
        for info in &snapshot.toc.segments {
            segments.push(index.segment_reader(info, &snapshot.schema)?);
            offsets.push(base);
            base += info.doc_count_all as u64;
        }
        offsets.push(base);
        Ok(IndexReader {
            index: index.clone(),
            toc: snapshot.toc,
            schema: snapshot.schema,
            segments,
            offsets,
            _lease: Arc::new(lease),
        })
    }

    /// A reader over the index's current generation. Returns a clone of
    /// this reader when nothing was committed since it was opened.
    pub fn reopen(&self) -> Result<IndexReader> {
        if self.index.generation() == self.generation() {
            return Ok(self.clone());
        }
        IndexReader::open(&self.index)
    }

    /// True when a newer generation has been published.
    pub fn is_stale(&self) -> bool {
        self.index.generation() != self.generation()
    }

    pub fn generation(&self) -> u64 {
        self.toc.generation
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn segments(&self) -> &[Arc<SegmentReader>] {
        &self.segments
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Global id of the first document of segment `ord`.
    pub fn segment_offset(&self, ord: usize) -> u64 {
        self.offsets[ord]
    }

    /// Live documents.
    pub fn doc_count(&self) -> u64 {
        self.toc.doc_count()
    }

    /// Documents, deleted ones included.
    pub fn doc_count_all(&self) -> u64 {
        self.toc.doc_count_all()
    }

    pub fn has_deletions(&self) -> bool {
        self.segments.iter().any(|s| s.has_deletions())
    }

    /// Segment and local id of a global id.
    pub fn locate(&self, doc_id: u64) -> Result<(usize, DocId)> {
        if doc_id >= self.doc_count_all() {
            return Err(StrataError::NoSuchDocument(doc_id));
        }
        let ord = self.offsets.partition_point(|offset| *offset <= doc_id) - 1;
        Ok((ord, (doc_id - self.offsets[ord]) as DocId))
    }

    pub fn is_deleted(&self, doc_id: u64) -> Result<bool> {
        let (ord, local) = self.locate(doc_id)?;
        Ok(self.segments[ord].is_deleted(local))
    }

    /// Stored values of a document, deleted or not.
    pub fn stored_fields(&self, doc_id: u64) -> Result<StoredFields> {
        let (ord, local) = self.locate(doc_id)?;
        self.segments[ord].stored_fields(local)
    }

    /// Stored values of every live document, in id order.
    pub fn all_stored_fields(&self) -> impl Iterator<Item = Result<StoredFields>> + '_ {
        self.all_doc_ids().map(|doc_id| self.stored_fields(doc_id))
    }

    /// Term vector of `field` in a document, as sorted `(term, weight)`.
    pub fn vector(&self, doc_id: u64, field: &str) -> Result<Option<Vec<(Vec<u8>, f32)>>> {
        let (ord, local) = self.locate(doc_id)?;
        self.segments[ord].vector(local, field)
    }

    /// Global ids of the live documents, ascending.
    pub fn all_doc_ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.segments
            .iter()
            .zip(&self.offsets)
            .flat_map(|(segment, offset)| segment.live_docs().map(move |doc| offset + doc as u64))
    }

    pub fn column_value(&self, doc_id: u64, field: &str) -> Result<Option<ColumnValue>> {
        let (ord, local) = self.locate(doc_id)?;
        match self.segments[ord].column(field) {
            Some(column) => column.get(local),
            None => Ok(None),
        }
    }

    /// Length of `field` in one document.
    pub fn doc_field_length(&self, doc_id: u64, field: &str) -> Result<u32> {
        let (ord, local) = self.locate(doc_id)?;
        Ok(self.segments[ord].field_length(field, local))
    }

    /// Total length of `field` over all documents.
    pub fn field_length(&self, field: &str) -> u64 {
        self.segments
            .iter()
            .filter_map(|s| s.field_stats(field))
            .map(|stats| stats.total_length)
            .sum()
    }

    /// Longest `field` of any document.
    pub fn max_field_length(&self, field: &str) -> u32 {
        self.segments
            .iter()
            .filter_map(|s| s.field_stats(field))
            .map(|stats| stats.max_length)
            .max()
            .unwrap_or(0)
    }

    /// Mean length of `field` over all documents; 0 for an empty index.
    pub fn avg_field_length(&self, field: &str) -> f64 {
        let docs = self.doc_count_all();
        if docs == 0 {
            0.0
        } else {
            self.field_length(field) as f64 / docs as f64
        }
    }

    pub fn term_info(&self, field: &str, term: &[u8]) -> Result<Option<TermStats>> {
        let mut infos = Vec::new();
        for segment in &self.segments {
            infos.extend(segment.term_info(field, term)?);
        }
        Ok((!infos.is_empty()).then(|| TermStats::from_infos(&infos)))
    }

    pub fn contains_term(&self, field: &str, term: &[u8]) -> Result<bool> {
        Ok(self.term_info(field, term)?.is_some())
    }

    /// Documents containing the term; 0 when absent.
    pub fn doc_frequency(&self, field: &str, term: &[u8]) -> Result<u64> {
        Ok(self.term_info(field, term)?.map_or(0, |s| s.doc_frequency))
    }

    /// Total weight of the term; 0 when absent.
    pub fn frequency(&self, field: &str, term: &[u8]) -> Result<f64> {
        Ok(self.term_info(field, term)?.map_or(0.0, |s| s.total_weight))
    }

    /// Live postings of a term over all segments, by global id.
    pub fn postings(&self, field: &str, term: &[u8]) -> Result<Option<MultiPostings>> {
        let mut parts = Vec::new();
        for (segment, offset) in self.segments.iter().zip(&self.offsets) {
            if let Some(matcher) = segment.postings(field, term)? {
                parts.push(SegmentPostings {
                    offset: *offset,
                    segment: Arc::clone(segment),
                    matcher,
                });
            }
        }
        if parts.is_empty() {
            return Ok(None);
        }
        let mut postings = MultiPostings { parts, current: 0 };
        postings.settle()?;
        Ok(Some(postings))
    }

    fn field_iters(&self, field: &str, start: Bound<&[u8]>, end: Bound<&[u8]>) -> Vec<TermIter> {
        self.segments
            .iter()
            .filter(|s| s.posting_format(field).is_some())
            .map(|s| s.terms().range(field, start, end))
            .collect()
    }

    /// Every term of `field` in ascending order.
    pub fn lexicon(&self, field: &str) -> Result<Lexicon> {
        Lexicon::new(self.field_iters(field, Bound::Unbounded, Bound::Unbounded))
    }

    /// Terms of `field` from `start` on.
    pub fn iter_field(&self, field: &str, start: &[u8]) -> Result<Lexicon> {
        Lexicon::new(self.field_iters(field, Bound::Included(start), Bound::Unbounded))
    }

    /// Terms of `field` starting with `prefix`.
    pub fn iter_prefix(&self, field: &str, prefix: &[u8]) -> Result<Lexicon> {
        let iters = self
            .segments
            .iter()
            .filter(|s| s.posting_format(field).is_some())
            .map(|s| s.terms().prefix(field, prefix))
            .collect();
        Lexicon::new(iters)
    }

    /// Every `(field, term)` of the schema's indexed fields.
    pub fn all_terms(&self) -> Result<AllTerms> {
        let merge = TermMerge::new(self.segments.iter().map(|s| s.terms().entries()).collect())?;
        Ok(AllTerms {
            merge,
            segments: self.segments.clone(),
        })
    }

    /// Terms of `field` starting with `prefix`.
    pub fn expand_prefix(&self, field: &str, prefix: &[u8]) -> Result<Vec<Vec<u8>>> {
        self.iter_prefix(field, prefix)?
            .map(|entry| entry.map(|(term, _)| term))
            .collect()
    }

    /// The `n` terms with the highest total weight, as `(weight, term)`.
    pub fn most_frequent_terms(&self, field: &str, n: usize, prefix: &[u8]) -> Result<Vec<(f64, Vec<u8>)>> {
        self.top_terms(field, n, prefix, |stats| stats.total_weight)
    }

    /// The `n` terms ranked by `weight * ln(doc_count / doc_frequency)`.
    pub fn most_distinctive_terms(&self, field: &str, n: usize, prefix: &[u8]) -> Result<Vec<(f64, Vec<u8>)>> {
        let docs = self.doc_count() as f64;
        self.top_terms(field, n, prefix, |stats| {
            stats.total_weight * (docs / stats.doc_frequency as f64).ln()
        })
    }

    fn top_terms<F>(&self, field: &str, n: usize, prefix: &[u8], score: F) -> Result<Vec<(f64, Vec<u8>)>>
    where
        F: Fn(&TermStats) -> f64,
    {
        let mut scored = Vec::new();
        for entry in self.iter_prefix(field, prefix)? {
            let (term, stats) = entry?;
            scored.push((score(&stats), term));
        }
        // Highest score first; ties go to the greater term.
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| b.1.cmp(&a.1)));
        scored.truncate(n);
        Ok(scored)
    }

    /// A BM25 searcher over this snapshot.
    pub fn searcher(&self) -> Searcher {
        Searcher::new(self.clone())
    }
}

/// Terms of one field over several segments, with summed statistics.
pub struct Lexicon {
    merge: TermMerge<TermIter>,
    failed: bool,
}

impl Lexicon {
    fn new(iters: Vec<TermIter>) -> Result<Self> {
        Ok(Lexicon {
            merge: TermMerge::new(iters)?,
            failed: false,
        })
    }
}

impl Iterator for Lexicon {
    type Item = Result<(Vec<u8>, TermStats)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.merge.next_group() {
            Ok(Some((term, sources))) => {
                let stats = TermStats::from_infos(sources.iter().map(|(_, info)| info));
                Some(Ok((term, stats)))
            }
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Every `(field, term)` of a reader, skipping terms no segment holds
/// under the field's current epoch.
pub struct AllTerms {
    merge: TermMerge<KeyIter>,
    segments: Vec<Arc<SegmentReader>>,
}

impl Iterator for AllTerms {
    type Item = Result<(String, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (key, sources) = match self.merge.next_group() {
                Ok(Some(group)) => group,
                Ok(None) => return None,
                Err(e) => return Some(Err(e)),
            };
            match split_key(&key) {
                Ok((field, term)) => {
                    let visible = sources
                        .iter()
                        .any(|(i, _)| self.segments[*i].posting_format(field).is_some());
                    if visible {
                        return Some(Ok((field.to_string(), term.to_vec())));
                    }
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

#[derive(Debug)]
struct SegmentPostings {
    offset: u64,
    segment: Arc<SegmentReader>,
    matcher: PostingMatcher,
}

/// Postings of one term over several segments, in global id order.
/// Deleted documents are skipped.
#[derive(Debug)]
pub struct MultiPostings {
    parts: Vec<SegmentPostings>,
    current: usize,
}

impl MultiPostings {
    /// Move to the first live posting at or after the current position.
    fn settle(&mut self) -> Result<()> {
        while let Some(part) = self.parts.get_mut(self.current) {
            match part.matcher.current() {
                None => self.current += 1,
                Some(doc) if part.segment.is_deleted(doc) => part.matcher.next()?,
                Some(_) => break,
            }
        }
        Ok(())
    }

    fn part(&self) -> Result<&SegmentPostings> {
        self.parts
            .get(self.current)
            .ok_or_else(|| StrataError::invalid_state("postings are exhausted"))
    }

    pub fn is_active(&self) -> bool {
        self.current < self.parts.len()
    }

    /// Documents containing the term, deleted ones included.
    pub fn doc_frequency(&self) -> u64 {
        self.parts.iter().map(|p| p.matcher.doc_frequency() as u64).sum()
    }

    pub fn id(&self) -> Result<u64> {
        let part = self.part()?;
        Ok(part.offset + part.matcher.id()? as u64)
    }

    pub fn next(&mut self) -> Result<()> {
        let current = self.current;
        let part = self
            .parts
            .get_mut(current)
            .ok_or_else(|| StrataError::invalid_state("postings are exhausted"))?;
        part.matcher.next()?;
        self.settle()
    }

    /// Move to the first live posting with id `>= target`. No-op when
    /// exhausted or already there.
    pub fn skip_to(&mut self, target: u64) -> Result<()> {
        if !self.is_active() || self.id()? >= target {
            return Ok(());
        }
        while let Some(part) = self.parts.get_mut(self.current) {
            let end = part.offset + part.segment.doc_count_all() as u64;
            if target >= end {
                self.current += 1;
                continue;
            }
            part.matcher.skip_to(target.saturating_sub(part.offset) as DocId)?;
            break;
        }
        self.settle()
    }

    pub fn weight(&self) -> Result<f32> {
        self.part()?.matcher.weight()
    }

    pub fn value(&self) -> Result<Option<&[u8]>> {
        self.part()?.matcher.value()
    }

    pub fn positions(&self) -> Result<&[u32]> {
        self.part()?.matcher.positions()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IndexConfig, WriterConfig};
    use crate::document::DocumentBuilder;
    use crate::lexical::index::writer::CommitOptions;
    use crate::schema::FieldConfig;
    use crate::storage::MemoryStorage;

    fn inspection_index(max_buffered_docs: usize) -> Index {
        let schema = Schema::new()
            .with_field("title", FieldConfig::text().stored(true))
            .unwrap()
            .with_field("content", FieldConfig::text())
            .unwrap();
        let config = IndexConfig {
            writer: WriterConfig {
                max_buffered_docs,
                ..Default::default()
            },
            ..Default::default()
        };
        let index = Index::create(Arc::new(MemoryStorage::new()), schema, config).unwrap();
        let mut writer = index.writer().unwrap();
        writer
            .add_document(
                DocumentBuilder::new()
                    .add_text("title", "my document")
                    .add_text("content", "aa aa bb bb cc aa aa aa bb bb cc dd ee ee")
                    .build(),
            )
            .unwrap();
        writer
            .add_document(
                DocumentBuilder::new()
                    .add_text("title", "my other document")
                    .add_text("content", "aa ab bb cc ee ee ax ax dd")
                    .build(),
            )
            .unwrap();
        writer.commit(CommitOptions::without_merge()).unwrap();
        index
    }

    fn stats(lexicon: Lexicon) -> Vec<(String, u64, f64)> {
        lexicon
            .map(|entry| {
                let (term, stats) = entry.unwrap();
                (String::from_utf8(term).unwrap(), stats.doc_frequency, stats.total_weight)
            })
            .collect()
    }

    #[test]
    fn test_term_inspection() {
        // One segment, then one segment per document.
        for max_buffered_docs in [10, 1] {
            let reader = inspection_index(max_buffered_docs).reader().unwrap();
            assert_eq!(reader.segment_count(), if max_buffered_docs == 1 { 2 } else { 1 });

            assert_eq!(
                reader.expand_prefix("content", b"a").unwrap(),
                vec![b"aa".to_vec(), b"ab".to_vec(), b"ax".to_vec()]
            );
            let all: Vec<(String, Vec<u8>)> = reader.all_terms().unwrap().map(|t| t.unwrap()).collect();
            assert_eq!(all.len(), 10);
            assert_eq!(all[0], ("content".to_string(), b"aa".to_vec()));
            assert_eq!(all[9], ("title".to_string(), b"other".to_vec()));

            assert_eq!(
                stats(reader.lexicon("content").unwrap()),
                vec![
                    ("aa".to_string(), 2, 6.0),
                    ("ab".to_string(), 1, 1.0),
                    ("ax".to_string(), 1, 2.0),
                    ("bb".to_string(), 2, 5.0),
                    ("cc".to_string(), 2, 3.0),
                    ("dd".to_string(), 2, 2.0),
                    ("ee".to_string(), 2, 4.0),
                ]
            );
            assert_eq!(
                stats(reader.iter_field("content", b"c").unwrap()),
                vec![("cc".to_string(), 2, 3.0), ("dd".to_string(), 2, 2.0), ("ee".to_string(), 2, 4.0)]
            );

            let frequent = reader.most_frequent_terms("content", 5, b"").unwrap();
            let frequent: Vec<(f64, &[u8])> = frequent.iter().map(|(w, t)| (*w, t.as_slice())).collect();
            assert_eq!(
                frequent,
                vec![(6.0, &b"aa"[..]), (5.0, b"bb"), (4.0, b"ee"), (3.0, b"cc"), (2.0, b"dd")]
            );
            let prefixed = reader.most_frequent_terms("content", 5, b"a").unwrap();
            assert_eq!(prefixed[1], (2.0, b"ax".to_vec()));

            let distinctive = reader.most_distinctive_terms("content", 3, b"").unwrap();
            assert_eq!(distinctive[0].1, b"ax".to_vec());
            assert!((distinctive[0].0 - 1.3862943611198906).abs() < 1e-9);
            assert_eq!(distinctive[1].1, b"ab".to_vec());
            assert!((distinctive[1].0 - 0.6931471805599453).abs() < 1e-9);
            assert_eq!(distinctive[2], (0.0, b"ee".to_vec()));
        }
    }

    #[test]
    fn test_global_ids_and_postings() {
        let index = inspection_index(1);
        let reader = index.reader().unwrap();
        assert_eq!(reader.locate(1).unwrap(), (1, 0));
        assert!(matches!(reader.locate(2), Err(StrataError::NoSuchDocument(2))));
        assert_eq!(reader.doc_field_length(0, "content").unwrap(), 14);
        assert_eq!(reader.field_length("content"), 23);
        assert!((reader.avg_field_length("content") - 11.5).abs() < 1e-9);

        let mut postings = reader.postings("content", b"dd").unwrap().unwrap();
        assert_eq!(postings.id().unwrap(), 0);
        postings.skip_to(1).unwrap();
        assert_eq!(postings.id().unwrap(), 1);
        assert_eq!(postings.weight().unwrap(), 1.0);
        postings.next().unwrap();
        assert!(!postings.is_active());
        assert!(postings.next().is_err());
        assert!(reader.postings("content", b"zz").unwrap().is_none());

        let mut writer = index.writer().unwrap();
        writer.delete_document(0).unwrap();
        writer.commit(CommitOptions::without_merge()).unwrap();

        // The old snapshot still sees document 0.
        assert!(!reader.is_deleted(0).unwrap());
        assert!(reader.is_stale());
        let fresh = reader.reopen().unwrap();
        assert!(fresh.is_deleted(0).unwrap());
        assert_eq!(fresh.all_doc_ids().collect::<Vec<_>>(), vec![1]);
        let postings = fresh.postings("content", b"dd").unwrap().unwrap();
        assert_eq!(postings.id().unwrap(), 1);
        assert_eq!(fresh.doc_frequency("content", b"dd").unwrap(), 2);
    }
}

//! Scoring models.
//!
//! A [`Weighting`] turns the statistics of one term in one document into a
//! score. Statistics are gathered over the whole snapshot, so a document
//! scores the same whichever segment it lives in.

use std::fmt::Debug;

/// Index-wide statistics of one term.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TermStatistics {
    /// Documents containing the term, deleted ones included.
    pub doc_frequency: u64,
    /// Sum of the term's weights over those documents.
    pub total_weight: f64,
}

/// Index-wide statistics of the queried field.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CollectionStatistics {
    /// Live documents.
    pub doc_count: u64,
    /// Documents including deleted ones.
    pub doc_count_all: u64,
    /// Mean field length over all documents.
    pub avg_field_length: f64,
}

/// A scoring function over term and collection statistics.
pub trait Weighting: Send + Sync + Debug {
    /// Score of one term in one document.
    ///
    /// `weight_in_doc` is the posting weight (the term frequency for plain
    /// tokens) and `field_length` the document's length of the field, 0
    /// when the field records no lengths.
    fn score(
        &self,
        term: &TermStatistics,
        weight_in_doc: f32,
        field_length: u32,
        collection: &CollectionStatistics,
    ) -> f32;

    fn name(&self) -> &str;
}

/// Okapi BM25.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bm25 {
    /// Term frequency saturation.
    pub k1: f32,
    /// Field length normalization.
    pub b: f32,
}

impl Bm25 {
    pub fn new(k1: f32, b: f32) -> Self {
        Bm25 { k1, b }
    }

    /// `ln(1 + (N - df + 0.5) / (df + 0.5))`, never negative.
    pub fn idf(doc_frequency: u64, doc_count: u64) -> f32 {
        let n = doc_count as f64;
        let df = doc_frequency as f64;
        (1.0 + (n - df + 0.5) / (df + 0.5)).ln().max(0.0) as f32
    }
}

impl Default for Bm25 {
    fn default() -> Self {
        Bm25 { k1: 1.2, b: 0.75 }
    }
}

impl Weighting for Bm25 {
    fn score(
        &self,
        term: &TermStatistics,
        weight_in_doc: f32,
        field_length: u32,
        collection: &CollectionStatistics,
    ) -> f32 {
        let idf = Bm25::idf(term.doc_frequency, collection.doc_count_all);
        let norm = if collection.avg_field_length > 0.0 {
            let ratio = field_length as f64 / collection.avg_field_length;
            self.k1 * (1.0 - self.b + self.b * ratio as f32)
        } else {
            self.k1
        };
        idf * (weight_in_doc * (self.k1 + 1.0)) / (weight_in_doc + norm)
    }

    fn name(&self) -> &str {
        "bm25"
    }
}

/// Classic tf·idf: `w * (ln(N / (df + 1)) + 1)`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TfIdf;

impl Weighting for TfIdf {
    fn score(
        &self,
        term: &TermStatistics,
        weight_in_doc: f32,
        _field_length: u32,
        collection: &CollectionStatistics,
    ) -> f32 {
        let n = collection.doc_count_all as f64;
        let idf = (n / (term.doc_frequency as f64 + 1.0)).ln() + 1.0;
        weight_in_doc * idf as f32
    }

    fn name(&self) -> &str {
        "tf_idf"
    }
}

/// The raw posting weight.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Frequency;

impl Weighting for Frequency {
    fn score(
        &self,
        _term: &TermStatistics,
        weight_in_doc: f32,
        _field_length: u32,
        _collection: &CollectionStatistics,
    ) -> f32 {
        weight_in_doc
    }

    fn name(&self) -> &str {
        "frequency"
    }
}

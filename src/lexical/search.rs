//! Search execution.
//!
//! A [`Searcher`] compiles a query against each segment of a reader
//! snapshot, scores matches with a [`Weighting`](scoring::Weighting) and
//! feeds them to a collector. A [`SearchRequest`] adds filtering,
//! collapsing and multi-key sorting on top of a query.

pub mod request;
pub mod scoring;
pub mod searcher;

pub use request::{ResultsPage, SearchParams, SearchRequest};
pub use scoring::{Bm25, CollectionStatistics, Frequency, TermStatistics, TfIdf, Weighting};
pub use searcher::{SearchOutcome, SearchResults, Searcher};

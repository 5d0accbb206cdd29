//! Lexical search over segmented inverted indexes.
//!
//! [`core`] holds the on-disk building blocks of a segment, [`index`] the
//! writer side and generation management, [`reader`] the snapshot view over
//! all segments, and [`query`] with [`search`] the matching and scoring.

// On-disk structures
pub mod core;

// Writing and publishing
pub mod index;

// Reading and searching
pub mod query;
pub mod reader;
pub mod search;

pub use index::{AsyncWriter, CommitOptions, CommitSummary, Index, IndexWriter, WriteBatch};
pub use query::{Collapse, Collector, DocSet, Hit, Query, SortKey};
pub use reader::{IndexReader, MultiPostings, TermStats};
pub use search::{ResultsPage, SearchOutcome, SearchRequest, SearchResults, Searcher};

//! # Strata
//!
//! A segment-based full-text index core for Rust.
//!
//! ## Features
//!
//! - Block-indexed term dictionary with prefix-compressed keys
//! - Block-encoded postings with skip data and inline single postings
//! - Stored fields, term vectors and per-document columns
//! - Immutable segments with tiered merging and deletion bitmaps
//! - Atomic generations through a JSON table of contents
//! - Snapshot readers with reference-counted file reclamation
//! - Term, prefix, range, phrase and boolean queries with BM25 scoring
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use strata::prelude::*;
//!
//! # fn main() -> strata::error::Result<()> {
//! let schema = Schema::new()
//!     .with_field("id", FieldConfig::id().unique(true))?
//!     .with_field("body", FieldConfig::text())?;
//! let index = Index::create(Arc::new(MemoryStorage::new()), schema, IndexConfig::default())?;
//!
//! let mut writer = index.writer()?;
//! writer.add_document(
//!     DocumentBuilder::new()
//!         .add_keyword("id", "1")
//!         .add_text("body", "hello segmented world")
//!         .build(),
//! )?;
//! writer.commit(CommitOptions::default())?;
//!
//! let results = index.searcher()?.search(&Query::term("body", "hello"), 10)?;
//! assert_eq!(results.doc_ids(), vec![0]);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod document;
pub mod error;
pub mod lexical;
pub mod schema;
pub mod storage;
pub mod util;

pub mod prelude {
    pub use crate::config::{IndexConfig, WriterConfig};
    pub use crate::document::{Document, DocumentBuilder, Token};
    pub use crate::error::{Result, StrataError, Termination};
    pub use crate::lexical::index::{AsyncWriter, CommitOptions, CommitSummary, Index, IndexWriter, WriteBatch};
    pub use crate::lexical::query::{Collapse, Collector, DocSet, Hit, Query, SortKey};
    pub use crate::lexical::reader::IndexReader;
    pub use crate::lexical::search::{ResultsPage, SearchOutcome, SearchRequest, SearchResults, Searcher};
    pub use crate::schema::{FieldConfig, PostingFormat, Schema};
    pub use crate::storage::{FileStorage, MemoryStorage, Storage};
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Segment engine: writing, merging and publishing generations.
//!
//! An [`Index`] owns the current generation of a storage. An
//! [`IndexWriter`] builds the next one from buffered documents, deletions
//! and merges, and publishes it atomically through the table of contents.

pub mod async_writer;
pub mod buffer;
pub mod builder;
#[allow(clippy::module_inception)]
pub mod index;
pub mod merge_policy;
pub mod merger;
pub mod refs;
pub mod segment;
pub mod toc;
pub mod writer;

pub use async_writer::{AsyncWriter, BatchResult, CommitHandle, WriteBatch, WriteOp};
pub use index::{Index, WRITE_LOCK};
pub use merge_policy::{MergeCandidate, MergePolicy, MergeReason, NoMergePolicy, TieredMergePolicy};
pub use segment::{FieldStats, SegmentInfo, SegmentReader};
pub use toc::Toc;
pub use writer::{CommitOptions, CommitSummary, IndexWriter, WriterState};

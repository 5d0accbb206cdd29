//! On-disk building blocks of a segment.

pub mod column;
pub mod deletion;
pub mod posting;
pub mod stored;
pub mod terms;

pub use column::{ColumnAccessor, ColumnKind, ColumnValue, ColumnsBuilder, ColumnsReader};
pub use deletion::DeletionBitmap;
pub use posting::{DocId, Posting, PostingMatcher};
pub use stored::{RecordReader, RecordWriter, StoredFields, TermVectors};
pub use terms::{
    KeyIter, PostingsRef, TermCursor, TermDictionary, TermDictionaryWriter, TermInfo, TermIter, TermMerge,
};

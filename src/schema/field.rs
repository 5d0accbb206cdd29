//! Field configuration.

use serde::{Deserialize, Serialize};

use crate::lexical::core::column::ColumnKind;

/// What a field's postings record for each document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PostingFormat {
    /// Only the fact that the document contains the term.
    Existence,
    /// A weight per document (sum of token boosts).
    Frequency,
    /// Weight plus token positions.
    Positions,
    /// Weight, positions, and an opaque value holding character offsets.
    PositionsWithPayload,
}

impl PostingFormat {
    pub fn has_weights(&self) -> bool {
        !matches!(self, PostingFormat::Existence)
    }

    pub fn has_positions(&self) -> bool {
        matches!(
            self,
            PostingFormat::Positions | PostingFormat::PositionsWithPayload
        )
    }

    pub fn has_values(&self) -> bool {
        matches!(self, PostingFormat::PositionsWithPayload)
    }

    pub(crate) fn code(&self) -> u8 {
        match self {
            PostingFormat::Existence => 0,
            PostingFormat::Frequency => 1,
            PostingFormat::Positions => 2,
            PostingFormat::PositionsWithPayload => 3,
        }
    }

    pub(crate) fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(PostingFormat::Existence),
            1 => Some(PostingFormat::Frequency),
            2 => Some(PostingFormat::Positions),
            3 => Some(PostingFormat::PositionsWithPayload),
            _ => None,
        }
    }
}

/// How one field is stored, indexed and made sortable.
///
/// ```
/// use strata::schema::{FieldConfig, PostingFormat};
///
/// let title = FieldConfig::text().stored(true);
/// assert_eq!(title.indexed, Some(PostingFormat::Positions));
///
/// let key = FieldConfig::id().unique(true);
/// assert!(key.unique && key.stored);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldConfig {
    /// Keep the field's value in the stored-fields record.
    pub stored: bool,
    /// Posting format, or `None` when the field is not searchable.
    pub indexed: Option<PostingFormat>,
    /// Keep a per-document term vector.
    pub vector: bool,
    /// Keep a per-document column value of this kind.
    pub column: Option<ColumnKind>,
    /// Adding a document deletes earlier documents with the same terms.
    pub unique: bool,
    /// Record per-document field lengths for length-normalized scoring.
    pub scorable: bool,
}

impl FieldConfig {
    /// A field that is neither stored nor indexed; use the builders.
    pub fn new() -> Self {
        FieldConfig {
            stored: false,
            indexed: None,
            vector: false,
            column: None,
            unique: false,
            scorable: false,
        }
    }

    /// Full-text field with positions and field lengths.
    pub fn text() -> Self {
        FieldConfig::new()
            .indexed(PostingFormat::Positions)
            .scorable(true)
    }

    /// Keyword field: indexed with frequencies only, stored.
    pub fn keyword() -> Self {
        FieldConfig::new()
            .indexed(PostingFormat::Frequency)
            .stored(true)
    }

    /// Identifier field: existence postings, stored.
    pub fn id() -> Self {
        FieldConfig::new()
            .indexed(PostingFormat::Existence)
            .stored(true)
    }

    /// Stored-only field.
    pub fn stored_only() -> Self {
        FieldConfig::new().stored(true)
    }

    /// Numeric field: existence postings over order-preserving terms plus an
    /// integer column for sorting.
    pub fn numeric() -> Self {
        FieldConfig::new()
            .indexed(PostingFormat::Existence)
            .column(ColumnKind::Int)
            .stored(true)
    }

    pub fn stored(mut self, stored: bool) -> Self {
        self.stored = stored;
        self
    }

    pub fn indexed(mut self, format: PostingFormat) -> Self {
        self.indexed = Some(format);
        self
    }

    pub fn vector(mut self, vector: bool) -> Self {
        self.vector = vector;
        self
    }

    pub fn column(mut self, kind: ColumnKind) -> Self {
        self.column = Some(kind);
        self
    }

    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    pub fn scorable(mut self, scorable: bool) -> Self {
        self.scorable = scorable;
        self
    }

    pub fn is_indexed(&self) -> bool {
        self.indexed.is_some()
    }
}

impl Default for FieldConfig {
    fn default() -> Self {
        FieldConfig::new()
    }
}

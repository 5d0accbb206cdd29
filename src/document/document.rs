//! Documents handed to the index writer.

use std::fmt;

use crate::document::field_value::FieldValue;
use crate::document::token::{Token, TokenStream, tokens_from_words};
use crate::lexical::core::column::ColumnValue;

/// Everything supplied for one field of one document.
#[derive(Default)]
pub struct FieldInput {
    /// Token streams to index; each is consumed exactly once.
    pub tokens: Vec<TokenStream>,
    /// Value for the stored-fields record.
    pub stored: Option<FieldValue>,
    /// Value for the field's column.
    pub column: Option<ColumnValue>,
}

impl fmt::Debug for FieldInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldInput")
            .field("tokens", &format!("<{} streams>", self.tokens.len()))
            .field("stored", &self.stored)
            .field("column", &self.column)
            .finish()
    }
}

/// A document: per-field token streams, stored values and column values.
///
/// Fields keep the order in which they were first added.
#[derive(Debug, Default)]
pub struct Document {
    fields: Vec<(String, FieldInput)>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> DocumentBuilder {
        DocumentBuilder::new()
    }

    fn entry(&mut self, name: &str) -> &mut FieldInput {
        let index = match self.fields.iter().position(|(n, _)| n == name) {
            Some(index) => index,
            None => {
                self.fields.push((name.to_string(), FieldInput::default()));
                self.fields.len() - 1
            }
        };
        &mut self.fields[index].1
    }

    /// Add a token stream to index under `name`.
    pub fn add_tokens<I>(&mut self, name: &str, tokens: I)
    where
        I: IntoIterator<Item = Token>,
        I::IntoIter: Send + 'static,
    {
        self.entry(name).tokens.push(Box::new(tokens.into_iter()));
    }

    /// Set the stored value of `name`.
    pub fn set_stored(&mut self, name: &str, value: impl Into<FieldValue>) {
        self.entry(name).stored = Some(value.into());
    }

    /// Set the column value of `name`.
    pub fn set_column(&mut self, name: &str, value: ColumnValue) {
        self.entry(name).column = Some(value);
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn get(&self, name: &str) -> Option<&FieldInput> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, f)| f)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub(crate) fn into_fields(self) -> Vec<(String, FieldInput)> {
        self.fields
    }
}

/// Fluent construction of [`Document`]s.
///
/// ```
/// use strata::document::Document;
///
/// let doc = Document::builder()
///     .add_text("title", "alfa bravo")
///     .add_keyword("id", "1")
///     .build();
/// assert_eq!(doc.field_names().collect::<Vec<_>>(), vec!["title", "id"]);
/// ```
#[derive(Debug, Default)]
pub struct DocumentBuilder {
    document: Document,
}

impl DocumentBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index pre-split words; the text is also stored when the field is
    /// configured as stored.
    pub fn add_text(mut self, name: &str, text: &str) -> Self {
        self.document.add_tokens(name, tokens_from_words(text));
        self.document.set_stored(name, text);
        self
    }

    /// Index a single untokenized term and store it.
    pub fn add_keyword(mut self, name: &str, value: &str) -> Self {
        let token = Token::new(value.as_bytes(), 0).with_offsets(0, value.len() as u32);
        self.document.add_tokens(name, vec![token]);
        self.document.set_stored(name, value);
        self
    }

    /// Index an integer with an order-preserving term, keep it as a column
    /// value and store it.
    pub fn add_integer(mut self, name: &str, value: i64) -> Self {
        let token = Token::new(crate::util::numeric::encode_i64(value).to_vec(), 0);
        self.document.add_tokens(name, vec![token]);
        self.document.set_column(name, ColumnValue::Int(value));
        self.document.set_stored(name, value);
        self
    }

    pub fn add_tokens<I>(mut self, name: &str, tokens: I) -> Self
    where
        I: IntoIterator<Item = Token>,
        I::IntoIter: Send + 'static,
    {
        self.document.add_tokens(name, tokens);
        self
    }

    pub fn stored(mut self, name: &str, value: impl Into<FieldValue>) -> Self {
        self.document.set_stored(name, value);
        self
    }

    pub fn column(mut self, name: &str, value: ColumnValue) -> Self {
        self.document.set_column(name, value);
        self
    }

    pub fn build(self) -> Document {
        self.document
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_merges_same_field() {
        let doc = Document::builder()
            .add_text("body", "alfa bravo")
            .column("body", ColumnValue::Bytes(b"x".to_vec()))
            .add_keyword("id", "7")
            .build();

        assert_eq!(doc.len(), 2);
        let body = doc.get("body").unwrap();
        assert_eq!(body.tokens.len(), 1);
        assert_eq!(body.stored, Some(FieldValue::Text("alfa bravo".into())));
        assert!(body.column.is_some());
        assert!(doc.get("missing").is_none());
    }

    #[test]
    fn test_integer_field() {
        let mut fields = Document::builder().add_integer("n", 10).build().into_fields();
        let (name, mut input) = fields.remove(0);
        assert_eq!(name, "n");
        let token = input.tokens.remove(0).next().unwrap();
        assert_eq!(token.text, crate::util::numeric::encode_i64(10).to_vec());
        assert_eq!(input.column, Some(ColumnValue::Int(10)));
    }
}

//! Documents, stored values and analyzer tokens.

#[allow(clippy::module_inception)]
pub mod document;
pub mod field_value;
pub mod token;

pub use document::{Document, DocumentBuilder, FieldInput};
pub use field_value::FieldValue;
pub use token::{Token, TokenStream, tokens_from_words};

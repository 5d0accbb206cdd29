//! Schema definition: field names and their storage/indexing options.

pub mod field;
#[allow(clippy::module_inception)]
pub mod schema;

pub use field::{FieldConfig, PostingFormat};
pub use schema::Schema;

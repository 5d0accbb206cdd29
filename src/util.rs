//! Low-level encoding utilities shared by every on-disk structure.

pub mod numeric;
pub mod prefix;
pub mod varint;

pub use prefix::{PrefixDecoder, PrefixEncoder};

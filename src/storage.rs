//! Storage abstraction layer.
//!
//! Index files are addressed by name inside a [`Storage`]; the file system
//! backend keeps them in one directory, the memory backend in a map.

pub mod file;
pub mod memory;
pub mod structured;
pub mod traits;

pub use file::FileStorage;
pub use memory::MemoryStorage;
pub use structured::{SliceReader, StructWriter, verify_checksum};
pub use traits::*;

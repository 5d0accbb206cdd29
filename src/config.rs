//! Index configuration.
//!
//! Every struct has working defaults, so a configuration file only needs the
//! values it changes:
//!
//! ```
//! use strata::config::IndexConfig;
//!
//! let config = IndexConfig::from_json(r#"{ "writer": { "max_buffered_docs": 500 } }"#).unwrap();
//! assert_eq!(config.writer.max_buffered_docs, 500);
//! assert_eq!(config.writer.posting_block_size, 128);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StrataError};
use crate::lexical::core::posting::DEFAULT_BLOCK_SIZE;
use crate::lexical::core::terms::DEFAULT_DICTIONARY_BLOCK_SIZE;
use crate::lexical::index::merge_policy::TieredMergePolicy;

/// Settings of an index handle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Segment writing and buffering.
    pub writer: WriterConfig,

    /// Merge policy applied by `commit` when merging is requested.
    pub merge_policy: TieredMergePolicy,

    /// How long background writers wait for the write lock, in milliseconds.
    pub lock_timeout_ms: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        IndexConfig {
            writer: WriterConfig::default(),
            merge_policy: TieredMergePolicy::default(),
            lock_timeout_ms: 5_000,
        }
    }
}

impl IndexConfig {
    /// Parse a configuration from JSON; missing keys take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: IndexConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        self.writer.validate()?;
        self.merge_policy.validate()
    }
}

/// Settings of the segment writer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    /// Buffered documents that trigger a flush to an uncommitted segment.
    pub max_buffered_docs: usize,

    /// Postings per block in the postings file.
    pub posting_block_size: usize,

    /// Entries per block in the term dictionary.
    pub dictionary_block_size: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        WriterConfig {
            max_buffered_docs: 10_000,
            posting_block_size: DEFAULT_BLOCK_SIZE,
            dictionary_block_size: DEFAULT_DICTIONARY_BLOCK_SIZE,
        }
    }
}

impl WriterConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_buffered_docs == 0 {
            return Err(StrataError::invalid_argument("max_buffered_docs must be positive"));
        }
        if self.posting_block_size == 0 || self.dictionary_block_size == 0 {
            return Err(StrataError::invalid_argument("block sizes must be positive"));
        }
        Ok(())
    }
}

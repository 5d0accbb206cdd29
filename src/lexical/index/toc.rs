//! Table of contents: the committed state of an index.
//!
//! Every commit writes `_toc_<generation>.json`. The file is written under a
//! temporary name first and renamed into place, so a crash leaves either the
//! old or the new generation, never a partial one. The highest generation
//! present in storage is the current one.

use std::collections::BTreeSet;
use std::io::Write;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, StrataError};
use crate::lexical::index::segment::SegmentInfo;
use crate::schema::Schema;
use crate::storage::Storage;

/// Format version written by this crate.
pub const TOC_VERSION: u32 = 1;

const TOC_PREFIX: &str = "_toc_";
const TOC_SUFFIX: &str = ".json";

/// One immutable generation of an index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Toc {
    pub version: u32,
    pub generation: u64,
    pub schema: Schema,
    /// Segments in global document id order.
    pub segments: Vec<SegmentInfo>,
    /// Source of new segment names.
    pub segment_counter: u64,
    pub committed_at: DateTime<Utc>,
}

impl Toc {
    /// Generation 0 of a new index.
    pub fn empty(schema: Schema) -> Self {
        Toc {
            version: TOC_VERSION,
            generation: 0,
            schema,
            segments: Vec::new(),
            segment_counter: 0,
            committed_at: Utc::now(),
        }
    }

    pub fn file_name(generation: u64) -> String {
        format!("{TOC_PREFIX}{generation}{TOC_SUFFIX}")
    }

    /// Parse the generation out of a TOC file name.
    pub fn parse_file_name(name: &str) -> Option<u64> {
        name.strip_prefix(TOC_PREFIX)?
            .strip_suffix(TOC_SUFFIX)?
            .parse()
            .ok()
    }

    pub fn doc_count_all(&self) -> u64 {
        self.segments.iter().map(|s| s.doc_count_all as u64).sum()
    }

    pub fn doc_count(&self) -> u64 {
        self.segments.iter().map(|s| s.doc_count() as u64).sum()
    }

    /// Every file of this generation, its own TOC file included.
    pub fn files(&self) -> BTreeSet<String> {
        let mut files: BTreeSet<String> = self.segments.iter().flat_map(|s| s.files()).collect();
        files.insert(Toc::file_name(self.generation));
        files
    }

    /// Write this generation atomically.
    pub fn write(&self, storage: &dyn Storage) -> Result<()> {
        let name = Toc::file_name(self.generation);
        let temp = format!("{name}.tmp");
        let json = serde_json::to_vec_pretty(self)?;

        let mut output = storage.create_output(&temp)?;
        output.write_all(&json)?;
        output.flush_and_sync()?;
        output.close()?;

        if let Err(e) = storage.rename_file(&temp, &name) {
            let _ = storage.delete_file(&temp);
            return Err(e);
        }
        storage.sync()?;
        debug!(generation = self.generation, file = %name, "wrote table of contents");
        Ok(())
    }

    pub fn read(storage: &dyn Storage, generation: u64) -> Result<Self> {
        let name = Toc::file_name(generation);
        let data = storage.read_all(&name)?;
        let toc: Toc = serde_json::from_slice(&data)
            .map_err(|e| StrataError::corrupt(format!("{name}: {e}")))?;
        if toc.version != TOC_VERSION {
            return Err(StrataError::corrupt(format!(
                "{name}: unsupported format version {}",
                toc.version
            )));
        }
        if toc.generation != generation {
            return Err(StrataError::corrupt(format!(
                "{name}: records generation {}",
                toc.generation
            )));
        }
        Ok(toc)
    }

    /// Highest generation present in storage.
    pub fn latest_generation(storage: &dyn Storage) -> Result<Option<u64>> {
        Ok(storage
            .list_files()?
            .iter()
            .filter_map(|name| Toc::parse_file_name(name))
            .max())
    }

    pub fn load_latest(storage: &dyn Storage) -> Result<Option<Self>> {
        match Toc::latest_generation(storage)? {
            Some(generation) => Ok(Some(Toc::read(storage, generation)?)),
            None => Ok(None),
        }
    }
}

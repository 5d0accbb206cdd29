//! Index handle: the published generation, the write lock and the file
//! lease table shared by every reader and writer of one storage.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::config::IndexConfig;
use crate::error::{Result, StrataError};
use crate::lexical::index::refs::{FileLease, FileRefs};
use crate::lexical::index::segment::{SegmentInfo, SegmentReader};
use crate::lexical::index::toc::Toc;
use crate::lexical::index::writer::IndexWriter;
use crate::lexical::reader::IndexReader;
use crate::lexical::search::Searcher;
use crate::schema::Schema;
use crate::storage::{Storage, StorageLock};

/// Name of the exclusive writer lock.
pub const WRITE_LOCK: &str = "WRITELOCK";

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A published generation with its shared schema.
#[derive(Debug, Clone)]
pub(crate) struct Snapshot {
    pub toc: Arc<Toc>,
    pub schema: Arc<Schema>,
}

#[derive(Debug)]
struct IndexInner {
    storage: Arc<dyn Storage>,
    config: IndexConfig,
    current: RwLock<Snapshot>,
    refs: Arc<FileRefs>,
    /// Open segment readers, shared between snapshots.
    segments: Mutex<HashMap<(String, u64), Weak<SegmentReader>>>,
}

/// Handle on one index. Cheap to clone; clones share state.
///
/// Open each storage through a single `Index` (and its clones) per process:
/// file leases are tracked per handle.
#[derive(Debug, Clone)]
pub struct Index {
    inner: Arc<IndexInner>,
}

impl Index {
    /// Create a new index holding an empty generation 0.
    pub fn create(storage: Arc<dyn Storage>, schema: Schema, config: IndexConfig) -> Result<Self> {
        config.validate()?;
        if Toc::latest_generation(storage.as_ref())?.is_some() {
            return Err(StrataError::invalid_state("an index already exists in this storage"));
        }
        let toc = Toc::empty(schema);
        toc.write(storage.as_ref())?;
        info!(fields = toc.schema.len(), "created index");
        Ok(Index::with_toc(storage, toc, config))
    }

    /// Open the latest generation of an existing index.
    pub fn open(storage: Arc<dyn Storage>, config: IndexConfig) -> Result<Self> {
        config.validate()?;
        let toc = Toc::load_latest(storage.as_ref())?
            .ok_or_else(|| StrataError::storage("no index found in this storage"))?;
        debug!(generation = toc.generation, segments = toc.segments.len(), "opened index");
        Ok(Index::with_toc(storage, toc, config))
    }

    /// Open the index in `storage`, creating it with `schema` if absent.
    pub fn open_or_create(storage: Arc<dyn Storage>, schema: Schema, config: IndexConfig) -> Result<Self> {
        if Index::exists(storage.as_ref())? {
            Index::open(storage, config)
        } else {
            Index::create(storage, schema, config)
        }
    }

    pub fn exists(storage: &dyn Storage) -> Result<bool> {
        Ok(Toc::latest_generation(storage)?.is_some())
    }

    fn with_toc(storage: Arc<dyn Storage>, toc: Toc, config: IndexConfig) -> Self {
        let schema = Arc::new(toc.schema.clone());
        let refs = Arc::new(FileRefs::new(Arc::clone(&storage)));
        Index {
            inner: Arc::new(IndexInner {
                storage,
                config,
                current: RwLock::new(Snapshot {
                    toc: Arc::new(toc),
                    schema,
                }),
                refs,
                segments: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.inner.storage
    }

    pub fn config(&self) -> &IndexConfig {
        &self.inner.config
    }

    /// Schema of the current generation.
    pub fn schema(&self) -> Arc<Schema> {
        Arc::clone(&self.inner.current.read().schema)
    }

    /// Current generation number.
    pub fn generation(&self) -> u64 {
        self.inner.current.read().toc.generation
    }

    /// A reader over the current generation.
    pub fn reader(&self) -> Result<IndexReader> {
        IndexReader::open(self)
    }

    /// A searcher over the current generation, scoring with BM25.
    pub fn searcher(&self) -> Result<Searcher> {
        Ok(Searcher::new(self.reader()?))
    }

    /// Acquire the writer, failing immediately if another writer holds it.
    pub fn writer(&self) -> Result<IndexWriter> {
        match self.try_lock()? {
            Some(lock) => IndexWriter::new(self.clone(), lock),
            None => Err(StrataError::index_locked("the index is locked by another writer")),
        }
    }

    /// Acquire the writer, polling until `timeout` has passed.
    pub fn writer_with_timeout(&self, timeout: Duration) -> Result<IndexWriter> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(lock) = self.try_lock()? {
                return IndexWriter::new(self.clone(), lock);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(StrataError::index_locked(format!(
                    "the index is still locked after {timeout:?}"
                )));
            }
            thread::sleep(LOCK_POLL_INTERVAL.min(deadline - now));
        }
    }

    fn try_lock(&self) -> Result<Option<Box<dyn StorageLock>>> {
        self.inner.storage.lock_manager().try_acquire_lock(WRITE_LOCK)
    }

    /// Pick up a generation committed through another handle. Returns true
    /// when the current generation changed.
    pub fn refresh(&self) -> Result<bool> {
        let latest = Toc::latest_generation(self.inner.storage.as_ref())?;
        match latest {
            Some(generation) if generation > self.generation() => {
                let toc = Toc::read(self.inner.storage.as_ref(), generation)?;
                self.publish(toc);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Current snapshot plus a lease on its files, taken under the same
    /// read lock so no commit can retire them in between.
    pub(crate) fn acquire(&self) -> (Snapshot, FileLease) {
        let current = self.inner.current.read();
        let lease = self.inner.refs.lease(current.toc.files());
        (current.clone(), lease)
    }

    pub(crate) fn refs(&self) -> &Arc<FileRefs> {
        &self.inner.refs
    }

    /// Make `toc` the current generation and retire the files of the
    /// previous one that it no longer references.
    pub(crate) fn publish(&self, toc: Toc) {
        let new_files = toc.files();
        let generation = toc.generation;
        let previous = {
            let mut current = self.inner.current.write();
            let schema = if current.schema.as_ref() == &toc.schema {
                Arc::clone(&current.schema)
            } else {
                Arc::new(toc.schema.clone())
            };
            std::mem::replace(
                &mut *current,
                Snapshot {
                    toc: Arc::new(toc),
                    schema,
                },
            )
        };
        let retired: Vec<String> = previous
            .toc
            .files()
            .into_iter()
            .filter(|file| !new_files.contains(file))
            .collect();
        debug!(generation, retired = retired.len(), "published generation");
        self.inner.refs.retire(retired);
    }

    /// Open segment reader for `info` under `schema`, shared with other
    /// snapshots of the same segment state.
    pub(crate) fn segment_reader(&self, info: &SegmentInfo, schema: &Arc<Schema>) -> Result<Arc<SegmentReader>> {
        let key = (info.name.clone(), info.del_gen);
        let mut cache = self.inner.segments.lock();
        if let Some(reader) = cache.get(&key).and_then(Weak::upgrade) {
            if Arc::ptr_eq(reader.schema(), schema) {
                return Ok(reader);
            }
        }
        let reader = Arc::new(SegmentReader::open(
            self.inner.storage.as_ref(),
            info.clone(),
            Arc::clone(schema),
        )?);
        cache.retain(|_, weak| weak.strong_count() > 0);
        cache.insert(key, Arc::downgrade(&reader));
        Ok(reader)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldConfig;
    use crate::storage::MemoryStorage;

    fn schema() -> Schema {
        Schema::new().with_field("body", FieldConfig::text()).unwrap()
    }

    #[test]
    fn test_create_and_open() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        assert!(!Index::exists(storage.as_ref()).unwrap());

        let index = Index::create(Arc::clone(&storage), schema(), IndexConfig::default()).unwrap();
        assert_eq!(index.generation(), 0);
        assert!(index.schema().contains("body"));

        let err = Index::create(Arc::clone(&storage), schema(), IndexConfig::default()).unwrap_err();
        assert!(matches!(err, StrataError::InvalidState(_)));

        let reopened = Index::open(storage, IndexConfig::default()).unwrap();
        assert_eq!(reopened.generation(), 0);
    }

    #[test]
    fn test_open_missing_index() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        assert!(Index::open(storage, IndexConfig::default()).is_err());
    }

    #[test]
    fn test_writer_lock_is_exclusive() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let index = Index::create(storage, schema(), IndexConfig::default()).unwrap();
        let mut writer = index.writer().unwrap();
        let err = index.writer().unwrap_err();
        assert!(err.is_retryable());

        let started = Instant::now();
        let err = index.writer_with_timeout(Duration::from_millis(50)).unwrap_err();
        assert!(matches!(err, StrataError::IndexLocked(_)));
        assert!(started.elapsed() >= Duration::from_millis(50));

        writer.cancel().unwrap();
        assert!(index.writer().is_ok());
    }

    #[test]
    fn test_refresh_picks_up_other_handles() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let first = Index::create(Arc::clone(&storage), schema(), IndexConfig::default()).unwrap();
        let second = Index::open(Arc::clone(&storage), IndexConfig::default()).unwrap();

        let mut writer = second.writer().unwrap();
        writer.add_field("title", FieldConfig::keyword()).unwrap();
        writer.commit(Default::default()).unwrap();

        assert_eq!(first.generation(), 0);
        assert!(first.refresh().unwrap());
        assert_eq!(first.generation(), 1);
        assert!(first.schema().contains("title"));
        assert!(!first.refresh().unwrap());
    }
}

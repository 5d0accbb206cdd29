//! The single writer of an index.
//!
//! A writer starts from the current generation, buffers added documents in
//! memory, flushes them to uncommitted segments when the buffer is full and
//! publishes everything as a new generation on [`IndexWriter::commit`].
//! It holds the index write lock for its whole life and moves through
//! `Open -> Committed | Cancelled`; once it left `Open` every mutating call
//! fails with [`StrataError::InvalidState`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::document::Document;
use crate::error::{Result, StrataError};
use crate::lexical::core::deletion::DeletionBitmap;
use crate::lexical::core::posting::DocId;
use crate::lexical::index::buffer::SegmentBuffer;
use crate::lexical::index::builder::remove_segment_files;
use crate::lexical::index::index::Index;
use crate::lexical::index::merge_policy::MergePolicy;
use crate::lexical::index::merger::{MergeInput, SegmentMerger};
use crate::lexical::index::refs::FileLease;
use crate::lexical::index::segment::{SegmentInfo, SegmentReader, data_files, deletion_file, segment_name};
use crate::lexical::index::toc::{TOC_VERSION, Toc};
use crate::schema::{FieldConfig, Schema};
use crate::storage::StorageLock;

/// Lifecycle state of a writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    Open,
    Committed,
    Cancelled,
}

/// How a commit treats the segments of the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitOptions {
    /// Run the merge policy until it proposes nothing.
    pub merge: bool,
    /// Merge every segment into one.
    pub optimize: bool,
    /// Discard every segment committed before this writer started.
    pub clear: bool,
}

impl Default for CommitOptions {
    fn default() -> Self {
        CommitOptions {
            merge: true,
            optimize: false,
            clear: false,
        }
    }
}

impl CommitOptions {
    pub fn optimized() -> Self {
        CommitOptions {
            optimize: true,
            ..Default::default()
        }
    }

    pub fn without_merge() -> Self {
        CommitOptions {
            merge: false,
            ..Default::default()
        }
    }
}

/// Outcome of a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitSummary {
    /// Current generation after the commit.
    pub generation: u64,
    /// False when there was nothing to publish.
    pub changed: bool,
    pub segment_count: usize,
    pub doc_count: u64,
    pub doc_count_all: u64,
    /// Documents added by the writer.
    pub added: u64,
    /// Documents the writer deleted, unique-field replacements included.
    pub deleted: u64,
    /// Merges performed by the commit.
    pub merges: usize,
}

/// Segment as seen by the writer: committed or flushed, with the deletions
/// the writer has applied to it so far.
#[derive(Debug)]
struct PendingSegment {
    info: SegmentInfo,
    reader: Arc<SegmentReader>,
    deletions: DeletionBitmap,
    /// Deletions changed since the segment was loaded.
    dirty: bool,
    /// Written by this writer.
    fresh: bool,
}

impl PendingSegment {
    fn live_count(&self) -> u32 {
        self.deletions.live_count()
    }

    fn current_info(&self) -> SegmentInfo {
        let mut info = self.info.clone();
        info.deleted_count = self.deletions.deleted_count();
        info
    }
}

#[derive(Debug, Clone, Copy)]
enum Location {
    Segment(usize, DocId),
    Buffer(DocId),
}

/// Exclusive writer of an index. Obtained from [`Index::writer`].
#[derive(Debug)]
pub struct IndexWriter {
    index: Index,
    lock: Option<Box<dyn StorageLock>>,
    state: WriterState,
    base: Arc<Toc>,
    base_lease: Option<FileLease>,
    schema: Schema,
    schema_changed: bool,
    segments: Vec<PendingSegment>,
    buffer: SegmentBuffer,
    merge_policy: Arc<dyn MergePolicy>,
    segment_counter: u64,
    created_segments: Vec<String>,
    created_files: Vec<String>,
    added: u64,
    deleted: u64,
}

impl IndexWriter {
    pub(crate) fn new(index: Index, lock: Box<dyn StorageLock>) -> Result<Self> {
        index.refresh()?;
        let (snapshot, lease) = index.acquire();

        let mut segments = Vec::with_capacity(snapshot.toc.segments.len());
        for info in &snapshot.toc.segments {
            let reader = index.segment_reader(info, &snapshot.schema)?;
            let deletions = match reader.deletions() {
                Some(deletions) => deletions.as_ref().clone(),
                None => DeletionBitmap::new(info.doc_count_all),
            };
            segments.push(PendingSegment {
                info: info.clone(),
                reader,
                deletions,
                dirty: false,
                fresh: false,
            });
        }

        remove_orphans(&index, &snapshot.toc)?;
        debug!(generation = snapshot.toc.generation, segments = segments.len(), "acquired index writer");

        Ok(IndexWriter {
            merge_policy: Arc::new(index.config().merge_policy.clone()),
            schema: snapshot.schema.as_ref().clone(),
            segment_counter: snapshot.toc.segment_counter,
            base: snapshot.toc,
            base_lease: Some(lease),
            index,
            lock: Some(lock),
            state: WriterState::Open,
            schema_changed: false,
            segments,
            buffer: SegmentBuffer::new(),
            created_segments: Vec::new(),
            created_files: Vec::new(),
            added: 0,
            deleted: 0,
        })
    }

    pub fn state(&self) -> WriterState {
        self.state
    }

    /// The schema new documents are validated against, pending changes
    /// included.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Generation the writer started from.
    pub fn base_generation(&self) -> u64 {
        self.base.generation
    }

    /// Documents waiting in memory.
    pub fn buffered_docs(&self) -> u32 {
        self.buffer.doc_count()
    }

    /// Live documents as of the writer's pending state.
    pub fn doc_count(&self) -> u64 {
        let committed: u64 = self.segments.iter().map(|s| s.live_count() as u64).sum();
        committed + (self.buffer.doc_count() - self.buffer.deleted_count()) as u64
    }

    /// Replace the policy used by merging commits.
    pub fn set_merge_policy(&mut self, policy: Arc<dyn MergePolicy>) {
        self.merge_policy = policy;
    }

    fn check_open(&self) -> Result<()> {
        match self.state {
            WriterState::Open => Ok(()),
            WriterState::Committed => Err(StrataError::invalid_state(
                "writer is no longer usable: it has been committed",
            )),
            WriterState::Cancelled => Err(StrataError::invalid_state(
                "writer is no longer usable: it has been cancelled",
            )),
        }
    }

    /// Add a document and return its global id.
    ///
    /// Documents sharing a unique field value with this one are deleted
    /// first. A document that fails validation leaves the writer unchanged.
    pub fn add_document(&mut self, document: Document) -> Result<u64> {
        self.check_open()?;
        let staged = self.buffer.stage(&self.schema, document)?;

        let mut replaced = Vec::new();
        for (field, term) in staged.unique_terms() {
            replaced.extend(self.term_locations(field, term)?);
        }
        for location in replaced {
            self.apply_delete(location)?;
        }

        let local = self.buffer.append(staged);
        self.added += 1;
        let global = self.segment_docs() + local as u64;

        if self.buffer.doc_count() as usize >= self.index.config().writer.max_buffered_docs {
            if let Err(e) = self.flush() {
                self.finish(WriterState::Cancelled);
                return Err(e);
            }
        }
        Ok(global)
    }

    /// Add a document replacing those with the same unique field values.
    pub fn update_document(&mut self, document: Document) -> Result<u64> {
        self.add_document(document)
    }

    /// Delete a document by global id. Deleting a deleted document is
    /// accepted; an id that was never assigned is not.
    pub fn delete_document(&mut self, doc_id: u64) -> Result<()> {
        self.check_open()?;
        let location = self.locate(doc_id).ok_or(StrataError::NoSuchDocument(doc_id))?;
        self.apply_delete(location)?;
        Ok(())
    }

    /// Delete every live document containing `term` in `field`. Returns the
    /// number of documents deleted.
    pub fn delete_by_term(&mut self, field: &str, term: &[u8]) -> Result<u64> {
        self.check_open()?;
        if !self.schema.contains(field) {
            return Ok(0);
        }
        let mut count = 0;
        for location in self.term_locations(field, term)? {
            if self.apply_delete(location)? {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Add a field to the schema at the next commit.
    pub fn add_field(&mut self, name: &str, config: FieldConfig) -> Result<()> {
        self.check_open()?;
        self.schema.add_field(name, config)?;
        self.schema_changed = true;
        Ok(())
    }

    /// Remove a field at the next commit. Existing data of the field is
    /// ignored from then on and dropped by merges, also when a field of the
    /// same name is added later.
    ///
    /// Buffered documents are flushed first so that they keep the epoch of
    /// the field they were indexed under.
    pub fn remove_field(&mut self, name: &str) -> Result<()> {
        self.check_open()?;
        self.schema.field(name)?;
        if let Err(e) = self.flush() {
            self.finish(WriterState::Cancelled);
            return Err(e);
        }
        self.schema.remove_field(name)?;
        self.schema_changed = true;
        Ok(())
    }

    fn segment_docs(&self) -> u64 {
        self.segments.iter().map(|s| s.info.doc_count_all as u64).sum()
    }

    fn locate(&self, doc_id: u64) -> Option<Location> {
        let mut base = 0u64;
        for (i, segment) in self.segments.iter().enumerate() {
            let end = base + segment.info.doc_count_all as u64;
            if doc_id < end {
                return Some(Location::Segment(i, (doc_id - base) as DocId));
            }
            base = end;
        }
        (doc_id < base + self.buffer.doc_count() as u64).then(|| Location::Buffer((doc_id - base) as DocId))
    }

    /// Live documents holding `term`, committed and buffered.
    fn term_locations(&self, field: &str, term: &[u8]) -> Result<Vec<Location>> {
        let mut found = Vec::new();
        for (i, segment) in self.segments.iter().enumerate() {
            if !segment.info.has_field(&self.schema, field) {
                continue;
            }
            if let Some(mut postings) = segment.reader.postings(field, term)? {
                while postings.is_active() {
                    let doc = postings.id()?;
                    if !segment.deletions.is_deleted(doc) {
                        found.push(Location::Segment(i, doc));
                    }
                    postings.next()?;
                }
            }
        }
        for doc in self.buffer.docs_with_term(field, term) {
            if !self.buffer.is_deleted(doc) {
                found.push(Location::Buffer(doc));
            }
        }
        Ok(found)
    }

    fn apply_delete(&mut self, location: Location) -> Result<bool> {
        let deleted = match location {
            Location::Segment(i, doc) => {
                let segment = &mut self.segments[i];
                let deleted = segment.deletions.delete_document(doc)?;
                segment.dirty |= deleted;
                deleted
            }
            Location::Buffer(doc) => self.buffer.delete(doc)?,
        };
        if deleted {
            self.deleted += 1;
        }
        Ok(deleted)
    }

    fn next_segment_name(&mut self) -> String {
        self.segment_counter += 1;
        let name = segment_name(self.segment_counter);
        self.created_segments.push(name.clone());
        name
    }

    /// Write the buffer as an uncommitted segment.
    fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let storage = Arc::clone(self.index.storage());
        let name = self.next_segment_name();
        let (info, deletions) =
            self.buffer
                .flush(storage.as_ref(), &name, &self.schema, &self.index.config().writer)?;
        let reader = Arc::new(SegmentReader::open(
            storage.as_ref(),
            info.clone(),
            Arc::new(self.schema.clone()),
        )?);
        debug!(
            segment = %name,
            docs = info.doc_count_all,
            deleted = deletions.deleted_count(),
            "flushed buffered documents"
        );
        self.segments.push(PendingSegment {
            dirty: deletions.has_deletions(),
            info,
            reader,
            deletions,
            fresh: true,
        });
        Ok(())
    }

    /// Merge the segments at `positions` (ascending) into one, placed where
    /// the first of them was.
    fn merge_segments(&mut self, positions: &[usize]) -> Result<()> {
        let storage = Arc::clone(self.index.storage());
        let name = self.next_segment_name();
        let info = {
            let inputs: Vec<MergeInput<'_>> = positions
                .iter()
                .map(|&i| MergeInput::with_deletions(&self.segments[i].reader, &self.segments[i].deletions))
                .collect();
            SegmentMerger::new(storage.as_ref(), &self.schema, &self.index.config().writer)
                .merge(&inputs, &name)?
        };
        let reader = Arc::new(SegmentReader::open(
            storage.as_ref(),
            info.clone(),
            Arc::new(self.schema.clone()),
        )?);

        for &i in positions.iter().rev() {
            self.segments.remove(i);
        }
        self.segments.insert(
            positions[0],
            PendingSegment {
                deletions: DeletionBitmap::new(info.doc_count_all),
                info,
                reader,
                dirty: false,
                fresh: true,
            },
        );
        Ok(())
    }

    fn run_merge_policy(&mut self) -> Result<usize> {
        let policy = Arc::clone(&self.merge_policy);
        let mut merges = 0;
        loop {
            let infos: Vec<SegmentInfo> = self.segments.iter().map(PendingSegment::current_info).collect();
            let candidates = policy.select_merges(&infos);
            if candidates.is_empty() {
                return Ok(merges);
            }
            for candidate in candidates {
                let positions: BTreeMap<&str, usize> = self
                    .segments
                    .iter()
                    .enumerate()
                    .map(|(i, s)| (s.info.name.as_str(), i))
                    .collect();
                let mut selected: Vec<usize> = candidate
                    .segments
                    .iter()
                    .filter_map(|name| positions.get(name.as_str()).copied())
                    .collect();
                selected.sort_unstable();
                selected.dedup();
                if selected.is_empty() {
                    continue;
                }
                debug!(segments = ?candidate.segments, reason = ?candidate.reason, "merging segments");
                self.merge_segments(&selected)?;
                merges += 1;
            }
        }
    }

    /// Publish the writer's changes as a new generation and release the
    /// lock. When nothing changed no generation is written.
    ///
    /// On failure the previous generation stays current, files written by
    /// the writer are removed and the writer is cancelled.
    pub fn commit(&mut self, options: CommitOptions) -> Result<CommitSummary> {
        self.check_open()?;
        match self.commit_inner(options) {
            Ok(summary) => {
                self.finish(WriterState::Committed);
                Ok(summary)
            }
            Err(e) => {
                warn!(error = %e, "commit failed; cancelling writer");
                self.finish(WriterState::Cancelled);
                Err(e)
            }
        }
    }

    /// Commit with every segment merged into one.
    pub fn optimize(&mut self) -> Result<CommitSummary> {
        self.commit(CommitOptions::optimized())
    }

    fn commit_inner(&mut self, options: CommitOptions) -> Result<CommitSummary> {
        let storage = Arc::clone(self.index.storage());
        self.flush()?;

        if options.clear {
            self.segments.retain(|s| s.fresh);
        }
        self.segments.retain(|s| s.live_count() > 0);

        let mut merges = 0;
        if options.optimize {
            let needs_rewrite = self.segments.len() > 1
                || self.segments.iter().any(|s| s.deletions.has_deletions())
                || (self.schema_changed && !self.segments.is_empty());
            if needs_rewrite {
                let all: Vec<usize> = (0..self.segments.len()).collect();
                self.merge_segments(&all)?;
                merges += 1;
            }
        } else if options.merge {
            merges = self.run_merge_policy()?;
        }

        let unchanged = !self.schema_changed
            && !self.segments.iter().any(|s| s.dirty)
            && self
                .segments
                .iter()
                .map(|s| (s.info.name.as_str(), s.info.del_gen))
                .eq(self.base.segments.iter().map(|s| (s.name.as_str(), s.del_gen)));
        if unchanged {
            self.retire_unused_segments(&self.base.files());
            debug!(generation = self.base.generation, "nothing to commit");
            return Ok(self.summary(&self.base, false, merges));
        }

        for segment in &mut self.segments {
            if !segment.dirty {
                continue;
            }
            let del_gen = segment.info.del_gen + 1;
            let file = deletion_file(&segment.info.name, del_gen);
            self.created_files.push(file.clone());
            segment.deletions.write(storage.as_ref(), &file)?;
            segment.info.del_gen = del_gen;
            segment.info.deleted_count = segment.deletions.deleted_count();
        }

        let toc = Toc {
            version: TOC_VERSION,
            generation: self.base.generation + 1,
            schema: self.schema.clone(),
            segments: self.segments.iter().map(PendingSegment::current_info).collect(),
            segment_counter: self.segment_counter,
            committed_at: Utc::now(),
        };
        toc.write(storage.as_ref())?;

        let summary = self.summary(&toc, true, merges);
        let kept = toc.files();
        self.index.publish(toc);
        self.created_files.clear();
        self.retire_unused_segments(&kept);

        info!(
            generation = summary.generation,
            segments = summary.segment_count,
            docs = summary.doc_count,
            added = summary.added,
            deleted = summary.deleted,
            merges = summary.merges,
            "committed index"
        );
        Ok(summary)
    }

    /// Remove segments this writer wrote that `kept` does not reference,
    /// such as flushed segments merged away or fully deleted.
    fn retire_unused_segments(&mut self, kept: &BTreeSet<String>) {
        let storage = Arc::clone(self.index.storage());
        let unused: Vec<String> = std::mem::take(&mut self.created_segments)
            .iter()
            .flat_map(|name| data_files(name))
            .filter(|file| !kept.contains(file) && storage.file_exists(file))
            .collect();
        self.index.refs().retire(unused);
    }

    fn summary(&self, toc: &Toc, changed: bool, merges: usize) -> CommitSummary {
        CommitSummary {
            generation: toc.generation,
            changed,
            segment_count: toc.segments.len(),
            doc_count: toc.doc_count(),
            doc_count_all: toc.doc_count_all(),
            added: self.added,
            deleted: self.deleted,
            merges,
        }
    }

    /// Discard everything this writer did and release the lock.
    pub fn cancel(&mut self) -> Result<()> {
        self.check_open()?;
        self.finish(WriterState::Cancelled);
        info!(generation = self.base.generation, "cancelled index writer");
        Ok(())
    }

    /// Leave the open state: remove unpublished files when cancelling, then
    /// drop the base lease and the lock.
    fn finish(&mut self, state: WriterState) {
        if state == WriterState::Cancelled {
            self.discard_created_files();
        }
        self.state = state;
        self.buffer.clear();
        self.segments.clear();
        self.base_lease = None;
        if let Some(mut lock) = self.lock.take() {
            if let Err(e) = lock.release() {
                warn!(error = %e, "failed to release the write lock");
            }
        }
    }

    fn discard_created_files(&mut self) {
        let storage = Arc::clone(self.index.storage());
        for name in std::mem::take(&mut self.created_segments) {
            if let Err(e) = remove_segment_files(storage.as_ref(), &name) {
                warn!(segment = %name, error = %e, "failed to remove uncommitted segment");
            }
        }
        for file in std::mem::take(&mut self.created_files) {
            if let Err(e) = storage.delete_file(&file) {
                warn!(file = %file, error = %e, "failed to remove uncommitted file");
            }
        }
    }
}

impl Drop for IndexWriter {
    fn drop(&mut self) {
        if self.state == WriterState::Open {
            warn!("index writer dropped while open; cancelling");
            self.finish(WriterState::Cancelled);
        }
    }
}

/// Delete files left behind by writers that never committed.
fn remove_orphans(index: &Index, toc: &Toc) -> Result<()> {
    let storage = index.storage();
    let live = toc.files();
    for file in storage.list_files()? {
        let ours = file.starts_with("seg") || file.starts_with("_toc_");
        if !ours || live.contains(&file) || index.refs().is_leased(&file) {
            continue;
        }
        storage.delete_file(&file)?;
        debug!(file = %file, "removed orphaned file");
    }
    Ok(())
}

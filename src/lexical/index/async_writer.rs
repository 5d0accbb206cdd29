//! Background writer applying batches in submission order.
//!
//! Producers hand [`WriteBatch`]es to an [`AsyncWriter`] and get a
//! [`CommitHandle`] back. A single worker thread takes the batches off a
//! channel one at a time, acquires the index writer (waiting up to the
//! configured lock timeout), applies the batch and commits it. A batch is
//! all or nothing: if one of its operations fails the writer is cancelled
//! and the error is returned through the handle.

use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use tracing::{debug, warn};

use crate::document::Document;
use crate::error::{Result, StrataError};
use crate::lexical::index::index::Index;
use crate::lexical::index::writer::{CommitOptions, CommitSummary, IndexWriter};
use crate::schema::FieldConfig;

/// One operation of a batch.
#[derive(Debug)]
pub enum WriteOp {
    Add(Document),
    Update(Document),
    Delete(u64),
    DeleteByTerm { field: String, term: Vec<u8> },
    AddField { name: String, config: FieldConfig },
    RemoveField(String),
}

/// Operations committed together.
#[derive(Debug, Default)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
    options: CommitOptions,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_document(mut self, document: Document) -> Self {
        self.ops.push(WriteOp::Add(document));
        self
    }

    pub fn update_document(mut self, document: Document) -> Self {
        self.ops.push(WriteOp::Update(document));
        self
    }

    pub fn delete_document(mut self, doc_id: u64) -> Self {
        self.ops.push(WriteOp::Delete(doc_id));
        self
    }

    pub fn delete_by_term(mut self, field: &str, term: impl Into<Vec<u8>>) -> Self {
        self.ops.push(WriteOp::DeleteByTerm {
            field: field.to_string(),
            term: term.into(),
        });
        self
    }

    pub fn add_field(mut self, name: &str, config: FieldConfig) -> Self {
        self.ops.push(WriteOp::AddField {
            name: name.to_string(),
            config,
        });
        self
    }

    pub fn remove_field(mut self, name: &str) -> Self {
        self.ops.push(WriteOp::RemoveField(name.to_string()));
        self
    }

    pub fn with_options(mut self, options: CommitOptions) -> Self {
        self.options = options;
        self
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Outcome of one committed batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchResult {
    pub summary: CommitSummary,
    /// Global ids assigned to added and updated documents, in batch order.
    /// They refer to the writer's view before the commit merged anything.
    pub doc_ids: Vec<u64>,
    /// Documents deleted by `DeleteByTerm` operations.
    pub deleted: u64,
}

/// Answer to a submitted batch.
#[derive(Debug)]
pub struct CommitHandle {
    receiver: Receiver<Result<BatchResult>>,
}

impl CommitHandle {
    /// Block until the batch has been committed or rejected.
    pub fn wait(self) -> Result<BatchResult> {
        self.receiver
            .recv()
            .map_err(|_| StrataError::invalid_state("async writer stopped before answering"))?
    }

    /// The result if it is already available.
    pub fn try_wait(&self) -> Option<Result<BatchResult>> {
        self.receiver.try_recv().ok()
    }
}

enum Message {
    Batch(WriteBatch, Sender<Result<BatchResult>>),
    Shutdown,
}

/// Owner of the background writer thread.
#[derive(Debug)]
pub struct AsyncWriter {
    sender: Sender<Message>,
    worker: Option<JoinHandle<()>>,
}

impl AsyncWriter {
    /// Start the worker thread for `index`.
    pub fn new(index: Index) -> Result<Self> {
        let (sender, receiver) = unbounded();
        let worker = thread::Builder::new()
            .name("strata-writer".to_string())
            .spawn(move || run_worker(index, receiver))?;
        Ok(AsyncWriter {
            sender,
            worker: Some(worker),
        })
    }

    /// Queue a batch. Batches are committed in the order they are submitted.
    pub fn submit(&self, batch: WriteBatch) -> Result<CommitHandle> {
        if self.worker.is_none() {
            return Err(StrataError::invalid_state("async writer is closed"));
        }
        let (reply, receiver) = bounded(1);
        self.sender
            .send(Message::Batch(batch, reply))
            .map_err(|_| StrataError::invalid_state("async writer worker has stopped"))?;
        Ok(CommitHandle { receiver })
    }

    /// Finish the queued batches and stop the worker.
    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        let _ = self.sender.send(Message::Shutdown);
        worker
            .join()
            .map_err(|_| StrataError::Other("async writer worker panicked".to_string()))
    }
}

impl Drop for AsyncWriter {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!(error = %e, "async writer did not shut down cleanly");
        }
    }
}

fn run_worker(index: Index, receiver: Receiver<Message>) {
    debug!("async writer started");
    for message in receiver {
        match message {
            Message::Batch(batch, reply) => {
                let result = apply_batch(&index, batch);
                if let Err(e) = &result {
                    debug!(error = %e, "batch rejected");
                }
                if reply.send(result).is_err() {
                    debug!("commit handle dropped; batch result discarded");
                }
            }
            Message::Shutdown => break,
        }
    }
    debug!("async writer stopped");
}

fn apply_batch(index: &Index, batch: WriteBatch) -> Result<BatchResult> {
    let mut writer = index.writer_with_timeout(index.config().lock_timeout())?;
    let mut doc_ids = Vec::new();
    let mut deleted = 0;
    for op in batch.ops {
        if let Err(e) = apply_op(&mut writer, op, &mut doc_ids, &mut deleted) {
            let _ = writer.cancel();
            return Err(e);
        }
    }
    let summary = writer.commit(batch.options)?;
    Ok(BatchResult {
        summary,
        doc_ids,
        deleted,
    })
}

fn apply_op(writer: &mut IndexWriter, op: WriteOp, doc_ids: &mut Vec<u64>, deleted: &mut u64) -> Result<()> {
    match op {
        WriteOp::Add(document) => doc_ids.push(writer.add_document(document)?),
        WriteOp::Update(document) => doc_ids.push(writer.update_document(document)?),
        WriteOp::Delete(doc_id) => writer.delete_document(doc_id)?,
        WriteOp::DeleteByTerm { field, term } => *deleted += writer.delete_by_term(&field, &term)?,
        WriteOp::AddField { name, config } => writer.add_field(&name, config)?,
        WriteOp::RemoveField(name) => writer.remove_field(&name)?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::IndexConfig;
    use crate::document::DocumentBuilder;
    use crate::schema::Schema;
    use crate::storage::MemoryStorage;

    fn index() -> Index {
        let schema = Schema::new()
            .with_field("id", FieldConfig::id().unique(true))
            .unwrap();
        Index::create(Arc::new(MemoryStorage::new()), schema, IndexConfig::default()).unwrap()
    }

    fn doc(id: &str) -> Document {
        DocumentBuilder::new().add_keyword("id", id).build()
    }

    #[test]
    fn test_batches_commit_in_order() {
        let index = index();
        let writer = AsyncWriter::new(index.clone()).unwrap();
        let handles: Vec<CommitHandle> = (0..5)
            .map(|i| writer.submit(WriteBatch::new().add_document(doc(&i.to_string()))).unwrap())
            .collect();
        let generations: Vec<u64> = handles
            .into_iter()
            .map(|h| h.wait().unwrap().summary.generation)
            .collect();
        assert_eq!(generations, vec![1, 2, 3, 4, 5]);
        writer.close().unwrap();
        assert_eq!(index.reader().unwrap().doc_count(), 5);
    }

    #[test]
    fn test_failed_batch_changes_nothing() {
        let index = index();
        let writer = AsyncWriter::new(index.clone()).unwrap();
        let bad = WriteBatch::new().add_document(doc("a")).delete_document(99);
        assert!(matches!(
            writer.submit(bad).unwrap().wait(),
            Err(StrataError::NoSuchDocument(99))
        ));
        assert_eq!(index.generation(), 0);

        let result = writer
            .submit(WriteBatch::new().add_document(doc("a")).delete_by_term("id", "a"))
            .unwrap()
            .wait()
            .unwrap();
        assert_eq!(result.doc_ids, vec![0]);
        assert_eq!(result.deleted, 1);
    }

    #[test]
    fn test_dropped_handle_still_commits() {
        let index = index();
        let writer = AsyncWriter::new(index.clone()).unwrap();
        drop(writer.submit(WriteBatch::new().add_document(doc("a"))).unwrap());
        let result = writer
            .submit(WriteBatch::new().add_document(doc("b")))
            .unwrap()
            .wait()
            .unwrap();
        assert_eq!(result.summary.generation, 2);
        writer.close().unwrap();
        assert_eq!(index.reader().unwrap().doc_count(), 2);
    }

    #[test]
    fn test_waits_for_lock() {
        let index = index();
        let held = index.writer().unwrap();
        let writer = AsyncWriter::new(index.clone()).unwrap();
        let handle = writer.submit(WriteBatch::new().add_document(doc("a"))).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(handle.try_wait().is_none());
        drop(held);
        assert_eq!(handle.wait().unwrap().summary.doc_count, 1);
    }
}

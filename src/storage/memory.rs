//! In-memory storage implementation for testing and ephemeral indexes.

use std::collections::{HashMap, HashSet};
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;
use crate::storage::traits::{
    LockManager, Storage, StorageError, StorageInput, StorageLock, StorageOutput,
};

type FileMap = Arc<Mutex<HashMap<String, Arc<[u8]>>>>;

/// An in-memory storage implementation.
///
/// Files become visible when their output is closed (or dropped), which
/// mirrors the write-then-publish behaviour of the file backend.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    files: FileMap,
    lock_manager: MemoryLockManager,
}

impl MemoryStorage {
    /// Create a new, empty memory storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of files stored.
    pub fn file_count(&self) -> usize {
        self.files.lock().len()
    }

    /// Get the total size of all files.
    pub fn total_size(&self) -> u64 {
        self.files.lock().values().map(|data| data.len() as u64).sum()
    }

    /// Replace the contents of a file in place. Used to simulate damage.
    pub fn overwrite(&self, name: &str, data: Vec<u8>) {
        self.files.lock().insert(name.to_string(), Arc::from(data));
    }
}

impl Storage for MemoryStorage {
    fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>> {
        let data = self
            .files
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| StorageError::FileNotFound(name.to_string()))?;

        Ok(Box::new(MemoryInput::new(data)))
    }

    fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>> {
        Ok(Box::new(MemoryOutput::new(
            name.to_string(),
            Arc::clone(&self.files),
        )))
    }

    fn file_exists(&self, name: &str) -> bool {
        self.files.lock().contains_key(name)
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        self.files.lock().remove(name);
        Ok(())
    }

    fn list_files(&self) -> Result<Vec<String>> {
        let mut file_names: Vec<String> = self.files.lock().keys().cloned().collect();
        file_names.sort();
        Ok(file_names)
    }

    fn file_size(&self, name: &str) -> Result<u64> {
        self.files
            .lock()
            .get(name)
            .map(|data| data.len() as u64)
            .ok_or_else(|| StorageError::FileNotFound(name.to_string()).into())
    }

    fn rename_file(&self, old_name: &str, new_name: &str) -> Result<()> {
        let mut files = self.files.lock();
        let data = files
            .remove(old_name)
            .ok_or_else(|| StorageError::FileNotFound(old_name.to_string()))?;

        files.insert(new_name.to_string(), data);
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }

    fn lock_manager(&self) -> &dyn LockManager {
        &self.lock_manager
    }

    fn read_all(&self, name: &str) -> Result<Arc<[u8]>> {
        self.files
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| StorageError::FileNotFound(name.to_string()).into())
    }
}

/// A memory-based input.
#[derive(Debug)]
pub struct MemoryInput {
    cursor: Cursor<Arc<[u8]>>,
}

impl MemoryInput {
    fn new(data: Arc<[u8]>) -> Self {
        MemoryInput {
            cursor: Cursor::new(data),
        }
    }
}

impl Read for MemoryInput {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.cursor.read(buf)
    }
}

impl Seek for MemoryInput {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.cursor.seek(pos)
    }
}

impl StorageInput for MemoryInput {
    fn size(&self) -> Result<u64> {
        Ok(self.cursor.get_ref().len() as u64)
    }
}

/// A memory-based output; the buffer is published into the file map on
/// close or drop.
#[derive(Debug)]
pub struct MemoryOutput {
    name: String,
    buffer: Vec<u8>,
    files: FileMap,
    closed: bool,
}

impl MemoryOutput {
    fn new(name: String, files: FileMap) -> Self {
        MemoryOutput {
            name,
            buffer: Vec::new(),
            files,
            closed: false,
        }
    }
}

impl Write for MemoryOutput {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.closed {
            return Err(std::io::Error::other(
                StorageError::OutputClosed(self.name.clone()).to_string(),
            ));
        }

        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl StorageOutput for MemoryOutput {
    fn flush_and_sync(&mut self) -> Result<()> {
        Ok(())
    }

    fn position(&self) -> u64 {
        self.buffer.len() as u64
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            let data: Arc<[u8]> = Arc::from(std::mem::take(&mut self.buffer));
            self.files.lock().insert(self.name.clone(), data);
            self.closed = true;
        }
        Ok(())
    }
}

impl Drop for MemoryOutput {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// A lock manager tracking held lock names in memory.
#[derive(Debug, Default)]
pub struct MemoryLockManager {
    held: Arc<Mutex<HashSet<String>>>,
}

impl LockManager for MemoryLockManager {
    fn try_acquire_lock(&self, name: &str) -> Result<Option<Box<dyn StorageLock>>> {
        let mut held = self.held.lock();
        if !held.insert(name.to_string()) {
            return Ok(None);
        }

        Ok(Some(Box::new(MemoryLock {
            name: name.to_string(),
            held: Arc::clone(&self.held),
            released: false,
        })))
    }

    fn lock_exists(&self, name: &str) -> bool {
        self.held.lock().contains(name)
    }
}

#[derive(Debug)]
struct MemoryLock {
    name: String,
    held: Arc<Mutex<HashSet<String>>>,
    released: bool,
}

impl StorageLock for MemoryLock {
    fn name(&self) -> &str {
        &self.name
    }

    fn release(&mut self) -> Result<()> {
        if !self.released {
            self.held.lock().remove(&self.name);
            self.released = true;
        }
        Ok(())
    }

    fn is_valid(&self) -> bool {
        !self.released
    }
}

impl Drop for MemoryLock {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

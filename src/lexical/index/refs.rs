//! Reference counts on index files.
//!
//! Every open reader leases the files of its generation. When a commit
//! retires files, those without a lease are deleted right away and the rest
//! when their last lease is dropped.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::storage::Storage;

#[derive(Debug, Default)]
struct RefState {
    counts: HashMap<String, usize>,
    retired: HashSet<String>,
}

/// Shared lease table of one index.
#[derive(Debug)]
pub struct FileRefs {
    storage: Arc<dyn Storage>,
    state: Mutex<RefState>,
}

impl FileRefs {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        FileRefs {
            storage,
            state: Mutex::new(RefState::default()),
        }
    }

    /// Lease `files` until the returned guard is dropped.
    pub fn lease(self: &Arc<Self>, files: impl IntoIterator<Item = String>) -> FileLease {
        let files: Vec<String> = files.into_iter().collect();
        let mut state = self.state.lock();
        for file in &files {
            *state.counts.entry(file.clone()).or_default() += 1;
        }
        FileLease {
            refs: Arc::clone(self),
            files,
        }
    }

    pub fn is_leased(&self, file: &str) -> bool {
        self.state.lock().counts.contains_key(file)
    }

    /// Number of retired files still waiting for their leases to end.
    pub fn pending_count(&self) -> usize {
        self.state.lock().retired.len()
    }

    /// Delete `files` now, or once their last lease ends.
    pub fn retire(&self, files: impl IntoIterator<Item = String>) {
        let mut now = Vec::new();
        {
            let mut state = self.state.lock();
            for file in files {
                if state.counts.contains_key(&file) {
                    state.retired.insert(file);
                } else {
                    now.push(file);
                }
            }
        }
        for file in now {
            self.delete(&file);
        }
    }

    fn release(&self, files: &[String]) {
        let mut unreferenced = Vec::new();
        {
            let mut state = self.state.lock();
            for file in files {
                if let Some(count) = state.counts.get_mut(file) {
                    *count -= 1;
                    if *count == 0 {
                        state.counts.remove(file);
                        if state.retired.remove(file) {
                            unreferenced.push(file.clone());
                        }
                    }
                }
            }
        }
        for file in unreferenced {
            self.delete(&file);
        }
    }

    fn delete(&self, file: &str) {
        match self.storage.delete_file(file) {
            Ok(()) => debug!(file, "deleted retired file"),
            Err(e) => warn!(file, error = %e, "failed to delete retired file"),
        }
    }
}

/// Keeps a set of files alive while held.
#[derive(Debug)]
pub struct FileLease {
    refs: Arc<FileRefs>,
    files: Vec<String>,
}

impl FileLease {
    pub fn files(&self) -> &[String] {
        &self.files
    }
}

impl Drop for FileLease {
    fn drop(&mut self) {
        self.refs.release(&self.files);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn storage_with(files: &[&str]) -> Arc<MemoryStorage> {
        let storage = Arc::new(MemoryStorage::new());
        for file in files {
            storage.overwrite(file, vec![1]);
        }
        storage
    }

    #[test]
    fn test_unleased_files_deleted_immediately() {
        let storage = storage_with(&["a", "b"]);
        let refs = Arc::new(FileRefs::new(storage.clone()));
        refs.retire(vec!["a".to_string()]);
        assert!(!storage.file_exists("a"));
        assert!(storage.file_exists("b"));
    }

    #[test]
    fn test_deferred_until_last_lease() {
        let storage = storage_with(&["a", "b"]);
        let refs = Arc::new(FileRefs::new(storage.clone()));

        let first = refs.lease(vec!["a".to_string(), "b".to_string()]);
        let second = refs.lease(vec!["a".to_string()]);
        refs.retire(vec!["a".to_string(), "b".to_string()]);
        assert!(storage.file_exists("a"));
        assert_eq!(refs.pending_count(), 2);

        drop(first);
        assert!(storage.file_exists("a"));
        assert!(!storage.file_exists("b"));

        drop(second);
        assert!(!storage.file_exists("a"));
        assert_eq!(refs.pending_count(), 0);
        assert!(!refs.is_leased("a"));
    }

    #[test]
    fn test_lease_without_retire_keeps_files() {
        let storage = storage_with(&["a"]);
        let refs = Arc::new(FileRefs::new(storage.clone()));
        drop(refs.lease(vec!["a".to_string()]));
        assert!(storage.file_exists("a"));
    }
}

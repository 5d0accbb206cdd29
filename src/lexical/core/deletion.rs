//! Per-segment deletion bitmaps.
//!
//! Segments are never rewritten to delete documents. Deletions live in a
//! bitmap that is saved as its own file whenever a commit changes it; each
//! save gets a new deletion generation so readers of older generations keep
//! their bitmap.

use bit_vec::BitVec;

use crate::error::{Result, StrataError};
use crate::storage::structured::{SliceReader, StructWriter, verify_checksum};
use crate::storage::Storage;

const DELETION_MAGIC: u32 = 0x4445_4C42; // "DELB"
const DELETION_VERSION: u32 = 1;

/// Bitmap of deleted local document ids (bit set = deleted).
#[derive(Debug, Clone, PartialEq)]
pub struct DeletionBitmap {
    deleted_docs: BitVec,
    deleted_count: u32,
}

impl DeletionBitmap {
    /// Create an empty bitmap for a segment of `total_docs` documents.
    pub fn new(total_docs: u32) -> Self {
        DeletionBitmap {
            deleted_docs: BitVec::from_elem(total_docs as usize, false),
            deleted_count: 0,
        }
    }

    /// Mark a document deleted. Returns `true` when it was live before.
    pub fn delete_document(&mut self, doc_id: u32) -> Result<bool> {
        if doc_id >= self.total_docs() {
            return Err(StrataError::NoSuchDocument(doc_id as u64));
        }

        let was_deleted = self.is_deleted(doc_id);
        if !was_deleted {
            self.deleted_docs.set(doc_id as usize, true);
            self.deleted_count += 1;
        }
        Ok(!was_deleted)
    }

    /// Ids beyond the segment are reported as not deleted.
    #[inline]
    pub fn is_deleted(&self, doc_id: u32) -> bool {
        self.deleted_docs.get(doc_id as usize).unwrap_or(false)
    }

    pub fn total_docs(&self) -> u32 {
        self.deleted_docs.len() as u32
    }

    pub fn deleted_count(&self) -> u32 {
        self.deleted_count
    }

    pub fn live_count(&self) -> u32 {
        self.total_docs() - self.deleted_count
    }

    pub fn has_deletions(&self) -> bool {
        self.deleted_count > 0
    }

    /// Get deletion ratio (0.0 to 1.0).
    pub fn deletion_ratio(&self) -> f64 {
        if self.total_docs() == 0 {
            0.0
        } else {
            self.deleted_count as f64 / self.total_docs() as f64
        }
    }

    /// Deleted ids in ascending order.
    pub fn deleted_docs(&self) -> impl Iterator<Item = u32> + '_ {
        self.deleted_docs
            .iter()
            .enumerate()
            .filter(|(_, deleted)| *deleted)
            .map(|(i, _)| i as u32)
    }

    /// Write the bitmap as a standalone checksummed file.
    pub fn write(&self, storage: &dyn Storage, name: &str) -> Result<u64> {
        let mut writer = StructWriter::new(storage.create_output(name)?);
        writer.write_u32(DELETION_MAGIC)?;
        writer.write_u32(DELETION_VERSION)?;
        writer.write_u32(self.total_docs())?;
        writer.write_u32(self.deleted_count)?;
        writer.write_bytes(&self.deleted_docs.to_bytes())?;
        writer.close()
    }

    /// Read a bitmap written by [`DeletionBitmap::write`].
    pub fn read(storage: &dyn Storage, name: &str) -> Result<Self> {
        let data = storage.read_all(name)?;
        let body = verify_checksum(&data, name)?;
        let mut reader = SliceReader::new(body);

        if reader.read_u32()? != DELETION_MAGIC {
            return Err(StrataError::corrupt(format!("{name}: not a deletion bitmap")));
        }
        let version = reader.read_u32()?;
        if version != DELETION_VERSION {
            return Err(StrataError::corrupt(format!(
                "{name}: unsupported deletion bitmap version {version}"
            )));
        }

        let total_docs = reader.read_u32()? as usize;
        let deleted_count = reader.read_u32()?;
        let mut deleted_docs = BitVec::from_bytes(reader.read_bytes()?);
        if deleted_docs.len() < total_docs {
            return Err(StrataError::corrupt(format!("{name}: bitmap shorter than segment")));
        }
        deleted_docs.truncate(total_docs);

        let bitmap = DeletionBitmap {
            deleted_docs,
            deleted_count,
        };
        if bitmap.deleted_docs().count() as u32 != deleted_count {
            return Err(StrataError::corrupt(format!("{name}: deleted count mismatch")));
        }
        Ok(bitmap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    #[test]
    fn test_delete_and_query() {
        let mut bitmap = DeletionBitmap::new(10);
        assert!(!bitmap.has_deletions());

        assert!(bitmap.delete_document(3).unwrap());
        assert!(!bitmap.delete_document(3).unwrap());
        assert!(bitmap.delete_document(9).unwrap());

        assert!(bitmap.is_deleted(3));
        assert!(!bitmap.is_deleted(4));
        assert!(!bitmap.is_deleted(100));
        assert_eq!(bitmap.deleted_count(), 2);
        assert_eq!(bitmap.live_count(), 8);
        assert!((bitmap.deletion_ratio() - 0.2).abs() < f64::EPSILON);
        assert_eq!(bitmap.deleted_docs().collect::<Vec<_>>(), vec![3, 9]);

        assert!(matches!(
            bitmap.delete_document(10),
            Err(StrataError::NoSuchDocument(10))
        ));
    }

    #[test]
    fn test_write_read() {
        let storage = MemoryStorage::new();
        let mut bitmap = DeletionBitmap::new(13);
        bitmap.delete_document(0).unwrap();
        bitmap.delete_document(12).unwrap();

        bitmap.write(&storage, "seg_1.del").unwrap();
        let back = DeletionBitmap::read(&storage, "seg_1.del").unwrap();
        assert_eq!(back, bitmap);
    }

    #[test]
    fn test_corrupt_file() {
        let storage = MemoryStorage::new();
        DeletionBitmap::new(4).write(&storage, "d.del").unwrap();

        let mut data = storage.read_all("d.del").unwrap().to_vec();
        data[0] ^= 0xFF;
        storage.overwrite("d.del", data);
        assert!(DeletionBitmap::read(&storage, "d.del").unwrap_err().is_corruption());
    }
}

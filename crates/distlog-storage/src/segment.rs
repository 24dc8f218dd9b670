//! Segment: one store file paired with one index file
//!
//! A segment holds the records with offsets in `[base_offset, next_offset)`.
//! Files are named after the base offset: `<base>.store` and `<base>.index`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use distlog_core::Record;
use tracing::{debug, instrument};

use crate::config::SegmentConfig;
use crate::error::{StorageError, StorageResult};
use crate::index::{ENTRY_WIDTH, Index};
use crate::store::Store;

/// File extension of store files
pub const STORE_EXTENSION: &str = "store";

/// File extension of index files
pub const INDEX_EXTENSION: &str = "index";

/// A contiguous range of the log
#[derive(Debug)]
pub struct Segment {
    store: Arc<Store>,
    index: Index,
    base_offset: u64,
    next_offset: u64,
    config: SegmentConfig,
}

impl Segment {
    /// Open or create the segment starting at `base_offset` in `dir`
    #[instrument(skip(dir, config))]
    pub fn open(dir: impl AsRef<Path>, base_offset: u64, config: SegmentConfig) -> StorageResult<Self> {
        let dir = dir.as_ref();
        let store = Store::open(segment_path(dir, base_offset, STORE_EXTENSION))?;
        let index = Index::open(
            segment_path(dir, base_offset, INDEX_EXTENSION),
            config.max_index_bytes,
            store.size(),
        )?;

        let next_offset = match index.last_entry() {
            Some((relative, _)) => base_offset + relative as u64 + 1,
            None => base_offset,
        };

        debug!(base_offset, next_offset, "Opened segment");

        Ok(Self {
            store: Arc::new(store),
            index,
            base_offset,
            next_offset,
            config,
        })
    }

    /// Append a record, returning its assigned offset
    pub fn append(&mut self, mut record: Record) -> StorageResult<u64> {
        let offset = self.next_offset;
        let relative = u32::try_from(offset - self.base_offset)
            .map_err(|_| StorageError::IndexFull)?;

        record.offset = offset;
        let encoded = record
            .to_bytes()
            .map_err(|e| StorageError::serialization(e.to_string()))?;

        // The store frame is on file before the index can point at it
        let (_, position) = self.store.append(&encoded)?;
        self.index.write(relative, position)?;
        self.next_offset += 1;
        Ok(offset)
    }

    /// Read the record at `offset`
    pub fn read(&self, offset: u64) -> StorageResult<Record> {
        if !self.contains(offset) {
            return Err(StorageError::OffsetOutOfRange { offset });
        }

        let relative = (offset - self.base_offset) as u32;
        let (_, position) = self.index.read(relative).map_err(|_| {
            StorageError::corruption(format!(
                "offset {} has no index entry in segment {}",
                offset, self.base_offset
            ))
        })?;

        let encoded = self.store.read(position)?;
        Ok(Record::from_bytes(&encoded)?)
    }

    /// Whether the segment has reached either size limit
    pub fn is_maxed(&self) -> bool {
        self.store.size() >= self.config.max_store_bytes
            || self.index.size() + ENTRY_WIDTH > self.config.max_index_bytes
    }

    /// Whether `offset` lies in `[base_offset, next_offset)`
    pub fn contains(&self, offset: u64) -> bool {
        self.base_offset <= offset && offset < self.next_offset
    }

    /// Offset of the first record
    pub fn base_offset(&self) -> u64 {
        self.base_offset
    }

    /// Offset the next append will receive
    pub fn next_offset(&self) -> u64 {
        self.next_offset
    }

    /// The store, shared with readers
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Flush the store and trim the index
    pub fn close(&mut self) -> StorageResult<()> {
        self.index.close()?;
        self.store.close()
    }

    /// Close the segment and delete its files
    pub fn remove(mut self) -> StorageResult<()> {
        self.close()?;
        let store_path = self.store.path().to_path_buf();
        let index_path = self.index.path().to_path_buf();
        drop(self);

        std::fs::remove_file(&index_path)?;
        std::fs::remove_file(&store_path)?;
        Ok(())
    }
}

/// Path of a segment file
pub fn segment_path(dir: &Path, base_offset: u64, extension: &str) -> PathBuf {
    dir.join(format!("{}.{}", base_offset, extension))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(max_store_bytes: u64, max_index_bytes: u64) -> SegmentConfig {
        SegmentConfig {
            max_store_bytes,
            max_index_bytes,
            initial_offset: 0,
        }
    }

    #[test]
    fn test_append_read_until_index_full() {
        let dir = TempDir::new().unwrap();
        let mut segment = Segment::open(dir.path(), 16, config(1024, ENTRY_WIDTH * 3)).unwrap();

        assert_eq!(segment.next_offset(), 16);
        assert!(!segment.is_maxed());

        for i in 0..3u64 {
            let offset = segment.append(Record::new("hello world")).unwrap();
            assert_eq!(offset, 16 + i);

            let record = segment.read(offset).unwrap();
            assert_eq!(record.value.as_ref(), b"hello world");
            assert_eq!(record.offset, offset);
        }

        assert!(segment.is_maxed());
        assert!(matches!(
            segment.append(Record::new("one too many")),
            Err(StorageError::IndexFull)
        ));
    }

    #[test]
    fn test_maxed_by_store() {
        let dir = TempDir::new().unwrap();
        let record_width = Record::new("hello world").with_offset(16).to_bytes().unwrap().len() as u64 + 4;
        let mut segment = Segment::open(dir.path(), 16, config(record_width * 3, 1024)).unwrap();

        for _ in 0..3 {
            assert!(!segment.is_maxed());
            segment.append(Record::new("hello world")).unwrap();
        }
        assert!(segment.is_maxed());
    }

    #[test]
    fn test_reopen_restores_next_offset() {
        let dir = TempDir::new().unwrap();
        let mut segment = Segment::open(dir.path(), 16, config(1024, 1024)).unwrap();
        segment.append(Record::new("a")).unwrap();
        segment.append(Record::new("b")).unwrap();
        segment.close().unwrap();
        drop(segment);

        let segment = Segment::open(dir.path(), 16, config(1024, 1024)).unwrap();
        assert_eq!(segment.next_offset(), 18);
        assert_eq!(segment.read(17).unwrap().value.as_ref(), b"b");
    }

    #[test]
    fn test_read_outside_range() {
        let dir = TempDir::new().unwrap();
        let mut segment = Segment::open(dir.path(), 16, config(1024, 1024)).unwrap();
        segment.append(Record::new("a")).unwrap();

        assert!(matches!(
            segment.read(15),
            Err(StorageError::OffsetOutOfRange { offset: 15 })
        ));
        assert!(matches!(
            segment.read(17),
            Err(StorageError::OffsetOutOfRange { offset: 17 })
        ));
    }

    #[test]
    fn test_remove_deletes_files() {
        let dir = TempDir::new().unwrap();
        let mut segment = Segment::open(dir.path(), 16, config(1024, 1024)).unwrap();
        segment.append(Record::new("a")).unwrap();
        segment.remove().unwrap();

        assert!(!segment_path(dir.path(), 16, STORE_EXTENSION).exists());
        assert!(!segment_path(dir.path(), 16, INDEX_EXTENSION).exists());

        let segment = Segment::open(dir.path(), 16, config(1024, 1024)).unwrap();
        assert_eq!(segment.next_offset(), 16);
    }
}

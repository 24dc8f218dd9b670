//! Index file
//!
//! Maps the relative offset of each record in a segment to the position of
//! its frame in the store. Entries are fixed width:
//! `[relative offset: u32 BE][position: u64 BE]`.
//!
//! While open the file is pre-sized to its capacity; `close` trims it back to
//! the used size. A process that dies before `close` leaves a zero-filled
//! tail, which `open` recognises and skips.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{StorageError, StorageResult};

/// Size of one index entry in bytes
pub const ENTRY_WIDTH: u64 = 12;

const OFFSET_WIDTH: usize = 4;

/// Fixed-capacity index of one segment
pub struct Index {
    path: PathBuf,
    file: File,
    entries: Vec<(u32, u64)>,
    capacity: u64,
}

impl Index {
    /// Open or create the index at `path`
    ///
    /// `store_size` is the size of the companion store and bounds the
    /// positions a valid entry may hold.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Corruption` if the file length is not a multiple
    /// of the entry width or an entry is inconsistent with its predecessors.
    pub fn open(path: impl AsRef<Path>, max_index_bytes: u64, store_size: u64) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let len = file.metadata()?.len();
        if len % ENTRY_WIDTH != 0 {
            return Err(StorageError::corruption(format!(
                "index {} has length {}, not a multiple of {}",
                path.display(),
                len,
                ENTRY_WIDTH
            )));
        }

        let mut raw = Vec::with_capacity(len as usize);
        file.read_to_end(&mut raw)?;
        let entries = recover_entries(&path, &raw, store_size)?;

        let capacity = (max_index_bytes / ENTRY_WIDTH * ENTRY_WIDTH).max(len);
        file.set_len(capacity)?;

        debug!(
            path = %path.display(),
            entries = entries.len(),
            capacity,
            "Opened index"
        );

        Ok(Self {
            path,
            file,
            entries,
            capacity,
        })
    }

    /// Append an entry
    ///
    /// # Errors
    ///
    /// Returns `StorageError::IndexFull` if there is no room for the entry.
    pub fn write(&mut self, relative_offset: u32, position: u64) -> StorageResult<()> {
        let at = self.size();
        if at + ENTRY_WIDTH > self.capacity {
            return Err(StorageError::IndexFull);
        }

        let mut entry = [0u8; ENTRY_WIDTH as usize];
        entry[..OFFSET_WIDTH].copy_from_slice(&relative_offset.to_be_bytes());
        entry[OFFSET_WIDTH..].copy_from_slice(&position.to_be_bytes());

        self.file.seek(SeekFrom::Start(at))?;
        self.file.write_all(&entry)?;
        self.entries.push((relative_offset, position));
        Ok(())
    }

    /// Read the `n`th entry
    pub fn read(&self, n: u32) -> StorageResult<(u32, u64)> {
        self.entries
            .get(n as usize)
            .copied()
            .ok_or_else(|| StorageError::io(format!("index entry {} not found", n)))
    }

    /// The most recent entry, if any
    pub fn last_entry(&self) -> Option<(u32, u64)> {
        self.entries.last().copied()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Used size in bytes
    pub fn size(&self) -> u64 {
        self.entries.len() as u64 * ENTRY_WIDTH
    }

    /// Path of the index file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sync and trim the file to the used size
    pub fn close(&mut self) -> StorageResult<()> {
        self.file.flush()?;
        self.file.sync_all()?;
        self.file.set_len(self.size())?;
        self.capacity = self.size();
        Ok(())
    }
}

impl std::fmt::Debug for Index {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Index")
            .field("path", &self.path)
            .field("entries", &self.entries.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

/// Rebuild the in-memory entries from the raw file contents
fn recover_entries(path: &Path, raw: &[u8], store_size: u64) -> StorageResult<Vec<(u32, u64)>> {
    let mut entries: Vec<(u32, u64)> = Vec::with_capacity(raw.len() / ENTRY_WIDTH as usize);
    let mut in_zero_tail = false;

    for (i, chunk) in raw.chunks_exact(ENTRY_WIDTH as usize).enumerate() {
        let is_zero = chunk.iter().all(|b| *b == 0);

        if in_zero_tail {
            if !is_zero {
                return Err(StorageError::corruption(format!(
                    "index {} has data after its zero tail at entry {}",
                    path.display(),
                    i
                )));
            }
            continue;
        }

        // (0, 0) is a real entry only as the first record of a non-empty store
        if is_zero && !(i == 0 && store_size > 0) {
            in_zero_tail = true;
            continue;
        }

        let (offset_bytes, position_bytes) = chunk.split_at(OFFSET_WIDTH);
        let mut offset_buf = [0u8; OFFSET_WIDTH];
        offset_buf.copy_from_slice(offset_bytes);
        let mut position_buf = [0u8; 8];
        position_buf.copy_from_slice(position_bytes);
        let relative_offset = u32::from_be_bytes(offset_buf);
        let position = u64::from_be_bytes(position_buf);

        let ordered = entries.last().is_none_or(|(_, prev)| position > *prev);
        if relative_offset as usize != i || position >= store_size || !ordered {
            return Err(StorageError::corruption(format!(
                "index {} entry {} is ({}, {}) with store of {} bytes",
                path.display(),
                i,
                relative_offset,
                position,
                store_size
            )));
        }

        entries.push((relative_offset, position));
    }

    if in_zero_tail {
        warn!(
            path = %path.display(),
            entries = entries.len(),
            "Index was not closed cleanly, skipped zero tail"
        );
    }

    Ok(entries)
}

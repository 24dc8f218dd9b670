//! Store file
//!
//! The store holds the encoded records of one segment as a sequence of
//! `[4-byte big-endian length][payload]` frames. Each frame is assembled in
//! a buffered writer and flushed to the file before `append` returns, so an
//! index entry written afterwards never points past the store on disk.
//!
//! A failed write leaves an unknown partial frame behind; the store is then
//! poisoned and refuses further appends and reads.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{StorageError, StorageResult};

/// Width of the length prefix in front of every payload
pub const LEN_WIDTH: u64 = 4;

struct StoreInner {
    writer: BufWriter<File>,
    size: u64,
    poisoned: bool,
}

impl StoreInner {
    fn check(&self, path: &Path) -> StorageResult<()> {
        if self.poisoned {
            return Err(StorageError::io(format!(
                "store {} is unusable after a failed write",
                path.display()
            )));
        }
        Ok(())
    }

    fn write_frame(&mut self, len: u32, payload: &[u8]) -> std::io::Result<()> {
        self.writer.write_all(&len.to_be_bytes())?;
        self.writer.write_all(payload)?;
        self.writer.flush()
    }
}

/// Append-only file of length-prefixed payloads
pub struct Store {
    path: PathBuf,
    inner: Mutex<StoreInner>,
}

impl Store {
    /// Open or create the store file at `path`
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)?;
        let size = file.metadata()?.len();

        debug!(path = %path.display(), size, "Opened store");

        Ok(Self {
            path,
            inner: Mutex::new(StoreInner {
                writer: BufWriter::new(file),
                size,
                poisoned: false,
            }),
        })
    }

    /// Append a payload, returning `(bytes_written, position)`
    pub fn append(&self, payload: &[u8]) -> StorageResult<(u64, u64)> {
        let len = u32::try_from(payload.len())
            .map_err(|_| StorageError::serialization("payload exceeds 4 GiB"))?;

        let mut inner = self.inner.lock();
        inner.check(&self.path)?;
        let position = inner.size;
        if let Err(e) = inner.write_frame(len, payload) {
            inner.poisoned = true;
            warn!(path = %self.path.display(), position, error = %e, "Store write failed");
            return Err(e.into());
        }

        let written = LEN_WIDTH + payload.len() as u64;
        inner.size += written;
        Ok((written, position))
    }

    /// Read the payload whose frame starts at `position`
    pub fn read(&self, position: u64) -> StorageResult<Vec<u8>> {
        let mut inner = self.inner.lock();
        inner.check(&self.path)?;
        if position >= inner.size {
            return Err(StorageError::io(format!(
                "position {} past end of store ({} bytes)",
                position, inner.size
            )));
        }
        inner.writer.flush()?;

        let mut file = inner.writer.get_ref();
        file.seek(SeekFrom::Start(position))?;

        let mut len_buf = [0u8; LEN_WIDTH as usize];
        file.read_exact(&mut len_buf)?;
        let len = u32::from_be_bytes(len_buf) as u64;
        if position + LEN_WIDTH + len > inner.size {
            return Err(StorageError::corruption(format!(
                "record at {} overruns store of {} bytes",
                position, inner.size
            )));
        }

        let mut payload = vec![0u8; len as usize];
        file.read_exact(&mut payload)?;
        Ok(payload)
    }

    /// Read raw bytes starting at `position` into `buf`
    ///
    /// Returns the number of bytes read, 0 at end of file.
    pub fn read_at(&self, buf: &mut [u8], position: u64) -> StorageResult<usize> {
        let mut inner = self.inner.lock();
        inner.check(&self.path)?;
        if position >= inner.size || buf.is_empty() {
            return Ok(0);
        }
        inner.writer.flush()?;

        let mut file = inner.writer.get_ref();
        file.seek(SeekFrom::Start(position))?;

        let available = (inner.size - position).min(buf.len() as u64) as usize;
        file.read_exact(&mut buf[..available])?;
        Ok(available)
    }

    /// Current size in bytes, buffered writes included
    pub fn size(&self) -> u64 {
        self.inner.lock().size
    }

    /// Path of the store file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush buffered writes and sync the file to disk
    pub fn close(&self) -> StorageResult<()> {
        let mut inner = self.inner.lock();
        inner.writer.flush()?;
        inner.writer.get_ref().sync_all()?;
        Ok(())
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.path)
            .field("size", &self.size())
            .finish()
    }
}

//! Sequential byte reader over a log
//!
//! [`LogReader`] concatenates the store files of a snapshot of segments, so
//! the output is the raw `[len][record]` frame stream in offset order. It is
//! meant for bulk transfer, e.g. seeding a new replica. [`decode_records`]
//! turns such a stream back into records.

use std::io::{self, Read};
use std::sync::Arc;

use distlog_core::Record;

use crate::error::{StorageError, StorageResult};
use crate::store::{LEN_WIDTH, Store};

/// Lazy, finite reader over every store of a log
pub struct LogReader {
    stores: Vec<Arc<Store>>,
    current: usize,
    position: u64,
}

impl LogReader {
    pub(crate) fn new(stores: Vec<Arc<Store>>) -> Self {
        Self {
            stores,
            current: 0,
            position: 0,
        }
    }

    /// Decode the remaining frames into records
    pub fn records(self) -> Records<Self> {
        decode_records(self)
    }
}

impl Read for LogReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        while let Some(store) = self.stores.get(self.current) {
            let n = store
                .read_at(buf, self.position)
                .map_err(|e| io::Error::other(e.to_string()))?;
            if n > 0 {
                self.position += n as u64;
                return Ok(n);
            }
            self.current += 1;
            self.position = 0;
        }
        Ok(0)
    }
}

impl std::fmt::Debug for LogReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogReader")
            .field("segments", &self.stores.len())
            .field("current", &self.current)
            .field("position", &self.position)
            .finish()
    }
}

/// Iterator over the records of a length-prefixed frame stream
pub struct Records<R> {
    reader: R,
    done: bool,
}

/// Decode a `[4-byte BE len][record]` frame stream
pub fn decode_records<R: Read>(reader: R) -> Records<R> {
    Records {
        reader,
        done: false,
    }
}

impl<R: Read> Records<R> {
    fn next_frame(&mut self) -> StorageResult<Option<Vec<u8>>> {
        let mut len_buf = [0u8; LEN_WIDTH as usize];
        let mut filled = 0;
        while filled < len_buf.len() {
            match self.reader.read(&mut len_buf[filled..]) {
                Ok(0) if filled == 0 => return Ok(None),
                Ok(0) => return Err(StorageError::corruption("truncated frame length")),
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }

        let len = u32::from_be_bytes(len_buf) as usize;
        let mut frame = vec![0u8; len];
        self.reader.read_exact(&mut frame).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                StorageError::corruption("truncated frame body")
            } else {
                e.into()
            }
        })?;
        Ok(Some(frame))
    }
}

impl<R: Read> Iterator for Records<R> {
    type Item = StorageResult<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let result = match self.next_frame() {
            Ok(Some(frame)) => Record::from_bytes(&frame).map_err(StorageError::from),
            Ok(None) => {
                self.done = true;
                return None;
            }
            Err(e) => Err(e),
        };
        if result.is_err() {
            self.done = true;
        }
        Some(result)
    }
}

//! Commit log
//!
//! An ordered list of segments covering the whole offset space. Appends go
//! to the active (last) segment, rolling over to a new one when it reaches
//! its limits; reads are routed to the segment owning the offset.
//!
//! ## Layout
//!
//! ```text
//! <dir>/
//!   0.store   0.index
//!   42.store  42.index
//!   87.store  87.index    <- active
//! ```
//!
//! On open the directory is scanned for `*.store` and `*.index` files and
//! every segment is reopened in ascending base-offset order.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use distlog_core::Record;
use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{debug, info, instrument};

use crate::config::LogConfig;
use crate::error::{StorageError, StorageResult};
use crate::reader::LogReader;
use crate::segment::{INDEX_EXTENSION, STORE_EXTENSION, Segment};

struct LogState {
    segments: Vec<Segment>,
    closed: bool,
}

impl LogState {
    fn active(&self) -> StorageResult<&Segment> {
        if self.closed {
            return Err(StorageError::Closed);
        }
        self.segments.last().ok_or(StorageError::Closed)
    }

    fn active_mut(&mut self) -> StorageResult<&mut Segment> {
        if self.closed {
            return Err(StorageError::Closed);
        }
        self.segments.last_mut().ok_or(StorageError::Closed)
    }

    fn lowest_offset(&self) -> StorageResult<u64> {
        self.active()?;
        Ok(self.segments[0].base_offset())
    }

    fn next_offset(&self) -> StorageResult<u64> {
        Ok(self.active()?.next_offset())
    }
}

/// Segmented, append-only commit log
///
/// All methods take `&self`; the segment list sits behind a readers-writer
/// lock so the log can be shared through an `Arc`.
pub struct CommitLog {
    dir: PathBuf,
    config: LogConfig,
    state: RwLock<LogState>,
    tail: watch::Sender<u64>,
}

impl CommitLog {
    /// Open the log in `dir`, recovering any existing segments
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Corruption` if a segment cannot be recovered or
    /// the segments do not cover a contiguous range.
    #[instrument(skip_all)]
    pub fn open(dir: impl AsRef<Path>, config: LogConfig) -> StorageResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        let config = config.normalized();

        let segments = load_segments(&dir, &config)?;
        let next_offset = segments.last().map_or(0, Segment::next_offset);

        info!(
            dir = %dir.display(),
            segments = segments.len(),
            lowest = segments.first().map_or(0, Segment::base_offset),
            next_offset,
            "Opened commit log"
        );

        let (tail, _) = watch::channel(next_offset);
        Ok(Self {
            dir,
            config,
            state: RwLock::new(LogState {
                segments,
                closed: false,
            }),
            tail,
        })
    }

    /// Append a record and return its assigned offset
    ///
    /// The record's own offset is ignored.
    pub fn append(&self, record: Record) -> StorageResult<u64> {
        let mut state = self.state.write();

        if state.active()?.is_maxed() {
            let base = state.active()?.next_offset();
            let segment = Segment::open(&self.dir, base, self.config.segment)?;
            debug!(base_offset = base, "Rolled over to new segment");
            state.segments.push(segment);
        }

        let active = state.active_mut()?;
        let offset = active.append(record)?;
        self.tail.send_replace(offset + 1);
        Ok(offset)
    }

    /// Read the record at `offset`
    ///
    /// # Errors
    ///
    /// Returns `StorageError::OffsetOutOfRange` if `offset` is below the
    /// lowest retained offset or at/above the next offset.
    pub fn read(&self, offset: u64) -> StorageResult<Record> {
        let state = self.state.read();
        if offset < state.lowest_offset()? || offset >= state.next_offset()? {
            return Err(StorageError::OffsetOutOfRange { offset });
        }

        let idx = state
            .segments
            .partition_point(|segment| segment.base_offset() <= offset);
        match idx.checked_sub(1).map(|i| &state.segments[i]) {
            Some(segment) if segment.contains(offset) => segment.read(offset),
            _ => Err(StorageError::corruption(format!(
                "no segment owns in-range offset {}",
                offset
            ))),
        }
    }

    /// Base offset of the first segment
    pub fn lowest_offset(&self) -> StorageResult<u64> {
        self.state.read().lowest_offset()
    }

    /// Offset of the most recent record, 0 when nothing was ever appended
    pub fn highest_offset(&self) -> StorageResult<u64> {
        Ok(self.state.read().next_offset()?.saturating_sub(1))
    }

    /// Offset the next append will receive
    pub fn next_offset(&self) -> StorageResult<u64> {
        self.state.read().next_offset()
    }

    /// Whether the log retains no records
    pub fn is_empty(&self) -> StorageResult<bool> {
        let state = self.state.read();
        Ok(state.lowest_offset()? == state.next_offset()?)
    }

    /// Remove every segment whose highest offset is below `lowest`
    ///
    /// Returns the number of segments removed. If every segment goes, a new
    /// empty segment is created at the old next offset so offsets never move
    /// backwards.
    #[instrument(skip(self))]
    pub fn truncate(&self, lowest: u64) -> StorageResult<usize> {
        let mut state = self.state.write();
        let next_offset = state.next_offset()?;

        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut state.segments)
            .into_iter()
            .partition(|segment| segment.next_offset() <= lowest);
        state.segments = kept;

        let count = removed.len();
        let mut result = Ok(());
        for segment in removed {
            let base = segment.base_offset();
            if let Err(e) = segment.remove() {
                result = Err(e);
            } else {
                debug!(base_offset = base, "Removed segment");
            }
        }

        if state.segments.is_empty() {
            state
                .segments
                .push(Segment::open(&self.dir, next_offset, self.config.segment)?);
        }
        self.tail.send_replace(next_offset);
        result?;

        info!(
            removed = count,
            lowest = state.segments[0].base_offset(),
            "Truncated log"
        );
        Ok(count)
    }

    /// Byte reader over every store file, in offset order
    ///
    /// The reader sees the segments present at call time.
    pub fn reader(&self) -> StorageResult<LogReader> {
        let state = self.state.read();
        state.active()?;
        let stores = state
            .segments
            .iter()
            .map(|segment| segment.store().clone())
            .collect();
        Ok(LogReader::new(stores))
    }

    /// Watch the next offset
    ///
    /// The value changes on every append and truncation; the channel is also
    /// notified when the log closes.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.tail.subscribe()
    }

    /// Flush and close every segment
    ///
    /// Subsequent operations fail with `StorageError::Closed`.
    pub fn close(&self) -> StorageResult<()> {
        let mut state = self.state.write();
        if state.closed {
            return Ok(());
        }
        state.closed = true;

        let mut result = Ok(());
        for segment in state.segments.iter_mut() {
            if let Err(e) = segment.close() {
                result = Err(e);
            }
        }
        self.tail.send_modify(|_| {});

        info!(dir = %self.dir.display(), "Closed commit log");
        result
    }

    /// Close the log and delete its directory
    pub fn remove(&self) -> StorageResult<()> {
        self.close()?;
        self.state.write().segments.clear();
        std::fs::remove_dir_all(&self.dir)?;
        Ok(())
    }

    /// Delete every record and reopen empty at the configured initial offset
    pub fn reset(&self) -> StorageResult<()> {
        self.remove()?;

        let mut state = self.state.write();
        state.segments = load_segments(&self.dir, &self.config)?;
        state.closed = false;
        let next_offset = state.next_offset()?;
        self.tail.send_replace(next_offset);
        Ok(())
    }

    /// Directory holding the segment files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Effective configuration
    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// Number of segments
    pub fn segment_count(&self) -> usize {
        self.state.read().segments.len()
    }
}

impl std::fmt::Debug for CommitLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitLog")
            .field("dir", &self.dir)
            .field("config", &self.config)
            .field("next_offset", &*self.tail.borrow())
            .finish()
    }
}

/// Scan `dir` and reopen its segments, creating the first one if none exist
fn load_segments(dir: &Path, config: &LogConfig) -> StorageResult<Vec<Segment>> {
    std::fs::create_dir_all(dir)?;

    let mut bases = BTreeSet::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_segment_file = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext == STORE_EXTENSION || ext == INDEX_EXTENSION);
        if !is_segment_file {
            continue;
        }
        if let Some(base) = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .and_then(|stem| stem.parse::<u64>().ok())
        {
            bases.insert(base);
        }
    }

    let mut segments: Vec<Segment> = Vec::with_capacity(bases.len().max(1));
    for base in bases {
        if let Some(prev) = segments.last() {
            if prev.next_offset() != base {
                return Err(StorageError::corruption(format!(
                    "segment {} ends at {} but the next segment starts at {}",
                    prev.base_offset(),
                    prev.next_offset(),
                    base
                )));
            }
        }
        segments.push(Segment::open(dir, base, config.segment)?);
    }

    if segments.is_empty() {
        segments.push(Segment::open(
            dir,
            config.segment.initial_offset,
            config.segment,
        )?);
    }

    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::ENTRY_WIDTH;
    use tempfile::TempDir;

    fn small_config() -> LogConfig {
        LogConfig::with_limits(1024, ENTRY_WIDTH * 3)
    }

    #[test]
    fn test_append_read() {
        let dir = TempDir::new().unwrap();
        let log = CommitLog::open(dir.path(), small_config()).unwrap();

        let offset = log.append(Record::new("hello world")).unwrap();
        assert_eq!(offset, 0);

        let record = log.read(offset).unwrap();
        assert_eq!(record.value.as_ref(), b"hello world");
        assert_eq!(record.offset, 0);
    }

    #[test]
    fn test_offsets_are_sequential_across_rollover() {
        let dir = TempDir::new().unwrap();
        let log = CommitLog::open(dir.path(), small_config()).unwrap();

        for i in 0..10u64 {
            assert_eq!(log.append(Record::new(format!("record {}", i))).unwrap(), i);
        }

        assert_eq!(log.lowest_offset().unwrap(), 0);
        assert_eq!(log.highest_offset().unwrap(), 9);
        assert_eq!(log.segment_count(), 4);

        for i in 0..10u64 {
            let record = log.read(i).unwrap();
            assert_eq!(record.value, format!("record {}", i).into_bytes());
        }
    }

    #[test]
    fn test_out_of_range() {
        let dir = TempDir::new().unwrap();
        let log = CommitLog::open(dir.path(), small_config()).unwrap();

        assert!(matches!(
            log.read(0),
            Err(StorageError::OffsetOutOfRange { offset: 0 })
        ));

        log.append(Record::new("hello world")).unwrap();
        log.append(Record::new("hello world")).unwrap();
        assert!(matches!(
            log.read(2),
            Err(StorageError::OffsetOutOfRange { offset: 2 })
        ));
    }

    #[test]
    fn test_empty_log_offsets() {
        let dir = TempDir::new().unwrap();
        let log = CommitLog::open(dir.path(), small_config()).unwrap();

        assert_eq!(log.lowest_offset().unwrap(), 0);
        assert_eq!(log.highest_offset().unwrap(), 0);
        assert_eq!(log.next_offset().unwrap(), 0);
        assert!(log.is_empty().unwrap());
    }

    #[test]
    fn test_initial_offset() {
        let dir = TempDir::new().unwrap();
        let log = CommitLog::open(dir.path(), small_config().with_initial_offset(100)).unwrap();

        assert_eq!(log.append(Record::new("a")).unwrap(), 100);
        assert_eq!(log.lowest_offset().unwrap(), 100);
        assert!(log.read(99).is_err());
    }

    #[test]
    fn test_reopen_restores_state() {
        let dir = TempDir::new().unwrap();
        let log = CommitLog::open(dir.path(), small_config()).unwrap();
        for i in 0..3u64 {
            log.append(Record::new(format!("v{}", i))).unwrap();
        }
        log.close().unwrap();
        drop(log);

        let log = CommitLog::open(dir.path(), small_config()).unwrap();
        assert_eq!(log.lowest_offset().unwrap(), 0);
        assert_eq!(log.highest_offset().unwrap(), 2);
        assert_eq!(log.read(1).unwrap().value.as_ref(), b"v1");
        assert_eq!(log.append(Record::new("v3")).unwrap(), 3);
    }

    #[test]
    fn test_truncate_removes_old_segments() {
        let dir = TempDir::new().unwrap();
        let log = CommitLog::open(dir.path(), small_config()).unwrap();
        for i in 0..7u64 {
            log.append(Record::new(format!("v{}", i))).unwrap();
        }

        // Segments cover [0,3) [3,6) [6,7)
        assert_eq!(log.truncate(4).unwrap(), 1);
        assert_eq!(log.lowest_offset().unwrap(), 3);
        assert!(matches!(
            log.read(2),
            Err(StorageError::OffsetOutOfRange { offset: 2 })
        ));
        assert_eq!(log.read(3).unwrap().value.as_ref(), b"v3");
    }

    #[test]
    fn test_truncate_below_segment_boundary_is_noop() {
        let dir = TempDir::new().unwrap();
        let log = CommitLog::open(dir.path(), LogConfig::default()).unwrap();
        for _ in 0..3 {
            log.append(Record::new("hello world")).unwrap();
        }

        assert_eq!(log.truncate(1).unwrap(), 0);
        for i in 0..3 {
            assert!(log.read(i).is_ok());
        }
    }

    #[test]
    fn test_truncate_everything_keeps_offsets() {
        let dir = TempDir::new().unwrap();
        let log = CommitLog::open(dir.path(), small_config()).unwrap();
        for _ in 0..4 {
            log.append(Record::new("x")).unwrap();
        }

        assert_eq!(log.truncate(100).unwrap(), 2);
        assert!(log.is_empty().unwrap());
        assert_eq!(log.lowest_offset().unwrap(), 4);
        assert_eq!(log.append(Record::new("y")).unwrap(), 4);
    }

    #[test]
    fn test_closed_log_rejects_operations() {
        let dir = TempDir::new().unwrap();
        let log = CommitLog::open(dir.path(), small_config()).unwrap();
        log.append(Record::new("x")).unwrap();
        log.close().unwrap();

        assert!(matches!(log.append(Record::new("y")), Err(StorageError::Closed)));
        assert!(matches!(log.read(0), Err(StorageError::Closed)));
        assert!(matches!(log.lowest_offset(), Err(StorageError::Closed)));
        assert!(log.close().is_ok());
    }

    #[test]
    fn test_reset() {
        let dir = TempDir::new().unwrap();
        let log = CommitLog::open(dir.path().join("log"), small_config()).unwrap();
        for _ in 0..5 {
            log.append(Record::new("x")).unwrap();
        }

        log.reset().unwrap();
        assert!(log.is_empty().unwrap());
        assert_eq!(log.segment_count(), 1);
        assert_eq!(log.append(Record::new("y")).unwrap(), 0);
    }

    #[test]
    fn test_remove_deletes_directory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log");
        let log = CommitLog::open(&path, small_config()).unwrap();
        log.append(Record::new("x")).unwrap();

        log.remove().unwrap();
        assert!(!path.exists());
        assert!(matches!(log.read(0), Err(StorageError::Closed)));
    }

    #[test]
    fn test_unrelated_files_ignored() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("README"), b"not a segment").unwrap();
        std::fs::write(dir.path().join("abc.store"), b"").unwrap();

        let log = CommitLog::open(dir.path(), small_config()).unwrap();
        assert_eq!(log.segment_count(), 1);
        assert_eq!(log.append(Record::new("x")).unwrap(), 0);
    }

    #[test]
    fn test_subscribe_sees_appends() {
        let dir = TempDir::new().unwrap();
        let log = CommitLog::open(dir.path(), small_config()).unwrap();
        let rx = log.subscribe();

        assert_eq!(*rx.borrow(), 0);
        log.append(Record::new("x")).unwrap();
        log.append(Record::new("y")).unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow(), 2);
    }
}

//! # distlog Storage
//!
//! Segmented, append-only commit log.
//!
//! ## Layers
//!
//! - **Store**: length-prefixed record frames in one file
//! - **Index**: fixed-width `(relative offset, position)` entries for O(1) lookup
//! - **Segment**: one store plus one index covering `[base_offset, next_offset)`
//! - **CommitLog**: ordered segments with rollover, truncation and recovery
//!
//! ## Example
//!
//! ```rust,ignore
//! use distlog_core::Record;
//! use distlog_storage::{CommitLog, LogConfig};
//!
//! let log = CommitLog::open("./data/log", LogConfig::default())?;
//! let offset = log.append(Record::new("hello world"))?;
//! assert_eq!(log.read(offset)?.value.as_ref(), b"hello world");
//! log.close()?;
//! ```

pub mod config;
pub mod error;
pub mod index;
pub mod log;
pub mod reader;
pub mod segment;
pub mod store;

pub use config::{DEFAULT_MAX_BYTES, LogConfig, SegmentConfig};
pub use error::{StorageError, StorageResult};
pub use index::{ENTRY_WIDTH, Index};
pub use log::CommitLog;
pub use reader::{LogReader, Records, decode_records};
pub use segment::Segment;
pub use store::Store;

//! Storage configuration

use serde::{Deserialize, Serialize};

use crate::index::ENTRY_WIDTH;

/// Default store and index size limit when none is configured
pub const DEFAULT_MAX_BYTES: u64 = 1024;

/// Limits applied to every segment of a log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentConfig {
    /// Roll over once the store file reaches this size
    pub max_store_bytes: u64,
    /// Capacity of the index file; a segment rolls over when it is full
    pub max_index_bytes: u64,
    /// Base offset of the first segment of a new log
    pub initial_offset: u64,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            max_store_bytes: DEFAULT_MAX_BYTES,
            max_index_bytes: DEFAULT_MAX_BYTES,
            initial_offset: 0,
        }
    }
}

/// Configuration for a commit log
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub segment: SegmentConfig,
}

impl LogConfig {
    /// Create a configuration with the given segment limits
    pub fn with_limits(max_store_bytes: u64, max_index_bytes: u64) -> Self {
        Self {
            segment: SegmentConfig {
                max_store_bytes,
                max_index_bytes,
                initial_offset: 0,
            },
        }
    }

    /// Set the base offset of the first segment
    pub fn with_initial_offset(mut self, offset: u64) -> Self {
        self.segment.initial_offset = offset;
        self
    }

    /// Replace zero limits with the defaults
    ///
    /// A non-zero index limit is raised to hold at least one entry.
    pub fn normalized(mut self) -> Self {
        if self.segment.max_store_bytes == 0 {
            self.segment.max_store_bytes = DEFAULT_MAX_BYTES;
        }
        if self.segment.max_index_bytes == 0 {
            self.segment.max_index_bytes = DEFAULT_MAX_BYTES;
        }
        self.segment.max_index_bytes = self.segment.max_index_bytes.max(ENTRY_WIDTH);
        self
    }
}

//! Log records

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// An immutable record in the commit log
///
/// The offset is assigned by the log at append time; whatever the caller
/// puts there is overwritten.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Opaque payload
    pub value: Bytes,
    /// Position of the record in its log
    pub offset: u64,
}

impl Record {
    /// Create an unassigned record holding the given payload
    pub fn new(value: impl Into<Bytes>) -> Self {
        Self {
            value: value.into(),
            offset: 0,
        }
    }

    /// Return the record with its offset set
    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    /// Serialize with postcard
    pub fn to_bytes(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(self)
    }

    /// Deserialize from postcard bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(bytes)
    }
}

//! Caller identity
//!
//! The transport layer authenticates a caller (for example from a mutual
//! certificate handshake) and hands the resulting identity string to the
//! service facade. The core never performs the handshake itself.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Authenticated identity of a caller
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CallerIdentity(String);

impl CallerIdentity {
    /// Create an identity from its subject name
    pub fn new(subject: impl Into<String>) -> Self {
        Self(subject.into())
    }

    /// Identity used when the transport supplies none
    pub fn anonymous() -> Self {
        Self(String::new())
    }

    /// The subject name used for authorization
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether no identity was supplied
    pub fn is_anonymous(&self) -> bool {
        self.0.is_empty()
    }
}

impl Display for CallerIdentity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.is_anonymous() {
            write!(f, "<anonymous>")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl From<&str> for CallerIdentity {
    fn from(subject: &str) -> Self {
        Self::new(subject)
    }
}

impl From<String> for CallerIdentity {
    fn from(subject: String) -> Self {
        Self(subject)
    }
}

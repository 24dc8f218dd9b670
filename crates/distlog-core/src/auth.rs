//! Authorization policies
//!
//! Two [`Authorizer`] implementations:
//!
//! - [`AllowAll`]: permits every request (single-tenant deployments, tests)
//! - [`AclAuthorizer`]: `(subject, object, action)` allow-rules loaded from TOML
//!
//! ## Policy Format
//!
//! ```toml
//! [[rule]]
//! subject = "root"
//! object = "*"
//! action = "produce"
//!
//! [[rule]]
//! subject = "root"
//! object = "*"
//! action = "consume"
//! ```
//!
//! `*` matches anything in any position. Requests matching no rule are denied.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::AuthError;
use crate::traits::Authorizer;

/// Matches any subject, object, or action
pub const WILDCARD: &str = "*";

/// Action checked before appending
pub const PRODUCE_ACTION: &str = "produce";

/// Action checked before reading
pub const CONSUME_ACTION: &str = "consume";

/// Authorizer that permits every request
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl Authorizer for AllowAll {
    fn authorize(&self, _subject: &str, _object: &str, _action: &str) -> Result<(), AuthError> {
        Ok(())
    }
}

/// A single allow-rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclRule {
    pub subject: String,
    pub object: String,
    pub action: String,
}

impl AclRule {
    /// Create a new rule
    pub fn new(
        subject: impl Into<String>,
        object: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            object: object.into(),
            action: action.into(),
        }
    }

    fn matches(&self, subject: &str, object: &str, action: &str) -> bool {
        field_matches(&self.subject, subject)
            && field_matches(&self.object, object)
            && field_matches(&self.action, action)
    }
}

fn field_matches(pattern: &str, value: &str) -> bool {
    pattern == WILDCARD || pattern == value
}

#[derive(Debug, Default, Deserialize)]
struct PolicyFile {
    #[serde(default, rename = "rule")]
    rules: Vec<AclRule>,
}

/// Rule-based authorizer
#[derive(Debug, Clone, Default)]
pub struct AclAuthorizer {
    rules: Vec<AclRule>,
}

impl AclAuthorizer {
    /// Create an authorizer from a set of rules
    pub fn new(rules: Vec<AclRule>) -> Self {
        Self { rules }
    }

    /// Parse a TOML policy
    pub fn from_toml_str(policy: &str) -> Result<Self, AuthError> {
        let file: PolicyFile =
            toml::from_str(policy).map_err(|e| AuthError::Policy(e.to_string()))?;
        Ok(Self::new(file.rules))
    }

    /// Load a TOML policy file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, AuthError> {
        let path = path.as_ref();
        let policy = std::fs::read_to_string(path)
            .map_err(|e| AuthError::Policy(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&policy)
    }

    /// Add a rule
    pub fn with_rule(mut self, rule: AclRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// The loaded rules
    pub fn rules(&self) -> &[AclRule] {
        &self.rules
    }
}

impl Authorizer for AclAuthorizer {
    fn authorize(&self, subject: &str, object: &str, action: &str) -> Result<(), AuthError> {
        if self
            .rules
            .iter()
            .any(|rule| rule.matches(subject, object, action))
        {
            return Ok(());
        }
        Err(AuthError::Denied {
            subject: subject.to_string(),
            object: object.to_string(),
            action: action.to_string(),
        })
    }
}

//! Target identifiers and scope membership fingerprints

use std::collections::BTreeSet;
use std::fmt;

use crate::digest::{Fingerprint, ScopeFingerprint};

const SCOPE_DOMAIN: &str = "draftgate.scope.v1";

/// Identifier of a target record in the system of record
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct TargetId(String);

impl TargetId {
    /// Wrap an identifier
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identifier text
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TargetId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for TargetId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl ScopeFingerprint {
    /// Fingerprint a resolved scope
    ///
    /// Enumeration order and duplicates do not matter; any membership change
    /// does. Every id is length-prefixed so `["ab", "c"]` and `["a", "bc"]`
    /// encode differently.
    pub fn of<'a, I>(ids: I) -> Self
    where
        I: IntoIterator<Item = &'a TargetId>,
    {
        let sorted: BTreeSet<&TargetId> = ids.into_iter().collect();
        let mut buf = Vec::with_capacity(8 + sorted.len() * 24);
        buf.extend_from_slice(&(sorted.len() as u64).to_le_bytes());
        for id in sorted {
            let bytes = id.as_str().as_bytes();
            buf.extend_from_slice(&(bytes.len() as u64).to_le_bytes());
            buf.extend_from_slice(bytes);
        }
        Self::from_fingerprint(Fingerprint::compute(SCOPE_DOMAIN, &buf))
    }
}

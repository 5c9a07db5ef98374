//! Error types for the draft-and-apply engine
//!
//! Batch-level failures ([`EngineError`]) are fail-fast and leave no partial
//! effects. Item-level failures never surface here: proposal failures live in
//! [`DraftItem`](crate::types::DraftItem) outcomes and write failures in
//! [`ApplyResult::errors`](crate::types::ApplyResult).

use chrono::{DateTime, Utc};
use draftgate_fingerprint::{ConfigurationError, RulesFingerprint, ScopeFingerprint, TargetId};

use crate::types::{DraftId, DraftStatus};

/// Main engine error type
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Rule configuration cannot be canonicalized
    #[error("rule configuration invalid: {0}")]
    ConfigurationInvalid(#[from] ConfigurationError),

    /// Engine settings rejected
    #[error("settings invalid: {0}")]
    InvalidSettings(#[from] SettingsError),

    /// Submitted rules fingerprint differs from the draft's
    #[error("rules changed since draft {draft_id} was generated (draft {stored}, submitted {submitted})")]
    RulesChanged {
        draft_id: DraftId,
        stored: RulesFingerprint,
        submitted: RulesFingerprint,
    },

    /// Scope membership differs from the draft's
    #[error("scope of draft {draft_id} is no longer valid (draft {stored}, now {current})")]
    ScopeInvalid {
        draft_id: DraftId,
        stored: ScopeFingerprint,
        current: ScopeFingerprint,
    },

    /// Draft is past its expiry
    #[error("draft {draft_id} expired at {expired_at}")]
    DraftExpired {
        draft_id: DraftId,
        expired_at: DateTime<Utc>,
    },

    /// No draft matches the lookup
    #[error("draft not found: {0}")]
    DraftNotFound(String),

    /// Draft exists but cannot be applied in its current status
    #[error("draft {draft_id} is {status} and cannot be applied")]
    DraftNotReady {
        draft_id: DraftId,
        status: DraftStatus,
    },

    /// Only cancelled drafts can resume generation
    #[error("draft {draft_id} is {status} and cannot resume generation")]
    NotResumable {
        draft_id: DraftId,
        status: DraftStatus,
    },

    /// Resolved scope exceeds the configured bound
    #[error("scope has {size} targets, more than the limit of {max}")]
    ScopeTooLarge { size: usize, max: usize },

    /// Generation was cancelled; the draft stays marked cancelled
    #[error("generation of draft {draft_id} cancelled")]
    Cancelled { draft_id: DraftId },

    /// Draft store failure
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Scope resolution failure
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Audit trail could not be read
    #[error("audit error: {0}")]
    Audit(#[from] AuditError),
}

impl EngineError {
    /// Stable machine-readable code
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigurationInvalid(_) => "CONFIGURATION_INVALID",
            Self::InvalidSettings(_) => "SETTINGS_INVALID",
            Self::RulesChanged { .. } => "RULES_CHANGED",
            Self::ScopeInvalid { .. } => "SCOPE_INVALID",
            Self::DraftExpired { .. } => "DRAFT_EXPIRED",
            Self::DraftNotFound(_) => "DRAFT_NOT_FOUND",
            Self::DraftNotReady { .. } => "DRAFT_NOT_READY",
            Self::NotResumable { .. } => "NOT_RESUMABLE",
            Self::ScopeTooLarge { .. } => "SCOPE_TOO_LARGE",
            Self::Cancelled { .. } => "CANCELLED",
            Self::Store(_) => "STORE_ERROR",
            Self::Catalog(_) => "CATALOG_ERROR",
            Self::Audit(_) => "AUDIT_ERROR",
        }
    }

    /// Recoverable by re-previewing and generating a fresh draft
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::RulesChanged { .. } | Self::ScopeInvalid { .. } | Self::DraftExpired { .. }
        )
    }
}

/// Draft store errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("draft {0} not found")]
    NotFound(DraftId),

    #[error("draft {0} already exists")]
    Duplicate(DraftId),

    #[error("illegal transition {from} -> {to}")]
    IllegalTransition { from: DraftStatus, to: DraftStatus },

    #[error("draft {0} is immutable")]
    Immutable(DraftId),

    #[error("draft {draft_id} already has an item for {target_id}")]
    DuplicateItem { draft_id: DraftId, target_id: TargetId },

    #[error("draft {draft_id} has no writable item for {target_id}")]
    UnknownItem { draft_id: DraftId, target_id: TargetId },

    #[error("backend failure: {0}")]
    Backend(String),
}

/// Scope resolution / record loading errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    #[error("query rejected: {0}")]
    InvalidQuery(String),

    #[error("catalog unavailable: {0}")]
    Unavailable(String),
}

/// Per-record failure of the content proposer
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProposalError {
    #[error("proposer rejected record: {0}")]
    Rejected(String),

    #[error("proposer unavailable: {0}")]
    Unavailable(String),
}

/// Per-record failure of the field sink
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WriteError {
    #[error("target {0} does not exist")]
    TargetMissing(TargetId),

    #[error("write rejected: {0}")]
    Rejected(String),

    #[error("sink unavailable: {0}")]
    Unavailable(String),
}

/// Audit sink failures; logged, never surfaced from apply
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("audit encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("audit sink unavailable: {0}")]
    Unavailable(String),

    #[error("audit chain broken at entry {sequence}")]
    IntegrityViolation { sequence: u64 },
}

/// Settings loading/validation errors
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("could not read settings: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not parse settings: {0}")]
    Parse(String),

    #[error("unsupported settings format: {0}")]
    UnsupportedFormat(String),

    #[error("invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use draftgate_fingerprint::{Fingerprint, RuleConfiguration};

    #[test]
    fn batch_failures_are_recoverable() {
        let draft_id = DraftId::new();
        let rules = rules_changed(draft_id);
        assert_eq!(rules.code(), "RULES_CHANGED");
        assert!(rules.is_recoverable());

        let scope = EngineError::ScopeInvalid {
            draft_id,
            stored: ScopeFingerprint::from_fingerprint(Fingerprint::new([1; 32])),
            current: ScopeFingerprint::from_fingerprint(Fingerprint::new([2; 32])),
        };
        assert_eq!(scope.code(), "SCOPE_INVALID");
        assert!(scope.is_recoverable());

        let missing = EngineError::DraftNotFound("x".into());
        assert!(!missing.is_recoverable());
    }

    #[test]
    fn message_names_both_tokens() {
        let err = rules_changed(DraftId::new());
        let msg = err.to_string();
        assert!(msg.contains("rules changed"));
        if let EngineError::RulesChanged { stored, submitted, .. } = &err {
            assert!(msg.contains(&stored.to_string()));
            assert!(msg.contains(&submitted.to_string()));
        }
    }

    fn rules_changed(draft_id: DraftId) -> EngineError {
        EngineError::RulesChanged {
            draft_id,
            stored: RuleConfiguration::new().with("prefix", "A").fingerprint(),
            submitted: RuleConfiguration::new().with("prefix", "B").fingerprint(),
        }
    }
}

//! Core types for the draft-and-apply protocol
//!
//! Defines:
//! - Identifiers (project, playbook, draft)
//! - Target records and proposals
//! - Drafts, draft items and their lifecycle status
//! - Preview and apply results

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use draftgate_fingerprint::{RuleConfiguration, RulesFingerprint, ScopeFingerprint, TargetId};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::scope::ScopeQuery;

/// Field name → field value
pub type FieldMap = BTreeMap<String, String>;

/// Owning project identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(String);

impl ProjectId {
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProjectId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Playbook identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlaybookId(String);

impl PlaybookId {
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlaybookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PlaybookId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Unique draft identifier (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DraftId(pub Ulid);

impl DraftId {
    /// Generate new draft ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for DraftId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DraftId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A record in the system of record, as seen by the proposer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRecord {
    pub id: TargetId,
    pub project_id: ProjectId,
    #[serde(default)]
    pub fields: FieldMap,
}

impl TargetRecord {
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<TargetId>, project_id: impl Into<ProjectId>) -> Self {
        Self {
            id: id.into(),
            project_id: project_id.into(),
            fields: FieldMap::new(),
        }
    }

    /// With a field set
    #[inline]
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Field value, if present
    #[inline]
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

/// Output of one successful content proposal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub fields: FieldMap,
    /// Proposer confidence in `[0, 1]`
    pub confidence: f64,
}

impl Proposal {
    #[inline]
    #[must_use]
    pub fn new(fields: FieldMap, confidence: f64) -> Self {
        Self { fields, confidence }
    }
}

/// Per-item result of the content proposer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProposalOutcome {
    Proposed { fields: FieldMap, confidence: f64 },
    Failed { reason: String },
}

/// Soft-constraint violation attached to a draft item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    TooLong {
        field: String,
        length: usize,
        max: usize,
    },
    ForbiddenPhrase {
        field: String,
        phrase: String,
    },
    MissingPrefix {
        field: String,
        prefix: String,
    },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooLong { field, length, max } => {
                write!(f, "{field} is {length} characters (max {max})")
            }
            Self::ForbiddenPhrase { field, phrase } => {
                write!(f, "{field} contains forbidden phrase '{phrase}'")
            }
            Self::MissingPrefix { field, prefix } => {
                write!(f, "{field} does not start with '{prefix}'")
            }
        }
    }
}

/// One proposed edit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftItem {
    pub target_id: TargetId,
    pub outcome: ProposalOutcome,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<Warning>,
}

impl DraftItem {
    /// Successful proposal
    #[inline]
    #[must_use]
    pub fn proposed(target_id: TargetId, proposal: Proposal, warnings: Vec<Warning>) -> Self {
        Self {
            target_id,
            outcome: ProposalOutcome::Proposed {
                fields: proposal.fields,
                confidence: proposal.confidence,
            },
            warnings,
        }
    }

    /// Failed proposal
    #[inline]
    #[must_use]
    pub fn failed(target_id: TargetId, reason: impl Into<String>) -> Self {
        Self {
            target_id,
            outcome: ProposalOutcome::Failed {
                reason: reason.into(),
            },
            warnings: Vec::new(),
        }
    }

    /// Proposed fields, if the proposal succeeded
    #[inline]
    #[must_use]
    pub fn proposed_fields(&self) -> Option<&FieldMap> {
        match &self.outcome {
            ProposalOutcome::Proposed { fields, .. } => Some(fields),
            ProposalOutcome::Failed { .. } => None,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, ProposalOutcome::Failed { .. })
    }
}

/// Draft lifecycle status
///
/// `Expired` is never stored; it is derived from `expires_at` by
/// [`Draft::effective_status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftStatus {
    Generating,
    Ready,
    Partial,
    Cancelled,
    Applied,
    Expired,
}

impl DraftStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Generating => "generating",
            Self::Ready => "ready",
            Self::Partial => "partial",
            Self::Cancelled => "cancelled",
            Self::Applied => "applied",
            Self::Expired => "expired",
        }
    }

    /// Ready or partial: generation finished and nothing committed yet
    #[inline]
    #[must_use]
    pub fn is_applicable(self) -> bool {
        matches!(self, Self::Ready | Self::Partial)
    }
}

impl fmt::Display for DraftStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted, not-yet-committed batch of proposed edits
///
/// # Invariants
/// - `rules_fingerprint` and `scope_fingerprint` are fixed at creation
/// - `applied_at` is set at most once; afterwards the draft is immutable
/// - `items` are sorted by target id and unique per target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Draft {
    pub id: DraftId,
    pub project_id: ProjectId,
    pub playbook_id: PlaybookId,
    pub rules: RuleConfiguration,
    pub scope_query: ScopeQuery,
    pub rules_fingerprint: RulesFingerprint,
    pub scope_fingerprint: ScopeFingerprint,
    pub status: DraftStatus,
    pub items: Vec<DraftItem>,
    /// Targets shown in preview
    pub sample: Vec<TargetId>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub applied_at: Option<DateTime<Utc>>,
}

impl Draft {
    /// Status as observed at `now`
    #[must_use]
    pub fn effective_status(&self, now: DateTime<Utc>) -> DraftStatus {
        if self.applied_at.is_none() && self.is_expired(now) {
            DraftStatus::Expired
        } else {
            self.status
        }
    }

    /// True once `now` is past the expiry timestamp
    #[inline]
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now > at)
    }

    #[inline]
    #[must_use]
    pub fn is_applied(&self) -> bool {
        self.applied_at.is_some()
    }

    /// Item for a target, if one was generated
    #[must_use]
    pub fn item(&self, target_id: &TargetId) -> Option<&DraftItem> {
        self.items
            .binary_search_by(|item| item.target_id.cmp(target_id))
            .ok()
            .map(|idx| &self.items[idx])
    }

    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.items.iter().filter(|i| i.is_failed()).count()
    }

    #[must_use]
    pub fn proposed_count(&self) -> usize {
        self.items.len() - self.failed_count()
    }
}

/// Result of a preview run; nothing is persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewResult {
    pub rules_fingerprint: RulesFingerprint,
    pub scope_fingerprint: ScopeFingerprint,
    /// Size of the full resolved scope
    pub scope_size: usize,
    pub sample_items: Vec<DraftItem>,
}

/// Who triggered an apply, and why
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyContext {
    pub actor: String,
    pub reason: Option<String>,
}

impl ApplyContext {
    #[inline]
    #[must_use]
    pub fn new(actor: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
            reason: None,
        }
    }

    #[inline]
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

impl Default for ApplyContext {
    fn default() -> Self {
        Self::new("system")
    }
}

/// Commit request for a previewed draft
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyRequest {
    pub project_id: ProjectId,
    pub playbook_id: PlaybookId,
    /// Pin a specific draft; otherwise the most recent finished one is used
    pub draft_id: Option<DraftId>,
    pub scope_fingerprint: ScopeFingerprint,
    pub rules_fingerprint: RulesFingerprint,
    pub context: ApplyContext,
}

impl ApplyRequest {
    #[must_use]
    pub fn new(
        project_id: impl Into<ProjectId>,
        playbook_id: impl Into<PlaybookId>,
        scope_fingerprint: ScopeFingerprint,
        rules_fingerprint: RulesFingerprint,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            playbook_id: playbook_id.into(),
            draft_id: None,
            scope_fingerprint,
            rules_fingerprint,
            context: ApplyContext::default(),
        }
    }

    /// Build a request that re-submits a draft's own fingerprints
    #[must_use]
    pub fn for_draft(draft: &Draft) -> Self {
        Self {
            project_id: draft.project_id.clone(),
            playbook_id: draft.playbook_id.clone(),
            draft_id: Some(draft.id),
            scope_fingerprint: draft.scope_fingerprint,
            rules_fingerprint: draft.rules_fingerprint,
            context: ApplyContext::default(),
        }
    }

    #[inline]
    #[must_use]
    pub fn with_draft(mut self, draft_id: DraftId) -> Self {
        self.draft_id = Some(draft_id);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_context(mut self, context: ApplyContext) -> Self {
        self.context = context;
        self
    }
}

/// Write state of one draft item in the apply ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ItemApplyState {
    Pending,
    InFlight { attempts: u32 },
    Written { at: DateTime<Utc>, attempts: u32 },
    Failed { reason: String, attempts: u32 },
}

impl ItemApplyState {
    #[inline]
    #[must_use]
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Pending => 0,
            Self::InFlight { attempts }
            | Self::Written { attempts, .. }
            | Self::Failed { attempts, .. } => *attempts,
        }
    }
}

/// A record that could not be written during apply; retryable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemApplyError {
    pub target_id: TargetId,
    pub reason: String,
    pub attempts: u32,
}

/// Outcome of an apply call
///
/// Counts describe the draft's cumulative apply state after this call, so
/// a retry and a concurrent loser report the same numbers as the winner
/// once all writes settle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyResult {
    pub draft_id: DraftId,
    pub applied_at: DateTime<Utc>,
    /// The commit transition had already happened before this call
    pub already_applied: bool,
    /// Items written successfully (cumulative)
    pub applied_count: usize,
    /// Items with no proposal to write
    pub skipped_count: usize,
    /// Items being written by a concurrent call
    pub pending_count: usize,
    /// Writes performed by this call
    pub written_this_call: usize,
    /// Items whose last write failed
    pub errors: Vec<ItemApplyError>,
}

impl ApplyResult {
    /// Every writable item has been written
    #[inline]
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty() && self.pending_count == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::ScopeFilter;
    use chrono::TimeZone;

    fn draft(expires_at: Option<DateTime<Utc>>) -> Draft {
        let rules = RuleConfiguration::new().with("prefix", "X | ");
        let ids = [TargetId::from("a"), TargetId::from("b")];
        Draft {
            id: DraftId::new(),
            project_id: "proj".into(),
            playbook_id: "pb".into(),
            rules_fingerprint: rules.fingerprint(),
            rules,
            scope_query: ScopeQuery::new("proj", ScopeFilter::All),
            scope_fingerprint: ScopeFingerprint::of(&ids),
            status: DraftStatus::Ready,
            items: vec![
                DraftItem::failed("a".into(), "boom"),
                DraftItem::proposed("b".into(), Proposal::new(FieldMap::new(), 0.5), vec![]),
            ],
            sample: vec![],
            created_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            expires_at,
            applied_at: None,
        }
    }

    #[test]
    fn expiry_is_derived() {
        let at = Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap();
        let d = draft(Some(at));
        assert_eq!(d.effective_status(at), DraftStatus::Ready);
        assert_eq!(
            d.effective_status(at + chrono::TimeDelta::seconds(1)),
            DraftStatus::Expired
        );
        assert_eq!(draft(None).effective_status(at), DraftStatus::Ready);
    }

    #[test]
    fn applied_drafts_do_not_expire() {
        let at = Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap();
        let mut d = draft(Some(at));
        d.status = DraftStatus::Applied;
        d.applied_at = Some(at);
        assert_eq!(
            d.effective_status(at + chrono::TimeDelta::days(30)),
            DraftStatus::Applied
        );
    }

    #[test]
    fn item_lookup_and_counts() {
        let d = draft(None);
        assert!(d.item(&"a".into()).unwrap().is_failed());
        assert!(d.item(&"b".into()).unwrap().proposed_fields().is_some());
        assert!(d.item(&"c".into()).is_none());
        assert_eq!(d.failed_count(), 1);
        assert_eq!(d.proposed_count(), 1);
    }

    #[test]
    fn draft_serde_round_trip() {
        let d = draft(None);
        let json = serde_json::to_string(&d).unwrap();
        let decoded: Draft = serde_json::from_str(&json).unwrap();
        assert_eq!(d, decoded);
    }
}

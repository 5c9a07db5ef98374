//! Draft store
//!
//! The only shared mutable resource of the engine. Every mutation is a
//! conditional transition on one draft entry:
//! - [`DraftStore::try_mark_applied`] is the exactly-once commit (CAS on
//!   `applied_at`)
//! - [`DraftStore::claim_item`] is the per-item write claim that keeps
//!   concurrent or repeated applies from writing an item twice
//!
//! Callers never hold a lock across these calls.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use draftgate_fingerprint::TargetId;

use crate::error::StoreError;
use crate::lifecycle::validate_transition;
use crate::types::{Draft, DraftId, DraftItem, DraftStatus, ItemApplyState, PlaybookId, ProjectId};

/// Result of the commit transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// This call set `applied_at`
    Committed { applied_at: DateTime<Utc> },
    /// Someone else already did
    AlreadyApplied { applied_at: DateTime<Utc> },
}

impl CommitOutcome {
    #[inline]
    #[must_use]
    pub fn applied_at(self) -> DateTime<Utc> {
        match self {
            Self::Committed { applied_at } | Self::AlreadyApplied { applied_at } => applied_at,
        }
    }
}

/// Result of claiming one item for writing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemClaim {
    /// Caller owns the write; `attempts` includes this one
    Claimed { attempts: u32 },
    /// Written earlier; nothing to do
    AlreadyWritten,
    /// Another caller is writing it right now
    InFlight,
}

/// How a claimed write ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemSettlement {
    Written { at: DateTime<Utc> },
    Failed { reason: String },
}

/// Persistence for drafts, their lifecycle, and the apply ledger
#[async_trait]
pub trait DraftStore: Send + Sync + std::fmt::Debug {
    /// Persist a new draft
    async fn insert(&self, draft: Draft) -> Result<(), StoreError>;

    async fn get(&self, id: DraftId) -> Result<Option<Draft>, StoreError>;

    /// Drafts for a playbook, most recently created first
    async fn list(
        &self,
        project_id: &ProjectId,
        playbook_id: &PlaybookId,
    ) -> Result<Vec<Draft>, StoreError>;

    /// Record one generated item while the draft is generating
    ///
    /// # Errors
    /// `DuplicateItem` if the target already has an item
    async fn checkpoint_item(&self, id: DraftId, item: DraftItem) -> Result<(), StoreError>;

    /// Lifecycle transition other than the commit
    async fn transition(&self, id: DraftId, to: DraftStatus) -> Result<Draft, StoreError>;

    /// Set `applied_at` only if it is unset
    async fn try_mark_applied(
        &self,
        id: DraftId,
        at: DateTime<Utc>,
    ) -> Result<CommitOutcome, StoreError>;

    /// Move an item from pending/failed to in-flight
    async fn claim_item(&self, id: DraftId, target_id: &TargetId) -> Result<ItemClaim, StoreError>;

    /// Settle an in-flight item
    async fn settle_item(
        &self,
        id: DraftId,
        target_id: &TargetId,
        settlement: ItemSettlement,
    ) -> Result<(), StoreError>;

    /// Apply ledger for every writable item
    async fn item_states(&self, id: DraftId)
        -> Result<BTreeMap<TargetId, ItemApplyState>, StoreError>;
}

#[derive(Debug)]
struct StoredDraft {
    seq: u64,
    draft: Draft,
    ledger: BTreeMap<TargetId, ItemApplyState>,
}

/// In-process draft store
///
/// Each draft lives in one `DashMap` entry; holding the entry's write guard
/// for the duration of a method makes every conditional transition atomic.
#[derive(Debug, Default)]
pub struct InMemoryDraftStore {
    drafts: DashMap<DraftId, StoredDraft>,
    next_seq: AtomicU64,
}

impl InMemoryDraftStore {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored drafts
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.drafts.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.drafts.is_empty()
    }
}

#[async_trait]
impl DraftStore for InMemoryDraftStore {
    async fn insert(&self, draft: Draft) -> Result<(), StoreError> {
        use dashmap::mapref::entry::Entry;

        match self.drafts.entry(draft.id) {
            Entry::Occupied(_) => Err(StoreError::Duplicate(draft.id)),
            Entry::Vacant(slot) => {
                let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
                slot.insert(StoredDraft {
                    seq,
                    draft,
                    ledger: BTreeMap::new(),
                });
                Ok(())
            }
        }
    }

    async fn get(&self, id: DraftId) -> Result<Option<Draft>, StoreError> {
        Ok(self.drafts.get(&id).map(|entry| entry.draft.clone()))
    }

    async fn list(
        &self,
        project_id: &ProjectId,
        playbook_id: &PlaybookId,
    ) -> Result<Vec<Draft>, StoreError> {
        let mut found: Vec<(u64, Draft)> = self
            .drafts
            .iter()
            .filter(|e| &e.draft.project_id == project_id && &e.draft.playbook_id == playbook_id)
            .map(|e| (e.seq, e.draft.clone()))
            .collect();
        found.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(found.into_iter().map(|(_, d)| d).collect())
    }

    async fn checkpoint_item(&self, id: DraftId, item: DraftItem) -> Result<(), StoreError> {
        let mut entry = self.drafts.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        let draft = &mut entry.draft;
        if draft.status != DraftStatus::Generating {
            return Err(StoreError::Immutable(id));
        }
        match draft
            .items
            .binary_search_by(|existing| existing.target_id.cmp(&item.target_id))
        {
            Ok(_) => Err(StoreError::DuplicateItem {
                draft_id: id,
                target_id: item.target_id,
            }),
            Err(pos) => {
                draft.items.insert(pos, item);
                Ok(())
            }
        }
    }

    async fn transition(&self, id: DraftId, to: DraftStatus) -> Result<Draft, StoreError> {
        let mut entry = self.drafts.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if to == DraftStatus::Applied {
            // Commit goes through try_mark_applied only
            return Err(StoreError::IllegalTransition {
                from: entry.draft.status,
                to,
            });
        }
        validate_transition(entry.draft.status, to)?;
        entry.draft.status = to;
        if to.is_applicable() {
            let ledger: BTreeMap<TargetId, ItemApplyState> = entry
                .draft
                .items
                .iter()
                .filter(|item| !item.is_failed())
                .map(|item| (item.target_id.clone(), ItemApplyState::Pending))
                .collect();
            entry.ledger = ledger;
        }
        Ok(entry.draft.clone())
    }

    async fn try_mark_applied(
        &self,
        id: DraftId,
        at: DateTime<Utc>,
    ) -> Result<CommitOutcome, StoreError> {
        let mut entry = self.drafts.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if let Some(applied_at) = entry.draft.applied_at {
            return Ok(CommitOutcome::AlreadyApplied { applied_at });
        }
        validate_transition(entry.draft.status, DraftStatus::Applied)?;
        entry.draft.status = DraftStatus::Applied;
        entry.draft.applied_at = Some(at);
        Ok(CommitOutcome::Committed { applied_at: at })
    }

    async fn claim_item(&self, id: DraftId, target_id: &TargetId) -> Result<ItemClaim, StoreError> {
        let mut entry = self.drafts.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if !entry.draft.is_applied() {
            return Err(StoreError::IllegalTransition {
                from: entry.draft.status,
                to: DraftStatus::Applied,
            });
        }
        let state = entry
            .ledger
            .get_mut(target_id)
            .ok_or_else(|| StoreError::UnknownItem {
                draft_id: id,
                target_id: target_id.clone(),
            })?;
        let claim = match *state {
            ItemApplyState::Written { .. } => ItemClaim::AlreadyWritten,
            ItemApplyState::InFlight { .. } => ItemClaim::InFlight,
            ItemApplyState::Pending | ItemApplyState::Failed { .. } => {
                let attempts = state.attempts() + 1;
                *state = ItemApplyState::InFlight { attempts };
                ItemClaim::Claimed { attempts }
            }
        };
        Ok(claim)
    }

    async fn settle_item(
        &self,
        id: DraftId,
        target_id: &TargetId,
        settlement: ItemSettlement,
    ) -> Result<(), StoreError> {
        let mut entry = self.drafts.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        let state = entry
            .ledger
            .get_mut(target_id)
            .ok_or_else(|| StoreError::UnknownItem {
                draft_id: id,
                target_id: target_id.clone(),
            })?;
        let ItemApplyState::InFlight { attempts } = *state else {
            return Err(StoreError::Backend(format!(
                "item {target_id} of draft {id} is not in flight"
            )));
        };
        *state = match settlement {
            ItemSettlement::Written { at } => ItemApplyState::Written { at, attempts },
            ItemSettlement::Failed { reason } => ItemApplyState::Failed { reason, attempts },
        };
        Ok(())
    }

    async fn item_states(
        &self,
        id: DraftId,
    ) -> Result<BTreeMap<TargetId, ItemApplyState>, StoreError> {
        let entry = self.drafts.get(&id).ok_or(StoreError::NotFound(id))?;
        Ok(entry.ledger.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::{ScopeFilter, ScopeQuery};
    use crate::types::{FieldMap, Proposal};
    use draftgate_fingerprint::{RuleConfiguration, ScopeFingerprint};

    fn generating_draft() -> Draft {
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
            status: DraftStatus::Generating,
            items: Vec::new(),
            sample: Vec::new(),
            created_at: Utc::now(),
            expires_at: None,
            applied_at: None,
        }
    }

    fn proposed(id: &str) -> DraftItem {
        DraftItem::proposed(id.into(), Proposal::new(FieldMap::new(), 1.0), vec![])
    }

    async fn ready_draft(store: &InMemoryDraftStore) -> DraftId {
        let draft = generating_draft();
        let id = draft.id;
        store.insert(draft).await.unwrap();
        store.checkpoint_item(id, proposed("b")).await.unwrap();
        store.checkpoint_item(id, proposed("a")).await.unwrap();
        store
            .checkpoint_item(id, DraftItem::failed("c".into(), "boom"))
            .await
            .unwrap();
        store.transition(id, DraftStatus::Partial).await.unwrap();
        id
    }

    #[tokio::test]
    async fn duplicate_insert_rejected() {
        let store = InMemoryDraftStore::new();
        let draft = generating_draft();
        store.insert(draft.clone()).await.unwrap();
        assert_eq!(
            store.insert(draft.clone()).await,
            Err(StoreError::Duplicate(draft.id))
        );
    }

    #[tokio::test]
    async fn checkpoint_keeps_items_sorted_and_unique() {
        let store = InMemoryDraftStore::new();
        let draft = generating_draft();
        let id = draft.id;
        store.insert(draft).await.unwrap();
        store.checkpoint_item(id, proposed("b")).await.unwrap();
        store.checkpoint_item(id, proposed("a")).await.unwrap();
        assert!(matches!(
            store.checkpoint_item(id, proposed("a")).await,
            Err(StoreError::DuplicateItem { .. })
        ));

        let stored = store.get(id).await.unwrap().unwrap();
        let ids: Vec<&str> = stored.items.iter().map(|i| i.target_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn finished_drafts_are_immutable() {
        let store = InMemoryDraftStore::new();
        let id = ready_draft(&store).await;
        assert_eq!(
            store.checkpoint_item(id, proposed("z")).await,
            Err(StoreError::Immutable(id))
        );
    }

    #[tokio::test]
    async fn ledger_covers_only_proposed_items() {
        let store = InMemoryDraftStore::new();
        let id = ready_draft(&store).await;
        let ledger = store.item_states(id).await.unwrap();
        assert_eq!(ledger.len(), 2);
        assert!(ledger.values().all(|s| *s == ItemApplyState::Pending));
    }

    #[tokio::test]
    async fn commit_happens_once() {
        let store = InMemoryDraftStore::new();
        let id = ready_draft(&store).await;
        let first_at = Utc::now();
        let first = store.try_mark_applied(id, first_at).await.unwrap();
        let second = store
            .try_mark_applied(id, first_at + chrono::TimeDelta::seconds(5))
            .await
            .unwrap();
        assert_eq!(first, CommitOutcome::Committed { applied_at: first_at });
        assert_eq!(second, CommitOutcome::AlreadyApplied { applied_at: first_at });
    }

    #[tokio::test]
    async fn generating_draft_cannot_commit() {
        let store = InMemoryDraftStore::new();
        let draft = generating_draft();
        let id = draft.id;
        store.insert(draft).await.unwrap();
        assert!(matches!(
            store.try_mark_applied(id, Utc::now()).await,
            Err(StoreError::IllegalTransition { .. })
        ));
    }

    #[tokio::test]
    async fn claim_requires_commit() {
        let store = InMemoryDraftStore::new();
        let id = ready_draft(&store).await;
        assert!(store.claim_item(id, &"a".into()).await.is_err());
    }

    #[tokio::test]
    async fn claim_settle_cycle() {
        let store = InMemoryDraftStore::new();
        let id = ready_draft(&store).await;
        store.try_mark_applied(id, Utc::now()).await.unwrap();
        let a = TargetId::from("a");

        assert_eq!(
            store.claim_item(id, &a).await.unwrap(),
            ItemClaim::Claimed { attempts: 1 }
        );
        assert_eq!(store.claim_item(id, &a).await.unwrap(), ItemClaim::InFlight);

        store
            .settle_item(id, &a, ItemSettlement::Failed { reason: "down".into() })
            .await
            .unwrap();
        assert_eq!(
            store.claim_item(id, &a).await.unwrap(),
            ItemClaim::Claimed { attempts: 2 }
        );

        store
            .settle_item(id, &a, ItemSettlement::Written { at: Utc::now() })
            .await
            .unwrap();
        assert_eq!(store.claim_item(id, &a).await.unwrap(), ItemClaim::AlreadyWritten);

        // Failed proposals never enter the ledger
        assert!(matches!(
            store.claim_item(id, &"c".into()).await,
            Err(StoreError::UnknownItem { .. })
        ));
    }

    #[tokio::test]
    async fn list_is_newest_first() {
        let store = InMemoryDraftStore::new();
        let first = generating_draft();
        let second = generating_draft();
        store.insert(first.clone()).await.unwrap();
        store.insert(second.clone()).await.unwrap();
        let listed = store.list(&"proj".into(), &"pb".into()).await.unwrap();
        assert_eq!(listed[0].id, second.id);
        assert_eq!(listed[1].id, first.id);
        assert!(store.list(&"proj".into(), &"other".into()).await.unwrap().is_empty());
    }
}

//! Draft generation
//!
//! Preview proposes a sample and persists nothing. Generation proposes the
//! whole resolved scope, checkpointing every item into the store while the
//! draft is `generating`, so a cancelled run can resume where it stopped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use draftgate_fingerprint::{RuleConfiguration, TargetId};
use futures::stream::{self, StreamExt};

use crate::constraints::SoftConstraints;
use crate::error::{CatalogError, EngineError, StoreError};
use crate::lifecycle::settled_status;
use crate::ports::{Clock, ContentProposer, TargetCatalog};
use crate::scope::{ScopeQuery, ScopeResolver};
use crate::settings::EngineSettings;
use crate::store::DraftStore;
use crate::types::{Draft, DraftId, DraftItem, DraftStatus, PlaybookId, PreviewResult, ProjectId};

/// Cooperative cancellation for a generation run
///
/// Checked before each proposer call; calls already running finish and are
/// checkpointed before the draft is marked cancelled.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Runs the proposer over resolved scopes
#[derive(Debug, Clone)]
pub struct DraftGenerator {
    resolver: ScopeResolver,
    catalog: Arc<dyn TargetCatalog>,
    proposer: Arc<dyn ContentProposer>,
    store: Arc<dyn DraftStore>,
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
}

impl DraftGenerator {
    #[must_use]
    pub fn new(
        catalog: Arc<dyn TargetCatalog>,
        proposer: Arc<dyn ContentProposer>,
        store: Arc<dyn DraftStore>,
        clock: Arc<dyn Clock>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            resolver: ScopeResolver::new(Arc::clone(&catalog), Arc::clone(&clock)),
            catalog,
            proposer,
            store,
            clock,
            settings,
        }
    }

    /// Fingerprint the full scope and propose the first `sample_size` targets
    ///
    /// # Errors
    /// Fails only if the scope cannot be resolved
    pub async fn preview(
        &self,
        rules: &RuleConfiguration,
        query: &ScopeQuery,
        sample_size: usize,
    ) -> Result<PreviewResult, EngineError> {
        let rules_fingerprint = rules.fingerprint();
        let scope = self.resolver.resolve(query).await?;
        let constraints = SoftConstraints::from_rules(rules);
        let constraints = &constraints;

        let sample_items: Vec<DraftItem> = stream::iter(scope.sample(sample_size))
            .map(|target| self.propose_one(target, rules, constraints))
            .buffered(self.settings.generation_concurrency)
            .collect()
            .await;

        tracing::info!(
            project = %query.project_id,
            rules = %rules_fingerprint.short(),
            scope = %scope.fingerprint.short(),
            scope_size = scope.len(),
            sampled = sample_items.len(),
            "preview"
        );

        Ok(PreviewResult {
            rules_fingerprint,
            scope_fingerprint: scope.fingerprint,
            scope_size: scope.len(),
            sample_items,
        })
    }

    /// Generate and persist a draft for the full scope
    ///
    /// # Errors
    /// - `ScopeTooLarge` if the scope exceeds `max_targets_per_draft`
    /// - `Cancelled` if `cancel` fired; the draft is left `cancelled`
    /// - store and catalog failures
    pub async fn generate(
        &self,
        project_id: ProjectId,
        playbook_id: PlaybookId,
        rules: RuleConfiguration,
        query: ScopeQuery,
        cancel: &CancellationFlag,
    ) -> Result<Draft, EngineError> {
        if query.project_id != project_id {
            return Err(CatalogError::InvalidQuery(format!(
                "scope query targets project {}, not {project_id}",
                query.project_id
            ))
            .into());
        }

        let rules_fingerprint = rules.fingerprint();
        let scope = self.resolver.resolve(&query).await?;
        if scope.len() > self.settings.max_targets_per_draft {
            return Err(EngineError::ScopeTooLarge {
                size: scope.len(),
                max: self.settings.max_targets_per_draft,
            });
        }

        let now = self.clock.now();
        let draft = Draft {
            id: DraftId::new(),
            project_id,
            playbook_id,
            rules,
            scope_query: query,
            rules_fingerprint,
            scope_fingerprint: scope.fingerprint,
            status: DraftStatus::Generating,
            items: Vec::new(),
            sample: scope.sample(self.settings.default_sample_size),
            created_at: now,
            expires_at: self
                .settings
                .draft_ttl()
                .and_then(|ttl| now.checked_add_signed(ttl)),
            applied_at: None,
        };
        let draft_id = draft.id;
        let rules = draft.rules.clone();
        self.store.insert(draft).await?;

        tracing::info!(
            draft = %draft_id,
            targets = scope.len(),
            rules = %rules_fingerprint.short(),
            scope = %scope.fingerprint.short(),
            "generating draft"
        );

        self.run(draft_id, &rules, scope.ids.into_iter().collect(), cancel)
            .await
    }

    /// Continue a cancelled draft, proposing only targets without an item
    ///
    /// # Errors
    /// - `NotResumable` unless the draft is `cancelled`
    /// - `DraftExpired` if it expired meanwhile
    /// - `ScopeInvalid` if membership changed since the run started
    pub async fn resume(
        &self,
        draft_id: DraftId,
        cancel: &CancellationFlag,
    ) -> Result<Draft, EngineError> {
        let draft = self
            .store
            .get(draft_id)
            .await?
            .ok_or_else(|| EngineError::DraftNotFound(draft_id.to_string()))?;

        let now = self.clock.now();
        if draft.status != DraftStatus::Cancelled {
            return Err(EngineError::NotResumable {
                draft_id,
                status: draft.effective_status(now),
            });
        }
        if let Some(expired_at) = draft.expires_at.filter(|_| draft.is_expired(now)) {
            return Err(EngineError::DraftExpired {
                draft_id,
                expired_at,
            });
        }

        let scope = self.resolver.resolve(&draft.scope_query).await?;
        if scope.fingerprint != draft.scope_fingerprint {
            return Err(EngineError::ScopeInvalid {
                draft_id,
                stored: draft.scope_fingerprint,
                current: scope.fingerprint,
            });
        }

        self.store
            .transition(draft_id, DraftStatus::Generating)
            .await?;
        let remaining: Vec<TargetId> = scope
            .ids
            .into_iter()
            .filter(|target| draft.item(target).is_none())
            .collect();

        tracing::info!(
            draft = %draft_id,
            done = draft.items.len(),
            remaining = remaining.len(),
            "resuming draft"
        );

        self.run(draft_id, &draft.rules, remaining, cancel).await
    }

    async fn run(
        &self,
        draft_id: DraftId,
        rules: &RuleConfiguration,
        targets: Vec<TargetId>,
        cancel: &CancellationFlag,
    ) -> Result<Draft, EngineError> {
        let constraints = SoftConstraints::from_rules(rules);
        let constraints = &constraints;

        let mut items = stream::iter(targets)
            .map(|target| async move {
                if cancel.is_cancelled() {
                    return None;
                }
                Some(self.propose_one(target, rules, constraints).await)
            })
            .buffered(self.settings.generation_concurrency);

        // Drained to the end: proposals already in flight when the flag fires
        // are checkpointed, so resume never asks for them again.
        while let Some(item) = items.next().await {
            if let Some(item) = item {
                tracing::debug!(
                    draft = %draft_id,
                    target_id = %item.target_id,
                    failed = item.is_failed(),
                    "checkpoint"
                );
                self.store.checkpoint_item(draft_id, item).await?;
            }
        }

        if cancel.is_cancelled() {
            let draft = self
                .store
                .transition(draft_id, DraftStatus::Cancelled)
                .await?;
            tracing::info!(draft = %draft_id, checkpointed = draft.items.len(), "generation cancelled");
            return Err(EngineError::Cancelled { draft_id });
        }

        let failed = self
            .store
            .get(draft_id)
            .await?
            .ok_or(StoreError::NotFound(draft_id))?
            .failed_count();
        let draft = self
            .store
            .transition(draft_id, settled_status(failed))
            .await?;

        tracing::info!(
            draft = %draft_id,
            status = %draft.status,
            items = draft.items.len(),
            failed,
            "draft generated"
        );
        Ok(draft)
    }

    /// Load and propose one target; every failure becomes a failed item
    async fn propose_one(
        &self,
        target: TargetId,
        rules: &RuleConfiguration,
        constraints: &SoftConstraints,
    ) -> DraftItem {
        let record = match self.catalog.load(&target).await {
            Ok(Some(record)) => record,
            Ok(None) => return DraftItem::failed(target, "target no longer exists"),
            Err(e) => return DraftItem::failed(target, e.to_string()),
        };
        match self.proposer.propose(&record, rules).await {
            Ok(proposal) => {
                let warnings = constraints.check(&proposal.fields);
                DraftItem::proposed(target, proposal, warnings)
            }
            Err(e) => {
                tracing::debug!(target_id = %target, error = %e, "proposal failed");
                DraftItem::failed(target, e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_shared_between_clones() {
        let flag = CancellationFlag::new();
        let other = flag.clone();
        assert!(!other.is_cancelled());
        flag.cancel();
        assert!(other.is_cancelled());
    }
}

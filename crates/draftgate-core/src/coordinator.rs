//! Apply coordination
//!
//! An apply call runs three phases:
//! 1. Validate: locate the draft, check expiry, compare the submitted rules
//!    and scope tokens. Any failure returns before anything is mutated.
//! 2. Commit: the store's compare-and-swap on `applied_at`. Winner and loser
//!    of a race both continue.
//! 3. Items: claim each writable item, write it through the sink, settle the
//!    claim, and audit the outcome. Failed items stay retryable.
//!
//! Items claimed by a concurrent caller are waited for before the result is
//! summarized, so racing callers report the same ledger.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use draftgate_fingerprint::TargetId;

use crate::audit::{AuditOutcome, AuditRecord, AuditSink};
use crate::error::EngineError;
use crate::ports::{Clock, FieldSink, TargetCatalog};
use crate::scope::ScopeResolver;
use crate::store::{CommitOutcome, DraftStore, ItemClaim, ItemSettlement};
use crate::types::{
    ApplyRequest, ApplyResult, Draft, FieldMap, ItemApplyError, ItemApplyState,
};

/// Validates apply requests and drives the commit and item phases
#[derive(Debug, Clone)]
pub struct ApplyCoordinator {
    resolver: ScopeResolver,
    sink: Arc<dyn FieldSink>,
    store: Arc<dyn DraftStore>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    settle_timeout: Duration,
}

const SETTLE_POLL_START: Duration = Duration::from_millis(2);
const SETTLE_POLL_MAX: Duration = Duration::from_millis(100);

impl ApplyCoordinator {
    #[must_use]
    pub fn new(
        catalog: Arc<dyn TargetCatalog>,
        sink: Arc<dyn FieldSink>,
        store: Arc<dyn DraftStore>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
        settle_timeout: Duration,
    ) -> Self {
        Self {
            resolver: ScopeResolver::new(catalog, Arc::clone(&clock)),
            sink,
            store,
            audit,
            clock,
            settle_timeout,
        }
    }

    /// Commit a draft and write its items
    ///
    /// # Errors
    /// Batch-level failures only; per-item write failures are reported in
    /// [`ApplyResult::errors`].
    pub async fn apply(&self, request: &ApplyRequest) -> Result<ApplyResult, EngineError> {
        let draft = self.locate(request).await?;
        self.validate(&draft, request).await?;

        let now = self.clock.now();
        let outcome = self.store.try_mark_applied(draft.id, now).await?;
        let already_applied = matches!(outcome, CommitOutcome::AlreadyApplied { .. });
        if already_applied {
            tracing::debug!(draft = %draft.id, "draft already applied, resuming items");
        } else {
            tracing::info!(
                draft = %draft.id,
                actor = %request.context.actor,
                items = draft.proposed_count(),
                "draft committed"
            );
        }

        let mut written_this_call = 0;
        let mut contended = false;
        for item in &draft.items {
            let Some(fields) = item.proposed_fields() else {
                continue;
            };
            match self.store.claim_item(draft.id, &item.target_id).await? {
                ItemClaim::Claimed { attempts } => {
                    if self
                        .write_item(&draft, request, &item.target_id, fields, attempts)
                        .await?
                    {
                        written_this_call += 1;
                    }
                }
                ItemClaim::InFlight => contended = true,
                ItemClaim::AlreadyWritten => {}
            }
        }

        let ledger = if contended {
            self.await_settled(&draft).await?
        } else {
            self.store.item_states(draft.id).await?
        };
        let result = Self::summarize(&draft, ledger, outcome, already_applied, written_this_call);
        tracing::info!(
            draft = %draft.id,
            applied = result.applied_count,
            skipped = result.skipped_count,
            pending = result.pending_count,
            failed = result.errors.len(),
            written_this_call,
            "apply finished"
        );
        Ok(result)
    }

    /// Pinned draft id, else the newest applied or unexpired applicable draft
    async fn locate(&self, request: &ApplyRequest) -> Result<Draft, EngineError> {
        if let Some(id) = request.draft_id {
            return self
                .store
                .get(id)
                .await?
                .filter(|d| d.project_id == request.project_id && d.playbook_id == request.playbook_id)
                .ok_or_else(|| EngineError::DraftNotFound(id.to_string()));
        }

        let drafts = self
            .store
            .list(&request.project_id, &request.playbook_id)
            .await?;
        let now = self.clock.now();
        if let Some(draft) = drafts
            .iter()
            .find(|d| d.is_applied() || (d.status.is_applicable() && !d.is_expired(now)))
        {
            return Ok(draft.clone());
        }
        match drafts.into_iter().next() {
            Some(newest) => match newest.expires_at {
                Some(expired_at) if newest.status.is_applicable() && newest.is_expired(now) => {
                    Err(EngineError::DraftExpired {
                        draft_id: newest.id,
                        expired_at,
                    })
                }
                _ => Err(EngineError::DraftNotReady {
                    draft_id: newest.id,
                    status: newest.status,
                }),
            },
            None => Err(EngineError::DraftNotFound(format!(
                "{}/{}",
                request.project_id, request.playbook_id
            ))),
        }
    }

    /// Status, expiry, rules and scope checks; rules mismatch is reported first
    async fn validate(&self, draft: &Draft, request: &ApplyRequest) -> Result<(), EngineError> {
        if !draft.is_applied() {
            if !draft.status.is_applicable() {
                return Err(EngineError::DraftNotReady {
                    draft_id: draft.id,
                    status: draft.status,
                });
            }
            let now = self.clock.now();
            if let Some(expired_at) = draft.expires_at.filter(|_| draft.is_expired(now)) {
                return Err(EngineError::DraftExpired {
                    draft_id: draft.id,
                    expired_at,
                });
            }
        }

        let rules = if request.rules_fingerprint == draft.rules_fingerprint {
            Ok(())
        } else {
            Err(EngineError::RulesChanged {
                draft_id: draft.id,
                stored: draft.rules_fingerprint,
                submitted: request.rules_fingerprint,
            })
        };
        let scope = self.check_scope(draft, request).await;

        if let Err(e) = &rules {
            tracing::info!(draft = %draft.id, code = e.code(), "apply rejected");
        } else if let Err(e) = &scope {
            tracing::info!(draft = %draft.id, code = e.code(), "apply rejected");
        }
        rules.and(scope)
    }

    async fn check_scope(&self, draft: &Draft, request: &ApplyRequest) -> Result<(), EngineError> {
        if request.scope_fingerprint != draft.scope_fingerprint {
            return Err(EngineError::ScopeInvalid {
                draft_id: draft.id,
                stored: draft.scope_fingerprint,
                current: request.scope_fingerprint,
            });
        }
        // Writing the draft may move records out of the query, so once
        // committed only the submitted token is compared.
        if draft.is_applied() {
            return Ok(());
        }
        let current = self.resolver.resolve(&draft.scope_query).await?.fingerprint;
        if current == draft.scope_fingerprint {
            return Ok(());
        }
        // A concurrent apply may have committed and written items since the
        // draft was read.
        if self
            .store
            .get(draft.id)
            .await?
            .is_some_and(|latest| latest.is_applied())
        {
            return Ok(());
        }
        Err(EngineError::ScopeInvalid {
            draft_id: draft.id,
            stored: draft.scope_fingerprint,
            current,
        })
    }

    /// Write one claimed item and settle its claim; `true` if written
    async fn write_item(
        &self,
        draft: &Draft,
        request: &ApplyRequest,
        target_id: &TargetId,
        fields: &FieldMap,
        attempts: u32,
    ) -> Result<bool, EngineError> {
        let before = match self.sink.read_fields(target_id).await {
            Ok(current) => current.map(|current| {
                current
                    .into_iter()
                    .filter(|(name, _)| fields.contains_key(name))
                    .collect::<FieldMap>()
            }),
            Err(e) => {
                tracing::debug!(target_id = %target_id, error = %e, "before snapshot unavailable");
                None
            }
        };

        let (written, settlement, outcome) = match self.sink.write_fields(target_id, fields).await {
            Ok(()) => {
                let at = self.clock.now();
                (
                    true,
                    ItemSettlement::Written { at },
                    AuditOutcome::Written {
                        before,
                        after: fields.clone(),
                    },
                )
            }
            Err(e) => {
                tracing::warn!(
                    draft = %draft.id,
                    target_id = %target_id,
                    attempts,
                    error = %e,
                    "item write failed"
                );
                let reason = e.to_string();
                (
                    false,
                    ItemSettlement::Failed {
                        reason: reason.clone(),
                    },
                    AuditOutcome::Failed { reason },
                )
            }
        };
        self.store
            .settle_item(draft.id, target_id, settlement)
            .await?;
        tracing::debug!(draft = %draft.id, target_id = %target_id, written, "item settled");

        let record = AuditRecord {
            draft_id: draft.id,
            project_id: draft.project_id.clone(),
            playbook_id: draft.playbook_id.clone(),
            target_id: target_id.clone(),
            outcome,
            context: request.context.clone(),
            recorded_at: self.clock.now(),
        };
        if let Err(e) = self.audit.record(record).await {
            tracing::warn!(draft = %draft.id, target_id = %target_id, error = %e, "audit record dropped");
        }
        Ok(written)
    }

    /// Poll the ledger until no item is in flight or the settle timeout ends
    async fn await_settled(
        &self,
        draft: &Draft,
    ) -> Result<BTreeMap<TargetId, ItemApplyState>, EngineError> {
        let mut waited = Duration::ZERO;
        let mut delay = SETTLE_POLL_START;
        loop {
            let ledger = self.store.item_states(draft.id).await?;
            let in_flight = ledger
                .values()
                .filter(|state| matches!(state, ItemApplyState::InFlight { .. }))
                .count();
            if in_flight == 0 {
                return Ok(ledger);
            }
            if waited >= self.settle_timeout {
                tracing::warn!(
                    draft = %draft.id,
                    in_flight,
                    waited_ms = u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
                    "items still in flight, reporting them as pending"
                );
                return Ok(ledger);
            }
            tracing::debug!(draft = %draft.id, in_flight, "waiting for concurrent writes");
            tokio::time::sleep(delay).await;
            waited += delay;
            delay = (delay * 2).min(SETTLE_POLL_MAX);
        }
    }

    /// Cumulative counts from the apply ledger
    fn summarize(
        draft: &Draft,
        ledger: BTreeMap<TargetId, ItemApplyState>,
        outcome: CommitOutcome,
        already_applied: bool,
        written_this_call: usize,
    ) -> ApplyResult {
        let mut applied_count = 0;
        let mut pending_count = 0;
        let mut errors = Vec::new();
        for (target_id, state) in ledger {
            match state {
                ItemApplyState::Written { .. } => applied_count += 1,
                ItemApplyState::Pending | ItemApplyState::InFlight { .. } => pending_count += 1,
                ItemApplyState::Failed { reason, attempts } => errors.push(ItemApplyError {
                    target_id,
                    reason,
                    attempts,
                }),
            }
        }
        ApplyResult {
            draft_id: draft.id,
            applied_at: outcome.applied_at(),
            already_applied,
            applied_count,
            skipped_count: draft.failed_count(),
            pending_count,
            written_this_call,
            errors,
        }
    }
}

//! Engine facade
//!
//! [`PlaybookEngine`] wires the generator and the apply coordinator to one
//! set of [`Ports`] and exposes the caller-facing operations.

use std::sync::Arc;

use draftgate_fingerprint::RuleConfiguration;
use tracing::Instrument;

use crate::audit::{AuditRecord, AuditSink, InMemoryAuditLog};
use crate::coordinator::ApplyCoordinator;
use crate::error::EngineError;
use crate::generator::{CancellationFlag, DraftGenerator};
use crate::ports::{Clock, ContentProposer, FieldSink, SystemClock, TargetCatalog};
use crate::scope::ScopeQuery;
use crate::settings::EngineSettings;
use crate::store::{DraftStore, InMemoryDraftStore};
use crate::types::{ApplyRequest, ApplyResult, Draft, DraftId, PlaybookId, PreviewResult, ProjectId};

/// External collaborators of the engine
#[derive(Debug, Clone)]
pub struct Ports {
    pub catalog: Arc<dyn TargetCatalog>,
    pub proposer: Arc<dyn ContentProposer>,
    pub sink: Arc<dyn FieldSink>,
    pub store: Arc<dyn DraftStore>,
    pub audit: Arc<dyn AuditSink>,
    pub clock: Arc<dyn Clock>,
}

impl Ports {
    /// Ports with an in-memory store, in-memory audit log, and wall clock
    #[must_use]
    pub fn new(
        catalog: Arc<dyn TargetCatalog>,
        proposer: Arc<dyn ContentProposer>,
        sink: Arc<dyn FieldSink>,
    ) -> Self {
        Self {
            catalog,
            proposer,
            sink,
            store: Arc::new(InMemoryDraftStore::new()),
            audit: Arc::new(InMemoryAuditLog::new()),
            clock: Arc::new(SystemClock),
        }
    }

    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn DraftStore>) -> Self {
        self.store = store;
        self
    }

    #[must_use]
    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

/// Draft-and-apply engine
///
/// Cheap to clone; clones share the same ports.
#[derive(Debug, Clone)]
pub struct PlaybookEngine {
    generator: DraftGenerator,
    coordinator: ApplyCoordinator,
    store: Arc<dyn DraftStore>,
    audit: Arc<dyn AuditSink>,
    settings: EngineSettings,
}

impl PlaybookEngine {
    /// Create engine
    ///
    /// # Errors
    /// Returns [`EngineError::InvalidSettings`] if `settings` fail validation
    pub fn new(ports: Ports, settings: EngineSettings) -> Result<Self, EngineError> {
        settings.validate()?;
        let generator = DraftGenerator::new(
            Arc::clone(&ports.catalog),
            Arc::clone(&ports.proposer),
            Arc::clone(&ports.store),
            Arc::clone(&ports.clock),
            settings.clone(),
        );
        let coordinator = ApplyCoordinator::new(
            Arc::clone(&ports.catalog),
            Arc::clone(&ports.sink),
            Arc::clone(&ports.store),
            Arc::clone(&ports.audit),
            Arc::clone(&ports.clock),
            settings.apply_settle_timeout(),
        );
        tracing::debug!(?settings, "engine created");
        Ok(Self {
            generator,
            coordinator,
            store: ports.store,
            audit: ports.audit,
            settings,
        })
    }

    #[inline]
    #[must_use]
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Sampled dry run; `None` uses the configured default sample size
    ///
    /// # Errors
    /// Fails only if the scope cannot be resolved
    #[tracing::instrument(skip_all, fields(project = %query.project_id))]
    pub async fn preview(
        &self,
        rules: &RuleConfiguration,
        query: &ScopeQuery,
        sample_size: Option<usize>,
    ) -> Result<PreviewResult, EngineError> {
        let n = sample_size.unwrap_or(self.settings.default_sample_size);
        self.generator.preview(rules, query, n).await
    }

    /// Generate and persist a draft for the full scope
    ///
    /// # Errors
    /// See [`DraftGenerator::generate`]
    pub async fn generate_draft(
        &self,
        project_id: impl Into<ProjectId>,
        playbook_id: impl Into<PlaybookId>,
        rules: RuleConfiguration,
        query: ScopeQuery,
    ) -> Result<Draft, EngineError> {
        self.generate_draft_with_cancel(project_id, playbook_id, rules, query, &CancellationFlag::new())
            .await
    }

    /// [`Self::generate_draft`] with a cancellation flag
    ///
    /// # Errors
    /// See [`DraftGenerator::generate`]
    pub async fn generate_draft_with_cancel(
        &self,
        project_id: impl Into<ProjectId>,
        playbook_id: impl Into<PlaybookId>,
        rules: RuleConfiguration,
        query: ScopeQuery,
        cancel: &CancellationFlag,
    ) -> Result<Draft, EngineError> {
        let project_id = project_id.into();
        let playbook_id = playbook_id.into();
        let span = tracing::info_span!("generate_draft", project = %project_id, playbook = %playbook_id);
        self.generator
            .generate(project_id, playbook_id, rules, query, cancel)
            .instrument(span)
            .await
    }

    /// Resume a cancelled draft
    ///
    /// # Errors
    /// See [`DraftGenerator::resume`]
    #[tracing::instrument(skip(self, cancel), fields(draft = %draft_id))]
    pub async fn resume_draft(
        &self,
        draft_id: DraftId,
        cancel: &CancellationFlag,
    ) -> Result<Draft, EngineError> {
        self.generator.resume(draft_id, cancel).await
    }

    /// Validate, commit, and write a draft
    ///
    /// # Errors
    /// Batch-level validation failures; see [`ApplyCoordinator::apply`]
    #[tracing::instrument(
        skip_all,
        fields(project = %request.project_id, playbook = %request.playbook_id, actor = %request.context.actor)
    )]
    pub async fn apply(&self, request: ApplyRequest) -> Result<ApplyResult, EngineError> {
        self.coordinator.apply(&request).await
    }

    /// # Errors
    /// `DraftNotFound` if no such draft exists
    pub async fn get_draft(&self, draft_id: DraftId) -> Result<Draft, EngineError> {
        self.store
            .get(draft_id)
            .await?
            .ok_or_else(|| EngineError::DraftNotFound(draft_id.to_string()))
    }

    /// Drafts for a playbook, newest first
    ///
    /// # Errors
    /// Store failures
    pub async fn list_drafts(
        &self,
        project_id: &ProjectId,
        playbook_id: &PlaybookId,
    ) -> Result<Vec<Draft>, EngineError> {
        Ok(self.store.list(project_id, playbook_id).await?)
    }

    /// Audit trail of a draft in append order
    ///
    /// # Errors
    /// Audit sink failures
    pub async fn audit_records(&self, draft_id: DraftId) -> Result<Vec<AuditRecord>, EngineError> {
        Ok(self.audit.records(draft_id).await?)
    }
}

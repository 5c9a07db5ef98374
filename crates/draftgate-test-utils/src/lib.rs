//! Testing utilities for the draftgate workspace
//!
//! Scripted ports, a manual clock, and a ready-wired engine fixture.

#![allow(missing_docs)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use draftgate_core::{
    ApplyRequest, AuditError, AuditRecord, AuditSink, CancellationFlag, Clock, ContentProposer,
    Draft, DraftId, EngineSettings, FieldMap, FieldSink, InMemoryAuditLog, InMemoryCatalog,
    InMemoryDraftStore, PlaybookEngine, Ports, Proposal, ProposalError, ScopeFilter, ScopeQuery,
    TargetRecord, WriteError,
};
use draftgate_fingerprint::{RuleConfiguration, TargetId};
use parking_lot::Mutex;

pub const PROJECT: &str = "shop";
pub const PLAYBOOK: &str = "seo-titles";
pub const FIELD: &str = "seo_title";

/// Proposer that derives `seo_title` from the record title and the rule prefix
#[derive(Debug, Default)]
pub struct ScriptedProposer {
    calls: AtomicUsize,
    per_target: Mutex<BTreeMap<TargetId, usize>>,
    failing: Mutex<BTreeSet<TargetId>>,
    cancel_after: Option<(usize, CancellationFlag)>,
    delay: Option<Duration>,
}

impl ScriptedProposer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel `flag` once `n` proposals have been requested
    #[must_use]
    pub fn with_cancel_after(mut self, n: usize, flag: CancellationFlag) -> Self {
        self.cancel_after = Some((n, flag));
        self
    }

    /// Sleep for `delay` before producing each proposal
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Reject proposals for `id` from now on
    pub fn fail_on(&self, id: impl Into<TargetId>) {
        self.failing.lock().insert(id.into());
    }

    /// Total proposer invocations
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn calls_for(&self, id: &str) -> usize {
        self.per_target
            .lock()
            .get(&TargetId::from(id))
            .copied()
            .unwrap_or(0)
    }

    /// Value the proposer produces for a record
    #[must_use]
    pub fn expected_title(record: &TargetRecord, rules: &RuleConfiguration) -> String {
        let prefix = rules
            .get("requiredPrefix")
            .or_else(|| rules.get("prefix"))
            .and_then(|v| v.as_str())
            .unwrap_or("");
        let title = record.field("title").unwrap_or(record.id.as_str());
        format!("{prefix}{title}")
    }
}

#[async_trait]
impl ContentProposer for ScriptedProposer {
    async fn propose(
        &self,
        record: &TargetRecord,
        rules: &RuleConfiguration,
    ) -> Result<Proposal, ProposalError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        *self.per_target.lock().entry(record.id.clone()).or_insert(0) += 1;
        if let Some((after, flag)) = &self.cancel_after {
            if n >= *after {
                flag.cancel();
            }
        }
        if self.failing.lock().contains(&record.id) {
            return Err(ProposalError::Rejected(format!("scripted failure for {}", record.id)));
        }
        let mut fields = FieldMap::new();
        fields.insert(FIELD.to_string(), Self::expected_title(record, rules));
        Ok(Proposal::new(fields, 0.9))
    }
}

/// Field sink over a catalog with switchable per-target write failures
#[derive(Debug)]
pub struct FlakySink {
    catalog: Arc<InMemoryCatalog>,
    failing: Mutex<BTreeSet<TargetId>>,
    writes: Mutex<BTreeMap<TargetId, usize>>,
    attempts: AtomicUsize,
    delay: Option<Duration>,
}

impl FlakySink {
    #[must_use]
    pub fn new(catalog: Arc<InMemoryCatalog>) -> Self {
        Self {
            catalog,
            failing: Mutex::new(BTreeSet::new()),
            writes: Mutex::new(BTreeMap::new()),
            attempts: AtomicUsize::new(0),
            delay: None,
        }
    }

    /// Sleep for `delay` inside every write
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn fail_on(&self, id: impl Into<TargetId>) {
        self.failing.lock().insert(id.into());
    }

    pub fn heal(&self, id: impl Into<TargetId>) {
        self.failing.lock().remove(&id.into());
    }

    /// Successful writes for one target
    #[must_use]
    pub fn writes_for(&self, id: &str) -> usize {
        self.writes
            .lock()
            .get(&TargetId::from(id))
            .copied()
            .unwrap_or(0)
    }

    /// Successful writes across all targets
    #[must_use]
    pub fn total_writes(&self) -> usize {
        self.writes.lock().values().sum()
    }

    /// Every write call, failed or not
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FieldSink for FlakySink {
    async fn read_fields(&self, id: &TargetId) -> Result<Option<FieldMap>, WriteError> {
        self.catalog.read_fields(id).await
    }

    async fn write_fields(&self, id: &TargetId, fields: &FieldMap) -> Result<(), WriteError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.lock().contains(id) {
            return Err(WriteError::Unavailable(format!("scripted failure for {id}")));
        }
        self.catalog.write_fields(id, fields).await?;
        *self.writes.lock().entry(id.clone()).or_insert(0) += 1;
        Ok(())
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: TimeDelta) {
        *self.now.lock() += by;
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock() = at;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc.timestamp_opt(1_767_225_600, 0).single().unwrap_or_default())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Audit sink that rejects everything
#[derive(Debug, Default)]
pub struct FailingAuditSink {
    attempts: AtomicUsize,
}

impl FailingAuditSink {
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuditSink for FailingAuditSink {
    async fn record(&self, _record: AuditRecord) -> Result<(), AuditError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(AuditError::Unavailable("audit sink offline".into()))
    }

    async fn records(&self, _draft_id: DraftId) -> Result<Vec<AuditRecord>, AuditError> {
        Err(AuditError::Unavailable("audit sink offline".into()))
    }
}

/// Product id for index `i` (1-based), zero-padded so ids sort numerically
#[must_use]
pub fn product_id(i: usize) -> String {
    format!("p{i:02}")
}

/// Product without an SEO title
#[must_use]
pub fn product(i: usize) -> TargetRecord {
    TargetRecord::new(product_id(i), PROJECT).with_field("title", format!("Product {i}"))
}

/// Rules used by most tests
#[must_use]
pub fn rules(prefix: &str) -> RuleConfiguration {
    RuleConfiguration::new()
        .with("prefix", prefix)
        .with("maxLength", 60_i64)
}

/// Products still missing an SEO title
#[must_use]
pub fn missing_titles() -> ScopeQuery {
    ScopeQuery::new(PROJECT, ScopeFilter::missing(FIELD))
}

/// Fully wired engine over in-memory ports
#[derive(Debug)]
pub struct Fixture {
    pub catalog: Arc<InMemoryCatalog>,
    pub proposer: Arc<ScriptedProposer>,
    pub sink: Arc<FlakySink>,
    pub store: Arc<InMemoryDraftStore>,
    pub audit: Arc<InMemoryAuditLog>,
    pub clock: Arc<ManualClock>,
    pub engine: PlaybookEngine,
}

impl Fixture {
    /// `n` products, default settings
    #[must_use]
    pub fn new(n: usize) -> Self {
        Self::builder().products(n).build()
    }

    #[must_use]
    pub fn builder() -> FixtureBuilder {
        FixtureBuilder::default()
    }

    /// Add product `i` to the catalog
    pub fn add_product(&self, i: usize) {
        self.catalog.upsert(product(i));
    }

    /// Current value of the SEO field
    #[must_use]
    pub fn seo_title(&self, i: usize) -> Option<String> {
        self.catalog
            .get(&TargetId::from(product_id(i)))
            .and_then(|r| r.field(FIELD).map(str::to_owned))
    }

    /// Generate a draft for [`missing_titles`] with `rules`
    ///
    /// # Panics
    /// If generation fails
    pub async fn draft(&self, rules: RuleConfiguration) -> Draft {
        self.engine
            .generate_draft(PROJECT, PLAYBOOK, rules, missing_titles())
            .await
            .unwrap()
    }

    /// Request that re-submits the draft's own tokens
    #[must_use]
    pub fn request(draft: &Draft) -> ApplyRequest {
        ApplyRequest::for_draft(draft)
    }
}

#[derive(Debug)]
pub struct FixtureBuilder {
    products: usize,
    settings: EngineSettings,
    proposer: ScriptedProposer,
    audit: Option<Arc<dyn AuditSink>>,
    write_delay: Option<Duration>,
}

impl Default for FixtureBuilder {
    fn default() -> Self {
        Self {
            products: 5,
            settings: EngineSettings::default().with_generation_concurrency(1),
            proposer: ScriptedProposer::new(),
            audit: None,
            write_delay: None,
        }
    }
}

impl FixtureBuilder {
    #[must_use]
    pub fn products(mut self, n: usize) -> Self {
        self.products = n;
        self
    }

    #[must_use]
    pub fn settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn proposer(mut self, proposer: ScriptedProposer) -> Self {
        self.proposer = proposer;
        self
    }

    /// Replace the in-memory audit log used by the engine
    #[must_use]
    pub fn audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Slow every sink write down by `delay`
    #[must_use]
    pub fn write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = Some(delay);
        self
    }

    /// # Panics
    /// If the settings are invalid
    #[must_use]
    pub fn build(self) -> Fixture {
        let catalog = Arc::new(InMemoryCatalog::from_records(
            (1..=self.products).map(product),
        ));
        let proposer = Arc::new(self.proposer);
        let mut sink = FlakySink::new(Arc::clone(&catalog));
        if let Some(delay) = self.write_delay {
            sink = sink.with_delay(delay);
        }
        let sink = Arc::new(sink);
        let store = Arc::new(InMemoryDraftStore::new());
        let audit = Arc::new(InMemoryAuditLog::new());
        let clock = Arc::new(ManualClock::default());

        let audit_port: Arc<dyn AuditSink> = match self.audit {
            Some(custom) => custom,
            None => audit.clone() as Arc<dyn AuditSink>,
        };
        let ports = Ports::new(catalog.clone(), proposer.clone(), sink.clone())
            .with_store(store.clone())
            .with_audit(audit_port)
            .with_clock(clock.clone());
        let engine = PlaybookEngine::new(ports, self.settings).unwrap();

        Fixture {
            catalog,
            proposer,
            sink,
            store,
            audit,
            clock,
            engine,
        }
    }
}

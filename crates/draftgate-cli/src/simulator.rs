//! Draft-and-apply simulator
//!
//! Runs one full cycle against an in-memory catalog:
//! 1. Preview a sample and capture both tokens
//! 2. Generate the draft
//! 3. Apply with the previewed tokens, failing the configured writes
//! 4. Re-apply after the failures clear, resuming only what is left
//!
//! The audit chain is verified at the end.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use draftgate_core::{
    ApplyContext, ApplyRequest, ApplyResult, ContentProposer, DraftId, DraftItem, DraftStatus,
    EngineSettings, FieldMap, FieldSink, InMemoryAuditLog, InMemoryCatalog, PlaybookEngine, Ports,
    Proposal, ProposalError, ScopeFilter, ScopeQuery, TargetRecord, WriteError,
};
use draftgate_fingerprint::{RuleConfiguration, RulesFingerprint, ScopeFingerprint, TargetId};
use parking_lot::Mutex;
use serde::Serialize;

use crate::input::{load_catalog, load_rules};

/// Simulator configuration
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    pub catalog_path: PathBuf,
    pub rules_path: PathBuf,
    pub project: String,
    pub playbook: String,
    /// Field the playbook fills; the scope is records missing it
    pub field: String,
    /// Preview sample size; `None` uses the settings default
    pub sample: Option<usize>,
    /// Targets whose first write attempt fails
    pub fail_writes: Vec<String>,
    pub actor: String,
    pub settings: EngineSettings,
}

impl SimulatorConfig {
    #[must_use]
    pub fn new(catalog_path: impl Into<PathBuf>, rules_path: impl Into<PathBuf>) -> Self {
        Self {
            catalog_path: catalog_path.into(),
            rules_path: rules_path.into(),
            project: "default".to_string(),
            playbook: "simulate".to_string(),
            field: "seo_title".to_string(),
            sample: None,
            fail_writes: Vec::new(),
            actor: "draftgate-cli".to_string(),
            settings: EngineSettings::default(),
        }
    }
}

/// Fills one field from the record title and the rule prefix
#[derive(Debug, Clone)]
pub struct TemplateProposer {
    field: String,
}

impl TemplateProposer {
    #[must_use]
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }
}

#[async_trait]
impl ContentProposer for TemplateProposer {
    async fn propose(
        &self,
        record: &TargetRecord,
        rules: &RuleConfiguration,
    ) -> Result<Proposal, ProposalError> {
        let title = record
            .field("title")
            .ok_or_else(|| ProposalError::Rejected(format!("{} has no title", record.id)))?;
        let prefix = rules
            .get("requiredPrefix")
            .or_else(|| rules.get("prefix"))
            .and_then(|v| v.as_str())
            .unwrap_or("");
        let suffix = rules.get("suffix").and_then(|v| v.as_str()).unwrap_or("");

        let mut fields = FieldMap::new();
        fields.insert(self.field.clone(), format!("{prefix}{title}{suffix}"));
        Ok(Proposal::new(fields, 1.0))
    }
}

/// Catalog sink whose listed targets fail until healed
#[derive(Debug)]
struct ScriptedSink {
    catalog: Arc<InMemoryCatalog>,
    failing: Mutex<BTreeSet<TargetId>>,
}

impl ScriptedSink {
    fn new(catalog: Arc<InMemoryCatalog>, failing: impl IntoIterator<Item = TargetId>) -> Self {
        Self {
            catalog,
            failing: Mutex::new(failing.into_iter().collect()),
        }
    }

    fn heal_all(&self) {
        self.failing.lock().clear();
    }
}

#[async_trait]
impl FieldSink for ScriptedSink {
    async fn read_fields(&self, id: &TargetId) -> Result<Option<FieldMap>, WriteError> {
        self.catalog.read_fields(id).await
    }

    async fn write_fields(&self, id: &TargetId, fields: &FieldMap) -> Result<(), WriteError> {
        if self.failing.lock().contains(id) {
            return Err(WriteError::Unavailable(format!("simulated outage for {id}")));
        }
        self.catalog.write_fields(id, fields).await
    }
}

/// Final report from the simulator
#[derive(Debug, Clone, Serialize)]
pub struct SimulatorReport {
    pub rules_fingerprint: RulesFingerprint,
    pub scope_fingerprint: ScopeFingerprint,
    pub scope_size: usize,
    pub sample: Vec<DraftItem>,
    pub draft_id: DraftId,
    pub draft_status: DraftStatus,
    pub failed_proposals: usize,
    pub warnings: usize,
    pub first_apply: ApplyResult,
    pub second_apply: ApplyResult,
    pub audit_entries: usize,
    pub audit_head: Option<String>,
    pub chain_intact: bool,
}

impl SimulatorReport {
    /// Every writable item landed and the audit chain verifies
    #[must_use]
    pub fn passed(&self) -> bool {
        self.second_apply.is_complete() && self.chain_intact
    }

    /// Generate text report
    #[must_use]
    pub fn generate_text(&self) -> String {
        let mut report = String::new();

        report.push_str("=== Draftgate Simulation Report ===\n\n");
        report.push_str(&format!("Rules Fingerprint: {}\n", self.rules_fingerprint));
        report.push_str(&format!("Scope Fingerprint: {}\n", self.scope_fingerprint));
        report.push_str(&format!("Scope Size: {}\n", self.scope_size));

        report.push_str("\n=== Preview Sample ===\n");
        for item in &self.sample {
            match item.proposed_fields() {
                Some(fields) => {
                    let values: Vec<String> =
                        fields.iter().map(|(k, v)| format!("{k}={v:?}")).collect();
                    report.push_str(&format!("  {}: {}\n", item.target_id, values.join(", ")));
                }
                None => report.push_str(&format!("  {}: proposal failed\n", item.target_id)),
            }
            for warning in &item.warnings {
                report.push_str(&format!("    warning: {warning}\n"));
            }
        }

        report.push_str(&format!("\nDraft: {} ({})\n", self.draft_id, self.draft_status));
        report.push_str(&format!("Failed Proposals: {}\n", self.failed_proposals));
        report.push_str(&format!("Warnings: {}\n", self.warnings));

        for (label, result) in [("First Apply", &self.first_apply), ("Re-apply", &self.second_apply)] {
            report.push_str(&format!("\n=== {label} ===\n"));
            report.push_str(&format!("Already Applied: {}\n", result.already_applied));
            report.push_str(&format!("Written This Call: {}\n", result.written_this_call));
            report.push_str(&format!("Applied: {}\n", result.applied_count));
            report.push_str(&format!("Skipped: {}\n", result.skipped_count));
            report.push_str(&format!("Errors: {}\n", result.errors.len()));
            for error in &result.errors {
                report.push_str(&format!(
                    "  {} (attempt {}): {}\n",
                    error.target_id, error.attempts, error.reason
                ));
            }
        }

        report.push_str(&format!("\nAudit Entries: {}\n", self.audit_entries));
        if let Some(head) = &self.audit_head {
            report.push_str(&format!("Audit Head: {head}\n"));
        }
        report.push_str(&format!(
            "Audit Chain: {}\n",
            if self.chain_intact { "INTACT" } else { "BROKEN" }
        ));

        report.push_str(&format!(
            "\n=== Result: {} ===\n",
            if self.passed() { "PASS" } else { "FAIL" }
        ));
        report
    }
}

/// Run the simulator
///
/// # Errors
/// Input files that fail to load, or a batch-level engine failure
pub async fn run_simulator(config: SimulatorConfig) -> Result<SimulatorReport> {
    let rules = load_rules(&config.rules_path)?;
    let records = load_catalog(&config.catalog_path)?;
    tracing::info!(records = records.len(), rules = %rules.fingerprint().short(), "inputs loaded");

    let catalog = Arc::new(InMemoryCatalog::from_records(records));
    let sink = Arc::new(ScriptedSink::new(
        Arc::clone(&catalog),
        config.fail_writes.iter().map(|id| TargetId::new(id.as_str())),
    ));
    let audit = Arc::new(InMemoryAuditLog::new());
    let ports = Ports::new(
        catalog,
        Arc::new(TemplateProposer::new(config.field.as_str())),
        sink.clone(),
    )
    .with_audit(audit.clone());
    let engine = PlaybookEngine::new(ports, config.settings.clone())?;

    let query = ScopeQuery::new(
        config.project.as_str(),
        ScopeFilter::missing(config.field.as_str()),
    );
    let preview = engine.preview(&rules, &query, config.sample).await?;
    let draft = engine
        .generate_draft(
            config.project.as_str(),
            config.playbook.as_str(),
            rules,
            query,
        )
        .await?;

    let request = ApplyRequest::new(
        config.project.as_str(),
        config.playbook.as_str(),
        preview.scope_fingerprint,
        preview.rules_fingerprint,
    )
    .with_context(ApplyContext::new(config.actor.as_str()).with_reason("simulate"));
    let first_apply = engine.apply(request.clone()).await?;
    sink.heal_all();
    let second_apply = engine.apply(request).await?;

    let entries = audit.entries();
    Ok(SimulatorReport {
        rules_fingerprint: preview.rules_fingerprint,
        scope_fingerprint: preview.scope_fingerprint,
        scope_size: preview.scope_size,
        sample: preview.sample_items,
        draft_id: draft.id,
        draft_status: draft.status,
        failed_proposals: draft.failed_count(),
        warnings: draft.items.iter().map(|i| i.warnings.len()).sum(),
        first_apply,
        second_apply,
        audit_entries: entries.len(),
        audit_head: entries.last().map(|e| e.hash_hex()),
        chain_intact: audit.verify_integrity().is_ok(),
    })
}

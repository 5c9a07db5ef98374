//! Draftgate Core
//!
//! Draft-and-apply protocol for bulk, generated edits: preview a sample,
//! generate a persisted draft, and commit it only if the rules and the scope
//! still match what was previewed.
//!
//! # Core Concepts
//!
//! - [`PlaybookEngine`]: caller-facing facade over [`Ports`]
//! - [`Draft`]: proposed edits pinned to a [`RulesFingerprint`] and a
//!   [`ScopeFingerprint`]
//! - [`DraftStore`]: persistence with the exactly-once commit and per-item
//!   write claims
//! - [`AuditSink`]: append-only record of every write attempt
//!
//! # Example
//!
//! ```rust,ignore
//! use draftgate_core::prelude::*;
//!
//! let engine = PlaybookEngine::new(Ports::new(catalog.clone(), proposer, catalog), EngineSettings::default())?;
//! let query = ScopeQuery::new("shop", ScopeFilter::missing("seo_title"));
//! let preview = engine.preview(&rules, &query, None).await?;
//! let draft = engine.generate_draft("shop", "seo", rules, query).await?;
//! let result = engine.apply(ApplyRequest::new(
//!     "shop",
//!     "seo",
//!     preview.scope_fingerprint,
//!     preview.rules_fingerprint,
//! )).await?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod audit;
pub mod constraints;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod generator;
pub mod lifecycle;
pub mod memory;
pub mod ports;
pub mod scope;
pub mod settings;
pub mod store;
pub mod types;

pub use audit::{AuditEntry, AuditOutcome, AuditRecord, AuditSink, InMemoryAuditLog};
pub use constraints::SoftConstraints;
pub use coordinator::ApplyCoordinator;
pub use engine::{PlaybookEngine, Ports};
pub use error::{
    AuditError, CatalogError, EngineError, ProposalError, SettingsError, StoreError, WriteError,
};
pub use generator::{CancellationFlag, DraftGenerator};
pub use memory::InMemoryCatalog;
pub use ports::{Clock, ContentProposer, FieldSink, SystemClock, TargetCatalog};
pub use scope::{ResolvedScope, ScopeFilter, ScopeQuery, ScopeResolver};
pub use settings::{EngineSettings, MAX_DRAFT_TTL_SECS};
pub use store::{CommitOutcome, DraftStore, InMemoryDraftStore, ItemClaim, ItemSettlement};
pub use types::{
    ApplyContext, ApplyRequest, ApplyResult, Draft, DraftId, DraftItem, DraftStatus, FieldMap,
    ItemApplyError, ItemApplyState, PlaybookId, PreviewResult, ProjectId, Proposal,
    ProposalOutcome, TargetRecord, Warning,
};

pub use draftgate_fingerprint::{
    RuleConfiguration, RuleValue, RulesFingerprint, ScopeFingerprint, TargetId,
};

/// Common imports for engine callers
pub mod prelude {
    pub use crate::{
        ApplyContext, ApplyRequest, ApplyResult, CancellationFlag, Draft, DraftStatus,
        EngineError, EngineSettings, PlaybookEngine, Ports, PreviewResult, RuleConfiguration,
        ScopeFilter, ScopeQuery, TargetId, TargetRecord,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

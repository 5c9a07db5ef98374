//! Ports to external collaborators
//!
//! The engine never talks to a datastore, a generator, or the system of
//! record directly; it goes through these traits.

use std::collections::BTreeSet;
use std::fmt::Debug;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use draftgate_fingerprint::{RuleConfiguration, TargetId};

use crate::error::{CatalogError, ProposalError, WriteError};
use crate::scope::ScopeQuery;
use crate::types::{FieldMap, Proposal, TargetRecord};

/// Datastore query interface
#[async_trait]
pub trait TargetCatalog: Send + Sync + Debug {
    /// Enumerate ids currently matching the query
    ///
    /// # Contract
    /// - Reflects persisted state at the instant of the call
    /// - No caching across calls
    async fn resolve(&self, query: &ScopeQuery) -> Result<BTreeSet<TargetId>, CatalogError>;

    /// Load a record for the proposer; `None` if it no longer exists
    async fn load(&self, id: &TargetId) -> Result<Option<TargetRecord>, CatalogError>;
}

/// External content generation
///
/// Invoked once per record per generation run and never during apply.
#[async_trait]
pub trait ContentProposer: Send + Sync + Debug {
    async fn propose(
        &self,
        record: &TargetRecord,
        rules: &RuleConfiguration,
    ) -> Result<Proposal, ProposalError>;
}

/// Sink that commits accepted field values to the system of record
#[async_trait]
pub trait FieldSink: Send + Sync + Debug {
    /// Current field values, for the audit "before" snapshot
    async fn read_fields(&self, id: &TargetId) -> Result<Option<FieldMap>, WriteError>;

    /// Merge `fields` into the target record
    async fn write_fields(&self, id: &TargetId, fields: &FieldMap) -> Result<(), WriteError>;
}

/// Time source; injected so expiry can be tested
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

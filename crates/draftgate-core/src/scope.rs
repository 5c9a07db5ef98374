//! Scope queries and resolution
//!
//! A [`ScopeQuery`] is evaluated freshly on every call; nothing is cached
//! between resolutions, so two calls at different instants may return
//! different sets. That difference is exactly what the
//! [`ScopeFingerprint`] detects.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use draftgate_fingerprint::{ScopeFingerprint, TargetId};
use serde::{Deserialize, Serialize};

use crate::error::CatalogError;
use crate::ports::{Clock, TargetCatalog};
use crate::types::{ProjectId, TargetRecord};

/// Which target records a playbook affects within a project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeQuery {
    pub project_id: ProjectId,
    pub filter: ScopeFilter,
}

impl ScopeQuery {
    #[inline]
    #[must_use]
    pub fn new(project_id: impl Into<ProjectId>, filter: ScopeFilter) -> Self {
        Self {
            project_id: project_id.into(),
            filter,
        }
    }

    /// Records in this query's project that match the filter
    #[inline]
    #[must_use]
    pub fn matches(&self, record: &TargetRecord) -> bool {
        record.project_id == self.project_id && self.filter.matches(record)
    }
}

/// Reference filter evaluated by the in-memory catalog
///
/// Production catalogs translate the query into their own language; this
/// enum only has to be deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ScopeFilter {
    /// Every record in the project
    All,
    /// Field absent or blank
    MissingField { field: String },
    /// Field present with exactly this value
    FieldEquals { field: String, value: String },
    /// Explicit id list
    Ids { ids: BTreeSet<TargetId> },
    And { filters: Vec<ScopeFilter> },
    Or { filters: Vec<ScopeFilter> },
    Not { filter: Box<ScopeFilter> },
}

impl ScopeFilter {
    /// Shorthand for [`ScopeFilter::MissingField`]
    #[inline]
    #[must_use]
    pub fn missing(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    /// Shorthand for [`ScopeFilter::FieldEquals`]
    #[inline]
    #[must_use]
    pub fn equals(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::FieldEquals {
            field: field.into(),
            value: value.into(),
        }
    }

    #[must_use]
    pub fn matches(&self, record: &TargetRecord) -> bool {
        match self {
            Self::All => true,
            Self::MissingField { field } => record.field(field).map_or(true, |v| v.trim().is_empty()),
            Self::FieldEquals { field, value } => record.field(field) == Some(value.as_str()),
            Self::Ids { ids } => ids.contains(&record.id),
            Self::And { filters } => filters.iter().all(|f| f.matches(record)),
            Self::Or { filters } => filters.iter().any(|f| f.matches(record)),
            Self::Not { filter } => !filter.matches(record),
        }
    }
}

/// Concrete membership of a query at one instant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedScope {
    pub ids: BTreeSet<TargetId>,
    pub fingerprint: ScopeFingerprint,
    pub as_of: DateTime<Utc>,
}

impl ResolvedScope {
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// First `n` ids in canonical order
    #[must_use]
    pub fn sample(&self, n: usize) -> Vec<TargetId> {
        self.ids.iter().take(n).cloned().collect()
    }
}

/// Resolves queries against the catalog and fingerprints the result
#[derive(Debug, Clone)]
pub struct ScopeResolver {
    catalog: Arc<dyn TargetCatalog>,
    clock: Arc<dyn Clock>,
}

impl ScopeResolver {
    #[inline]
    #[must_use]
    pub fn new(catalog: Arc<dyn TargetCatalog>, clock: Arc<dyn Clock>) -> Self {
        Self { catalog, clock }
    }

    /// Resolve the full scope now
    ///
    /// # Errors
    /// Propagates catalog failures
    pub async fn resolve(&self, query: &ScopeQuery) -> Result<ResolvedScope, CatalogError> {
        let as_of = self.clock.now();
        let ids = self.catalog.resolve(query).await?;
        let fingerprint = ScopeFingerprint::of(&ids);
        tracing::debug!(
            project = %query.project_id,
            size = ids.len(),
            fingerprint = %fingerprint.short(),
            "resolved scope"
        );
        Ok(ResolvedScope {
            ids,
            fingerprint,
            as_of,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> TargetRecord {
        TargetRecord::new(id, "proj").with_field("title", "Blue Shirt")
    }

    #[test]
    fn missing_field_matches_absent_and_blank() {
        let filter = ScopeFilter::missing("seo_title");
        assert!(filter.matches(&record("a")));
        assert!(filter.matches(&record("a").with_field("seo_title", "  ")));
        assert!(!filter.matches(&record("a").with_field("seo_title", "Shirt")));
    }

    #[test]
    fn combinators() {
        let filter = ScopeFilter::And {
            filters: vec![
                ScopeFilter::equals("title", "Blue Shirt"),
                ScopeFilter::Not {
                    filter: Box::new(ScopeFilter::Ids {
                        ids: [TargetId::from("b")].into_iter().collect(),
                    }),
                },
            ],
        };
        assert!(filter.matches(&record("a")));
        assert!(!filter.matches(&record("b")));

        let either = ScopeFilter::Or {
            filters: vec![ScopeFilter::equals("title", "nope"), ScopeFilter::All],
        };
        assert!(either.matches(&record("z")));
    }

    #[test]
    fn query_is_project_bound() {
        let query = ScopeQuery::new("proj", ScopeFilter::All);
        assert!(query.matches(&record("a")));
        assert!(!query.matches(&TargetRecord::new("a", "other")));
    }

    #[test]
    fn filter_serde_is_tagged() {
        let filter = ScopeFilter::missing("seo_title");
        let json = serde_json::to_value(&filter).unwrap();
        assert_eq!(json, serde_json::json!({"op": "missing_field", "field": "seo_title"}));
    }
}

//! In-memory catalog
//!
//! Serves as both [`TargetCatalog`] and [`FieldSink`] over one shared record
//! map. Used by the CLI simulator and by tests.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use draftgate_fingerprint::TargetId;
use parking_lot::RwLock;

use crate::error::{CatalogError, WriteError};
use crate::ports::{FieldSink, TargetCatalog};
use crate::scope::ScopeQuery;
use crate::types::{FieldMap, TargetRecord};

/// Record map guarded by a read-write lock
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    records: RwLock<BTreeMap<TargetId, TargetRecord>>,
}

impl InMemoryCatalog {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a list of records; later duplicates replace earlier ones
    #[must_use]
    pub fn from_records(records: impl IntoIterator<Item = TargetRecord>) -> Self {
        let catalog = Self::new();
        for record in records {
            catalog.upsert(record);
        }
        catalog
    }

    /// Insert or replace a record
    pub fn upsert(&self, record: TargetRecord) {
        self.records.write().insert(record.id.clone(), record);
    }

    /// Remove a record, returning it
    pub fn remove(&self, id: &TargetId) -> Option<TargetRecord> {
        self.records.write().remove(id)
    }

    /// Snapshot of a record
    #[must_use]
    pub fn get(&self, id: &TargetId) -> Option<TargetRecord> {
        self.records.read().get(id).cloned()
    }

    /// Snapshot of every record
    #[must_use]
    pub fn records(&self) -> Vec<TargetRecord> {
        self.records.read().values().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl TargetCatalog for InMemoryCatalog {
    async fn resolve(&self, query: &ScopeQuery) -> Result<BTreeSet<TargetId>, CatalogError> {
        let records = self.records.read();
        Ok(records
            .values()
            .filter(|record| query.matches(record))
            .map(|record| record.id.clone())
            .collect())
    }

    async fn load(&self, id: &TargetId) -> Result<Option<TargetRecord>, CatalogError> {
        Ok(self.get(id))
    }
}

#[async_trait]
impl FieldSink for InMemoryCatalog {
    async fn read_fields(&self, id: &TargetId) -> Result<Option<FieldMap>, WriteError> {
        Ok(self.records.read().get(id).map(|r| r.fields.clone()))
    }

    async fn write_fields(&self, id: &TargetId, fields: &FieldMap) -> Result<(), WriteError> {
        let mut records = self.records.write();
        let record = records
            .get_mut(id)
            .ok_or_else(|| WriteError::TargetMissing(id.clone()))?;
        for (name, value) in fields {
            record.fields.insert(name.clone(), value.clone());
        }
        Ok(())
    }
}

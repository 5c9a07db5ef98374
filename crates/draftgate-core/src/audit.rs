//! Apply audit trail
//!
//! One [`AuditRecord`] per write attempt: the before/after field snapshot for
//! a written item, or the reason a write failed, plus who triggered it.
//! Sinks are append-only.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use draftgate_fingerprint::TargetId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::AuditError;
use crate::types::{ApplyContext, DraftId, FieldMap, PlaybookId, ProjectId};

/// What happened to one item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditOutcome {
    Written {
        /// Values of the written fields before the write; `None` if unreadable
        before: Option<FieldMap>,
        after: FieldMap,
    },
    Failed {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub draft_id: DraftId,
    pub project_id: ProjectId,
    pub playbook_id: PlaybookId,
    pub target_id: TargetId,
    pub outcome: AuditOutcome,
    pub context: ApplyContext,
    pub recorded_at: DateTime<Utc>,
}

/// Append-only destination for audit records
#[async_trait]
pub trait AuditSink: Send + Sync + std::fmt::Debug {
    async fn record(&self, record: AuditRecord) -> Result<(), AuditError>;

    /// Records for one draft in append order
    async fn records(&self, draft_id: DraftId) -> Result<Vec<AuditRecord>, AuditError>;
}

/// Chained log entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub sequence: u64,
    pub record: AuditRecord,
    pub prev_hash: [u8; 32],
    pub hash: [u8; 32],
}

impl AuditEntry {
    /// Entry hash as lowercase hex
    #[inline]
    #[must_use]
    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash)
    }
}

/// In-process audit log, SHA-256 hash-chained
#[derive(Debug, Default)]
pub struct InMemoryAuditLog {
    inner: Mutex<Vec<AuditEntry>>,
}

impl InMemoryAuditLog {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record and return its sequence number
    ///
    /// # Errors
    /// Returns [`AuditError::Encoding`] if the record cannot be serialized
    pub fn append(&self, record: AuditRecord) -> Result<u64, AuditError> {
        let mut guard = self.inner.lock();
        let sequence = guard.len() as u64;
        let prev_hash = guard.last().map_or([0u8; 32], |e| e.hash);
        let hash = compute_hash(sequence, &record, &prev_hash)?;
        guard.push(AuditEntry {
            sequence,
            record,
            prev_hash,
            hash,
        });
        Ok(sequence)
    }

    #[must_use]
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.inner.lock().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Recompute the chain from the first entry
    ///
    /// # Errors
    /// Returns [`AuditError::IntegrityViolation`] at the first broken link
    pub fn verify_integrity(&self) -> Result<(), AuditError> {
        let guard = self.inner.lock();
        let mut prev = [0u8; 32];
        for entry in guard.iter() {
            if entry.prev_hash != prev {
                return Err(AuditError::IntegrityViolation {
                    sequence: entry.sequence,
                });
            }
            if entry.hash != compute_hash(entry.sequence, &entry.record, &entry.prev_hash)? {
                return Err(AuditError::IntegrityViolation {
                    sequence: entry.sequence,
                });
            }
            prev = entry.hash;
        }
        Ok(())
    }

    #[cfg(test)]
    fn tamper(&self, sequence: usize, f: impl FnOnce(&mut AuditRecord)) {
        f(&mut self.inner.lock()[sequence].record);
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditLog {
    async fn record(&self, record: AuditRecord) -> Result<(), AuditError> {
        self.append(record).map(|_| ())
    }

    async fn records(&self, draft_id: DraftId) -> Result<Vec<AuditRecord>, AuditError> {
        Ok(self
            .inner
            .lock()
            .iter()
            .filter(|e| e.record.draft_id == draft_id)
            .map(|e| e.record.clone())
            .collect())
    }
}

fn compute_hash(
    sequence: u64,
    record: &AuditRecord,
    prev_hash: &[u8; 32],
) -> Result<[u8; 32], AuditError> {
    let body = serde_json::to_vec(record)?;
    let mut hasher = Sha256::new();
    hasher.update(sequence.to_le_bytes());
    hasher.update(&body);
    hasher.update(prev_hash);
    Ok(hasher.finalize().into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(draft_id: DraftId, target: &str) -> AuditRecord {
        let mut after = FieldMap::new();
        after.insert("seo_title".into(), format!("X | {target}"));
        AuditRecord {
            draft_id,
            project_id: "proj".into(),
            playbook_id: "pb".into(),
            target_id: target.into(),
            outcome: AuditOutcome::Written {
                before: Some(FieldMap::new()),
                after,
            },
            context: ApplyContext::new("alice").with_reason("launch"),
            recorded_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn records_filter_by_draft_in_order() {
        let log = InMemoryAuditLog::new();
        let (d1, d2) = (DraftId::new(), DraftId::new());
        log.record(record(d1, "a")).await.unwrap();
        log.record(record(d2, "x")).await.unwrap();
        log.record(record(d1, "b")).await.unwrap();

        let targets: Vec<String> = log
            .records(d1)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.target_id.to_string())
            .collect();
        assert_eq!(targets, vec!["a", "b"]);
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn chain_links_entries() {
        let log = InMemoryAuditLog::new();
        let draft = DraftId::new();
        log.append(record(draft, "a")).unwrap();
        log.append(record(draft, "b")).unwrap();

        let entries = log.entries();
        assert_eq!(entries[0].prev_hash, [0u8; 32]);
        assert_eq!(entries[1].prev_hash, entries[0].hash);
        assert_eq!(entries[1].hash_hex().len(), 64);
        assert!(log.verify_integrity().is_ok());
    }

    #[test]
    fn tampering_is_detected() {
        let log = InMemoryAuditLog::new();
        let draft = DraftId::new();
        log.append(record(draft, "a")).unwrap();
        log.append(record(draft, "b")).unwrap();
        log.tamper(0, |r| r.context.actor = "mallory".into());

        assert!(matches!(
            log.verify_integrity(),
            Err(AuditError::IntegrityViolation { sequence: 0 })
        ));
    }
}

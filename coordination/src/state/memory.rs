//! In-memory consult store
//!
//! One `RwLock` guards all three collections, so a commit's record, note and
//! audit entry become visible together.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use super::store::{check_version, Commit, ConsultStore, StoreError, StoreResult};
use crate::consult::{AuditEntry, ConsultId, ConsultNote, ConsultRequest};

#[derive(Default)]
struct Inner {
    consults: HashMap<ConsultId, ConsultRequest>,
    notes: HashMap<ConsultId, Vec<ConsultNote>>,
    audit: HashMap<ConsultId, Vec<AuditEntry>>,
}

/// Volatile store for tests, demos, and single-process deployments
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a shared reference to this store
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Total audit entries across all consults
    pub fn audit_count(&self) -> usize {
        self.inner
            .read()
            .map(|inner| inner.audit.values().map(Vec::len).sum())
            .unwrap_or(0)
    }
}

impl ConsultStore for MemoryStore {
    fn commit(&self, commit: Commit) -> StoreResult<()> {
        let mut inner = self.inner.write().map_err(|_| StoreError::LockPoisoned)?;
        check_version(&commit, inner.consults.get(&commit.consult.id))?;

        let id = commit.consult.id.clone();
        if let Some(note) = commit.note {
            inner.notes.entry(id.clone()).or_default().push(note);
        }
        if let Some(audit) = commit.audit {
            inner.audit.entry(id.clone()).or_default().push(audit);
        }
        inner.consults.insert(id, commit.consult);
        Ok(())
    }

    fn get_consult(&self, id: &str) -> StoreResult<Option<ConsultRequest>> {
        let inner = self.inner.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(inner.consults.get(id).cloned())
    }

    fn list_consults(&self) -> StoreResult<Vec<ConsultRequest>> {
        let inner = self.inner.read().map_err(|_| StoreError::LockPoisoned)?;
        let mut consults: Vec<ConsultRequest> = inner.consults.values().cloned().collect();
        consults.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(consults)
    }

    fn list_notes(&self, consult_id: &str) -> StoreResult<Vec<ConsultNote>> {
        let inner = self.inner.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(inner.notes.get(consult_id).cloned().unwrap_or_default())
    }

    fn list_audit(&self, consult_id: &str) -> StoreResult<Vec<AuditEntry>> {
        let inner = self.inner.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(inner.audit.get(consult_id).cloned().unwrap_or_default())
    }

    fn find_overdue(&self, now: DateTime<Utc>) -> StoreResult<Vec<ConsultRequest>> {
        let inner = self.inner.read().map_err(|_| StoreError::LockPoisoned)?;
        let mut overdue: Vec<ConsultRequest> = inner
            .consults
            .values()
            .filter(|c| c.status.is_escalation_eligible() && c.due_by < now)
            .cloned()
            .collect();
        overdue.sort_by(|a, b| a.due_by.cmp(&b.due_by).then(a.id.cmp(&b.id)));
        Ok(overdue)
    }
}

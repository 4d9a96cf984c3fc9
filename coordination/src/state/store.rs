//! Storage collaborator contract
//!
//! The engine treats durable storage as a transactional record store keyed by
//! consult id. Every mutation is a single [`Commit`]: the new record, the
//! version it replaces, and any note or audit entry that must land with it.
//! Implementations apply a commit atomically or not at all.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::consult::{AuditEntry, ConsultNote, ConsultRequest};

/// Error type for state store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[cfg(feature = "rocksdb-store")]
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Key not found: {0}")]
    NotFound(String),

    #[error("Record already exists: {0}")]
    AlreadyExists(String),

    #[error("Version conflict on {id}: expected {expected}, found {found}")]
    VersionConflict { id: String, expected: u64, found: u64 },

    #[error("Lock poisoned")]
    LockPoisoned,

    #[error("Column family not found: {0}")]
    ColumnFamilyNotFound(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Whether the whole store is down rather than one record being bad
    pub fn is_systemic(&self) -> bool {
        match self {
            Self::Unavailable(_) | Self::LockPoisoned => true,
            #[cfg(feature = "rocksdb-store")]
            Self::RocksDb(_) => true,
            _ => false,
        }
    }

    /// Whether retrying the same call later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::VersionConflict { .. })
    }
}

/// Result type for state store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// One atomic write: record plus whatever must be appended with it
#[derive(Debug, Clone)]
pub struct Commit {
    pub consult: ConsultRequest,
    /// `None` inserts a new record; `Some(v)` replaces the record only if its version is `v`
    pub expected_version: Option<u64>,
    pub note: Option<ConsultNote>,
    pub audit: Option<AuditEntry>,
}

impl Commit {
    /// Insert a new consult
    pub fn insert(consult: ConsultRequest) -> Self {
        Self {
            consult,
            expected_version: None,
            note: None,
            audit: None,
        }
    }

    /// Replace the consult if it is still at `expected_version`
    pub fn update(consult: ConsultRequest, expected_version: u64) -> Self {
        Self {
            consult,
            expected_version: Some(expected_version),
            note: None,
            audit: None,
        }
    }

    pub fn with_note(mut self, note: ConsultNote) -> Self {
        self.note = Some(note);
        self
    }

    pub fn with_audit(mut self, audit: AuditEntry) -> Self {
        self.audit = Some(audit);
        self
    }
}

/// Transactional consult store
pub trait ConsultStore: Send + Sync {
    /// Apply a commit atomically (compare-and-swap on version for updates)
    fn commit(&self, commit: Commit) -> StoreResult<()>;

    fn get_consult(&self, id: &str) -> StoreResult<Option<ConsultRequest>>;

    /// All consults, oldest first
    fn list_consults(&self) -> StoreResult<Vec<ConsultRequest>>;

    /// Notes for a consult in creation order
    fn list_notes(&self, consult_id: &str) -> StoreResult<Vec<ConsultNote>>;

    /// Audit trail for a consult in creation order
    fn list_audit(&self, consult_id: &str) -> StoreResult<Vec<AuditEntry>>;

    /// Consults in PENDING or ACKNOWLEDGED with `due_by < now`, earliest deadline first
    fn find_overdue(&self, now: DateTime<Utc>) -> StoreResult<Vec<ConsultRequest>>;
}

/// Shared reference to a consult store
pub type SharedConsultStore = Arc<dyn ConsultStore>;

/// Check a commit's version precondition against the stored record
pub(crate) fn check_version(
    commit: &Commit,
    current: Option<&ConsultRequest>,
) -> StoreResult<()> {
    let id = &commit.consult.id;
    match (commit.expected_version, current) {
        (None, None) => Ok(()),
        (None, Some(_)) => Err(StoreError::AlreadyExists(id.clone())),
        (Some(_), None) => Err(StoreError::NotFound(id.clone())),
        (Some(expected), Some(current)) if current.version != expected => {
            Err(StoreError::VersionConflict {
                id: id.clone(),
                expected,
                found: current.version,
            })
        }
        (Some(_), Some(_)) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_systemic_and_transient() {
        assert!(StoreError::Unavailable("db down".into()).is_systemic());
        assert!(StoreError::Unavailable("db down".into()).is_transient());
        assert!(!StoreError::NotFound("c".into()).is_systemic());
        assert!(StoreError::VersionConflict {
            id: "c".into(),
            expected: 1,
            found: 2
        }
        .is_transient());
        assert!(!StoreError::Serialization("bad".into()).is_transient());
    }
}

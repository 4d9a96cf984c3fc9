//! RocksDB-backed consult store
//!
//! Uses bincode for binary serialization. A commit is one `WriteBatch`
//! covering the record, its due-index entry, and any note or audit entry,
//! taken under the write half of the database lock so the version check and
//! the write cannot interleave with another commit.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use rocksdb::{ColumnFamilyDescriptor, Options, WriteBatch, DB};
use serde::{de::DeserializeOwned, Serialize};

use super::schema::{self, keys, ALL_CFS};
use super::store::{check_version, Commit, ConsultStore, StoreError, StoreResult};
use crate::consult::{AuditEntry, ConsultNote, ConsultRequest};

/// Persistent consult store
pub struct RocksStore {
    db: RwLock<DB>,
    path: PathBuf,
}

impl RocksStore {
    /// Open or create a store at the given path
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&opts, &path, cf_descriptors)?;

        Ok(Self {
            db: RwLock::new(db),
            path,
        })
    }

    /// Create a shared reference to this store
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn get<T: DeserializeOwned>(db: &DB, cf_name: &str, key: &str) -> StoreResult<Option<T>> {
        let cf = db
            .cf_handle(cf_name)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(cf_name.to_string()))?;

        match db.get_cf(cf, key.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan_prefix<T: DeserializeOwned>(
        db: &DB,
        cf_name: &str,
        prefix: &str,
    ) -> StoreResult<Vec<T>> {
        let cf = db
            .cf_handle(cf_name)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(cf_name.to_string()))?;

        let mut values = Vec::new();
        for item in db.prefix_iterator_cf(cf, prefix.as_bytes()) {
            let (key, value) = item?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            values.push(decode(&value)?);
        }
        Ok(values)
    }
}

fn encode<T: Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| StoreError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map(|(value, _)| value)
        .map_err(|e| StoreError::Deserialization(e.to_string()))
}

fn due_key(consult: &ConsultRequest) -> Option<String> {
    consult
        .status
        .is_escalation_eligible()
        .then(|| keys::due(consult.due_by.timestamp_millis(), &consult.id))
}

impl ConsultStore for RocksStore {
    fn commit(&self, commit: Commit) -> StoreResult<()> {
        let db = self.db.write().map_err(|_| StoreError::LockPoisoned)?;
        let current: Option<ConsultRequest> =
            Self::get(&db, schema::CF_CONSULTS, &keys::consult(&commit.consult.id))?;
        check_version(&commit, current.as_ref())?;

        let cf = |name: &str| {
            db.cf_handle(name)
                .ok_or_else(|| StoreError::ColumnFamilyNotFound(name.to_string()))
        };
        let consults_cf = cf(schema::CF_CONSULTS)?;
        let due_cf = cf(schema::CF_DUE_INDEX)?;

        let mut batch = WriteBatch::default();
        let id = &commit.consult.id;
        batch.put_cf(consults_cf, keys::consult(id), encode(&commit.consult)?);

        let old_due = current.as_ref().and_then(due_key);
        let new_due = due_key(&commit.consult);
        if old_due != new_due {
            if let Some(old) = old_due {
                batch.delete_cf(due_cf, old);
            }
            if let Some(new) = &new_due {
                batch.put_cf(due_cf, new, id.as_bytes());
            }
        }

        if let Some(note) = &commit.note {
            let key = keys::note(
                id,
                note.created_at.timestamp_millis(),
                commit.consult.version,
                &note.id,
            );
            batch.put_cf(cf(schema::CF_NOTES)?, key, encode(note)?);
        }
        if let Some(audit) = &commit.audit {
            let key = keys::audit(
                id,
                audit.timestamp.timestamp_millis(),
                commit.consult.version,
                &audit.id,
            );
            batch.put_cf(cf(schema::CF_AUDIT)?, key, encode(audit)?);
        }

        db.write(batch)?;
        Ok(())
    }

    fn get_consult(&self, id: &str) -> StoreResult<Option<ConsultRequest>> {
        let db = self.db.read().map_err(|_| StoreError::LockPoisoned)?;
        Self::get(&db, schema::CF_CONSULTS, &keys::consult(id))
    }

    fn list_consults(&self) -> StoreResult<Vec<ConsultRequest>> {
        let db = self.db.read().map_err(|_| StoreError::LockPoisoned)?;
        let mut consults: Vec<ConsultRequest> =
            Self::scan_prefix(&db, schema::CF_CONSULTS, "consult:")?;
        consults.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(consults)
    }

    fn list_notes(&self, consult_id: &str) -> StoreResult<Vec<ConsultNote>> {
        let db = self.db.read().map_err(|_| StoreError::LockPoisoned)?;
        Self::scan_prefix(&db, schema::CF_NOTES, &keys::notes_prefix(consult_id))
    }

    fn list_audit(&self, consult_id: &str) -> StoreResult<Vec<AuditEntry>> {
        let db = self.db.read().map_err(|_| StoreError::LockPoisoned)?;
        Self::scan_prefix(&db, schema::CF_AUDIT, &keys::audit_prefix(consult_id))
    }

    fn find_overdue(&self, now: DateTime<Utc>) -> StoreResult<Vec<ConsultRequest>> {
        let db = self.db.read().map_err(|_| StoreError::LockPoisoned)?;
        let due_cf = db
            .cf_handle(schema::CF_DUE_INDEX)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(schema::CF_DUE_INDEX.to_string()))?;

        let cutoff = now.timestamp_millis();
        let mut overdue = Vec::new();
        for item in db.prefix_iterator_cf(due_cf, b"due:") {
            let (key, _) = item?;
            let Ok(key) = std::str::from_utf8(&key) else {
                continue;
            };
            let Some((due_millis, consult_id)) = keys::parse_due(key) else {
                break;
            };
            if due_millis > cutoff {
                break;
            }
            let consult: Option<ConsultRequest> =
                Self::get(&db, schema::CF_CONSULTS, &keys::consult(consult_id))?;
            if let Some(consult) = consult {
                if consult.status.is_escalation_eligible() && consult.due_by < now {
                    overdue.push(consult);
                }
            }
        }
        Ok(overdue)
    }
}

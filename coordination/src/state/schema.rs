//! Column family definitions for the RocksDB consult store
//!
//! Each column family provides logical separation of data types
//! while sharing the same RocksDB instance.

/// Column family for consult records
pub const CF_CONSULTS: &str = "consults";

/// Column family for clinical notes
pub const CF_NOTES: &str = "notes";

/// Column family for audit entries
pub const CF_AUDIT: &str = "audit";

/// Column family indexing open, escalation-eligible consults by deadline
pub const CF_DUE_INDEX: &str = "due_index";

/// All column family names
pub const ALL_CFS: &[&str] = &[CF_CONSULTS, CF_NOTES, CF_AUDIT, CF_DUE_INDEX];

/// Key prefixes for compound keys
pub mod keys {
    /// Consult record key
    pub fn consult(consult_id: &str) -> String {
        format!("consult:{}", consult_id)
    }

    /// Prefix shared by every note of a consult
    pub fn notes_prefix(consult_id: &str) -> String {
        format!("note:{}:", consult_id)
    }

    /// Note key, ordered by creation time then by the version of the
    /// consult record committed with it
    pub fn note(consult_id: &str, timestamp_millis: i64, version: u64, note_id: &str) -> String {
        format!(
            "note:{}:{:020}:{:020}:{}",
            consult_id, timestamp_millis, version, note_id
        )
    }

    /// Prefix shared by every audit entry of a consult
    pub fn audit_prefix(consult_id: &str) -> String {
        format!("audit:{}:", consult_id)
    }

    /// Audit key, same ordering as notes
    pub fn audit(consult_id: &str, timestamp_millis: i64, version: u64, entry_id: &str) -> String {
        format!(
            "audit:{}:{:020}:{:020}:{}",
            consult_id, timestamp_millis, version, entry_id
        )
    }

    /// Due-index key (deadline-first for ordered scans)
    pub fn due(due_millis: i64, consult_id: &str) -> String {
        format!("due:{:020}:{}", due_millis, consult_id)
    }

    /// Parse (deadline millis, consult id) from a due-index key
    pub fn parse_due(key: &str) -> Option<(i64, &str)> {
        let rest = key.strip_prefix("due:")?;
        let (millis, id) = rest.split_once(':')?;
        Some((millis.parse().ok()?, id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_generation() {
        assert_eq!(keys::consult("c-1"), "consult:c-1");
        assert!(keys::note("c-1", 5, 2, "n").starts_with(&keys::notes_prefix("c-1")));
        assert!(keys::audit("c-1", 5, 2, "a").starts_with(&keys::audit_prefix("c-1")));
    }

    #[test]
    fn test_same_millisecond_keys_follow_version() {
        // Entry ids are random, so only the version can order them
        let first = keys::note("c-1", 5, 2, "ffff");
        let second = keys::note("c-1", 5, 3, "0000");
        assert!(first < second);

        let first = keys::audit("c-1", 5, 9, "ffff");
        let second = keys::audit("c-1", 5, 10, "0000");
        assert!(first < second);
    }

    #[test]
    fn test_due_key_ordering() {
        let early = keys::due(1_000, "zzz");
        let late = keys::due(2_000, "aaa");
        assert!(early < late);
    }

    #[test]
    fn test_parse_due() {
        let key = keys::due(12345, "c:with:colons");
        assert_eq!(keys::parse_due(&key), Some((12345, "c:with:colons")));
        assert_eq!(keys::parse_due("consult:x"), None);
    }
}

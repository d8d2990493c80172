use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Sentinel identity id used before the real identity id is known.
pub const UNKNOWN_IDENTITY_ID: &str = "UNKNOWN";

/// Sentinel `last_sync_count` meaning "deleted locally, pending remote
/// deletion".
pub const LOCAL_DELETE_SYNC_COUNT: i64 = -1;

fn name_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-zA-Z0-9_.:\-]{1,128}$").expect("static regex"))
}

/// Validates a dataset name or record key against
/// `[a-zA-Z0-9_.:-]{1,128}`, raising `IllegalArgument` synchronously before
/// any I/O.
pub fn validate_name(kind: &str, value: &str) -> Result<(), SyncError> {
    if name_pattern().is_match(value) {
        Ok(())
    } else {
        Err(SyncError::IllegalArgument(format!(
            "invalid {kind} '{value}': must match [a-zA-Z0-9_.:-]{{1,128}}"
        )))
    }
}

/// `size(record) = len_utf8(key) + len_utf8(value)`; tombstones have
/// `len_utf8(value) = 0`.
pub fn record_size(key: &str, value: Option<&str>) -> u64 {
    (key.len() + value.map_or(0, str::len)) as u64
}

/// Per-dataset metadata mirrored from the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetMetadata {
    pub identity_id: String,
    pub name: String,
    pub creation_date: i64,
    pub last_modified_date: i64,
    pub last_modified_by: Option<String>,
    pub storage_size_bytes: u64,
    pub record_count: u64,
    /// `-1` means "deleted locally, pending remote deletion".
    pub last_sync_count: i64,
}

impl DatasetMetadata {
    pub fn is_pending_local_delete(&self) -> bool {
        self.last_sync_count == LOCAL_DELETE_SYNC_COUNT
    }
}

/// A single key/value row. `value = None` is the tombstone
/// marker for a pending or acknowledged deletion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub key: String,
    pub value: Option<String>,
    pub sync_count: u64,
    pub last_modified_date: i64,
    pub device_last_modified_date: i64,
    pub last_modified_by: Option<String>,
    /// Local-dirty bit; set on every local write, cleared only when that
    /// exact version is acknowledged by remote.
    pub modified: bool,
    /// Tombstone bit; a deleted record is kept with an absent value so a
    /// pending delete can be pushed.
    pub deleted: bool,
}

impl Record {
    pub fn size(&self) -> u64 {
        record_size(&self.key, self.value.as_deref())
    }

    /// Record equality for conflict detection is byte-exact on value;
    /// tombstone vs. present value is always a mismatch.
    pub fn value_matches(&self, other: &Record) -> bool {
        self.value == other.value
    }
}

/// The operation a remote patch applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatchOp {
    Replace,
    Remove,
}

/// One outgoing change, built from a locally-modified record
/// (`LocalStore::get_modified_records`) and sent via
/// `RemoteTransport::put_records`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordPatch {
    pub key: String,
    pub value: Option<String>,
    pub base_sync_count: u64,
    pub op: PatchOp,
}

impl RecordPatch {
    pub fn from_record(record: &Record) -> Self {
        RecordPatch {
            key: record.key.clone(),
            value: record.value.clone(),
            base_sync_count: record.sync_count,
            op: if record.deleted {
                PatchOp::Remove
            } else {
                PatchOp::Replace
            },
        }
    }
}

/// Result of `RemoteTransport::list_updates`.
#[derive(Debug, Clone)]
pub struct DatasetUpdates {
    pub records: Vec<Record>,
    pub sync_count: i64,
    pub sync_session_token: String,
    pub exists: bool,
    pub deleted: bool,
    pub merged_dataset_names: Vec<String>,
}

/// Dataset metadata as reported by the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteDatasetMetadata {
    pub name: String,
    pub creation_date: i64,
    pub last_modified_date: i64,
    pub last_modified_by: Option<String>,
    pub storage_size_bytes: u64,
    pub record_count: u64,
    pub dataset_sync_count: i64,
}

/// One page of `RemoteTransport::list_datasets`.
#[derive(Debug, Clone)]
pub struct DatasetsPage {
    pub datasets: Vec<RemoteDatasetMetadata>,
    pub next_token: Option<String>,
}

/// One page of `RemoteTransport::list_records`.
#[derive(Debug, Clone)]
pub struct RecordsPage {
    pub records: Vec<Record>,
    pub sync_session_token: String,
    pub dataset_sync_count: i64,
    pub dataset_exists: bool,
    pub dataset_deleted_after_requested_sync_count: bool,
    pub merged_dataset_names: Vec<String>,
    pub next_token: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_boundary_lengths() {
        let one = "a";
        let one_twenty_eight = "a".repeat(128);
        assert!(validate_name("key", one).is_ok());
        assert!(validate_name("key", &one_twenty_eight).is_ok());
    }

    #[test]
    fn rejects_empty_and_too_long() {
        let too_long = "a".repeat(129);
        assert!(validate_name("key", "").is_err());
        assert!(validate_name("key", &too_long).is_err());
    }

    #[test]
    fn rejects_disallowed_characters() {
        assert!(validate_name("key", "has space").is_err());
        assert!(validate_name("key", "has/slash").is_err());
    }

    #[test]
    fn tombstone_size_excludes_value() {
        assert_eq!(record_size("k", None), 1);
        assert_eq!(record_size("k", Some("value")), 6);
    }
}

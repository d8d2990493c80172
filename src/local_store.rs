use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Transaction};

use crate::config::SyncManagerConfig;
use crate::error::{Result, SyncError};
use crate::model::{record_size, DatasetMetadata, Record, UNKNOWN_IDENTITY_ID};

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// ACID persistence of datasets, records, and per-identity sync counters.
///
/// All mutating operations run inside a single `rusqlite` transaction and
/// are serialized through `conn`'s mutex, so the store never exposes a
/// partially-applied mutation to a concurrent reader.
pub struct LocalStore {
    conn: Mutex<Connection>,
    config: SyncManagerConfig,
}

impl LocalStore {
    pub fn open(path: &str, config: SyncManagerConfig) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
            config,
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn open_in_memory(config: SyncManagerConfig) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
            config,
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create required tables and indexes. Safe to call multiple times.
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            r#"
PRAGMA journal_mode=WAL;
PRAGMA foreign_keys=ON;

CREATE TABLE IF NOT EXISTS datasets (
    identity_id TEXT NOT NULL,
    name TEXT NOT NULL,
    creation_date INTEGER NOT NULL,
    last_modified_date INTEGER NOT NULL,
    last_modified_by TEXT,
    storage_size_bytes INTEGER NOT NULL DEFAULT 0,
    record_count INTEGER NOT NULL DEFAULT 0,
    last_sync_count INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (identity_id, name)
);

CREATE TABLE IF NOT EXISTS records (
    identity_id TEXT NOT NULL,
    dataset_name TEXT NOT NULL,
    key TEXT NOT NULL,
    value TEXT,
    sync_count INTEGER NOT NULL DEFAULT 0,
    last_modified_date INTEGER NOT NULL,
    device_last_modified_date INTEGER NOT NULL,
    last_modified_by TEXT,
    modified INTEGER NOT NULL DEFAULT 0,
    deleted INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (identity_id, dataset_name, key)
);

CREATE INDEX IF NOT EXISTS idx_records_modified
ON records(identity_id, dataset_name, modified);

CREATE TABLE IF NOT EXISTS meta (
    k TEXT PRIMARY KEY,
    v TEXT NOT NULL
);
"#,
        )?;
        conn.execute(
            "INSERT INTO meta(k,v) VALUES('schema_version','1')
             ON CONFLICT(k) DO NOTHING",
            [],
        )?;
        Ok(())
    }

    /// Creates a dataset row lazily if it does not already exist; returns
    /// the (possibly pre-existing) metadata. Does not reset an existing
    /// row's `last_sync_count`.
    pub fn create_dataset(&self, identity_id: &str, name: &str) -> Result<DatasetMetadata> {
        let conn = self.conn.lock();
        if let Some(existing) = Self::read_dataset(&conn, identity_id, name)? {
            return Ok(existing);
        }
        self.check_dataset_count_limit(&conn, identity_id)?;
        let now = now_ms();
        conn.execute(
            "INSERT INTO datasets(identity_id, name, creation_date, last_modified_date,
                last_modified_by, storage_size_bytes, record_count, last_sync_count)
             VALUES (?1, ?2, ?3, ?3, NULL, 0, 0, 0)",
            params![identity_id, name, now],
        )?;
        Self::read_dataset(&conn, identity_id, name)?
            .ok_or_else(|| SyncError::Storage(rusqlite::Error::QueryReturnedNoRows))
    }

    pub fn get_datasets(&self, identity_id: &str) -> Result<Vec<DatasetMetadata>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT identity_id, name, creation_date, last_modified_date, last_modified_by,
                    storage_size_bytes, record_count, last_sync_count
             FROM datasets WHERE identity_id = ?1 ORDER BY name ASC",
        )?;
        let rows = stmt.query_map(params![identity_id], Self::row_to_metadata)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn get_dataset_metadata(
        &self,
        identity_id: &str,
        name: &str,
    ) -> Result<Option<DatasetMetadata>> {
        let conn = self.conn.lock();
        Self::read_dataset(&conn, identity_id, name)
    }

    /// Upserts the attributes a remote dataset listing carries
    /// (`refresh_dataset_metadata`). Record contents and `last_sync_count`
    /// are untouched.
    pub fn update_dataset_metadata(
        &self,
        identity_id: &str,
        name: &str,
        creation_date: i64,
        last_modified_date: i64,
        last_modified_by: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn.lock();
        let now_exists = Self::read_dataset(&conn, identity_id, name)?.is_some();
        if now_exists {
            conn.execute(
                "UPDATE datasets SET creation_date = ?3, last_modified_date = ?4,
                    last_modified_by = ?5
                 WHERE identity_id = ?1 AND name = ?2",
                params![identity_id, name, creation_date, last_modified_date, last_modified_by],
            )?;
        } else {
            conn.execute(
                "INSERT INTO datasets(identity_id, name, creation_date, last_modified_date,
                    last_modified_by, storage_size_bytes, record_count, last_sync_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, 0, 0, 0)",
                params![identity_id, name, creation_date, last_modified_date, last_modified_by],
            )?;
        }
        Ok(())
    }

    /// Marks `last_sync_count = -1` and tombstones all records of the
    /// dataset.
    pub fn delete_dataset(&self, identity_id: &str, name: &str) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let now = now_ms();
        if Self::read_dataset_tx(&tx, identity_id, name)?.is_none() {
            tx.execute(
                "INSERT INTO datasets(identity_id, name, creation_date, last_modified_date,
                    last_modified_by, storage_size_bytes, record_count, last_sync_count)
                 VALUES (?1, ?2, ?3, ?3, NULL, 0, 0, 0)",
                params![identity_id, name, now],
            )?;
        }
        tx.execute(
            "UPDATE records SET value = NULL, deleted = 1, modified = 1,
                last_modified_date = ?3, device_last_modified_date = ?3
             WHERE identity_id = ?1 AND dataset_name = ?2",
            params![identity_id, name, now],
        )?;
        tx.execute(
            "UPDATE datasets SET last_sync_count = -1 WHERE identity_id = ?1 AND name = ?2",
            params![identity_id, name],
        )?;
        Self::recompute_stats(&tx, identity_id, name)?;
        tx.commit()?;
        Ok(())
    }

    /// Physically removes the dataset row and all its records.
    pub fn purge_dataset(&self, identity_id: &str, name: &str) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM records WHERE identity_id = ?1 AND dataset_name = ?2",
            params![identity_id, name],
        )?;
        tx.execute(
            "DELETE FROM datasets WHERE identity_id = ?1 AND name = ?2",
            params![identity_id, name],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Local write. `value = None` tombstones the record. Sets
    /// `modified = true`, updates `device_last_modified_date`, leaves
    /// `sync_count` unchanged.
    pub fn put_value(
        &self,
        identity_id: &str,
        name: &str,
        key: &str,
        value: Option<&str>,
    ) -> Result<()> {
        self.put_all_values(identity_id, name, &[(key.to_string(), value.map(str::to_string))])
    }

    pub fn put_all_values(
        &self,
        identity_id: &str,
        name: &str,
        entries: &[(String, Option<String>)],
    ) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        if Self::read_dataset_tx(&tx, identity_id, name)?.is_none() {
            let now = now_ms();
            tx.execute(
                "INSERT INTO datasets(identity_id, name, creation_date, last_modified_date,
                    last_modified_by, storage_size_bytes, record_count, last_sync_count)
                 VALUES (?1, ?2, ?3, ?3, NULL, 0, 0, 0)",
                params![identity_id, name, now],
            )?;
        }
        let now = now_ms();
        for (key, value) in entries {
            let existing_sync_count: u64 = tx
                .query_row(
                    "SELECT sync_count FROM records
                     WHERE identity_id = ?1 AND dataset_name = ?2 AND key = ?3",
                    params![identity_id, name, key],
                    |r| r.get(0),
                )
                .optional()?
                .unwrap_or(0);
            tx.execute(
                "INSERT INTO records(identity_id, dataset_name, key, value, sync_count,
                    last_modified_date, device_last_modified_date, last_modified_by,
                    modified, deleted)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, NULL, 1, ?7)
                 ON CONFLICT(identity_id, dataset_name, key) DO UPDATE SET
                    value = excluded.value,
                    device_last_modified_date = excluded.device_last_modified_date,
                    modified = 1,
                    deleted = excluded.deleted",
                params![
                    identity_id,
                    name,
                    key,
                    value,
                    existing_sync_count,
                    now,
                    value.is_none(),
                ],
            )?;
        }
        self.check_dataset_size_limit(&tx, identity_id, name)?;
        Self::recompute_stats(&tx, identity_id, name)?;
        tx.commit()?;
        Ok(())
    }

    pub fn get_value(&self, identity_id: &str, name: &str, key: &str) -> Result<Option<String>> {
        Ok(self
            .get_record(identity_id, name, key)?
            .and_then(|r| r.value))
    }

    pub fn get_record(&self, identity_id: &str, name: &str, key: &str) -> Result<Option<Record>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT key, value, sync_count, last_modified_date, device_last_modified_date,
                    last_modified_by, modified, deleted
             FROM records WHERE identity_id = ?1 AND dataset_name = ?2 AND key = ?3",
            params![identity_id, name, key],
            Self::row_to_record,
        )
        .optional()
        .map_err(SyncError::from)
    }

    /// Fetches the given keys (or every record if `keys` is `None`).
    pub fn get_records(
        &self,
        identity_id: &str,
        name: &str,
        keys: Option<&[String]>,
    ) -> Result<Vec<Record>> {
        let conn = self.conn.lock();
        match keys {
            None => {
                let mut stmt = conn.prepare(
                    "SELECT key, value, sync_count, last_modified_date,
                            device_last_modified_date, last_modified_by, modified, deleted
                     FROM records WHERE identity_id = ?1 AND dataset_name = ?2
                     ORDER BY key ASC",
                )?;
                let rows = stmt.query_map(params![identity_id, name], Self::row_to_record)?;
                let mut out = Vec::new();
                for row in rows {
                    out.push(row?);
                }
                Ok(out)
            }
            Some(keys) => {
                let mut out = Vec::with_capacity(keys.len());
                for key in keys {
                    if let Some(record) = self.get_record(identity_id, name, key)? {
                        out.push(record);
                    }
                }
                Ok(out)
            }
        }
    }

    /// Local-dirty records, including tombstones for pending local deletes.
    pub fn get_modified_records(&self, identity_id: &str, name: &str) -> Result<Vec<Record>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT key, value, sync_count, last_modified_date, device_last_modified_date,
                    last_modified_by, modified, deleted
             FROM records WHERE identity_id = ?1 AND dataset_name = ?2 AND modified = 1
             ORDER BY key ASC",
        )?;
        let rows = stmt.query_map(params![identity_id, name], Self::row_to_record)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Writes exactly the provided rows (remote-authoritative merge),
    /// including their `sync_count`; clears `modified`/`deleted` according
    /// to the supplied record. Rows not present in `records` are untouched.
    pub fn put_records(&self, identity_id: &str, name: &str, records: &[Record]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        if Self::read_dataset_tx(&tx, identity_id, name)?.is_none() {
            let now = now_ms();
            tx.execute(
                "INSERT INTO datasets(identity_id, name, creation_date, last_modified_date,
                    last_modified_by, storage_size_bytes, record_count, last_sync_count)
                 VALUES (?1, ?2, ?3, ?3, NULL, 0, 0, 0)",
                params![identity_id, name, now],
            )?;
        }
        for record in records {
            tx.execute(
                "INSERT INTO records(identity_id, dataset_name, key, value, sync_count,
                    last_modified_date, device_last_modified_date, last_modified_by,
                    modified, deleted)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(identity_id, dataset_name, key) DO UPDATE SET
                    value = excluded.value,
                    sync_count = excluded.sync_count,
                    last_modified_date = excluded.last_modified_date,
                    device_last_modified_date = excluded.device_last_modified_date,
                    last_modified_by = excluded.last_modified_by,
                    modified = excluded.modified,
                    deleted = excluded.deleted",
                params![
                    identity_id,
                    name,
                    record.key,
                    record.value,
                    record.sync_count as i64,
                    record.last_modified_date,
                    record.device_last_modified_date,
                    record.last_modified_by,
                    record.modified,
                    record.deleted,
                ],
            )?;
        }
        Self::recompute_stats(&tx, identity_id, name)?;
        tx.commit()?;
        Ok(())
    }

    /// `0` if the dataset has never been synced or is unknown locally.
    pub fn get_last_sync_count(&self, identity_id: &str, name: &str) -> Result<i64> {
        Ok(self
            .get_dataset_metadata(identity_id, name)?
            .map(|m| m.last_sync_count)
            .unwrap_or(0))
    }

    pub fn update_last_sync_count(&self, identity_id: &str, name: &str, count: i64) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        if Self::read_dataset_tx(&tx, identity_id, name)?.is_none() {
            let now = now_ms();
            tx.execute(
                "INSERT INTO datasets(identity_id, name, creation_date, last_modified_date,
                    last_modified_by, storage_size_bytes, record_count, last_sync_count)
                 VALUES (?1, ?2, ?3, ?3, NULL, 0, 0, ?4)",
                params![identity_id, name, now, count],
            )?;
        } else {
            tx.execute(
                "UPDATE datasets SET last_sync_count = ?3 WHERE identity_id = ?1 AND name = ?2",
                params![identity_id, name, count],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn get_total_size_in_bytes(&self, identity_id: &str) -> Result<u64> {
        let conn = self.conn.lock();
        let total: i64 = conn.query_row(
            "SELECT COALESCE(SUM(storage_size_bytes), 0) FROM datasets WHERE identity_id = ?1",
            params![identity_id],
            |r| r.get(0),
        )?;
        Ok(total as u64)
    }

    pub fn get_size_in_bytes(&self, identity_id: &str, name: &str) -> Result<u64> {
        Ok(self
            .get_dataset_metadata(identity_id, name)?
            .map(|m| m.storage_size_bytes)
            .unwrap_or(0))
    }

    /// Relocates every row from `old` to `new` in one transaction. If the
    /// destination already has a dataset of the same name, the
    /// destination's records win on key conflict, and a merged-dataset
    /// shadow `"{name}.{old}"` is inserted under `new` to surface the
    /// superseded history to the sync protocol.
    pub fn change_identity_id(&self, old: &str, new: &str) -> Result<()> {
        if old == new {
            return Ok(());
        }
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let old_datasets: Vec<String> = {
            let mut stmt =
                tx.prepare("SELECT name FROM datasets WHERE identity_id = ?1")?;
            let rows = stmt.query_map(params![old], |r| r.get::<_, String>(0))?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            out
        };

        for name in old_datasets {
            let collides = Self::read_dataset_tx(&tx, new, &name)?.is_some();
            if !collides {
                tx.execute(
                    "UPDATE datasets SET identity_id = ?3 WHERE identity_id = ?1 AND name = ?2",
                    params![old, name, new],
                )?;
                tx.execute(
                    "UPDATE records SET identity_id = ?3
                     WHERE identity_id = ?1 AND dataset_name = ?2",
                    params![old, name, new],
                )?;
            } else {
                let shadow_name = format!("{name}.{old}");
                tx.execute(
                    "UPDATE datasets SET identity_id = ?3, name = ?4
                     WHERE identity_id = ?1 AND name = ?2",
                    params![old, name, new, shadow_name],
                )?;
                tx.execute(
                    "UPDATE records SET identity_id = ?3, dataset_name = ?4
                     WHERE identity_id = ?1 AND dataset_name = ?2",
                    params![old, name, new, shadow_name],
                )?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Removes all rows of all identities.
    pub fn wipe_data(&self) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM records", [])?;
        tx.execute("DELETE FROM datasets", [])?;
        tx.commit()?;
        Ok(())
    }

    // -- internal helpers --

    fn read_dataset(conn: &Connection, identity_id: &str, name: &str) -> Result<Option<DatasetMetadata>> {
        conn.query_row(
            "SELECT identity_id, name, creation_date, last_modified_date, last_modified_by,
                    storage_size_bytes, record_count, last_sync_count
             FROM datasets WHERE identity_id = ?1 AND name = ?2",
            params![identity_id, name],
            Self::row_to_metadata,
        )
        .optional()
        .map_err(SyncError::from)
    }

    fn read_dataset_tx(
        tx: &Transaction<'_>,
        identity_id: &str,
        name: &str,
    ) -> Result<Option<DatasetMetadata>> {
        tx.query_row(
            "SELECT identity_id, name, creation_date, last_modified_date, last_modified_by,
                    storage_size_bytes, record_count, last_sync_count
             FROM datasets WHERE identity_id = ?1 AND name = ?2",
            params![identity_id, name],
            Self::row_to_metadata,
        )
        .optional()
        .map_err(SyncError::from)
    }

    fn row_to_metadata(row: &rusqlite::Row<'_>) -> rusqlite::Result<DatasetMetadata> {
        Ok(DatasetMetadata {
            identity_id: row.get(0)?,
            name: row.get(1)?,
            creation_date: row.get(2)?,
            last_modified_date: row.get(3)?,
            last_modified_by: row.get(4)?,
            storage_size_bytes: row.get::<_, i64>(5)? as u64,
            record_count: row.get::<_, i64>(6)? as u64,
            last_sync_count: row.get(7)?,
        })
    }

    fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<Record> {
        Ok(Record {
            key: row.get(0)?,
            value: row.get(1)?,
            sync_count: row.get::<_, i64>(2)? as u64,
            last_modified_date: row.get(3)?,
            device_last_modified_date: row.get(4)?,
            last_modified_by: row.get(5)?,
            modified: row.get(6)?,
            deleted: row.get(7)?,
        })
    }

    /// Recomputes `storage_size_bytes`/`record_count` from the live
    /// (non-tombstoned) records of a dataset.
    fn recompute_stats(tx: &Transaction<'_>, identity_id: &str, name: &str) -> Result<()> {
        let (size, count): (i64, i64) = tx.query_row(
            "SELECT COALESCE(SUM(LENGTH(key) + LENGTH(COALESCE(value, ''))), 0), COUNT(*)
             FROM records
             WHERE identity_id = ?1 AND dataset_name = ?2 AND deleted = 0",
            params![identity_id, name],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;
        let now = now_ms();
        tx.execute(
            "UPDATE datasets SET storage_size_bytes = ?3, record_count = ?4,
                last_modified_date = ?5
             WHERE identity_id = ?1 AND name = ?2",
            params![identity_id, name, size, count, now],
        )?;
        Ok(())
    }

    fn check_dataset_size_limit(&self, tx: &Transaction<'_>, identity_id: &str, name: &str) -> Result<()> {
        let Some(limit) = self.config.max_dataset_size_bytes else {
            return Ok(());
        };
        let size: i64 = tx.query_row(
            "SELECT COALESCE(SUM(LENGTH(key) + LENGTH(COALESCE(value, ''))), 0)
             FROM records WHERE identity_id = ?1 AND dataset_name = ?2 AND deleted = 0",
            params![identity_id, name],
            |r| r.get(0),
        )?;
        if size as u64 > limit {
            return Err(SyncError::DataLimitExceeded(format!(
                "dataset '{name}' exceeds local size cap of {limit} bytes"
            )));
        }
        Ok(())
    }

    fn check_dataset_count_limit(&self, conn: &Connection, identity_id: &str) -> Result<()> {
        let Some(limit) = self.config.max_datasets_per_identity else {
            return Ok(());
        };
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM datasets WHERE identity_id = ?1",
            params![identity_id],
            |r| r.get(0),
        )?;
        if count as u64 >= limit {
            return Err(SyncError::DataLimitExceeded(format!(
                "identity '{identity_id}' already has {count} datasets (cap {limit})"
            )));
        }
        Ok(())
    }
}

impl Default for LocalStore {
    fn default() -> Self {
        Self::open_in_memory(SyncManagerConfig::default())
            .expect("in-memory sqlite connection should always open")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> LocalStore {
        LocalStore::open_in_memory(SyncManagerConfig::default()).unwrap()
    }

    #[test]
    fn put_then_get_round_trips() {
        let s = store();
        s.put_value("id-1", "ds", "score", Some("100")).unwrap();
        assert_eq!(s.get_value("id-1", "ds", "score").unwrap(), Some("100".into()));
    }

    #[test]
    fn remove_is_a_tombstoning_write() {
        let s = store();
        s.put_value("id-1", "ds", "score", Some("100")).unwrap();
        s.put_value("id-1", "ds", "score", None).unwrap();
        assert_eq!(s.get_value("id-1", "ds", "score").unwrap(), None);
        let record = s.get_record("id-1", "ds", "score").unwrap().unwrap();
        assert!(record.deleted);
        assert!(record.modified);
    }

    #[test]
    fn put_records_clears_modified_and_sets_sync_count() {
        let s = store();
        s.put_value("id-1", "ds", "k", Some("v")).unwrap();
        s.put_records(
            "id-1",
            "ds",
            &[Record {
                key: "k".into(),
                value: Some("v".into()),
                sync_count: 1,
                last_modified_date: 1,
                device_last_modified_date: 1,
                last_modified_by: None,
                modified: false,
                deleted: false,
            }],
        )
        .unwrap();
        let record = s.get_record("id-1", "ds", "k").unwrap().unwrap();
        assert!(!record.modified);
        assert_eq!(record.sync_count, 1);
    }

    #[test]
    fn delete_dataset_marks_sentinel_and_tombstones() {
        let s = store();
        s.put_value("id-1", "ds", "k", Some("v")).unwrap();
        s.delete_dataset("id-1", "ds").unwrap();
        let meta = s.get_dataset_metadata("id-1", "ds").unwrap().unwrap();
        assert!(meta.is_pending_local_delete());
        let record = s.get_record("id-1", "ds", "k").unwrap().unwrap();
        assert!(record.deleted);
    }

    #[test]
    fn purge_removes_everything() {
        let s = store();
        s.put_value("id-1", "ds", "k", Some("v")).unwrap();
        s.purge_dataset("id-1", "ds").unwrap();
        assert!(s.get_dataset_metadata("id-1", "ds").unwrap().is_none());
        assert!(s.get_record("id-1", "ds", "k").unwrap().is_none());
    }

    #[test]
    fn change_identity_id_relocates_rows_without_collision() {
        let s = store();
        s.put_value(UNKNOWN_IDENTITY_ID, "ds", "k", Some("v")).unwrap();
        s.change_identity_id(UNKNOWN_IDENTITY_ID, "id-42").unwrap();
        assert!(s.get_datasets(UNKNOWN_IDENTITY_ID).unwrap().is_empty());
        assert_eq!(s.get_datasets("id-42").unwrap().len(), 1);
        assert_eq!(s.get_value("id-42", "ds", "k").unwrap(), Some("v".into()));
    }

    #[test]
    fn change_identity_id_shadows_on_collision() {
        let s = store();
        s.put_value(UNKNOWN_IDENTITY_ID, "ds", "k", Some("old")).unwrap();
        s.put_value("id-42", "ds", "k", Some("new")).unwrap();
        s.change_identity_id(UNKNOWN_IDENTITY_ID, "id-42").unwrap();
        // destination wins
        assert_eq!(s.get_value("id-42", "ds", "k").unwrap(), Some("new".into()));
        // shadow carries the superseded history
        let shadow = format!("ds.{UNKNOWN_IDENTITY_ID}");
        assert_eq!(
            s.get_value("id-42", &shadow, "k").unwrap(),
            Some("old".into())
        );
    }

    #[test]
    fn wipe_data_removes_all_identities() {
        let s = store();
        s.put_value("id-1", "ds", "k", Some("v")).unwrap();
        s.put_value("id-2", "ds", "k", Some("v")).unwrap();
        s.wipe_data().unwrap();
        assert!(s.get_datasets("id-1").unwrap().is_empty());
        assert!(s.get_datasets("id-2").unwrap().is_empty());
    }

    #[test]
    fn size_limit_rejects_oversized_writes() {
        let s = LocalStore::open_in_memory(SyncManagerConfig {
            max_dataset_size_bytes: Some(4),
            ..SyncManagerConfig::default()
        })
        .unwrap();
        let err = s.put_value("id-1", "ds", "k", Some("too long")).unwrap_err();
        assert!(matches!(err, SyncError::DataLimitExceeded(_)));
    }

    #[test]
    fn file_backed_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.sqlite3");
        let path_str = path.to_str().unwrap();

        {
            let s = LocalStore::open(path_str, SyncManagerConfig::default()).unwrap();
            s.put_value("id-1", "ds", "k", Some("v")).unwrap();
        }

        let reopened = LocalStore::open(path_str, SyncManagerConfig::default()).unwrap();
        assert_eq!(
            reopened.get_value("id-1", "ds", "k").unwrap(),
            Some("v".into())
        );
    }
}

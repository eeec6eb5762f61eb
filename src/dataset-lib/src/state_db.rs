use crate::metadata::{validate_value, MetaKey, MetaValue, Metadata, Namespace};
use crate::operation::{
    check_transition, Operation, OperationMap, OperationRecord, OperationState, Transition,
};
use crate::{DatasetError, DatasetResult};
use chrono::{DateTime, TimeZone, Utc};
use log::{debug, info, warn};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// The durable row behind a dataset's native `dataset.*` keys.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetRecord {
    pub name: String,
    /// Lowercase hex MD5 of the archive.
    pub resource_id: String,
    pub controller: String,
    pub owner: String,
    pub access: String,
    pub uploaded: DateTime<Utc>,
}

/// SQLite-backed Operation State and metadata for every dataset.
pub struct DatasetStateDb {
    pub db_path: String,
    conn: Mutex<Connection>,
}

impl DatasetStateDb {
    pub fn new(db_path: &Path) -> DatasetResult<Self> {
        let db_path = db_path.to_string_lossy().to_string();
        debug!("DatasetStateDb: open db: {}", db_path);
        let conn = Connection::open(&db_path).map_err(|e| {
            warn!("DatasetStateDb: open db failed! {}", e);
            DatasetError::DbError(e.to_string())
        })?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS datasets (
                name TEXT PRIMARY KEY,
                resource_id TEXT NOT NULL,
                controller TEXT NOT NULL,
                owner TEXT NOT NULL,
                access TEXT NOT NULL,
                uploaded INTEGER NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS datasets_resource_id_unique ON datasets (resource_id);
            CREATE TABLE IF NOT EXISTS dataset_operations (
                dataset TEXT NOT NULL,
                operation TEXT NOT NULL,
                state TEXT NOT NULL,
                message TEXT,
                update_time INTEGER NOT NULL,
                PRIMARY KEY (dataset, operation)
            );
            CREATE TABLE IF NOT EXISTS dataset_metadata (
                dataset TEXT NOT NULL,
                namespace TEXT NOT NULL,
                user TEXT NOT NULL DEFAULT '',
                value TEXT NOT NULL,
                PRIMARY KEY (dataset, namespace, user)
            );",
        )
        .map_err(|e| {
            warn!("DatasetStateDb: create tables failed! {}", e);
            DatasetError::DbError(e.to_string())
        })?;

        Ok(Self {
            db_path,
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> DatasetResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| DatasetError::Internal("state db lock poisoned".to_string()))
    }

    // ---------- dataset records ----------

    /// Insert a dataset record. Both the name and the resource id must be new;
    /// the check and the insert run under one connection lock.
    pub fn add_dataset(&self, record: &DatasetRecord) -> DatasetResult<()> {
        let conn = self.conn()?;
        if let Some(existing) = Self::query_dataset(&conn, "resource_id", &record.resource_id)? {
            warn!(
                "DatasetStateDb: {} has the resource id of {} ({})",
                record.name, existing.name, existing.resource_id
            );
            return Err(DatasetError::DuplicateDataset(existing.name));
        }
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO datasets (name, resource_id, controller, owner, access, uploaded)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.name,
                record.resource_id,
                record.controller,
                record.owner,
                record.access,
                record.uploaded.timestamp(),
            ],
        )?;
        if inserted == 0 {
            return Err(DatasetError::DuplicateDataset(record.name.clone()));
        }
        info!("DatasetStateDb: add dataset {} ({})", record.name, record.resource_id);
        Ok(())
    }

    pub fn get_dataset(&self, name: &str) -> DatasetResult<DatasetRecord> {
        let conn = self.conn()?;
        Self::query_dataset(&conn, "name", name)?
            .ok_or_else(|| DatasetError::DatasetNotFound(name.to_string()))
    }

    pub fn find_by_resource_id(&self, resource_id: &str) -> DatasetResult<Option<DatasetRecord>> {
        let conn = self.conn()?;
        Self::query_dataset(&conn, "resource_id", resource_id)
    }

    fn query_dataset(
        conn: &Connection,
        column: &str,
        value: &str,
    ) -> DatasetResult<Option<DatasetRecord>> {
        let sql = format!(
            "SELECT name, resource_id, controller, owner, access, uploaded
             FROM datasets WHERE {} = ?1",
            column
        );
        let record = conn
            .query_row(&sql, params![value], Self::row_to_record)
            .optional()?;
        Ok(record)
    }

    fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<DatasetRecord> {
        let uploaded: i64 = row.get(5)?;
        Ok(DatasetRecord {
            name: row.get(0)?,
            resource_id: row.get(1)?,
            controller: row.get(2)?,
            owner: row.get(3)?,
            access: row.get(4)?,
            uploaded: Utc
                .timestamp_opt(uploaded, 0)
                .single()
                .unwrap_or_default(),
        })
    }

    fn dataset_exists(conn: &Connection, name: &str) -> DatasetResult<bool> {
        let known: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM datasets WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(known.is_some())
    }

    /// All dataset records ordered by name.
    pub fn list_datasets(&self) -> DatasetResult<Vec<DatasetRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT name, resource_id, controller, owner, access, uploaded
             FROM datasets ORDER BY name",
        )?;
        let rows = stmt.query_map([], Self::row_to_record)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Drop every trace of a dataset: record, operations and metadata.
    pub fn remove_dataset(&self, name: &str) -> DatasetResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM datasets WHERE name = ?1", params![name])?;
        tx.execute(
            "DELETE FROM dataset_operations WHERE dataset = ?1",
            params![name],
        )?;
        tx.execute(
            "DELETE FROM dataset_metadata WHERE dataset = ?1",
            params![name],
        )?;
        tx.commit().map_err(|e| {
            warn!("DatasetStateDb: commit failed! {}", e);
            DatasetError::DbError(e.to_string())
        })?;
        info!("DatasetStateDb: removed dataset {}", name);
        Ok(())
    }

    // ---------- operation state ----------

    fn load_operations(conn: &Connection, dataset: &str) -> DatasetResult<OperationMap> {
        let mut stmt = conn.prepare(
            "SELECT operation, state, message, update_time
             FROM dataset_operations WHERE dataset = ?1",
        )?;
        let rows = stmt.query_map(params![dataset], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?;

        let mut out = OperationMap::new();
        for row in rows {
            let (operation, state, message, update_time) = row?;
            let operation = match operation.parse::<Operation>() {
                Ok(op) => op,
                Err(_) => {
                    warn!(
                        "DatasetStateDb: dataset {} has unknown operation {}, ignored",
                        dataset, operation
                    );
                    continue;
                }
            };
            let state = OperationState::from_str(&state).ok_or_else(|| {
                DatasetError::DbError(format!("bad state {} for {}:{}", state, dataset, operation))
            })?;
            out.insert(
                operation,
                OperationRecord {
                    state,
                    message,
                    timestamp: update_time.max(0) as u64,
                },
            );
        }
        Ok(out)
    }

    fn write_operation(
        tx: &Transaction<'_>,
        dataset: &str,
        operation: Operation,
        record: &OperationRecord,
    ) -> DatasetResult<()> {
        tx.execute(
            "INSERT OR REPLACE INTO dataset_operations
             (dataset, operation, state, message, update_time)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                dataset,
                operation.as_str(),
                record.state.as_str(),
                record.message,
                record.timestamp as i64,
            ],
        )?;
        Ok(())
    }

    pub fn operations(&self, dataset: &str) -> DatasetResult<OperationMap> {
        let conn = self.conn()?;
        Self::load_operations(&conn, dataset)
    }

    /// Record UPLOAD=OK for a freshly created dataset.
    pub fn init_operations(&self, dataset: &str) -> DatasetResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM dataset_operations WHERE dataset = ?1",
            params![dataset],
        )?;
        let record = OperationRecord {
            state: OperationState::Ok,
            message: None,
            timestamp: unix_timestamp(),
        };
        Self::write_operation(&tx, dataset, Operation::Upload, &record)?;
        tx.commit()?;
        Ok(())
    }

    /// Validate and apply one transition atomically: the check and the write
    /// happen in the same transaction under the connection lock.
    pub fn transition(
        &self,
        dataset: &str,
        operation: Operation,
        transition: Transition,
        message: Option<&str>,
    ) -> DatasetResult<OperationRecord> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        if !Self::dataset_exists(&tx, dataset)? {
            return Err(DatasetError::DatasetNotFound(dataset.to_string()));
        }

        let current = Self::load_operations(&tx, dataset)?;
        let state = check_transition(dataset, operation, transition, &current)?;
        let record = OperationRecord {
            state,
            message: message.map(|m| m.to_string()),
            timestamp: unix_timestamp(),
        };
        Self::write_operation(&tx, dataset, operation, &record)?;
        tx.commit()?;
        debug!(
            "DatasetStateDb: {} {} -> {}",
            dataset, operation, record.state
        );
        Ok(record)
    }

    /// WORKING records whose last transition is at least `older_than_secs`
    /// old; candidates for a forced retry.
    pub fn stuck_operations(
        &self,
        older_than_secs: u64,
    ) -> DatasetResult<Vec<(String, Operation, OperationRecord)>> {
        let cutoff = unix_timestamp().saturating_sub(older_than_secs) as i64;
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT dataset, operation, message, update_time FROM dataset_operations
             WHERE state = 'WORKING' AND update_time <= ?1 ORDER BY dataset, operation",
        )?;
        let rows = stmt.query_map(params![cutoff], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (dataset, operation, message, update_time) = row?;
            if let Ok(operation) = operation.parse::<Operation>() {
                out.push((
                    dataset,
                    operation,
                    OperationRecord {
                        state: OperationState::Working,
                        message,
                        timestamp: update_time.max(0) as u64,
                    },
                ));
            }
        }
        Ok(out)
    }

    // ---------- metadata ----------

    fn load_namespace(
        conn: &Connection,
        dataset: &str,
        namespace: Namespace,
        user: &str,
    ) -> DatasetResult<Option<Value>> {
        let raw: Option<String> = conn
            .query_row(
                "SELECT value FROM dataset_metadata
                 WHERE dataset = ?1 AND namespace = ?2 AND user = ?3",
                params![dataset, namespace.as_str(), user],
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| DatasetError::DbError(format!("bad metadata for {}: {}", dataset, e))),
            None => Ok(None),
        }
    }

    /// Set one client-writable key. `user` scopes the `user.*` namespace.
    pub fn set_metadata(
        &self,
        dataset: &str,
        key: &MetaKey,
        value: MetaValue,
        user: Option<&str>,
    ) -> DatasetResult<()> {
        if !key.is_writable() {
            return Err(DatasetError::InvalidMetadataKey(key.to_string()));
        }
        self.put_metadata(dataset, key, value, user)
    }

    /// Store any non-native key, e.g. the server-owned `server.tarball-path`.
    pub fn put_metadata(
        &self,
        dataset: &str,
        key: &MetaKey,
        value: MetaValue,
        user: Option<&str>,
    ) -> DatasetResult<()> {
        if key.is_namespace_root() || key.is_native() {
            return Err(DatasetError::InvalidMetadataKey(key.to_string()));
        }
        let value = validate_value(key, value)?;
        let user = match key.namespace() {
            Namespace::User => user.ok_or_else(|| DatasetError::InvalidMetadataValue {
                key: key.to_string(),
                reason: "user metadata requires an authenticated user".to_string(),
            })?,
            _ => "",
        };

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        if !Self::dataset_exists(&tx, dataset)? {
            return Err(DatasetError::DatasetNotFound(dataset.to_string()));
        }

        if key.to_string() == "dataset.access" {
            let access = value.as_str().unwrap_or_default().to_string();
            let updated = tx.execute(
                "UPDATE datasets SET access = ?1 WHERE name = ?2",
                params![access, dataset],
            )?;
            debug!("DatasetStateDb: {} access -> {} ({})", dataset, access, updated);
            tx.commit()?;
            return Ok(());
        }

        let namespace = key.namespace();
        let root = MetaKey::parse(namespace.as_str())?;
        let mut md = Metadata::new();
        if let Some(stored) = Self::load_namespace(&tx, dataset, namespace, user)? {
            md.set(&root, MetaValue::from_json_typed(&root, &stored));
        }
        md.set(key, value);
        let json = md
            .namespace(namespace)
            .map(|v| v.to_json())
            .unwrap_or(Value::Null);

        tx.execute(
            "INSERT OR REPLACE INTO dataset_metadata (dataset, namespace, user, value)
             VALUES (?1, ?2, ?3, ?4)",
            params![dataset, namespace.as_str(), user, json.to_string()],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Build the resolved metadata mapping of a dataset: stored namespaces
    /// plus the native `dataset.*` keys and `dataset.operations`.
    pub fn resolve_metadata(&self, dataset: &str, user: Option<&str>) -> DatasetResult<Metadata> {
        let conn = self.conn()?;
        let record = Self::query_dataset(&conn, "name", dataset)?
            .ok_or_else(|| DatasetError::DatasetNotFound(dataset.to_string()))?;

        let mut md = Metadata::new();
        for namespace in [Namespace::Dataset, Namespace::Server, Namespace::Global] {
            if let Some(stored) = Self::load_namespace(&conn, dataset, namespace, "")? {
                let root = MetaKey::parse(namespace.as_str())?;
                md.set(&root, MetaValue::from_json_typed(&root, &stored));
            }
        }
        if let Some(user) = user {
            if let Some(stored) = Self::load_namespace(&conn, dataset, Namespace::User, user)? {
                let root = MetaKey::parse(Namespace::User.as_str())?;
                md.set(&root, MetaValue::from_json_typed(&root, &stored));
            }
        }

        let native = [
            ("dataset.name", MetaValue::Str(record.name.clone())),
            ("dataset.resource_id", MetaValue::Str(record.resource_id.clone())),
            ("dataset.owner", MetaValue::Str(record.owner.clone())),
            ("dataset.access", MetaValue::Str(record.access.clone())),
            ("dataset.uploaded", MetaValue::Date(record.uploaded)),
        ];
        for (key, value) in native {
            md.set(&MetaKey::parse(key)?, value);
        }

        let operations = Self::load_operations(&conn, dataset)?;
        let mut ops = BTreeMap::new();
        for (op, rec) in operations {
            let mut entry = BTreeMap::new();
            entry.insert(
                "state".to_string(),
                MetaValue::Str(rec.state.as_str().to_string()),
            );
            entry.insert(
                "message".to_string(),
                rec.message.map(MetaValue::Str).unwrap_or(MetaValue::Null),
            );
            entry.insert(
                "timestamp".to_string(),
                Utc.timestamp_opt(rec.timestamp as i64, 0)
                    .single()
                    .map(MetaValue::Date)
                    .unwrap_or(MetaValue::Null),
            );
            ops.insert(op.as_str().to_string(), MetaValue::Map(entry));
        }
        md.set(&MetaKey::parse("dataset.operations")?, MetaValue::Map(ops));
        Ok(md)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn create_test_db() -> (DatasetStateDb, TempDir) {
        let tmp_dir = TempDir::new().unwrap();
        let db = DatasetStateDb::new(&tmp_dir.path().join("state.db")).unwrap();
        (db, tmp_dir)
    }

    fn sample_record(name: &str) -> DatasetRecord {
        DatasetRecord {
            name: name.to_string(),
            resource_id: format!(
                "{:0>32}",
                name.bytes().map(|b| format!("{:02x}", b)).collect::<String>()
            ),
            controller: "ABC".to_string(),
            owner: "tester".to_string(),
            access: "private".to_string(),
            uploaded: Utc.with_ymd_and_hms(2021, 5, 1, 12, 42, 42).unwrap(),
        }
    }

    #[test]
    fn test_dataset_records() {
        let (db, _tmp) = create_test_db();
        let record = sample_record("ds1");
        db.add_dataset(&record).unwrap();
        assert_eq!(db.get_dataset("ds1").unwrap(), record);
        assert!(db.add_dataset(&record).unwrap_err().is_conflict());
        assert_eq!(
            db.find_by_resource_id(&record.resource_id).unwrap(),
            Some(record.clone())
        );
        assert!(db.get_dataset("nope").unwrap_err().is_not_found());

        db.remove_dataset("ds1").unwrap();
        assert!(db.list_datasets().unwrap().is_empty());
    }

    #[test]
    fn test_resource_id_is_unique() {
        let (db, _tmp) = create_test_db();
        let first = sample_record("ds1");
        db.add_dataset(&first).unwrap();

        let mut same_bytes = sample_record("ds2");
        same_bytes.resource_id = first.resource_id.clone();
        let err = db.add_dataset(&same_bytes).unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(err.dataset(), Some("ds1"));
        assert!(db.get_dataset("ds2").unwrap_err().is_not_found());

        db.add_dataset(&sample_record("ds2")).unwrap();
        assert_eq!(db.list_datasets().unwrap().len(), 2);
    }

    #[test]
    fn test_operation_flow() {
        let (db, _tmp) = create_test_db();
        db.add_dataset(&sample_record("ds1")).unwrap();
        db.init_operations("ds1").unwrap();

        let ops = db.operations("ds1").unwrap();
        assert_eq!(ops[&Operation::Upload].state, OperationState::Ok);
        assert!(!ops.contains_key(&Operation::Unpack));

        // INDEX before UNPACK is rejected and leaves no trace.
        let err = db
            .transition("ds1", Operation::Index, Transition::Begin, None)
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::State);
        assert!(!db.operations("ds1").unwrap().contains_key(&Operation::Index));

        db.transition("ds1", Operation::Unpack, Transition::Begin, None)
            .unwrap();
        db.transition(
            "ds1",
            Operation::Unpack,
            Transition::Complete { ok: true },
            Some("unpacked"),
        )
        .unwrap();
        let rec = db
            .transition("ds1", Operation::Index, Transition::Begin, None)
            .unwrap();
        assert_eq!(rec.state, OperationState::Working);

        assert!(db
            .transition("nope", Operation::Unpack, Transition::Begin, None)
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_stuck_working_detected() {
        let (db, _tmp) = create_test_db();
        db.add_dataset(&sample_record("ds1")).unwrap();
        db.init_operations("ds1").unwrap();
        db.transition("ds1", Operation::Unpack, Transition::Begin, None)
            .unwrap();

        let stuck = db.stuck_operations(0).unwrap();
        assert_eq!(stuck.len(), 1);
        assert_eq!(stuck[0].0, "ds1");
        assert_eq!(stuck[0].1, Operation::Unpack);
        assert!(db.stuck_operations(3600).unwrap().is_empty());

        let rec = db
            .transition("ds1", Operation::Unpack, Transition::ForceRetry, Some("retry"))
            .unwrap();
        assert_eq!(rec.state, OperationState::Working);
        assert_eq!(rec.message.as_deref(), Some("retry"));
    }

    #[test]
    fn test_concurrent_begin_single_winner() {
        let (db, _tmp) = create_test_db();
        db.add_dataset(&sample_record("ds1")).unwrap();
        db.init_operations("ds1").unwrap();
        let db = Arc::new(db);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let db = db.clone();
                std::thread::spawn(move || {
                    db.transition("ds1", Operation::Unpack, Transition::Begin, None)
                        .is_ok()
                })
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn test_metadata_roundtrip() {
        let (db, _tmp) = create_test_db();
        db.add_dataset(&sample_record("ds1")).unwrap();
        db.init_operations("ds1").unwrap();

        db.set_metadata(
            "ds1",
            &MetaKey::parse("server.deletion").unwrap(),
            MetaValue::Str("2023-05-01".to_string()),
            None,
        )
        .unwrap();
        db.set_metadata(
            "ds1",
            &MetaKey::parse("server.archiveonly").unwrap(),
            MetaValue::Str("n".to_string()),
            None,
        )
        .unwrap();
        db.set_metadata(
            "ds1",
            &MetaKey::parse("dataset.metalog.pbench.script").unwrap(),
            MetaValue::Str("fio".to_string()),
            None,
        )
        .unwrap();
        db.set_metadata(
            "ds1",
            &MetaKey::parse("user.pbench.access").unwrap(),
            MetaValue::Str("public".to_string()),
            Some("tester"),
        )
        .unwrap();
        db.set_metadata(
            "ds1",
            &MetaKey::parse("dataset.access").unwrap(),
            MetaValue::Str("public".to_string()),
            None,
        )
        .unwrap();

        assert!(db
            .set_metadata(
                "ds1",
                &MetaKey::parse("dataset.owner").unwrap(),
                MetaValue::Str("x".to_string()),
                None,
            )
            .is_err());
        assert!(db
            .set_metadata(
                "ds1",
                &MetaKey::parse("user.x").unwrap(),
                MetaValue::Str("x".to_string()),
                None,
            )
            .is_err());

        let md = db.resolve_metadata("ds1", Some("tester")).unwrap();
        assert_eq!(
            md.get_str("server.deletion"),
            Some(&MetaValue::Date(
                Utc.with_ymd_and_hms(2023, 5, 1, 0, 0, 0).unwrap()
            ))
        );
        assert_eq!(md.get_str("server.archiveonly"), Some(&MetaValue::Bool(false)));
        assert_eq!(
            md.get_str("dataset.metalog.pbench.script").and_then(|v| v.as_str()),
            Some("fio")
        );
        assert_eq!(
            md.get_str("user.pbench.access").and_then(|v| v.as_str()),
            Some("public")
        );
        assert_eq!(
            md.get_str("dataset.access").and_then(|v| v.as_str()),
            Some("public")
        );
        assert_eq!(
            md.get_str("dataset.operations.UPLOAD.state")
                .and_then(|v| v.as_str()),
            Some("OK")
        );

        // Another user does not see tester's user namespace.
        let other = db.resolve_metadata("ds1", Some("someone")).unwrap();
        assert_eq!(other.get_str("user.pbench.access"), None);
    }

    #[test]
    fn test_server_owned_keys() {
        let (db, _tmp) = create_test_db();
        db.add_dataset(&sample_record("ds1")).unwrap();
        let path_key = MetaKey::parse("server.tarball-path").unwrap();

        assert!(db
            .set_metadata("ds1", &path_key, MetaValue::Str("/x".to_string()), None)
            .is_err());
        db.put_metadata("ds1", &path_key, MetaValue::Str("/x".to_string()), None)
            .unwrap();
        assert_eq!(
            db.resolve_metadata("ds1", None)
                .unwrap()
                .get(&path_key)
                .and_then(|v| v.as_str()),
            Some("/x")
        );

        // Native keys are never stored.
        assert!(db
            .put_metadata(
                "ds1",
                &MetaKey::parse("dataset.name").unwrap(),
                MetaValue::Str("other".to_string()),
                None
            )
            .is_err());
        assert!(db
            .put_metadata("nope", &path_key, MetaValue::Str("/x".to_string()), None)
            .unwrap_err()
            .is_not_found());
    }
}

use crate::list::{sort_entries, CompiledQuery, ListEntry, ListQuery};
use crate::search::{NullIndexer, SearchDocument, SearchIndexer};
use chrono::{Duration, Utc};
use dataset_lib::*;
use file_tree::*;
use log::*;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Sections of a dataset's `metadata.log`, `section -> key -> value`.
pub type Metalog = BTreeMap<String, BTreeMap<String, String>>;

const UNKNOWN_BENCHMARK: &str = "unknown";

#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub controller: String,
    pub tarball_path: PathBuf,
    /// MD5 the client computed before sending the archive.
    pub md5: String,
    pub owner: String,
    /// `public` or `private`; `None` is private.
    pub access: Option<String>,
    /// `key:value` overrides, e.g. `server.origin:test`.
    pub metadata: Vec<String>,
    /// Parsed `metadata.log`; `None` when the archive carries none.
    pub metalog: Option<Metalog>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Created {
        name: String,
        resource_id: String,
        notes: Vec<String>,
    },
    /// The same bytes were ingested before; nothing was changed.
    AlreadyExists { name: String, resource_id: String },
}

/// Split the comma separated override strings into validated pairs.
pub fn parse_overrides(overrides: &[String]) -> DatasetResult<Vec<(MetaKey, MetaValue)>> {
    let mut out = Vec::new();
    for item in overrides.iter().flat_map(|s| s.split(',')) {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        let (key, value) = item.split_once(':').ok_or_else(|| {
            DatasetError::InvalidMetadataValue {
                key: item.to_string(),
                reason: "expected key:value".to_string(),
            }
        })?;
        let key = MetaKey::parse(key.trim())?;
        if !key.is_writable() {
            return Err(DatasetError::InvalidMetadataKey(key.to_string()));
        }
        let value = validate_value(&key, MetaValue::Str(value.trim().to_string()))?;
        out.push((key, value));
    }
    Ok(out)
}

fn metalog_value(metalog: &Metalog) -> MetaValue {
    MetaValue::Map(
        metalog
            .iter()
            .map(|(section, items)| {
                let items = items
                    .iter()
                    .map(|(k, v)| (k.clone(), MetaValue::Str(v.clone())))
                    .collect();
                (section.clone(), MetaValue::Map(items))
            })
            .collect(),
    )
}

pub struct DatasetMgr {
    config: FileTreeConfig,
    file_tree: Arc<FileTree>,
    state_db: Arc<DatasetStateDb>,
    indexer: Arc<dyn SearchIndexer>,
}

impl DatasetMgr {
    pub async fn new(config: FileTreeConfig) -> DatasetResult<Self> {
        // FileTree::new creates the roots the state db lives under.
        let file_tree = FileTree::new(config.clone()).await?;
        let state_db = Arc::new(DatasetStateDb::new(&config.state_db_path())?);
        let file_tree = Arc::new(file_tree.with_state_db(state_db.clone()));
        file_tree.full_discovery().await?;
        info!(
            "DatasetMgr: ready, {} datasets under {}",
            file_tree.datasets().len(),
            file_tree.archive_root().display()
        );

        Ok(Self {
            config,
            file_tree,
            state_db,
            indexer: Arc::new(NullIndexer),
        })
    }

    pub fn with_indexer(mut self, indexer: Arc<dyn SearchIndexer>) -> Self {
        self.indexer = indexer;
        self
    }

    pub fn config(&self) -> &FileTreeConfig {
        &self.config
    }

    pub fn file_tree(&self) -> &Arc<FileTree> {
        &self.file_tree
    }

    pub fn state_db(&self) -> &Arc<DatasetStateDb> {
        &self.state_db
    }

    // ---------- ingest ----------

    /// Verify and archive one uploaded tarball, then record its dataset,
    /// Operation State and initial metadata. Any failure after the archive
    /// was installed removes it again.
    pub async fn ingest(&self, req: IngestRequest) -> DatasetResult<IngestOutcome> {
        let name = dataset_name(&req.tarball_path)?;
        validate_controller_name(&req.controller)?;
        let overrides = parse_overrides(&req.metadata)?;
        let access_key = MetaKey::parse("dataset.access")?;
        let access = match &req.access {
            Some(access) => validate_value(&access_key, MetaValue::Str(access.clone()))?
                .as_str()
                .unwrap_or(ACCESS_PRIVATE)
                .to_string(),
            None => ACCESS_PRIVATE.to_string(),
        };

        let expected = req.md5.trim().to_ascii_lowercase();
        let actual = compute_md5(&req.tarball_path).await?;
        if expected != actual {
            return Err(DatasetError::ChecksumMismatch {
                path: req.tarball_path.clone(),
                expected,
                actual,
            });
        }

        if let Some(existing) = self.state_db.find_by_resource_id(&actual)? {
            info!(
                "DatasetMgr: {} already exists as {} ({})",
                name, existing.name, existing.resource_id
            );
            return Ok(IngestOutcome::AlreadyExists {
                name: existing.name,
                resource_id: existing.resource_id,
            });
        }

        let tarball = self
            .file_tree
            .create(&req.controller, &req.tarball_path)
            .await?;

        match self
            .record_dataset(&tarball, &actual, &req, &access, overrides)
            .await
        {
            Ok(notes) => {
                info!(
                    "DatasetMgr: ingested {} ({}) for {}",
                    name, actual, req.owner
                );
                Ok(IngestOutcome::Created {
                    name,
                    resource_id: actual,
                    notes,
                })
            }
            Err(e) => {
                warn!("DatasetMgr: ingest {} failed, remove it: {}", name, e);
                if let Err(undo) = self.file_tree.delete(&name).await {
                    error!("DatasetMgr: rollback of {} failed: {}", name, undo);
                }
                // A concurrent ingest of the same bytes recorded it first.
                if e.is_conflict() {
                    if let Some(existing) = self.state_db.find_by_resource_id(&actual)? {
                        return Ok(IngestOutcome::AlreadyExists {
                            name: existing.name,
                            resource_id: existing.resource_id,
                        });
                    }
                }
                Err(e)
            }
        }
    }

    async fn record_dataset(
        &self,
        tarball: &Tarball,
        resource_id: &str,
        req: &IngestRequest,
        access: &str,
        overrides: Vec<(MetaKey, MetaValue)>,
    ) -> DatasetResult<Vec<String>> {
        let uploaded = Utc::now();
        self.state_db.add_dataset(&DatasetRecord {
            name: tarball.name.clone(),
            resource_id: resource_id.to_string(),
            controller: tarball.controller_name.clone(),
            owner: req.owner.clone(),
            access: access.to_string(),
            uploaded,
        })?;

        let mut notes = Vec::new();
        let mut values: BTreeMap<MetaKey, MetaValue> = BTreeMap::new();
        let metalog = match &req.metalog {
            Some(metalog) => metalog.clone(),
            None => {
                notes.push(format!(
                    "Results archive is missing '{}/metadata.log'.",
                    tarball.name
                ));
                values.insert(MetaKey::parse("server.archiveonly")?, MetaValue::Bool(true));
                let mut pbench = BTreeMap::new();
                pbench.insert("name".to_string(), tarball.name.clone());
                pbench.insert("script".to_string(), UNKNOWN_BENCHMARK.to_string());
                BTreeMap::from([("pbench".to_string(), pbench)])
            }
        };

        let benchmark = metalog
            .get("pbench")
            .and_then(|p| p.get("script"))
            .cloned()
            .unwrap_or_else(|| UNKNOWN_BENCHMARK.to_string());
        notes.push(format!("Identified benchmark workload '{}'.", benchmark));

        let deletion = uploaded + Duration::days(self.config.retention_days as i64);
        values.insert(MetaKey::parse("dataset.metalog")?, metalog_value(&metalog));
        values.insert(MetaKey::parse("server.benchmark")?, MetaValue::Str(benchmark));
        values.insert(MetaKey::parse("server.deletion")?, MetaValue::Date(deletion));
        values.insert(
            MetaKey::parse("server.tarball-path")?,
            MetaValue::Str(tarball.tarball_path.to_string_lossy().to_string()),
        );
        values.extend(overrides);

        if let Some(MetaValue::Date(deletion)) = values.get(&MetaKey::parse("server.deletion")?) {
            notes.push(format!(
                "Expected expiration date is {}.",
                deletion.format("%Y-%m-%d")
            ));
        }
        let archive_only = values
            .get(&MetaKey::parse("server.archiveonly")?)
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if archive_only {
            notes.push("Indexing is disabled by 'archive only' setting.".to_string());
        }

        for (key, value) in values {
            self.state_db
                .put_metadata(&tarball.name, &key, value, Some(req.owner.as_str()))?;
        }
        Ok(notes)
    }

    // ---------- stages ----------

    fn archive_only(&self, name: &str) -> DatasetResult<bool> {
        let md = self.state_db.resolve_metadata(name, None)?;
        Ok(md
            .get_str("server.archiveonly")
            .and_then(|v| v.as_bool())
            .unwrap_or(false))
    }

    fn check_archive_only(&self, name: &str, operation: Operation) -> DatasetResult<()> {
        if matches!(operation, Operation::Unpack | Operation::Index) && self.archive_only(name)? {
            return Err(DatasetError::invalid_state(
                name,
                operation.as_str(),
                "indexing is disabled by 'archive only' setting",
            ));
        }
        Ok(())
    }

    /// Queue a stage (PENDING).
    pub fn enable(&self, name: &str, operation: Operation) -> DatasetResult<OperationRecord> {
        self.check_archive_only(name, operation)?;
        self.state_db
            .transition(name, operation, Transition::Enable, None)
    }

    /// Start an attempt (WORKING).
    pub fn begin(&self, name: &str, operation: Operation) -> DatasetResult<OperationRecord> {
        self.check_archive_only(name, operation)?;
        self.state_db
            .transition(name, operation, Transition::Begin, None)
    }

    /// Re-arm an attempt that has been WORKING for too long.
    pub fn force_retry(&self, name: &str, operation: Operation) -> DatasetResult<OperationRecord> {
        self.check_archive_only(name, operation)?;
        self.state_db
            .transition(name, operation, Transition::ForceRetry, None)
    }

    /// Finish the current attempt. A successful INDEX hands the dataset's
    /// metadata to the search indexer first; if that fails the attempt is
    /// recorded as FAILED.
    pub async fn complete(
        &self,
        name: &str,
        operation: Operation,
        ok: bool,
        message: Option<&str>,
    ) -> DatasetResult<OperationRecord> {
        if operation == Operation::Index && ok {
            // Nothing reaches the indexer unless the attempt may complete.
            let current = self.state_db.operations(name)?;
            check_transition(name, operation, Transition::Complete { ok }, &current)?;
            if let Err(e) = self.index_dataset(name).await {
                warn!("DatasetMgr: index {} failed: {}", name, e);
                let reason = e.to_string();
                self.state_db.transition(
                    name,
                    operation,
                    Transition::Complete { ok: false },
                    Some(reason.as_str()),
                )?;
                return Err(e);
            }
        }
        self.state_db
            .transition(name, operation, Transition::Complete { ok }, message)
    }

    async fn index_dataset(&self, name: &str) -> DatasetResult<()> {
        let record = self.state_db.get_dataset(name)?;
        let metadata = self.state_db.resolve_metadata(name, None)?;
        let doc = SearchDocument {
            resource_id: record.resource_id,
            name: record.name,
            controller: record.controller,
            metadata: metadata.to_json(),
        };
        self.indexer.index(doc).await
    }

    pub fn operations(&self, name: &str) -> DatasetResult<OperationMap> {
        self.state_db.operations(name)
    }

    pub fn stuck_operations(
        &self,
        older_than_secs: u64,
    ) -> DatasetResult<Vec<(String, Operation, OperationRecord)>> {
        self.state_db.stuck_operations(older_than_secs)
    }

    pub async fn unpack(&self, name: &str) -> DatasetResult<Tarball> {
        self.file_tree.unpack(name).await
    }

    pub async fn uncache(&self, name: &str) -> DatasetResult<Tarball> {
        self.file_tree.uncache(name).await
    }

    /// Run the UNPACK stage end to end: begin, unpack, complete.
    pub async fn unpack_stage(&self, name: &str) -> DatasetResult<Tarball> {
        self.begin(name, Operation::Unpack)?;
        match self.file_tree.unpack(name).await {
            Ok(tarball) => {
                self.complete(name, Operation::Unpack, true, None).await?;
                Ok(tarball)
            }
            Err(e) => {
                let reason = e.to_string();
                self.complete(name, Operation::Unpack, false, Some(reason.as_str()))
                    .await?;
                Err(e)
            }
        }
    }

    // ---------- metadata & listing ----------

    pub fn metadata(
        &self,
        name: &str,
        keys: &[String],
        user: Option<&str>,
    ) -> DatasetResult<BTreeMap<String, MetaValue>> {
        let keys = keys
            .iter()
            .map(|k| MetaKey::parse(k.trim()))
            .collect::<DatasetResult<Vec<_>>>()?;
        let md = self.state_db.resolve_metadata(name, user)?;
        Ok(md.select(&keys))
    }

    pub fn set_metadata(
        &self,
        name: &str,
        key: &str,
        value: MetaValue,
        user: Option<&str>,
    ) -> DatasetResult<()> {
        let key = MetaKey::parse(key)?;
        self.state_db.set_metadata(name, &key, value, user)
    }

    /// Datasets visible to the caller that match the query's filters. The
    /// filter is compiled once, before any dataset is read.
    pub fn list(&self, query: &ListQuery) -> DatasetResult<Vec<ListEntry>> {
        let compiled = CompiledQuery::compile(query)?;
        let mut entries = Vec::new();
        for record in self.state_db.list_datasets()? {
            if !compiled.visible(&record) {
                continue;
            }
            let md = self
                .state_db
                .resolve_metadata(&record.name, compiled.user.as_deref())?;
            if compiled.filter.matches(&md) {
                entries.push(ListEntry {
                    metadata: md.select(&compiled.keys),
                    resource_id: record.resource_id,
                    name: record.name,
                });
            }
        }
        sort_entries(&mut entries, query.sort);
        debug!("DatasetMgr: list matched {} datasets", entries.len());
        Ok(entries)
    }

    // ---------- lookup & delete ----------

    /// Find a dataset record by name or resource id.
    pub fn resolve(&self, id: &str) -> DatasetResult<DatasetRecord> {
        match self.state_db.get_dataset(id) {
            Ok(record) => Ok(record),
            Err(e) if e.is_not_found() => self
                .state_db
                .find_by_resource_id(&id.to_ascii_lowercase())?
                .ok_or(e),
            Err(e) => Err(e),
        }
    }

    /// Remove a dataset from the search index, the three trees and the
    /// state store.
    pub async fn delete(&self, name: &str) -> DatasetResult<()> {
        self.file_tree.find_dataset(name).await?;
        let record = match self.state_db.get_dataset(name) {
            Ok(record) => Some(record),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };

        if let Some(record) = &record {
            self.state_db
                .transition(name, Operation::Delete, Transition::Begin, None)?;
            if let Err(e) = self.indexer.remove(&record.resource_id).await {
                self.fail_delete(name, &e);
                return Err(e);
            }
        }

        // The tree drops the state rows along with the files.
        if let Err(e) = self.file_tree.delete(name).await {
            if record.is_some() {
                self.fail_delete(name, &e);
            }
            return Err(e);
        }
        info!("DatasetMgr: deleted {}", name);
        Ok(())
    }

    // Leave DELETE=FAILED so a later delete may begin again.
    fn fail_delete(&self, name: &str, err: &DatasetError) {
        warn!("DatasetMgr: delete {} failed: {}", name, err);
        let reason = err.to_string();
        if let Err(e) = self.state_db.transition(
            name,
            Operation::Delete,
            Transition::Complete { ok: false },
            Some(reason.as_str()),
        ) {
            error!("DatasetMgr: record DELETE failure of {}: {}", name, e);
        }
    }
}

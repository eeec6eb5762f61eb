use crate::catalog::Catalog;
use crate::config::FileTreeConfig;
use crate::name_lock::NameLocks;
use crate::tarball::*;
use async_compression::tokio::bufread::XzDecoder;
use dataset_lib::{DatasetError, DatasetResult, DatasetStateDb};
use log::*;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::fs;
use tokio::io::BufReader;
use tokio::sync::RwLock as TokioRwLock;
use tokio_tar::Archive;

const UNPACK_TMP_SUFFIX: &str = ".unpacking";

/// Owner of the archive, incoming and results trees and of the catalog
/// describing them.
///
/// The catalog is a write-through cache of the archive tree. Mutations of one
/// dataset are serialized by a per-name lock; `full_discovery` excludes every
/// mutation while it rebuilds the catalog and swaps it in whole.
pub struct FileTree {
    config: FileTreeConfig,
    archive_root: PathBuf,
    incoming_root: PathBuf,
    results_root: PathBuf,
    state_db: Option<Arc<DatasetStateDb>>,
    catalog: RwLock<Catalog>,
    dataset_locks: NameLocks,
    controller_locks: NameLocks,
    // shared by mutations, exclusive for discovery
    structure: TokioRwLock<()>,
}

impl FileTree {
    pub async fn new(config: FileTreeConfig) -> DatasetResult<Self> {
        let archive_root = prepare_root(config.archive_root()).await?;
        let incoming_root = prepare_root(config.incoming_root()).await?;
        let results_root = prepare_root(config.results_root()).await?;
        info!(
            "FileTree: archive {}, incoming {}, results {}",
            archive_root.display(),
            incoming_root.display(),
            results_root.display()
        );

        Ok(Self {
            config,
            archive_root,
            incoming_root,
            results_root,
            state_db: None,
            catalog: RwLock::new(Catalog::new()),
            dataset_locks: NameLocks::new(),
            controller_locks: NameLocks::new(),
            structure: TokioRwLock::new(()),
        })
    }

    /// Record UPLOAD=OK on create and drop operation state on delete.
    pub fn with_state_db(mut self, state_db: Arc<DatasetStateDb>) -> Self {
        self.state_db = Some(state_db);
        self
    }

    pub fn config(&self) -> &FileTreeConfig {
        &self.config
    }

    pub fn archive_root(&self) -> &Path {
        &self.archive_root
    }

    pub fn incoming_root(&self) -> &Path {
        &self.incoming_root
    }

    pub fn results_root(&self) -> &Path {
        &self.results_root
    }

    fn catalog_read(&self) -> RwLockReadGuard<'_, Catalog> {
        self.catalog.read().unwrap_or_else(|e| e.into_inner())
    }

    fn catalog_write(&self) -> RwLockWriteGuard<'_, Catalog> {
        self.catalog.write().unwrap_or_else(|e| e.into_inner())
    }

    /// A consistent copy of the current catalog.
    pub fn catalog(&self) -> Catalog {
        self.catalog_read().clone()
    }

    pub fn controllers(&self) -> Vec<Controller> {
        self.catalog_read().controllers().cloned().collect()
    }

    pub fn datasets(&self) -> Vec<Tarball> {
        self.catalog_read().datasets().cloned().collect()
    }

    /// Datasets whose TODO marker says they await their first stage.
    pub fn pending(&self) -> Vec<Tarball> {
        self.catalog_read()
            .datasets()
            .filter(|t| t.pending)
            .cloned()
            .collect()
    }

    fn todo_link(&self, controller: &str, file_name: &str) -> PathBuf {
        self.archive_root
            .join(controller)
            .join(TODO_DIR)
            .join(file_name)
    }

    // ---------- discovery ----------

    /// Rebuild the catalog from what is on disk. Anomalies are logged and
    /// skipped; nothing on disk is changed.
    pub async fn full_discovery(&self) -> DatasetResult<()> {
        let _structure = self.structure.write().await;
        let catalog = self.scan().await?;
        info!(
            "FileTree: discovered {} controllers, {} datasets",
            catalog.controllers().count(),
            catalog.datasets().count()
        );
        *self.catalog_write() = catalog;
        Ok(())
    }

    async fn scan(&self) -> DatasetResult<Catalog> {
        let mut catalog = Catalog::new();
        for (ctrl_name, ctrl_path, is_dir) in list_dir(&self.archive_root).await? {
            if ctrl_name.starts_with('.') {
                continue;
            }
            if !is_dir {
                warn!(
                    "FileTree: unexpected file {} in archive root",
                    ctrl_path.display()
                );
                continue;
            }
            catalog.add_controller(&ctrl_name, ctrl_path.clone());

            for (file_name, file_path, _) in list_dir(&ctrl_path).await? {
                if file_name == TODO_DIR || file_name.starts_with('.') {
                    continue;
                }
                if is_tarball(&file_path) {
                    let tarball = match self.load_tarball(&ctrl_name, &file_path).await {
                        Ok(tarball) => tarball,
                        Err(e) => {
                            warn!("FileTree: skip {}: {}", file_path.display(), e);
                            continue;
                        }
                    };
                    if let Some(existing) = catalog.get(&tarball.name) {
                        warn!(
                            "FileTree: dataset {} found under {} and {}, keep {}",
                            tarball.name,
                            existing.controller_name,
                            ctrl_name,
                            existing.controller_name
                        );
                        continue;
                    }
                    catalog.insert(tarball, ctrl_path.clone());
                } else if let Some(stem) = file_name.strip_suffix(MD5_SUFFIX) {
                    if !path_exists(&ctrl_path.join(stem)).await {
                        warn!("FileTree: orphan checksum file {}", file_path.display());
                    }
                } else {
                    warn!(
                        "FileTree: unexpected entry {} in archive tree",
                        file_path.display()
                    );
                }
            }
        }

        self.check_derived_tree(&catalog, &self.incoming_root, "incoming")
            .await?;
        self.check_derived_tree(&catalog, &self.results_root, "results")
            .await?;
        Ok(catalog)
    }

    async fn check_derived_tree(
        &self,
        catalog: &Catalog,
        root: &Path,
        label: &str,
    ) -> DatasetResult<()> {
        for (ctrl_name, ctrl_path, is_dir) in list_dir(root).await? {
            if ctrl_name.starts_with('.') {
                continue;
            }
            if !is_dir {
                warn!(
                    "FileTree: unexpected file {} in {} root",
                    ctrl_path.display(),
                    label
                );
                continue;
            }
            for (name, path, _) in list_dir(&ctrl_path).await? {
                if name.starts_with('.') {
                    warn!("FileTree: stale {} entry {}", label, path.display());
                    continue;
                }
                match catalog.get(&name) {
                    Some(t) if t.controller_name == ctrl_name => {}
                    _ => warn!(
                        "FileTree: {} entry {} has no archived dataset",
                        label,
                        path.display()
                    ),
                }
            }
        }
        Ok(())
    }

    async fn load_tarball(&self, controller: &str, tarball_path: &Path) -> DatasetResult<Tarball> {
        let name = dataset_name(tarball_path)?;
        let md5_path = md5_path_for(tarball_path);
        let md5 = if path_exists(&md5_path).await {
            match read_md5_file(&md5_path).await {
                Ok(md5) => Some(md5),
                Err(e) => {
                    warn!("FileTree: dataset {} checksum unreadable: {}", name, e);
                    None
                }
            }
        } else {
            warn!(
                "FileTree: dataset {} has no checksum file {}",
                name,
                md5_path.display()
            );
            None
        };

        let unpacked_dir = self.incoming_root.join(controller).join(&name);
        let unpacked = is_dir(&unpacked_dir).await;
        let link = self.results_root.join(controller).join(&name);
        let results_link = if is_symlink(&link).await {
            Some(link)
        } else {
            None
        };
        if unpacked && self.config.enable_results_link && results_link.is_none() {
            warn!("FileTree: dataset {} is unpacked but has no results link", name);
        }
        if !unpacked && results_link.is_some() {
            warn!("FileTree: dataset {} has a dangling results link", name);
        }
        let file_name = format!("{}{}", name, TARBALL_SUFFIX);
        let pending = is_symlink(&self.todo_link(controller, &file_name)).await;

        Ok(Tarball {
            name,
            controller_name: controller.to_string(),
            tarball_path: tarball_path.to_path_buf(),
            md5_path,
            md5,
            unpacked,
            unpacked_path: if unpacked { Some(unpacked_dir) } else { None },
            results_link,
            pending,
        })
    }

    /// Find `<name>.tar.xz` under any controller without a full scan.
    async fn locate_on_disk(&self, name: &str) -> DatasetResult<Option<(String, PathBuf)>> {
        let file_name = format!("{}{}", name, TARBALL_SUFFIX);
        for (ctrl_name, ctrl_path, is_dir) in list_dir(&self.archive_root).await? {
            if !is_dir || ctrl_name.starts_with('.') {
                continue;
            }
            let candidate = ctrl_path.join(&file_name);
            let is_file = fs::metadata(&candidate)
                .await
                .map(|m| m.is_file())
                .unwrap_or(false);
            if is_file {
                return Ok(Some((ctrl_name, candidate)));
            }
        }
        Ok(None)
    }

    // ---------- lookup ----------

    /// The dataset called `name`, from the catalog or, failing that, from a
    /// targeted look at the archive tree.
    pub async fn find_dataset(&self, name: &str) -> DatasetResult<Tarball> {
        let cached = self.catalog_read().get(name).cloned();
        if let Some(tarball) = cached {
            return Ok(tarball);
        }
        let _structure = self.structure.read().await;
        let guard = self.dataset_locks.lock(name).await;
        let found = self.lookup(name).await;
        drop(guard);
        if found.is_err() {
            self.dataset_locks.forget(name);
        }
        found
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.find_dataset(name).await.is_ok()
    }

    // Caller holds the dataset lock.
    async fn lookup(&self, name: &str) -> DatasetResult<Tarball> {
        let cached = self.catalog_read().get(name).cloned();
        if let Some(tarball) = cached {
            return Ok(tarball);
        }
        if name.is_empty() || name.starts_with('.') || name.contains('/') {
            return Err(DatasetError::DatasetNotFound(name.to_string()));
        }
        let (controller, path) = self
            .locate_on_disk(name)
            .await?
            .ok_or_else(|| DatasetError::DatasetNotFound(name.to_string()))?;
        let tarball = self.load_tarball(&controller, &path).await?;
        debug!(
            "FileTree: found dataset {} under {} without discovery",
            name, controller
        );
        self.catalog_write()
            .insert(tarball.clone(), self.archive_root.join(&controller));
        Ok(tarball)
    }

    // ---------- mutations ----------

    /// Move `tarball_path` and its checksum file into the archive tree under
    /// `controller`. Nothing is moved unless every check passes, and a failed
    /// create leaves the source files where they were.
    pub async fn create(&self, controller: &str, tarball_path: &Path) -> DatasetResult<Tarball> {
        let name = dataset_name(tarball_path)?;
        validate_controller_name(controller)?;

        let _structure = self.structure.read().await;
        let _guard = self.dataset_locks.lock(&name).await;

        let in_catalog = self.catalog_read().contains(&name);
        if in_catalog || self.locate_on_disk(&name).await?.is_some() {
            return Err(DatasetError::DuplicateDataset(name));
        }

        let src_md5 = md5_path_for(tarball_path);
        let src_has_md5 = path_exists(&src_md5).await;
        let actual = compute_md5(tarball_path).await?;
        if src_has_md5 {
            let expected = read_md5_file(&src_md5).await?;
            if expected != actual {
                return Err(DatasetError::ChecksumMismatch {
                    path: tarball_path.to_path_buf(),
                    expected,
                    actual,
                });
            }
        }

        let _ctrl_guard = self.controller_locks.lock(controller).await;
        let ctrl_dir = self.archive_root.join(controller);
        let file_name = format!("{}{}", name, TARBALL_SUFFIX);
        let dest = ctrl_dir.join(&file_name);
        let dest_md5 = md5_path_for(&dest);
        let todo_link = self.todo_link(controller, &file_name);

        let installed = self
            .install(
                &name,
                tarball_path,
                &src_md5,
                src_has_md5,
                &dest,
                &dest_md5,
                &actual,
                &todo_link,
            )
            .await;
        if let Err(e) = installed {
            warn!("FileTree: create {} failed, roll back: {}", name, e);
            undo_install(tarball_path, &src_md5, src_has_md5, &dest, &dest_md5, &todo_link).await;
            return Err(e);
        }

        let tarball = Tarball {
            name: name.clone(),
            controller_name: controller.to_string(),
            tarball_path: dest,
            md5_path: dest_md5,
            md5: Some(actual),
            unpacked: false,
            unpacked_path: None,
            results_link: None,
            pending: true,
        };
        self.catalog_write().insert(tarball.clone(), ctrl_dir);
        info!(
            "FileTree: created dataset {} under controller {}",
            name, controller
        );
        Ok(tarball)
    }

    #[allow(clippy::too_many_arguments)]
    async fn install(
        &self,
        name: &str,
        src: &Path,
        src_md5: &Path,
        src_has_md5: bool,
        dest: &Path,
        dest_md5: &Path,
        md5: &str,
        todo_link: &Path,
    ) -> DatasetResult<()> {
        if let Some(todo_dir) = todo_link.parent() {
            fs::create_dir_all(todo_dir)
                .await
                .map_err(|e| DatasetError::io(todo_dir, e))?;
        }

        move_file(src, dest).await?;
        if src_has_md5 {
            move_file(src_md5, dest_md5).await?;
        } else {
            fs::write(dest_md5, format!("{}\n", md5))
                .await
                .map_err(|e| DatasetError::io(dest_md5, e))?;
        }

        if path_exists(todo_link).await {
            remove_path(todo_link).await?;
        }
        let file_name = dest
            .file_name()
            .ok_or_else(|| DatasetError::BadFilename(dest.to_path_buf()))?;
        make_symlink(&Path::new("..").join(file_name), todo_link, false)
            .await
            .map_err(|e| DatasetError::io(todo_link, e))?;

        if let Some(state_db) = &self.state_db {
            state_db.init_operations(name)?;
        }
        Ok(())
    }

    /// Expand the archive into the incoming tree and publish it in the
    /// results tree. Calling it again on an unpacked dataset only repairs
    /// a missing link.
    pub async fn unpack(&self, name: &str) -> DatasetResult<Tarball> {
        let _structure = self.structure.read().await;
        let _guard = self.dataset_locks.lock(name).await;
        let tarball = self.lookup(name).await?;
        let controller = tarball.controller_name.clone();
        let incoming_ctrl = self.incoming_root.join(&controller);
        let target = incoming_ctrl.join(name);

        if is_dir(&target).await {
            debug!("FileTree: dataset {} already unpacked", name);
        } else {
            let tmp = incoming_ctrl.join(format!(".{}{}", name, UNPACK_TMP_SUFFIX));
            {
                let _ctrl_guard = self.controller_locks.lock(&controller).await;
                fs::create_dir_all(&incoming_ctrl)
                    .await
                    .map_err(|e| DatasetError::io(&incoming_ctrl, e))?;
                if path_exists(&tmp).await {
                    warn!("FileTree: remove stale unpack dir {}", tmp.display());
                    remove_path(&tmp).await?;
                }
                fs::create_dir(&tmp)
                    .await
                    .map_err(|e| DatasetError::io(&tmp, e))?;
            }

            if let Err(e) = extract(&tarball.tarball_path, &tmp).await {
                warn!("FileTree: unpack {} failed: {}", name, e);
                if let Err(e) = remove_path(&tmp).await {
                    warn!("FileTree: cleanup {} failed: {}", tmp.display(), e);
                }
                self.prune_controller(&controller).await?;
                return Err(e);
            }

            let inner = tmp.join(name);
            if is_dir(&inner).await {
                fs::rename(&inner, &target)
                    .await
                    .map_err(|e| DatasetError::io(&target, e))?;
                remove_path(&tmp).await?;
            } else {
                fs::rename(&tmp, &target)
                    .await
                    .map_err(|e| DatasetError::io(&target, e))?;
            }
            info!("FileTree: unpacked {} into {}", name, target.display());
        }

        let results_link = if self.config.enable_results_link {
            let link = self.results_root.join(&controller).join(name);
            let _ctrl_guard = self.controller_locks.lock(&controller).await;
            ensure_link(&target, &link).await?;
            Some(link)
        } else {
            None
        };

        self.remove_todo_marker(&tarball).await?;

        let mut updated = tarball;
        updated.unpacked = true;
        updated.unpacked_path = Some(target);
        updated.results_link = results_link;
        updated.pending = false;
        if let Some(entry) = self.catalog_write().get_mut(name) {
            *entry = updated.clone();
        }
        Ok(updated)
    }

    /// Drop the unpacked copy and the results link; the archive is untouched.
    pub async fn uncache(&self, name: &str) -> DatasetResult<Tarball> {
        let _structure = self.structure.read().await;
        let _guard = self.dataset_locks.lock(name).await;
        let tarball = self.lookup(name).await?;
        let controller = tarball.controller_name.clone();

        remove_path(&self.results_root.join(&controller).join(name)).await?;
        remove_path(&self.incoming_root.join(&controller).join(name)).await?;

        let mut updated = tarball;
        let was_unpacked = updated.unpacked;
        updated.unpacked = false;
        updated.unpacked_path = None;
        updated.results_link = None;
        if let Some(entry) = self.catalog_write().get_mut(name) {
            *entry = updated.clone();
        }
        self.prune_controller(&controller).await?;
        if was_unpacked {
            info!("FileTree: uncached {}", name);
        }
        Ok(updated)
    }

    /// Remove the dataset from all three trees, the catalog and the
    /// operation state, then prune the controller if it is left empty.
    pub async fn delete(&self, name: &str) -> DatasetResult<()> {
        let _structure = self.structure.read().await;
        let guard = self.dataset_locks.lock(name).await;
        let tarball = self.lookup(name).await?;
        let controller = tarball.controller_name.clone();

        remove_path(&self.results_root.join(&controller).join(name)).await?;
        remove_path(&self.incoming_root.join(&controller).join(name)).await?;
        remove_path(&self.todo_link(&controller, &tarball.file_name())).await?;
        remove_path(&tarball.md5_path).await?;
        remove_path(&tarball.tarball_path).await?;

        self.catalog_write().remove(name);
        if let Some(state_db) = &self.state_db {
            state_db.remove_dataset(name)?;
        }
        self.prune_controller(&controller).await?;

        drop(guard);
        self.dataset_locks.forget(name);
        info!("FileTree: deleted dataset {} from {}", name, controller);
        Ok(())
    }

    /// Remove `controller`'s directories that are empty, and its catalog
    /// entry once it holds no datasets.
    pub async fn clean_empties(&self, controller: &str) -> DatasetResult<()> {
        let _structure = self.structure.read().await;
        self.prune_controller(controller).await
    }

    async fn prune_controller(&self, controller: &str) -> DatasetResult<()> {
        let _ctrl_guard = self.controller_locks.lock(controller).await;
        remove_dir_if_empty(&self.archive_root.join(controller).join(TODO_DIR)).await;
        for root in [&self.archive_root, &self.incoming_root, &self.results_root] {
            if remove_dir_if_empty(&root.join(controller)).await {
                debug!(
                    "FileTree: removed empty {}",
                    root.join(controller).display()
                );
            }
        }

        let mut catalog = self.catalog_write();
        let empty = catalog
            .controller(controller)
            .map(|c| c.tarballs.is_empty())
            .unwrap_or(false);
        if empty {
            catalog.remove_controller(controller);
            debug!("FileTree: dropped empty controller {}", controller);
        }
        Ok(())
    }

    async fn remove_todo_marker(&self, tarball: &Tarball) -> DatasetResult<()> {
        let _ctrl_guard = self.controller_locks.lock(&tarball.controller_name).await;
        let link = self.todo_link(&tarball.controller_name, &tarball.file_name());
        remove_path(&link).await?;
        if let Some(todo_dir) = link.parent() {
            remove_dir_if_empty(todo_dir).await;
        }
        Ok(())
    }
}

/// Create a tree root and return its canonical path. Results links store
/// absolute targets built from it.
async fn prepare_root(root: PathBuf) -> DatasetResult<PathBuf> {
    fs::create_dir_all(&root)
        .await
        .map_err(|e| DatasetError::io(&root, e))?;
    fs::canonicalize(&root)
        .await
        .map_err(|e| DatasetError::io(&root, e))
}

async fn extract(tarball_path: &Path, dest: &Path) -> DatasetResult<()> {
    let file = fs::File::open(tarball_path)
        .await
        .map_err(|e| DatasetError::io(tarball_path, e))?;
    let decoder = XzDecoder::new(BufReader::new(file));
    let mut archive = Archive::new(decoder);
    archive
        .unpack(dest)
        .await
        .map_err(|e| DatasetError::io(tarball_path, e))
}

async fn move_file(src: &Path, dest: &Path) -> DatasetResult<()> {
    match fs::rename(src, dest).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(DatasetError::io(src, e)),
        Err(e) => {
            debug!(
                "FileTree: rename {} -> {} failed ({}), copy instead",
                src.display(),
                dest.display(),
                e
            );
            if let Err(e) = fs::copy(src, dest).await {
                let _ = fs::remove_file(dest).await;
                return Err(DatasetError::io(dest, e));
            }
            fs::remove_file(src)
                .await
                .map_err(|e| DatasetError::io(src, e))
        }
    }
}

/// Best effort reversal of a partial `install`.
async fn undo_install(
    src: &Path,
    src_md5: &Path,
    src_has_md5: bool,
    dest: &Path,
    dest_md5: &Path,
    todo_link: &Path,
) {
    let mut failures = Vec::new();
    if let Err(e) = remove_path(todo_link).await {
        failures.push(e);
    }
    if path_exists(dest_md5).await {
        let undone = if src_has_md5 && !path_exists(src_md5).await {
            move_file(dest_md5, src_md5).await
        } else {
            remove_path(dest_md5).await
        };
        if let Err(e) = undone {
            failures.push(e);
        }
    }
    if path_exists(dest).await && !path_exists(src).await {
        if let Err(e) = move_file(dest, src).await {
            failures.push(e);
        }
    }
    if let Some(todo_dir) = todo_link.parent() {
        remove_dir_if_empty(todo_dir).await;
    }
    if let Some(ctrl_dir) = dest.parent() {
        remove_dir_if_empty(ctrl_dir).await;
    }
    for e in failures {
        error!("FileTree: roll back of {} incomplete: {}", src.display(), e);
    }
}

async fn ensure_link(target: &Path, link: &Path) -> DatasetResult<()> {
    if let Ok(meta) = fs::symlink_metadata(link).await {
        if meta.file_type().is_symlink() {
            if let Ok(current) = fs::read_link(link).await {
                if current == target {
                    return Ok(());
                }
            }
        }
        warn!("FileTree: replace stale results entry {}", link.display());
        remove_path(link).await?;
    }
    if let Some(parent) = link.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| DatasetError::io(parent, e))?;
    }
    make_symlink(target, link, true)
        .await
        .map_err(|e| DatasetError::io(link, e))?;
    info!(
        "FileTree: create results link: {} -> {}",
        link.display(),
        target.display()
    );
    Ok(())
}

#[cfg(target_family = "unix")]
async fn make_symlink(target: &Path, link: &Path, _is_dir: bool) -> std::io::Result<()> {
    fs::symlink(target, link).await
}

#[cfg(target_family = "windows")]
async fn make_symlink(target: &Path, link: &Path, is_dir: bool) -> std::io::Result<()> {
    if is_dir {
        std::os::windows::fs::symlink_dir(target, link)
    } else {
        std::os::windows::fs::symlink_file(target, link)
    }
}

/// Entries of `dir` sorted by name, with a directory flag that does not
/// follow symlinks. A missing directory has no entries.
async fn list_dir(dir: &Path) -> DatasetResult<Vec<(String, PathBuf, bool)>> {
    let mut read_dir = match fs::read_dir(dir).await {
        Ok(read_dir) => read_dir,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(DatasetError::io(dir, e)),
    };
    let mut entries = Vec::new();
    while let Some(entry) = read_dir
        .next_entry()
        .await
        .map_err(|e| DatasetError::io(dir, e))?
    {
        let path = entry.path();
        let name = match entry.file_name().into_string() {
            Ok(name) => name,
            Err(_) => {
                warn!("FileTree: skip non UTF-8 entry {}", path.display());
                continue;
            }
        };
        let is_dir = entry
            .file_type()
            .await
            .map(|t| t.is_dir())
            .unwrap_or(false);
        entries.push((name, path, is_dir));
    }
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(entries)
}

async fn path_exists(path: &Path) -> bool {
    fs::symlink_metadata(path).await.is_ok()
}

async fn is_dir(path: &Path) -> bool {
    fs::metadata(path)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
}

async fn is_symlink(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .await
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false)
}

/// Remove a file, link or directory tree; a missing path is not an error.
async fn remove_path(path: &Path) -> DatasetResult<()> {
    let meta = match fs::symlink_metadata(path).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(DatasetError::io(path, e)),
    };
    let removed = if meta.is_dir() {
        fs::remove_dir_all(path).await
    } else {
        fs::remove_file(path).await
    };
    match removed {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(DatasetError::io(path, e)),
    }
}

async fn remove_dir_if_empty(dir: &Path) -> bool {
    let empty = match fs::read_dir(dir).await {
        Ok(mut read_dir) => matches!(read_dir.next_entry().await, Ok(None)),
        Err(_) => false,
    };
    if !empty {
        return false;
    }
    match fs::remove_dir(dir).await {
        Ok(()) => true,
        Err(e) => {
            warn!("FileTree: remove empty dir {} failed: {}", dir.display(), e);
            false
        }
    }
}

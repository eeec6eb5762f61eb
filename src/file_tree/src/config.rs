/*
file_tree.cfg.json: optional configuration of a file tree. When the file is
absent every path is derived from top_dir.
*/

use log::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_TOP_DIR: &str = "/srv/pbench";
pub const ARCHIVE_VERSION_DIR: &str = "fs-version-001";
pub const DEFAULT_RETENTION_DAYS: u32 = 730;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileTreeConfig {
    pub top_dir: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_root: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incoming_root: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results_root: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_db_path: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub enable_results_link: bool,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_true() -> bool {
    true
}

fn default_retention_days() -> u32 {
    DEFAULT_RETENTION_DAYS
}

impl Default for FileTreeConfig {
    fn default() -> Self {
        Self::with_top_dir(DEFAULT_TOP_DIR)
    }
}

impl FileTreeConfig {
    pub fn with_top_dir(top_dir: impl AsRef<Path>) -> Self {
        Self {
            top_dir: top_dir.as_ref().to_path_buf(),
            archive_root: None,
            incoming_root: None,
            results_root: None,
            state_db_path: None,
            enable_results_link: true,
            retention_days: DEFAULT_RETENTION_DAYS,
        }
    }

    /// Read a JSON config file. A missing or unreadable file yields defaults.
    pub fn load(config_path: &Path) -> Self {
        if !config_path.exists() {
            debug!(
                "file_tree config {} not found, use default config.",
                config_path.display()
            );
            return Self::default();
        }

        let content = match std::fs::read_to_string(config_path) {
            Ok(content) => content,
            Err(e) => {
                warn!(
                    "file_tree load {} failed. {}",
                    config_path.display(),
                    e
                );
                return Self::default();
            }
        };

        match serde_json::from_str::<FileTreeConfig>(&content) {
            Ok(config) => {
                debug!("file_tree load {} OK.", config_path.display());
                config
            }
            Err(e) => {
                warn!(
                    "file_tree parse {} failed. {}",
                    config_path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    pub fn archive_root(&self) -> PathBuf {
        self.archive_root.clone().unwrap_or_else(|| {
            self.top_dir.join("archive").join(ARCHIVE_VERSION_DIR)
        })
    }

    pub fn incoming_root(&self) -> PathBuf {
        self.incoming_root
            .clone()
            .unwrap_or_else(|| self.top_dir.join("public_html").join("incoming"))
    }

    pub fn results_root(&self) -> PathBuf {
        self.results_root
            .clone()
            .unwrap_or_else(|| self.top_dir.join("public_html").join("results"))
    }

    pub fn state_db_path(&self) -> PathBuf {
        self.state_db_path
            .clone()
            .unwrap_or_else(|| self.top_dir.join("archive").join("dataset_state.db"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_derived_roots() {
        let config = FileTreeConfig::with_top_dir("/tmp/pbench");
        assert_eq!(
            config.archive_root(),
            PathBuf::from("/tmp/pbench/archive/fs-version-001")
        );
        assert_eq!(
            config.incoming_root(),
            PathBuf::from("/tmp/pbench/public_html/incoming")
        );
        assert_eq!(
            config.results_root(),
            PathBuf::from("/tmp/pbench/public_html/results")
        );
        assert!(config.enable_results_link);
        assert_eq!(config.retention_days, 730);
    }

    #[test]
    fn test_load_config_file() {
        let tmp_dir = TempDir::new().unwrap();
        let missing = FileTreeConfig::load(&tmp_dir.path().join("none.json"));
        assert_eq!(missing, FileTreeConfig::default());

        let path = tmp_dir.path().join("file_tree.cfg.json");
        std::fs::write(
            &path,
            r#"{"top_dir": "/data", "results_root": "/web/results", "enable_results_link": false}"#,
        )
        .unwrap();
        let config = FileTreeConfig::load(&path);
        assert_eq!(config.top_dir, PathBuf::from("/data"));
        assert_eq!(config.results_root(), PathBuf::from("/web/results"));
        assert_eq!(
            config.incoming_root(),
            PathBuf::from("/data/public_html/incoming")
        );
        assert!(!config.enable_results_link);
        assert_eq!(config.retention_days, 730);

        std::fs::write(&path, "{not json").unwrap();
        assert_eq!(FileTreeConfig::load(&path), FileTreeConfig::default());
    }
}

use dataset_lib::{DatasetError, DatasetResult};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;

pub const TARBALL_SUFFIX: &str = ".tar.xz";
pub const MD5_SUFFIX: &str = ".md5";
/// Per-controller archive subdirectory holding "pending first stage" links.
pub const TODO_DIR: &str = "TODO";

const READ_BUF_SIZE: usize = 64 * 1024;

/// One archived dataset bound to its locations in the three trees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tarball {
    pub name: String,
    pub controller_name: String,
    pub tarball_path: PathBuf,
    pub md5_path: PathBuf,
    /// Lowercase hex MD5 read from the checksum file; `None` if it is missing.
    pub md5: Option<String>,
    pub unpacked: bool,
    pub unpacked_path: Option<PathBuf>,
    pub results_link: Option<PathBuf>,
    /// A TODO marker is present: the dataset awaits its first stage.
    pub pending: bool,
}

impl Tarball {
    pub fn file_name(&self) -> String {
        format!("{}{}", self.name, TARBALL_SUFFIX)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Controller {
    pub name: String,
    /// The controller's directory in the archive tree.
    pub path: PathBuf,
    pub tarballs: BTreeSet<String>,
}

impl Controller {
    pub fn new(name: &str, path: PathBuf) -> Self {
        Self {
            name: name.to_string(),
            path,
            tarballs: BTreeSet::new(),
        }
    }
}

pub fn is_tarball(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.len() > TARBALL_SUFFIX.len() && n.ends_with(TARBALL_SUFFIX))
        .unwrap_or(false)
}

/// Dataset name of an archive path: the file name minus `.tar.xz`.
pub fn dataset_name(path: &Path) -> DatasetResult<String> {
    if !is_tarball(path) {
        return Err(DatasetError::BadFilename(path.to_path_buf()));
    }
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| DatasetError::BadFilename(path.to_path_buf()))?;
    let name = &file_name[..file_name.len() - TARBALL_SUFFIX.len()];
    if name.starts_with('.') {
        return Err(DatasetError::BadFilename(path.to_path_buf()));
    }
    Ok(name.to_string())
}

pub fn md5_path_for(tarball_path: &Path) -> PathBuf {
    let mut s = tarball_path.as_os_str().to_os_string();
    s.push(MD5_SUFFIX);
    PathBuf::from(s)
}

/// Controller names become directory names in all three trees.
pub fn validate_controller_name(name: &str) -> DatasetResult<()> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains('\0');
    if !valid {
        return Err(DatasetError::BadControllerName(name.to_string()));
    }
    Ok(())
}

pub async fn compute_md5(path: &Path) -> DatasetResult<String> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| DatasetError::io(path, e))?;
    let mut hasher = Md5::new();
    let mut buf = vec![0u8; READ_BUF_SIZE];
    loop {
        let n = file
            .read(&mut buf)
            .await
            .map_err(|e| DatasetError::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// The first token of a checksum file, lowercased. Accepts both a bare
/// digest and the `md5sum` output form `<digest>  <file>`.
pub async fn read_md5_file(path: &Path) -> DatasetResult<String> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| DatasetError::io(path, e))?;
    content
        .split_whitespace()
        .next()
        .map(|s| s.to_ascii_lowercase())
        .ok_or_else(|| DatasetError::IoError(format!("empty checksum file {}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_dataset_name() {
        assert_eq!(
            dataset_name(Path::new("/a/b/pbench-user-benchmark_foo_2021.05.01T12.42.42.tar.xz"))
                .unwrap(),
            "pbench-user-benchmark_foo_2021.05.01T12.42.42"
        );
        for bad in ["/a/foo.tar.xz.md5", "/a/foo.tar.gz", "/a/.tar.xz", "/a/foo", "/a/.foo.tar.xz"] {
            let err = dataset_name(Path::new(bad)).unwrap_err();
            assert_eq!(err.path(), Some(Path::new(bad)));
        }
        assert_eq!(
            md5_path_for(Path::new("/a/foo.tar.xz")),
            PathBuf::from("/a/foo.tar.xz.md5")
        );
    }

    #[test]
    fn test_controller_names() {
        assert!(validate_controller_name("ABC").is_ok());
        assert!(validate_controller_name("host.example.com").is_ok());
        assert!(validate_controller_name("").is_err());
        assert!(validate_controller_name("a/b").is_err());
        assert!(validate_controller_name("..").is_err());
    }

    #[tokio::test]
    async fn test_md5_helpers() {
        let tmp_dir = TempDir::new().unwrap();
        let data = tmp_dir.path().join("data");
        tokio::fs::write(&data, b"hello world").await.unwrap();
        let digest = compute_md5(&data).await.unwrap();
        assert_eq!(digest, "5eb63bbbe01eeed093cb22bb8f5acdc3");

        let md5_file = tmp_dir.path().join("data.md5");
        tokio::fs::write(&md5_file, "5EB63BBBE01EEED093CB22BB8F5ACDC3  data\n")
            .await
            .unwrap();
        assert_eq!(read_md5_file(&md5_file).await.unwrap(), digest);

        let err = compute_md5(&tmp_dir.path().join("missing")).await.unwrap_err();
        assert_eq!(err.kind(), dataset_lib::ErrorKind::Io);
    }
}

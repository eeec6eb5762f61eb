use std::path::{Path, PathBuf};
use thiserror::Error;

/// Broad classes callers branch on; every `DatasetError` maps onto one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Conflict,
    NotFound,
    State,
    Io,
    Internal,
}

#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("The file path '{}' is not a tarball", .0.display())]
    BadFilename(PathBuf),
    #[error("A dataset named '{0}' is already present in the file tree")]
    DuplicateDataset(String),
    #[error("The dataset named '{0}' is not present in the file tree")]
    DatasetNotFound(String),
    #[error("The controller named '{0}' is not present in the file tree")]
    ControllerNotFound(String),
    #[error("invalid controller name: {0}")]
    BadControllerName(String),
    #[error("MD5 checksum {actual} does not match expected {expected} for '{}'", .path.display())]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },
    #[error("invalid filter '{clause}': {reason}")]
    InvalidFilter { clause: String, reason: String },
    #[error("invalid metadata key: {0}")]
    InvalidMetadataKey(String),
    #[error("invalid metadata value for '{key}': {reason}")]
    InvalidMetadataValue { key: String, reason: String },
    #[error("dataset '{dataset}' operation {operation}: {reason}")]
    InvalidState {
        dataset: String,
        operation: String,
        reason: String,
    },
    #[error("I/O error on '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("I/O error: {0}")]
    IoError(String),
    #[error("db error: {0}")]
    DbError(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl DatasetError {
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        DatasetError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn invalid_filter(clause: &str, reason: impl Into<String>) -> Self {
        DatasetError::InvalidFilter {
            clause: clause.to_string(),
            reason: reason.into(),
        }
    }

    pub fn invalid_state(dataset: &str, operation: &str, reason: impl Into<String>) -> Self {
        DatasetError::InvalidState {
            dataset: dataset.to_string(),
            operation: operation.to_string(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DatasetError::BadFilename(_)
            | DatasetError::BadControllerName(_)
            | DatasetError::ChecksumMismatch { .. }
            | DatasetError::InvalidFilter { .. }
            | DatasetError::InvalidMetadataKey(_)
            | DatasetError::InvalidMetadataValue { .. } => ErrorKind::Validation,
            DatasetError::DuplicateDataset(_) => ErrorKind::Conflict,
            DatasetError::DatasetNotFound(_) | DatasetError::ControllerNotFound(_) => {
                ErrorKind::NotFound
            }
            DatasetError::InvalidState { .. } => ErrorKind::State,
            DatasetError::Io { .. } | DatasetError::IoError(_) => ErrorKind::Io,
            DatasetError::DbError(_) | DatasetError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }

    /// The dataset name carried by the error, when there is one.
    pub fn dataset(&self) -> Option<&str> {
        match self {
            DatasetError::DuplicateDataset(name) | DatasetError::DatasetNotFound(name) => {
                Some(name.as_str())
            }
            DatasetError::InvalidState { dataset, .. } => Some(dataset.as_str()),
            _ => None,
        }
    }

    /// The filesystem path carried by the error, when there is one.
    pub fn path(&self) -> Option<&Path> {
        match self {
            DatasetError::BadFilename(path)
            | DatasetError::ChecksumMismatch { path, .. }
            | DatasetError::Io { path, .. } => Some(path.as_path()),
            _ => None,
        }
    }
}

pub type DatasetResult<T> = std::result::Result<T, DatasetError>;

impl From<std::io::Error> for DatasetError {
    fn from(err: std::io::Error) -> Self {
        DatasetError::IoError(err.to_string())
    }
}

impl From<rusqlite::Error> for DatasetError {
    fn from(err: rusqlite::Error) -> Self {
        DatasetError::DbError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_carry_identifiers() {
        let err = DatasetError::DatasetNotFound("foobar".to_string());
        assert_eq!(
            err.to_string(),
            "The dataset named 'foobar' is not present in the file tree"
        );
        assert_eq!(err.dataset(), Some("foobar"));
        assert!(err.is_not_found());

        let err = DatasetError::DuplicateDataset("abc".to_string());
        assert_eq!(
            err.to_string(),
            "A dataset named 'abc' is already present in the file tree"
        );
        assert!(err.is_conflict());

        let err = DatasetError::BadFilename(PathBuf::from("/tmp/x.tar.xz.md5"));
        assert_eq!(
            err.to_string(),
            "The file path '/tmp/x.tar.xz.md5' is not a tarball"
        );
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.path(), Some(Path::new("/tmp/x.tar.xz.md5")));
    }

    #[test]
    fn test_kinds() {
        let err = DatasetError::invalid_state("ds", "INDEX", "UNPACK is not OK");
        assert_eq!(err.kind(), ErrorKind::State);
        let err = DatasetError::io(
            "/srv/x",
            std::io::Error::new(std::io::ErrorKind::Other, "boom"),
        );
        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(err.path(), Some(Path::new("/srv/x")));
        let err = DatasetError::invalid_filter("a:b:zz", "unknown type");
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}

//! File storage error type.

use std::path::PathBuf;

use thingmesh_domain::error::MeshError;

/// Errors originating from the file storage layer.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("failed to read {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configured path has no file name to derive the temporary file from.
    #[error("{0} does not name a file")]
    NotAFile(PathBuf),
}

impl From<StorageError> for MeshError {
    fn from(err: StorageError) -> Self {
        Self::Storage(Box::new(err))
    }
}

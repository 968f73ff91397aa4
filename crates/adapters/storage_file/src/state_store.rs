//! File implementation of [`StateStore`].

use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use thingmesh_app::ports::StateStore;
use thingmesh_domain::error::MeshError;

use crate::error::StorageError;

/// Configuration for the file state store.
pub struct Config {
    /// File holding the blob. Its parent directory must exist.
    pub path: PathBuf,
}

impl Config {
    /// Build a [`FileStateStore`] from this configuration.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotAFile`] when `path` has no file name.
    pub fn build(self) -> Result<FileStateStore, StorageError> {
        let file_name = self
            .path
            .file_name()
            .ok_or_else(|| StorageError::NotAFile(self.path.clone()))?;
        let mut temporary = OsString::from(".");
        temporary.push(file_name);
        temporary.push(".tmp");
        let temporary = self.path.with_file_name(temporary);
        Ok(FileStateStore {
            path: self.path,
            temporary,
        })
    }
}

/// State store replacing one file on every write.
pub struct FileStateStore {
    path: PathBuf,
    temporary: PathBuf,
}

impl FileStateStore {
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StateStore for FileStateStore {
    async fn read(&self) -> Result<Option<Vec<u8>>, MeshError> {
        match tokio::fs::read(&self.path).await {
            Ok(blob) => Ok(Some(blob)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StorageError::Read {
                path: self.path.clone(),
                source,
            }
            .into()),
        }
    }

    async fn write(&self, blob: Vec<u8>) -> Result<(), MeshError> {
        let size = blob.len();
        tokio::fs::write(&self.temporary, blob)
            .await
            .map_err(|source| StorageError::Write {
                path: self.temporary.clone(),
                source,
            })?;
        tokio::fs::rename(&self.temporary, &self.path)
            .await
            .map_err(|source| StorageError::Write {
                path: self.path.clone(),
                source,
            })?;

        tracing::debug!(path = %self.path.display(), size, "state file replaced");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(dir: &tempfile::TempDir) -> FileStateStore {
        Config {
            path: dir.path().join("state.json"),
        }
        .build()
        .unwrap()
    }

    #[tokio::test]
    async fn should_return_none_when_file_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = setup(&dir);
        assert_eq!(store.read().await.unwrap(), None);
    }

    #[tokio::test]
    async fn should_replace_file_without_leaving_temporary() {
        let dir = tempfile::tempdir().unwrap();
        let store = setup(&dir);
        store.write(b"first".to_vec()).await.unwrap();
        store.write(b"second".to_vec()).await.unwrap();

        assert_eq!(store.read().await.unwrap(), Some(b"second".to_vec()));
        assert!(!dir.path().join(".state.json.tmp").exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn should_fail_write_when_directory_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = Config {
            path: dir.path().join("missing").join("state.json"),
        }
        .build()
        .unwrap();
        let err = store.write(b"lost".to_vec()).await.unwrap_err();
        assert!(matches!(err, MeshError::Storage(_)));
    }

    #[tokio::test]
    async fn should_open_manager_as_corrupt_when_path_is_a_directory() {
        use thingmesh_app::codec::JsonCodec;
        use thingmesh_app::executor::Executor;
        use thingmesh_app::persistence::PersistentStateManager;
        use thingmesh_domain::error::CorruptStateError;

        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("state.json")).unwrap();
        let store = setup(&dir);

        let result = PersistentStateManager::open(store, JsonCodec, Executor::current().unwrap()).await;
        assert!(matches!(
            result.err(),
            Some(MeshError::CorruptPersistentState(CorruptStateError::Unreadable(_)))
        ));
    }

    #[test]
    fn should_reject_path_without_file_name() {
        let result = Config { path: PathBuf::from("/") }.build();
        assert!(matches!(result, Err(StorageError::NotAFile(_))));
    }
}

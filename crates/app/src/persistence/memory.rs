use std::sync::{Arc, Mutex, PoisonError};

use thingmesh_domain::error::MeshError;

use crate::ports::StateStore;

/// Store that keeps the blob in memory. Clones share the same blob, so a
/// manager can be reopened on what a previous one wrote.
#[derive(Debug, Clone, Default)]
pub struct MemoryStateStore {
    blob: Arc<Mutex<Option<Vec<u8>>>>,
}

impl MemoryStateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that starts with `blob` already written.
    #[must_use]
    pub fn with_blob(blob: Vec<u8>) -> Self {
        Self {
            blob: Arc::new(Mutex::new(Some(blob))),
        }
    }

    /// The last blob written.
    #[must_use]
    pub fn blob(&self) -> Option<Vec<u8>> {
        self.blob.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl StateStore for MemoryStateStore {
    async fn read(&self) -> Result<Option<Vec<u8>>, MeshError> {
        Ok(self.blob())
    }

    async fn write(&self, blob: Vec<u8>) -> Result<(), MeshError> {
        *self.blob.lock().unwrap_or_else(PoisonError::into_inner) = Some(blob);
        Ok(())
    }
}

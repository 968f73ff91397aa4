//! Storage-specific error type wrapping sqlx errors.

use thingmesh_domain::error::MeshError;

/// Errors originating from the `SQLite` storage layer.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A query or connection failed.
    #[error("database error")]
    Database(#[from] sqlx::Error),

    /// Failed to run migrations.
    #[error("migration error")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl From<StorageError> for MeshError {
    fn from(err: StorageError) -> Self {
        Self::Storage(Box::new(err))
    }
}

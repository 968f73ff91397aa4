//! `SQLite` implementation of [`StateStore`].

use sqlx::SqlitePool;

use thingmesh_app::ports::StateStore;
use thingmesh_domain::error::MeshError;
use thingmesh_domain::time;

use crate::error::StorageError;

const SELECT_BY_NAME: &str = "SELECT blob FROM state_blobs WHERE name = ?";

const UPSERT: &str = r"
    INSERT INTO state_blobs (name, blob, updated_at)
    VALUES (?, ?, ?)
    ON CONFLICT (name) DO UPDATE SET blob = excluded.blob, updated_at = excluded.updated_at
";

/// `SQLite`-backed state store holding one row of `state_blobs`.
pub struct SqliteStateStore {
    pool: SqlitePool,
    name: String,
}

impl SqliteStateStore {
    /// Create a store for the row `name` using the given connection pool.
    #[must_use]
    pub fn new(pool: SqlitePool, name: impl Into<String>) -> Self {
        Self {
            pool,
            name: name.into(),
        }
    }
}

impl StateStore for SqliteStateStore {
    async fn read(&self) -> Result<Option<Vec<u8>>, MeshError> {
        let row: Option<(Vec<u8>,)> = sqlx::query_as(SELECT_BY_NAME)
            .bind(&self.name)
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::from)?;

        Ok(row.map(|(blob,)| blob))
    }

    async fn write(&self, blob: Vec<u8>) -> Result<(), MeshError> {
        let size = blob.len();
        sqlx::query(UPSERT)
            .bind(&self.name)
            .bind(blob)
            .bind(time::now())
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;

        tracing::debug!(name = %self.name, size, "state blob stored");
        Ok(())
    }

    async fn close(&self) -> Result<(), MeshError> {
        self.pool.close().await;
        Ok(())
    }
}

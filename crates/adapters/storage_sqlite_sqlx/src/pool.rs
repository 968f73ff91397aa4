//! `SQLite` connection pool setup and migration runner.

use std::str::FromStr;

use sqlx::SqlitePool;
use sqlx::sqlite::SqliteConnectOptions;

use crate::error::StorageError;
use crate::state_store::SqliteStateStore;

/// Configuration for the `SQLite` state store.
pub struct Config {
    /// `SQLite` connection URL (e.g. `sqlite:thingmesh.db?mode=rwc`).
    pub database_url: String,
    /// Row the store reads and writes.
    pub store_name: String,
}

impl Config {
    /// Build a [`SqliteStateStore`] from this configuration.
    ///
    /// Creates the connection pool, creates the database file if missing,
    /// and runs all pending migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the connection or migrations fail.
    pub async fn build(self) -> Result<SqliteStateStore, StorageError> {
        let pool = connect(&self.database_url).await?;
        Ok(SqliteStateStore::new(pool, self.store_name))
    }
}

/// Connect to the database and run migrations.
///
/// # Errors
///
/// Returns [`StorageError`] if the connection or migrations fail.
pub async fn connect(database_url: &str) -> Result<SqlitePool, StorageError> {
    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

    let pool = SqlitePool::connect_with(options).await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

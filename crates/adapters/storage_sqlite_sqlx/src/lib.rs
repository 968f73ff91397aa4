//! # thingmesh-adapter-storage-sqlite-sqlx
//!
//! `SQLite` state store using [sqlx](https://docs.rs/sqlx).
//!
//! ## Responsibilities
//! - Implement the `StateStore` port defined in `thingmesh-app::ports`
//! - Manage the `SQLite` connection pool lifecycle
//! - Run database migrations (using sqlx embedded migrations)
//!
//! Several stores can share one database: each one owns the row named
//! after it in `state_blobs`.
//!
//! ## Dependency rule
//! Depends on `thingmesh-app` (for port traits) and `thingmesh-domain` (for
//! the error type). The `app` and `domain` crates must never reference this
//! adapter.

pub mod error;
pub mod pool;
mod state_store;

pub use pool::Config;
pub use state_store::SqliteStateStore;

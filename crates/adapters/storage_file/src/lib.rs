//! # thingmesh-adapter-storage-file
//!
//! State store keeping the whole blob in one file.
//!
//! ## Responsibilities
//! - Implement the `StateStore` port defined in `thingmesh-app::ports`
//! - Replace the file atomically: every write goes to a sibling temporary
//!   file which is then renamed over the target
//!
//! ## Dependency rule
//! Depends on `thingmesh-app` (for port traits) and `thingmesh-domain` (for
//! the error type). The `app` and `domain` crates must never reference this
//! adapter.

pub mod error;
mod state_store;

pub use state_store::{Config, FileStateStore};

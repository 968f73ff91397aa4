//! Backing medium port — one opaque blob per store.

use std::future::Future;

use thingmesh_domain::error::MeshError;

/// Whole-store read and write of one blob.
///
/// Implementations live in adapter crates (file, `SQLite`). Every write
/// replaces the previous blob entirely.
pub trait StateStore: Send + Sync {
    /// Read the stored blob, or `None` when nothing was ever written.
    fn read(&self) -> impl Future<Output = Result<Option<Vec<u8>>, MeshError>> + Send;

    fn write(&self, blob: Vec<u8>) -> impl Future<Output = Result<(), MeshError>> + Send;

    /// Release the medium. Called once, after the final write.
    fn close(&self) -> impl Future<Output = Result<(), MeshError>> + Send {
        async { Ok(()) }
    }
}

//! Durable state for technologies and things.
//!
//! Objects that own state implement [`PersistentState`]. A manager
//! restores their snapshot when it starts managing them and listens for
//! dirty signals to write it back.

mod manager;
mod memory;
mod nested;

use std::sync::Arc;

use thingmesh_domain::error::MeshError;
use thingmesh_domain::value::ValueMap;

pub use self::manager::PersistentStateManager;
pub use self::memory::MemoryStateStore;
pub use self::nested::NestedStateManager;

/// Receiver of dirty signals.
pub trait StateListener: Send + Sync {
    /// The object calling this has state that is not persisted yet.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::Codec`] when the current snapshot cannot be
    /// encoded.
    fn state_changed(&self) -> Result<(), MeshError>;
}

/// An object whose state survives restarts.
pub trait PersistentState: Send + Sync {
    /// Snapshot of the state worth keeping.
    fn copy_state(&self) -> ValueMap;

    /// Restore from `state`, or start fresh when it is `None`.
    fn init_with_state(&self, state: Option<ValueMap>);

    fn set_state_listener(&self, listener: Option<Arc<dyn StateListener>>);
}

//! Loopback network error type.

use thingmesh_domain::error::MeshError;

/// Errors raised while wiring nodes into a network.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoopbackError {
    #[error("authority {0:?} is already in use")]
    AuthorityTaken(String),

    #[error("authority {0:?} is reserved")]
    ReservedAuthority(String),
}

impl From<LoopbackError> for MeshError {
    fn from(err: LoopbackError) -> Self {
        Self::Storage(Box::new(err))
    }
}

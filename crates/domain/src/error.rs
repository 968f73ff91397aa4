//! Common error types used across the workspace.
//!
//! [`MeshError`] is the single error returned by every fallible thingmesh
//! operation. Each concern defines its own typed error and converts via
//! `#[from]`; adapter crates box their errors into [`MeshError::Storage`].

use crate::value::ValueKind;
use crate::value_type::ValueType;

/// Top-level error for the workspace.
#[derive(Debug, thiserror::Error)]
pub enum MeshError {
    /// A value could not be coerced into the requested type.
    #[error("invalid value: {0}")]
    InvalidValue(#[from] InvalidValueError),

    /// A thing was rejected as a group member or hosting candidate.
    #[error("unacceptable thing: {0}")]
    UnacceptableThing(#[from] Rejection),

    /// The thing or URI is not linked to the technology that was asked.
    #[error("{resource} is not associated with this technology")]
    UnassociatedResource { resource: String },

    /// The URI does not resolve to anything.
    #[error("unknown resource {uri}")]
    UnknownResource { uri: String },

    /// The technology does not host foreign things.
    #[error("technology cannot host things")]
    TechnologyCannotHost,

    /// The technology does not support groups.
    #[error("technology does not support groups")]
    GroupsNotSupported,

    /// The thing has no property with this key.
    #[error("property {key} not found")]
    PropertyNotFound { key: String },

    /// The property exists but cannot be written.
    #[error("property {key} is read-only")]
    PropertyReadOnly { key: String },

    /// The thing has no method with this key.
    #[error("method {method} not found")]
    MethodNotFound { method: String },

    /// The backing store could not be read back at open time.
    #[error("corrupt persistent state")]
    CorruptPersistentState(#[from] CorruptStateError),

    /// A snapshot could not be encoded or decoded.
    #[error("codec error")]
    Codec(#[from] CodecError),

    /// The persistent state manager refused the request.
    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// The operation was cancelled before it completed.
    #[error("operation cancelled")]
    Cancelled,

    /// An adapter-level failure (I/O, database, transport).
    #[error("storage error")]
    Storage(Box<dyn std::error::Error + Send + Sync>),

    /// An invariant that should always hold was violated.
    #[error("internal error: {0}")]
    Internal(#[from] InternalError),
}

/// Coercion failures.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InvalidValueError {
    /// No coercion exists from this source kind to the target type.
    #[error("cannot coerce {from} into {to}")]
    Unsupported { from: ValueKind, to: ValueType },

    /// The source value does not fit in the target type.
    #[error("{value} is out of range for {to}")]
    OutOfRange { value: String, to: ValueType },

    /// The string is not a well-formed URI.
    #[error("malformed URI {0:?}")]
    MalformedUri(String),

    /// A required method parameter was not supplied.
    #[error("missing parameter {0}")]
    MissingParameter(&'static str),
}

/// Reasons a thing is refused by a group or a technology.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("cannot add a native group as a member")]
    NativeGroup,

    #[error("thing {0} is not associated with this technology")]
    Unassociated(String),

    #[error("this group must itself be hosted before adding hosted things")]
    GroupNotHosted,

    #[error("thing {0} cannot be hosted by this technology")]
    NotHostable(String),

    #[error("thing {0} is not hosted by the local technology")]
    NotHostedLocally(String),
}

/// Encoding and decoding failures from a codec.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to encode value")]
    Encode(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("failed to decode value")]
    Decode(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// The persisted store exists but cannot be interpreted.
#[derive(Debug, thiserror::Error)]
pub enum CorruptStateError {
    #[error("stored blob could not be decoded")]
    Undecodable(#[source] CodecError),

    #[error("stored entry {0:?} is not a map")]
    NotAMap(String),

    #[error("stored blob could not be read")]
    Unreadable(#[source] Box<MeshError>),
}

/// Misuse of the persistent state manager.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PersistenceError {
    #[error("{0:?} is already managed")]
    AlreadyManaged(String),

    #[error("{0:?} is not managed")]
    NotManaged(String),

    #[error("the manager is closed")]
    Closed,
}

/// Conditions that should not happen.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InternalError {
    #[error("background task panicked")]
    TaskPanicked,

    #[error("coercion table is incomplete: {0}")]
    IncompleteCoercionTable(String),

    #[error("{0}")]
    Invariant(&'static str),
}

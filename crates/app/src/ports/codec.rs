//! Codec port — turns value maps into bytes and back.

use thingmesh_domain::error::CodecError;
use thingmesh_domain::value::ValueMap;

/// Whole-map serializer used for persisted snapshots.
pub trait Codec: Send + Sync {
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] when the map holds a value the codec
    /// cannot represent.
    fn encode(&self, map: &ValueMap) -> Result<Vec<u8>, CodecError>;

    /// # Errors
    ///
    /// Returns [`CodecError::Decode`] when `bytes` is not a valid encoding.
    fn decode(&self, bytes: &[u8]) -> Result<ValueMap, CodecError>;
}

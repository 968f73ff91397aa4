//! JSON encoding of persisted snapshots.

use thingmesh_domain::error::CodecError;
use thingmesh_domain::value::ValueMap;

use crate::ports::Codec;

/// [`Codec`] writing value maps as JSON objects.
///
/// URIs come back as strings; typed keys coerce them on read. Thing
/// handles cannot be encoded.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode(&self, map: &ValueMap) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(map).map_err(|err| CodecError::Encode(Box::new(err)))
    }

    fn decode(&self, bytes: &[u8]) -> Result<ValueMap, CodecError> {
        serde_json::from_slice(bytes).map_err(|err| CodecError::Decode(Box::new(err)))
    }
}

//! `base`: identity metadata every thing exposes.

use crate::catalog::{PropertyDescriptor, TraitDescriptor};
use crate::key::PropertyKey;
use crate::value_type::{ScalarType, ValueType};

pub const TRAIT_ID: &str = "base";

/// Unique id; for groups this is the group id.
pub const META_UID: PropertyKey<String> = PropertyKey::new("m/base/uid");
pub const META_NAME: PropertyKey<String> = PropertyKey::new("m/base/name");
pub const META_MANUFACTURER: PropertyKey<String> = PropertyKey::new("m/base/mfgr");
pub const META_MODEL: PropertyKey<String> = PropertyKey::new("m/base/modl");
/// Ids of the traits the thing implements.
pub const META_TRAITS: PropertyKey<Vec<String>> = PropertyKey::new("m/base/trts");

pub static TRAIT: TraitDescriptor = TraitDescriptor {
    id: TRAIT_ID,
    properties: &[
        PropertyDescriptor::new("m/base/uid", ValueType::String).derived(),
        PropertyDescriptor::new("m/base/name", ValueType::String).writable(),
        PropertyDescriptor::new("m/base/mfgr", ValueType::String),
        PropertyDescriptor::new("m/base/modl", ValueType::String),
        PropertyDescriptor::new("m/base/trts", ValueType::Array(ScalarType::String)).derived(),
    ],
    methods: &[],
};

//! `scen`: named snapshots of a thing's state, stored as child things.

use crate::catalog::{MethodDescriptor, PropertyDescriptor, TraitDescriptor};
use crate::key::{MethodKey, ParamKey, PropertyKey};
use crate::value_type::ValueType;

pub const TRAIT_ID: &str = "scen";

/// Id of the active scene. Writing it recalls that scene; reading it
/// yields nothing once the state has diverged from the recalled snapshot.
pub const STAT_SCENE_ID: PropertyKey<String> = PropertyKey::new("s/scen/sid");

/// Name of the save method; the result is the scene's child thing.
pub const METHOD_SAVE: &str = "f/scen/save";

/// Scene id to save under; a fresh id is generated when omitted.
pub const PARAM_SCENE_ID: ParamKey<String> = ParamKey::new("sid");

/// Typed key for [`METHOD_SAVE`], parameterized over the child handle type
/// defined by the runtime.
#[must_use]
pub const fn save_method<R>() -> MethodKey<R> {
    MethodKey::new(METHOD_SAVE)
}

pub static TRAIT: TraitDescriptor = TraitDescriptor {
    id: TRAIT_ID,
    properties: &[PropertyDescriptor::new("s/scen/sid", ValueType::String)
        .writable()
        .derived()],
    methods: &[MethodDescriptor {
        name: METHOD_SAVE,
        returns: ValueType::Handle,
    }],
};

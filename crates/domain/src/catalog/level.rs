//! `levl`: a dimmable value in `[0, 1]`.

use crate::catalog::{Initial, PropertyDescriptor, TraitDescriptor};
use crate::key::PropertyKey;
use crate::value_type::ValueType;

pub const TRAIT_ID: &str = "levl";

pub const STAT_VALUE: PropertyKey<f32> = PropertyKey::new("s/levl/v");

pub static TRAIT: TraitDescriptor = TraitDescriptor {
    id: TRAIT_ID,
    properties: &[PropertyDescriptor::new("s/levl/v", ValueType::Float32)
        .writable()
        .in_scene()
        .domain(0.0, 1.0)
        .initial(Initial::Float(0.0))],
    methods: &[],
};

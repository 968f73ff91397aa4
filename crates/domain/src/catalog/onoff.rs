//! `onof`: a switchable thing, with fade durations used by transitions.

use crate::catalog::{Initial, PropertyDescriptor, TraitDescriptor};
use crate::key::PropertyKey;
use crate::value_type::ValueType;

pub const TRAIT_ID: &str = "onof";

pub const STAT_VALUE: PropertyKey<bool> = PropertyKey::new("s/onof/v");
/// Seconds used when turning on or raising a level.
pub const CONF_DURATION_ON: PropertyKey<f32> = PropertyKey::new("c/onof/don");
/// Seconds used when turning off or lowering a level.
pub const CONF_DURATION_OFF: PropertyKey<f32> = PropertyKey::new("c/onof/dof");

/// Default fade duration in seconds.
pub const DEFAULT_DURATION: f64 = 0.4;

pub static TRAIT: TraitDescriptor = TraitDescriptor {
    id: TRAIT_ID,
    properties: &[
        PropertyDescriptor::new("s/onof/v", ValueType::Bool)
            .writable()
            .in_scene()
            .initial(Initial::Bool(false)),
        PropertyDescriptor::new("c/onof/don", ValueType::Float32)
            .writable()
            .domain(0.0, 3600.0)
            .initial(Initial::Float(DEFAULT_DURATION)),
        PropertyDescriptor::new("c/onof/dof", ValueType::Float32)
            .writable()
            .domain(0.0, 3600.0)
            .initial(Initial::Float(DEFAULT_DURATION)),
    ],
    methods: &[],
};

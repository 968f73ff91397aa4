//! `tran`: transition timing.
//!
//! Reading [`STAT_DURATION`] reports the seconds left on the longest running
//! transition (zero once settled). Writing it alongside other state in one
//! apply sets the duration of the transitions that apply starts.

use crate::catalog::{PropertyDescriptor, TraitDescriptor};
use crate::key::PropertyKey;
use crate::value_type::ValueType;

pub const TRAIT_ID: &str = "tran";

pub const STAT_DURATION: PropertyKey<f32> = PropertyKey::new("s/tran/d");

pub static TRAIT: TraitDescriptor = TraitDescriptor {
    id: TRAIT_ID,
    properties: &[PropertyDescriptor::new("s/tran/d", ValueType::Float32)
        .writable()
        .derived()
        .domain(0.0, 3600.0)],
    methods: &[],
};

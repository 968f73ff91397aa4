//! Minimal trait catalog.
//!
//! A trait is a named bundle of properties and methods. Descriptors are
//! static data consumed by local things to build their property tables;
//! the typed keys in each submodule are what callers use.

pub mod base;
pub mod level;
pub mod onoff;
pub mod scene;
pub mod transition;

use crate::value::Value;
use crate::value_type::ValueType;

/// Static description of one trait.
#[derive(Debug)]
pub struct TraitDescriptor {
    /// Short trait id, the second segment of its property names.
    pub id: &'static str,
    pub properties: &'static [PropertyDescriptor],
    pub methods: &'static [MethodDescriptor],
}

impl TraitDescriptor {
    /// Look up one of this trait's properties by full name.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&'static PropertyDescriptor> {
        self.properties.iter().find(|property| property.name == name)
    }
}

/// Initial value of a property before anything is written or restored.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Initial {
    Unset,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(&'static str),
}

impl Initial {
    #[must_use]
    pub fn to_value(self) -> Option<Value> {
        match self {
            Self::Unset => None,
            Self::Bool(value) => Some(Value::Bool(value)),
            Self::Int(value) => Some(Value::Int(value)),
            Self::Float(value) => Some(Value::Float(value)),
            Self::Text(value) => Some(Value::from(value)),
        }
    }
}

/// Static description of one property.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PropertyDescriptor {
    pub name: &'static str,
    pub value_type: ValueType,
    pub writable: bool,
    /// Derived properties are computed on read and never stored.
    pub derived: bool,
    /// Captured in scene snapshots.
    pub in_scene: bool,
    /// Legal numeric range; writes are clamped into it.
    pub domain: Option<(f64, f64)>,
    pub initial: Initial,
}

impl PropertyDescriptor {
    #[must_use]
    pub const fn new(name: &'static str, value_type: ValueType) -> Self {
        Self {
            name,
            value_type,
            writable: false,
            derived: false,
            in_scene: false,
            domain: None,
            initial: Initial::Unset,
        }
    }

    #[must_use]
    pub const fn writable(mut self) -> Self {
        self.writable = true;
        self
    }

    #[must_use]
    pub const fn derived(mut self) -> Self {
        self.derived = true;
        self
    }

    #[must_use]
    pub const fn in_scene(mut self) -> Self {
        self.in_scene = true;
        self
    }

    #[must_use]
    pub const fn domain(mut self, min: f64, max: f64) -> Self {
        self.domain = Some((min, max));
        self
    }

    #[must_use]
    pub const fn initial(mut self, initial: Initial) -> Self {
        self.initial = initial;
        self
    }

    /// Clamp a numeric value into [`Self::domain`]; other values pass
    /// through untouched.
    #[must_use]
    pub fn clamp(&self, value: Value) -> Value {
        match (self.domain, &value) {
            (Some((min, max)), Value::Float(number)) => Value::Float(number.clamp(min, max)),
            #[allow(clippy::cast_possible_truncation)]
            (Some((min, max)), Value::Int(number)) => {
                Value::Int((*number).clamp(min.ceil() as i64, max.floor() as i64))
            }
            _ => value,
        }
    }
}

/// Static description of one method.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MethodDescriptor {
    pub name: &'static str,
    pub returns: ValueType,
}

/// Every trait in the catalog.
pub static ALL: [&TraitDescriptor; 5] = [&base::TRAIT, &onoff::TRAIT, &level::TRAIT, &transition::TRAIT, &scene::TRAIT];

/// Look up a method by full name across the whole catalog.
#[must_use]
pub fn method(name: &str) -> Option<&'static MethodDescriptor> {
    ALL.iter()
        .flat_map(|descriptor| descriptor.methods.iter())
        .find(|method| method.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_clamp_level_into_unit_range() {
        let level = level::TRAIT.property(level::STAT_VALUE.name()).unwrap();
        assert_eq!(level.clamp(Value::Float(100_000.0)), Value::Float(1.0));
        assert_eq!(level.clamp(Value::Float(-0.1)), Value::Float(0.0));
    }

    #[test]
    fn should_leave_values_without_domain_untouched() {
        let name = base::TRAIT.property(base::META_NAME.name()).unwrap();
        assert_eq!(name.clamp(Value::from("x")), Value::from("x"));
    }

    #[test]
    fn should_keep_key_names_consistent_with_descriptors() {
        for descriptor in ALL {
            for property in descriptor.properties {
                assert_eq!(property.name.split('/').nth(1), Some(descriptor.id));
            }
        }
    }

    #[test]
    fn should_find_method_return_type_by_name() {
        assert_eq!(method(scene::METHOD_SAVE).map(|m| m.returns), Some(ValueType::Handle));
        assert!(method("f/none/x").is_none());
    }
}

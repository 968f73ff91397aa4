//! Operation modifiers and read-modify-write mutations.
//!
//! Both have a query-style token form (`d=0.5`, `all`, `inc`, `tog`, …)
//! that technologies use when mapping an operation onto a URI.

use crate::coerce::coerce;
use crate::error::InvalidValueError;
use crate::value::Value;
use crate::value_type::ValueType;

/// Adjusts how a single operation is carried out.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Modifier {
    /// Transition duration in seconds for this operation only.
    Duration(f64),
    /// Include every property when fetching a section.
    All,
}

impl Modifier {
    /// Transition duration requested by the last [`Modifier::Duration`].
    #[must_use]
    pub fn transition_duration(modifiers: &[Modifier]) -> Option<f64> {
        modifiers.iter().rev().find_map(|modifier| match modifier {
            Self::Duration(secs) => Some(*secs),
            Self::All => None,
        })
    }

    #[must_use]
    pub fn to_query(self) -> String {
        match self {
            Self::Duration(secs) => format!("d={secs}"),
            Self::All => "all".to_string(),
        }
    }

    /// Parse one query parameter. Unrelated parameters yield `None`.
    #[must_use]
    pub fn from_query(param: &str) -> Option<Self> {
        match param.split_once('=') {
            Some(("d", secs)) => secs.parse().ok().map(Self::Duration),
            None if param == "all" => Some(Self::All),
            _ => None,
        }
    }
}

/// Read-modify-write operations on a single property.
///
/// Mutations are resolved against the property's *committed* value, so a
/// running transition never skews the result.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Add to a numeric value.
    Increment(Value),
    /// Negate a boolean value.
    Toggle,
    /// Append to an array value.
    Insert(Value),
    /// Remove every equal element from an array value.
    Remove(Value),
}

impl Mutation {
    #[must_use]
    pub fn query_token(&self) -> &'static str {
        match self {
            Self::Increment(_) => "inc",
            Self::Toggle => "tog",
            Self::Insert(_) => "ins",
            Self::Remove(_) => "rem",
        }
    }

    /// Rebuild a mutation from its query token and request payload.
    #[must_use]
    pub fn from_query(token: &str, payload: Option<Value>) -> Option<Self> {
        match (token, payload) {
            ("tog", _) => Some(Self::Toggle),
            ("inc", Some(amount)) => Some(Self::Increment(amount)),
            ("ins", Some(item)) => Some(Self::Insert(item)),
            ("rem", Some(item)) => Some(Self::Remove(item)),
            _ => None,
        }
    }

    /// Operand carried by the mutation, if any.
    #[must_use]
    pub fn operand(&self) -> Option<&Value> {
        match self {
            Self::Increment(value) | Self::Insert(value) | Self::Remove(value) => Some(value),
            Self::Toggle => None,
        }
    }

    /// Compute the new value from `current`, coerced to `target`.
    ///
    /// A missing current value counts as zero, `false` or the empty array.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidValueError`] when the mutation does not fit the
    /// property type or the operand cannot be coerced.
    pub fn apply(&self, current: Option<&Value>, target: ValueType) -> Result<Value, InvalidValueError> {
        let unsupported = |from: &Value| InvalidValueError::Unsupported {
            from: from.kind(),
            to: target,
        };
        match self {
            Self::Increment(amount) if target.is_integer() => {
                let current = current.map_or(Ok(Value::Int(0)), |value| coerce(value, ValueType::Int64))?;
                let amount = coerce(amount, ValueType::Int64)?;
                let (Value::Int(current), Value::Int(amount)) = (&current, &amount) else {
                    return Err(unsupported(&amount));
                };
                coerce(&Value::Int(current.saturating_add(*amount)), target)
            }
            Self::Increment(amount) if target.is_numeric() => {
                let current = current.map_or(Ok(Value::Float(0.0)), |value| {
                    coerce(value, ValueType::Float64)
                })?;
                let amount = coerce(amount, ValueType::Float64)?;
                let (Value::Float(current), Value::Float(amount)) = (&current, &amount) else {
                    return Err(unsupported(&amount));
                };
                coerce(&Value::Float(current + amount), target)
            }
            Self::Increment(amount) => Err(unsupported(amount)),
            Self::Toggle if target == ValueType::Bool => {
                let current = current.map_or(Ok(Value::Bool(false)), |value| coerce(value, ValueType::Bool))?;
                Ok(Value::Bool(current.as_bool() != Some(true)))
            }
            Self::Toggle => Err(InvalidValueError::Unsupported {
                from: crate::value::ValueKind::Bool,
                to: target,
            }),
            Self::Insert(item) | Self::Remove(item) => {
                let ValueType::Array(element) = target else {
                    return Err(unsupported(item));
                };
                let item = coerce(item, element.into())?;
                let mut items = match current.map(|value| coerce(value, target)).transpose()? {
                    Some(Value::Array(items)) => items,
                    _ => Vec::new(),
                };
                if matches!(self, Self::Insert(_)) {
                    items.push(item);
                } else {
                    items.retain(|existing| existing != &item);
                }
                Ok(Value::Array(items))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value_type::ScalarType;

    #[test]
    fn should_pick_last_duration_modifier() {
        let modifiers = [Modifier::Duration(1.0), Modifier::All, Modifier::Duration(0.5)];
        assert_eq!(Modifier::transition_duration(&modifiers), Some(0.5));
        assert_eq!(Modifier::transition_duration(&[Modifier::All]), None);
    }

    #[test]
    fn should_roundtrip_modifiers_through_query() {
        for modifier in [Modifier::Duration(0.25), Modifier::All] {
            assert_eq!(Modifier::from_query(&modifier.to_query()), Some(modifier));
        }
        assert_eq!(Modifier::from_query("inc"), None);
    }

    #[test]
    fn should_add_to_committed_float_when_incrementing() {
        let next = Mutation::Increment(Value::Float(0.1))
            .apply(Some(&Value::Float(0.2)), ValueType::Float64)
            .unwrap();
        let Value::Float(next) = next else { panic!("not a float") };
        assert!((next - 0.3).abs() < 1e-9);
    }

    #[test]
    fn should_treat_missing_value_as_zero_when_incrementing_int() {
        let next = Mutation::Increment(Value::Int(3)).apply(None, ValueType::Int32).unwrap();
        assert_eq!(next, Value::Int(3));
    }

    #[test]
    fn should_negate_bool_when_toggling() {
        let next = Mutation::Toggle
            .apply(Some(&Value::Bool(true)), ValueType::Bool)
            .unwrap();
        assert_eq!(next, Value::Bool(false));
        assert!(Mutation::Toggle.apply(None, ValueType::Float32).is_err());
    }

    #[test]
    fn should_append_and_remove_array_elements() {
        let target = ValueType::Array(ScalarType::String);
        let inserted = Mutation::Insert(Value::from("b"))
            .apply(Some(&Value::Array(vec![Value::from("a")])), target)
            .unwrap();
        assert_eq!(inserted, Value::Array(vec![Value::from("a"), Value::from("b")]));
        let removed = Mutation::Remove(Value::from("a")).apply(Some(&inserted), target).unwrap();
        assert_eq!(removed, Value::Array(vec![Value::from("b")]));
    }
}

//! The closed coercion table.
//!
//! Every supported conversion is one row `(source kind, target tag, fn)`.
//! A pair missing from the table is unsupported and fails with
//! [`InvalidValueError::Unsupported`]. [`verify_table`] checks at startup
//! that the table covers the supported type set.
//!
//! Numeric rules:
//! - float → integer rounds with `floor()` (so positive values truncate
//!   toward zero) and fails when the result does not fit the target
//! - float → bool is `true` iff the value is ≥ 0.5
//! - integer → float is exact within the float's mantissa
//! - integer → int32 fails when the value does not fit

use std::collections::HashSet;

use crate::error::{InternalError, InvalidValueError};
use crate::value::{Value, ValueKind};
use crate::value_type::{TypeTag, ValueType};

type CoerceFn = fn(&Value, ValueType) -> Result<Value, InvalidValueError>;

struct Coercion {
    from: ValueKind,
    to: TypeTag,
    apply: CoerceFn,
}

const fn row(from: ValueKind, to: TypeTag, apply: CoerceFn) -> Coercion {
    Coercion { from, to, apply }
}

static TABLE: &[Coercion] = &[
    row(ValueKind::Bool, TypeTag::Bool, identity),
    row(ValueKind::Bool, TypeTag::Int32, bool_to_int),
    row(ValueKind::Bool, TypeTag::Int64, bool_to_int),
    row(ValueKind::Bool, TypeTag::Float32, bool_to_float),
    row(ValueKind::Bool, TypeTag::Float64, bool_to_float),
    row(ValueKind::Bool, TypeTag::String, to_text),
    row(ValueKind::Int, TypeTag::Bool, int_to_bool),
    row(ValueKind::Int, TypeTag::Int32, int_to_int),
    row(ValueKind::Int, TypeTag::Int64, int_to_int),
    row(ValueKind::Int, TypeTag::Float32, int_to_float),
    row(ValueKind::Int, TypeTag::Float64, int_to_float),
    row(ValueKind::Int, TypeTag::String, to_text),
    row(ValueKind::Float, TypeTag::Bool, float_to_bool),
    row(ValueKind::Float, TypeTag::Int32, float_to_int),
    row(ValueKind::Float, TypeTag::Int64, float_to_int),
    row(ValueKind::Float, TypeTag::Float32, float_to_float),
    row(ValueKind::Float, TypeTag::Float64, float_to_float),
    row(ValueKind::Float, TypeTag::String, to_text),
    row(ValueKind::String, TypeTag::String, identity),
    row(ValueKind::String, TypeTag::Uri, text_to_uri),
    row(ValueKind::Uri, TypeTag::Uri, identity),
    row(ValueKind::Uri, TypeTag::String, to_text),
    row(ValueKind::Array, TypeTag::Array, element_wise),
    row(ValueKind::Map, TypeTag::Map, identity),
    row(ValueKind::Handle, TypeTag::Handle, identity),
];

/// Coerce `value` into the declared `target` type.
///
/// # Errors
///
/// Returns [`InvalidValueError`] when the pair is not in the table or the
/// value does not fit in the target type.
pub fn coerce(value: &Value, target: ValueType) -> Result<Value, InvalidValueError> {
    let tag = target.tag();
    let kind = value.kind();
    TABLE
        .iter()
        .find(|coercion| coercion.from == kind && coercion.to == tag)
        .map_or_else(
            || Err(unsupported(value, target)),
            |coercion| (coercion.apply)(value, target),
        )
}

/// Check that the table is complete and unambiguous.
///
/// Every target type must accept its own natural value kind, every scalar
/// kind must render as a string, and no pair may appear twice.
///
/// # Errors
///
/// Returns [`InternalError::IncompleteCoercionTable`] naming the first gap.
pub fn verify_table() -> Result<(), InternalError> {
    let mut seen = HashSet::new();
    for coercion in TABLE {
        if !seen.insert((coercion.from, coercion.to)) {
            return Err(InternalError::IncompleteCoercionTable(format!(
                "duplicate row {} -> {:?}",
                coercion.from, coercion.to
            )));
        }
    }
    for tag in TypeTag::ALL {
        let natural = natural_kind(tag);
        if !seen.contains(&(natural, tag)) {
            return Err(InternalError::IncompleteCoercionTable(format!(
                "no identity row for {tag:?}"
            )));
        }
    }
    for kind in [ValueKind::Bool, ValueKind::Int, ValueKind::Float, ValueKind::Uri] {
        if !seen.contains(&(kind, TypeTag::String)) {
            return Err(InternalError::IncompleteCoercionTable(format!(
                "{kind} cannot be rendered as a string"
            )));
        }
    }
    Ok(())
}

fn natural_kind(tag: TypeTag) -> ValueKind {
    match tag {
        TypeTag::Bool => ValueKind::Bool,
        TypeTag::Int32 | TypeTag::Int64 => ValueKind::Int,
        TypeTag::Float32 | TypeTag::Float64 => ValueKind::Float,
        TypeTag::String => ValueKind::String,
        TypeTag::Uri => ValueKind::Uri,
        TypeTag::Array => ValueKind::Array,
        TypeTag::Map => ValueKind::Map,
        TypeTag::Handle => ValueKind::Handle,
    }
}

fn unsupported(value: &Value, target: ValueType) -> InvalidValueError {
    InvalidValueError::Unsupported {
        from: value.kind(),
        to: target,
    }
}

fn out_of_range(value: &Value, target: ValueType) -> InvalidValueError {
    InvalidValueError::OutOfRange {
        value: value.to_string(),
        to: target,
    }
}

fn identity(value: &Value, _target: ValueType) -> Result<Value, InvalidValueError> {
    Ok(value.clone())
}

fn bool_to_int(value: &Value, target: ValueType) -> Result<Value, InvalidValueError> {
    let flag = value.as_bool().ok_or_else(|| unsupported(value, target))?;
    Ok(Value::Int(i64::from(flag)))
}

fn bool_to_float(value: &Value, target: ValueType) -> Result<Value, InvalidValueError> {
    let flag = value.as_bool().ok_or_else(|| unsupported(value, target))?;
    Ok(Value::Float(if flag { 1.0 } else { 0.0 }))
}

fn to_text(value: &Value, target: ValueType) -> Result<Value, InvalidValueError> {
    match value {
        Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::Uri(_) => {
            Ok(Value::String(value.to_string()))
        }
        Value::String(text) => Ok(Value::String(text.clone())),
        _ => Err(unsupported(value, target)),
    }
}

fn int_to_bool(value: &Value, target: ValueType) -> Result<Value, InvalidValueError> {
    match value {
        Value::Int(number) => Ok(Value::Bool(*number != 0)),
        _ => Err(unsupported(value, target)),
    }
}

fn int_to_int(value: &Value, target: ValueType) -> Result<Value, InvalidValueError> {
    let Value::Int(number) = value else {
        return Err(unsupported(value, target));
    };
    if target == ValueType::Int32 && i32::try_from(*number).is_err() {
        return Err(out_of_range(value, target));
    }
    Ok(Value::Int(*number))
}

#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
fn int_to_float(value: &Value, target: ValueType) -> Result<Value, InvalidValueError> {
    let Value::Int(number) = value else {
        return Err(unsupported(value, target));
    };
    let converted = if target == ValueType::Float32 {
        f64::from(*number as f32)
    } else {
        *number as f64
    };
    Ok(Value::Float(converted))
}

fn float_to_bool(value: &Value, target: ValueType) -> Result<Value, InvalidValueError> {
    match value {
        Value::Float(number) => Ok(Value::Bool(*number >= 0.5)),
        _ => Err(unsupported(value, target)),
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn float_to_int(value: &Value, target: ValueType) -> Result<Value, InvalidValueError> {
    let Value::Float(number) = value else {
        return Err(unsupported(value, target));
    };
    let floored = number.floor();
    // Upper bounds are exclusive: i64::MAX itself is not representable.
    let (min, upper) = if target == ValueType::Int32 {
        (f64::from(i32::MIN), f64::from(i32::MAX) + 1.0)
    } else {
        (i64::MIN as f64, -(i64::MIN as f64))
    };
    if !floored.is_finite() || floored < min || floored >= upper {
        return Err(out_of_range(value, target));
    }
    Ok(Value::Int(floored as i64))
}

#[allow(clippy::cast_possible_truncation)]
fn float_to_float(value: &Value, target: ValueType) -> Result<Value, InvalidValueError> {
    let Value::Float(number) = value else {
        return Err(unsupported(value, target));
    };
    if target == ValueType::Float32 {
        if number.is_finite() && number.abs() > f64::from(f32::MAX) {
            return Err(out_of_range(value, target));
        }
        return Ok(Value::Float(f64::from(*number as f32)));
    }
    Ok(Value::Float(*number))
}

fn text_to_uri(value: &Value, target: ValueType) -> Result<Value, InvalidValueError> {
    match value {
        Value::String(text) => Ok(Value::Uri(text.parse()?)),
        _ => Err(unsupported(value, target)),
    }
}

fn element_wise(value: &Value, target: ValueType) -> Result<Value, InvalidValueError> {
    let (Value::Array(items), ValueType::Array(element)) = (value, target) else {
        return Err(unsupported(value, target));
    };
    items
        .iter()
        .map(|item| coerce(item, element.into()))
        .collect::<Result<Vec<_>, _>>()
        .map(Value::Array)
}

//! Typed keys for properties, methods and method parameters.
//!
//! Property names follow `<section>/<trait>/<name>` (for example
//! `s/levl/v`); method names use the `f` prefix (`f/scen/save`). A key
//! carries the Rust type its values coerce to.

use std::fmt;
use std::marker::PhantomData;

use crate::coerce::coerce;
use crate::error::InvalidValueError;
use crate::section::Section;
use crate::uri::Uri;
use crate::value::{Value, ValueMap};
use crate::value_type::{ScalarType, ValueType};

/// Name prefix of method keys.
pub const METHOD_PREFIX: &str = "f";

/// Rust types that property values can be coerced into.
pub trait PropertyType: Sized + Send + Sync + 'static {
    /// Declared type used as the coercion target.
    const TYPE: ValueType;

    fn into_value(self) -> Value;

    /// Unwrap a value that already has the shape of [`Self::TYPE`].
    ///
    /// # Errors
    ///
    /// Returns [`InvalidValueError`] when the value has another shape.
    fn from_value(value: Value) -> Result<Self, InvalidValueError>;

    /// Coerce an arbitrary value into `Self`.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidValueError`] when no coercion applies.
    fn coerce(value: &Value) -> Result<Self, InvalidValueError> {
        Self::from_value(coerce(value, Self::TYPE)?)
    }
}

fn mismatch<T: PropertyType>(value: &Value) -> InvalidValueError {
    InvalidValueError::Unsupported {
        from: value.kind(),
        to: T::TYPE,
    }
}

impl PropertyType for bool {
    const TYPE: ValueType = ValueType::Bool;

    fn into_value(self) -> Value {
        Value::Bool(self)
    }

    fn from_value(value: Value) -> Result<Self, InvalidValueError> {
        value.as_bool().ok_or_else(|| mismatch::<Self>(&value))
    }
}

impl PropertyType for i32 {
    const TYPE: ValueType = ValueType::Int32;

    fn into_value(self) -> Value {
        Value::Int(i64::from(self))
    }

    fn from_value(value: Value) -> Result<Self, InvalidValueError> {
        match value {
            Value::Int(number) => i32::try_from(number).map_err(|_| InvalidValueError::OutOfRange {
                value: number.to_string(),
                to: Self::TYPE,
            }),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

impl PropertyType for i64 {
    const TYPE: ValueType = ValueType::Int64;

    fn into_value(self) -> Value {
        Value::Int(self)
    }

    fn from_value(value: Value) -> Result<Self, InvalidValueError> {
        match value {
            Value::Int(number) => Ok(number),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

impl PropertyType for f32 {
    const TYPE: ValueType = ValueType::Float32;

    fn into_value(self) -> Value {
        Value::Float(f64::from(self))
    }

    #[allow(clippy::cast_possible_truncation)]
    fn from_value(value: Value) -> Result<Self, InvalidValueError> {
        match value {
            Value::Float(number) => Ok(number as f32),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

impl PropertyType for f64 {
    const TYPE: ValueType = ValueType::Float64;

    fn into_value(self) -> Value {
        Value::Float(self)
    }

    fn from_value(value: Value) -> Result<Self, InvalidValueError> {
        match value {
            Value::Float(number) => Ok(number),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

impl PropertyType for String {
    const TYPE: ValueType = ValueType::String;

    fn into_value(self) -> Value {
        Value::String(self)
    }

    fn from_value(value: Value) -> Result<Self, InvalidValueError> {
        match value {
            Value::String(text) => Ok(text),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

impl PropertyType for Uri {
    const TYPE: ValueType = ValueType::Uri;

    fn into_value(self) -> Value {
        Value::Uri(self)
    }

    fn from_value(value: Value) -> Result<Self, InvalidValueError> {
        match value {
            Value::Uri(uri) => Ok(uri),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

impl PropertyType for ValueMap {
    const TYPE: ValueType = ValueType::Map;

    fn into_value(self) -> Value {
        Value::Map(self)
    }

    fn from_value(value: Value) -> Result<Self, InvalidValueError> {
        match value {
            Value::Map(map) => Ok(map),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

macro_rules! array_type {
    ($element:ty, $scalar:ident) => {
        impl PropertyType for Vec<$element> {
            const TYPE: ValueType = ValueType::Array(ScalarType::$scalar);

            fn into_value(self) -> Value {
                Value::Array(self.into_iter().map(PropertyType::into_value).collect())
            }

            fn from_value(value: Value) -> Result<Self, InvalidValueError> {
                match value {
                    Value::Array(items) => items.into_iter().map(<$element>::from_value).collect(),
                    other => Err(mismatch::<Self>(&other)),
                }
            }
        }
    };
}

array_type!(bool, Bool);
array_type!(i32, Int32);
array_type!(i64, Int64);
array_type!(f32, Float32);
array_type!(f64, Float64);
array_type!(String, String);
array_type!(Uri, Uri);

/// A named, typed property.
pub struct PropertyKey<T> {
    name: &'static str,
    kind: PhantomData<fn() -> T>,
}

impl<T> PropertyKey<T> {
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            kind: PhantomData,
        }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn section(&self) -> Option<Section> {
        Section::of_key(self.name)
    }

    /// Trait id segment of the name (`onof` in `s/onof/v`).
    #[must_use]
    pub fn trait_id(&self) -> Option<&'static str> {
        self.name.split('/').nth(1)
    }
}

impl<T: PropertyType> PropertyKey<T> {
    #[must_use]
    pub fn value_type(&self) -> ValueType {
        T::TYPE
    }

    /// Coerce a raw value into this key's type.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidValueError`] when no coercion applies.
    pub fn coerce(&self, value: &Value) -> Result<T, InvalidValueError> {
        T::coerce(value)
    }

    /// A single-entry property map `{name: value}`.
    #[must_use]
    pub fn with(&self, value: T) -> ValueMap {
        ValueMap::from([(self.name.to_string(), value.into_value())])
    }
}

impl<T> Clone for PropertyKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for PropertyKey<T> {}

impl<T> PartialEq for PropertyKey<T> {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl<T> Eq for PropertyKey<T> {}

impl<T> fmt::Debug for PropertyKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PropertyKey").field(&self.name).finish()
    }
}

impl<T> fmt::Display for PropertyKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// A named method returning `R`.
pub struct MethodKey<R> {
    name: &'static str,
    kind: PhantomData<fn() -> R>,
}

impl<R> MethodKey<R> {
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            kind: PhantomData,
        }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl<R: PropertyType> MethodKey<R> {
    #[must_use]
    pub fn return_type(&self) -> ValueType {
        R::TYPE
    }
}

impl<R> Clone for MethodKey<R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<R> Copy for MethodKey<R> {}

impl<R> fmt::Debug for MethodKey<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MethodKey").field(&self.name).finish()
    }
}

/// A named, typed method parameter.
pub struct ParamKey<T> {
    name: &'static str,
    kind: PhantomData<fn() -> T>,
}

impl<T> ParamKey<T> {
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            kind: PhantomData,
        }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl<T: PropertyType> ParamKey<T> {
    /// A single-entry argument map `{name: value}`.
    #[must_use]
    pub fn with(&self, value: T) -> ValueMap {
        ValueMap::from([(self.name.to_string(), value.into_value())])
    }

    /// Read this parameter from an argument map, if present.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidValueError`] when the argument cannot be coerced.
    pub fn get(&self, args: &ValueMap) -> Result<Option<T>, InvalidValueError> {
        args.get(self.name).map(T::coerce).transpose()
    }

    /// Read a mandatory parameter.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidValueError::MissingParameter`] when absent.
    pub fn require(&self, args: &ValueMap) -> Result<T, InvalidValueError> {
        self.get(args)?
            .ok_or(InvalidValueError::MissingParameter(self.name))
    }
}

impl<T> Clone for ParamKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ParamKey<T> {}

impl<T> fmt::Debug for ParamKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ParamKey").field(&self.name).finish()
    }
}

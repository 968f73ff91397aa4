//! Declared types of property values.

use std::fmt;

/// Element types allowed inside array-typed properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    Bool,
    Int32,
    Int64,
    Float32,
    Float64,
    String,
    Uri,
}

/// The declared type of a property, method result or parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Bool,
    Int32,
    Int64,
    Float32,
    Float64,
    String,
    Uri,
    /// Ordered sequence of scalar elements.
    Array(ScalarType),
    /// String-keyed map of arbitrary values.
    Map,
    /// Live, non-serializable reference (for example a thing returned by a
    /// method).
    Handle,
}

/// Payload-free discriminant of [`ValueType`], used as the target column
/// of the coercion table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Bool,
    Int32,
    Int64,
    Float32,
    Float64,
    String,
    Uri,
    Array,
    Map,
    Handle,
}

impl TypeTag {
    /// Every tag, in declaration order.
    pub const ALL: [TypeTag; 10] = [
        TypeTag::Bool,
        TypeTag::Int32,
        TypeTag::Int64,
        TypeTag::Float32,
        TypeTag::Float64,
        TypeTag::String,
        TypeTag::Uri,
        TypeTag::Array,
        TypeTag::Map,
        TypeTag::Handle,
    ];
}

impl From<ScalarType> for ValueType {
    fn from(scalar: ScalarType) -> Self {
        match scalar {
            ScalarType::Bool => Self::Bool,
            ScalarType::Int32 => Self::Int32,
            ScalarType::Int64 => Self::Int64,
            ScalarType::Float32 => Self::Float32,
            ScalarType::Float64 => Self::Float64,
            ScalarType::String => Self::String,
            ScalarType::Uri => Self::Uri,
        }
    }
}

impl ValueType {
    /// Discriminant used for coercion-table lookups.
    #[must_use]
    pub fn tag(self) -> TypeTag {
        match self {
            Self::Bool => TypeTag::Bool,
            Self::Int32 => TypeTag::Int32,
            Self::Int64 => TypeTag::Int64,
            Self::Float32 => TypeTag::Float32,
            Self::Float64 => TypeTag::Float64,
            Self::String => TypeTag::String,
            Self::Uri => TypeTag::Uri,
            Self::Array(_) => TypeTag::Array,
            Self::Map => TypeTag::Map,
            Self::Handle => TypeTag::Handle,
        }
    }

    /// Whether values of this type support interpolation and increments.
    #[must_use]
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            Self::Int32 | Self::Int64 | Self::Float32 | Self::Float64
        )
    }

    /// Whether this is one of the integer types.
    #[must_use]
    pub fn is_integer(self) -> bool {
        matches!(self, Self::Int32 | Self::Int64)
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&ValueType::from(*self), f)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => f.write_str("bool"),
            Self::Int32 => f.write_str("int32"),
            Self::Int64 => f.write_str("int64"),
            Self::Float32 => f.write_str("float32"),
            Self::Float64 => f.write_str("float64"),
            Self::String => f.write_str("string"),
            Self::Uri => f.write_str("uri"),
            Self::Array(element) => write!(f, "array<{element}>"),
            Self::Map => f.write_str("map"),
            Self::Handle => f.write_str("handle"),
        }
    }
}

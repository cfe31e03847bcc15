//! Type descriptors for fact fields and action parameters.

use std::fmt;
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Type descriptor for schema validation.
///
/// Used to declare fact field types and action parameter types, and to
/// validate values at ingestion.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Type {
    /// The nil type (only value: nil).
    Nil,
    /// Boolean type.
    Bool,
    /// Numeric type; integers and floats are both numbers.
    Number,
    /// String type.
    String,
    /// Reference to a fact of the named type.
    Ref(Arc<str>),
    /// Any type (accepts any value).
    Any,
}

impl Type {
    /// Resolves a primitive type name as written in declarations.
    ///
    /// Returns `None` for names that are not primitives; callers treat
    /// those as references to declared fact types.
    #[must_use]
    pub fn primitive(name: &str) -> Option<Self> {
        match name {
            "number" | "int" | "integer" | "float" => Some(Self::Number),
            "string" => Some(Self::String),
            "bool" | "boolean" => Some(Self::Bool),
            "any" => Some(Self::Any),
            _ => None,
        }
    }

    /// Creates a reference type to the named fact type.
    #[must_use]
    pub fn reference(type_name: impl Into<Arc<str>>) -> Self {
        Self::Ref(type_name.into())
    }

    /// Returns true if this type is `Any`.
    #[must_use]
    pub const fn is_any(&self) -> bool {
        matches!(self, Self::Any)
    }

    /// Returns true if this type is numeric.
    #[must_use]
    pub const fn is_numeric(&self) -> bool {
        matches!(self, Self::Number)
    }

    /// Checks if a value is accepted by this type.
    ///
    /// - `Any` accepts all values
    /// - `Number` accepts integers and floats
    /// - `Ref(T)` accepts references whose internal id names type `T`
    #[must_use]
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (Self::Any, _)
            | (Self::Nil, Value::Nil)
            | (Self::Bool, Value::Bool(_))
            | (Self::Number, Value::Int(_) | Value::Float(_))
            | (Self::String, Value::String(_)) => true,
            (Self::Ref(target), Value::Ref(id)) => id.type_name() == target.as_ref(),
            _ => false,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nil => write!(f, "nil"),
            Self::Bool => write!(f, "bool"),
            Self::Number => write!(f, "number"),
            Self::String => write!(f, "string"),
            Self::Ref(name) => write!(f, "{name}"),
            Self::Any => write!(f, "any"),
        }
    }
}

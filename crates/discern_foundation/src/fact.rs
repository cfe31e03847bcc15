//! Typed facts and their engine-wide internal identifiers.

use std::fmt;
use std::sync::Arc;

use im::OrdMap;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::value::Value;
use crate::Result;

/// Field name reserved for the engine; user predicates may not read it.
pub const RESERVED_ID_FIELD: &str = "_id_";

/// Separator between type name and user id in an internal id.
const ID_SEPARATOR: char = '#';

/// Internal fact identifier, `type_name#user_id`.
///
/// Tokens and working memories refer to facts only through this id; the
/// fact table owns the facts themselves.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct FactId(Arc<str>);

impl FactId {
    /// Builds the internal id for a fact of `type_name` with `user_id`.
    #[must_use]
    pub fn new(type_name: &str, user_id: &str) -> Self {
        Self(Arc::from(format!("{type_name}{ID_SEPARATOR}{user_id}")))
    }

    /// Parses an already-formed internal id.
    ///
    /// # Errors
    ///
    /// Returns a parse error if the separator is missing or either half is empty.
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.split_once(ID_SEPARATOR) {
            Some((ty, id)) if !ty.is_empty() && !id.is_empty() => Ok(Self(Arc::from(raw))),
            _ => Err(Error::parse(format!("malformed internal id: {raw:?}"))),
        }
    }

    /// Returns the full `type#id` string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the type half of the id.
    #[must_use]
    pub fn type_name(&self) -> &str {
        self.0
            .split_once(ID_SEPARATOR)
            .map_or(&*self.0, |(ty, _)| ty)
    }

    /// Returns the user half of the id.
    #[must_use]
    pub fn user_id(&self) -> &str {
        self.0.split_once(ID_SEPARATOR).map_or("", |(_, id)| id)
    }
}

impl fmt::Debug for FactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FactId({})", self.0)
    }
}

impl fmt::Display for FactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An immutable typed record.
///
/// Facts are never mutated in place: an update is a new fact with the same
/// internal id. Cloning is cheap; fields live in a persistent map.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Fact {
    id: FactId,
    type_name: Arc<str>,
    fields: OrdMap<Arc<str>, Value>,
    inserted_at: u64,
}

impl Fact {
    /// Creates a fact with no fields.
    #[must_use]
    pub fn new(type_name: impl Into<Arc<str>>, user_id: &str) -> Self {
        let type_name = type_name.into();
        Self {
            id: FactId::new(&type_name, user_id),
            type_name,
            fields: OrdMap::new(),
            inserted_at: 0,
        }
    }

    /// Adds or replaces a field.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<Arc<str>>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Stamps the logical insertion time.
    #[must_use]
    pub fn with_insertion_time(mut self, time: u64) -> Self {
        self.inserted_at = time;
        self
    }

    /// Returns the internal id `type#user_id`.
    #[must_use]
    pub fn internal_id(&self) -> &FactId {
        &self.id
    }

    /// Returns the declared type name.
    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Returns the user-facing id.
    #[must_use]
    pub fn user_id(&self) -> &str {
        self.id.user_id()
    }

    /// Returns the logical insertion time.
    #[must_use]
    pub const fn inserted_at(&self) -> u64 {
        self.inserted_at
    }

    /// Returns a field's value.
    ///
    /// # Errors
    ///
    /// Returns `ReservedField` for `_id_` and `MissingField` when the fact
    /// has no such field.
    pub fn get_field(&self, name: &str) -> Result<&Value> {
        if name == RESERVED_ID_FIELD {
            return Err(Error::reserved_field(name));
        }
        self.fields
            .get(name)
            .ok_or_else(|| Error::missing_field(self.id.clone(), name))
    }

    /// Returns a field's value if present.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Iterates fields in name order.
    pub fn fields(&self) -> impl Iterator<Item = (&Arc<str>, &Value)> {
        self.fields.iter()
    }

    /// Returns the number of fields.
    #[must_use]
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Lists fields whose value differs between `self` and `other`,
    /// including fields present on only one side.
    #[must_use]
    pub fn changed_fields(&self, other: &Fact) -> Vec<Arc<str>> {
        let mut changed = Vec::new();
        for (name, value) in &self.fields {
            if other.fields.get(name) != Some(value) {
                changed.push(name.clone());
            }
        }
        for name in other.fields.keys() {
            if !self.fields.contains_key(name) {
                changed.push(name.clone());
            }
        }
        changed
    }
}

impl fmt::Display for Fact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.type_name)?;
        for (i, (name, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name}: {value}")?;
        }
        write!(f, ")")
    }
}

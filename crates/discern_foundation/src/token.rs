//! Tokens: partial or complete matches flowing through the beta network.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use im::{OrdMap, Vector};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::fact::FactId;
use crate::value::Value;

/// A variable bound to a fact.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Binding {
    /// The rule variable.
    pub variable: Arc<str>,
    /// The fact filling it.
    pub fact: FactId,
}

/// Stable identity of a token inside a working memory.
///
/// Derived from the variable → fact bindings (sorted by variable) and any
/// computed values, so two tokens describing the same match share a key
/// regardless of the path that produced them.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct TokenKey(Arc<str>);

impl TokenKey {
    /// Returns the key text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TokenKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An ordered tuple of facts with variable bindings.
///
/// Bindings keep the order in which the compiling rule introduced its
/// variables. Computed values (aggregate results) travel alongside under
/// their own variable names. Both collections are persistent, so
/// extending a token shares structure with its parent.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Token {
    bindings: Vector<Binding>,
    values: OrdMap<Arc<str>, Value>,
    key: TokenKey,
}

impl Token {
    /// The empty token, used to seed beta nodes that have no left input.
    #[must_use]
    pub fn empty() -> Self {
        Self::from_parts(Vector::new(), OrdMap::new())
    }

    /// A 1-tuple binding `variable` to `fact`.
    #[must_use]
    pub fn single(variable: impl Into<Arc<str>>, fact: FactId) -> Self {
        Self::empty().with_binding(variable, fact)
    }

    fn from_parts(bindings: Vector<Binding>, values: OrdMap<Arc<str>, Value>) -> Self {
        let key = compute_key(&bindings, &values);
        Self {
            bindings,
            values,
            key,
        }
    }

    /// Returns a new token with one more binding.
    #[must_use]
    pub fn with_binding(&self, variable: impl Into<Arc<str>>, fact: FactId) -> Self {
        let mut bindings = self.bindings.clone();
        bindings.push_back(Binding {
            variable: variable.into(),
            fact,
        });
        Self::from_parts(bindings, self.values.clone())
    }

    /// Returns a new token carrying a computed value.
    #[must_use]
    pub fn with_value(&self, variable: impl Into<Arc<str>>, value: Value) -> Self {
        let mut values = self.values.clone();
        values.insert(variable.into(), value);
        Self::from_parts(self.bindings.clone(), values)
    }

    /// Concatenates `other`'s bindings and values after this token's.
    #[must_use]
    pub fn join(&self, other: &Token) -> Self {
        let mut bindings = self.bindings.clone();
        bindings.append(other.bindings.clone());
        let values = other.values.clone().union(self.values.clone());
        Self::from_parts(bindings, values)
    }

    /// Returns the stable identity of this token.
    #[must_use]
    pub fn key(&self) -> &TokenKey {
        &self.key
    }

    /// Iterates bindings in introduction order.
    pub fn bindings(&self) -> impl Iterator<Item = &Binding> {
        self.bindings.iter()
    }

    /// Iterates bound facts in introduction order.
    pub fn facts(&self) -> impl Iterator<Item = &FactId> {
        self.bindings.iter().map(|b| &b.fact)
    }

    /// Iterates computed values in name order.
    pub fn values(&self) -> impl Iterator<Item = (&Arc<str>, &Value)> {
        self.values.iter()
    }

    /// Returns the fact bound to `variable`.
    #[must_use]
    pub fn fact_for(&self, variable: &str) -> Option<&FactId> {
        self.bindings
            .iter()
            .find(|b| b.variable.as_ref() == variable)
            .map(|b| &b.fact)
    }

    /// Returns the computed value bound to `variable`.
    #[must_use]
    pub fn value_for(&self, variable: &str) -> Option<&Value> {
        self.values.get(variable)
    }

    /// Returns true if any binding refers to `fact`.
    #[must_use]
    pub fn contains_fact(&self, fact: &FactId) -> bool {
        self.bindings.iter().any(|b| &b.fact == fact)
    }

    /// Returns true if every binding and value of `prefix` is also in this token.
    #[must_use]
    pub fn extends(&self, prefix: &Token) -> bool {
        prefix
            .bindings
            .iter()
            .all(|b| self.fact_for(&b.variable) == Some(&b.fact))
            && prefix
                .values
                .iter()
                .all(|(name, value)| self.values.get(name) == Some(value))
    }

    /// Number of bound facts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Returns true when nothing is bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty() && self.values.is_empty()
    }
}

fn compute_key(bindings: &Vector<Binding>, values: &OrdMap<Arc<str>, Value>) -> TokenKey {
    let mut sorted: Vec<&Binding> = bindings.iter().collect();
    sorted.sort();
    let mut key = String::new();
    for binding in sorted {
        if !key.is_empty() {
            key.push(';');
        }
        key.push_str(&binding.variable);
        key.push('=');
        key.push_str(binding.fact.as_str());
    }
    for (name, value) in values {
        if !key.is_empty() {
            key.push(';');
        }
        key.push('$');
        key.push_str(name);
        key.push('=');
        key.push_str(&format!("{value:?}"));
    }
    TokenKey(Arc::from(key))
}

// Identity is the binding set, not the introduction order.
impl PartialEq for Token {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Token {}

impl Hash for Token {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        let mut first = true;
        for binding in &self.bindings {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            write!(f, "{} -> {}", binding.variable, binding.fact)?;
        }
        for (name, value) in &self.values {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            write!(f, "{name} = {value}")?;
        }
        write!(f, "}}")
    }
}

//! Fact construction and identity generation.

use std::collections::HashSet;
use std::sync::Arc;

use discern_foundation::{Error, ErrorKind, Fact, RESERVED_ID_FIELD, Result, Value};

use crate::ast::{FactDecl, TypeDecl};
use crate::canonical::short_digest;

/// Builds a fact from its declaration, checking it against its type.
///
/// # Errors
///
/// Returns `ReservedField` for `_id_` and `InvalidFact` for undeclared
/// fields, repeated fields, values of the wrong type, a missing primary key
/// or an empty id.
pub fn build_fact(ty: &TypeDecl, decl: &FactDecl) -> Result<Fact> {
    let mut seen = HashSet::new();
    for (name, value) in &decl.fields {
        if name.as_ref() == RESERVED_ID_FIELD {
            return Err(Error::reserved_field(name.as_ref()));
        }
        if !seen.insert(name.clone()) {
            return Err(invalid(format!("{}: field {name} given twice", ty.name)));
        }
        let field = ty
            .get_field(name)
            .ok_or_else(|| invalid(format!("{} has no field {name}", ty.name)))?;
        if !field.ty.accepts(value) {
            return Err(invalid(format!(
                "{}.{name} expects {}, got {}",
                ty.name,
                field.ty,
                value.value_type()
            )));
        }
    }
    if let Some(key) = ty.primary_key() {
        if !seen.contains(&key.name) {
            return Err(invalid(format!(
                "{}: primary key {} is missing",
                ty.name, key.name
            )));
        }
    }

    let user_id = match &decl.id {
        Some(id) => id.to_string(),
        None => generate_user_id(ty, &decl.fields),
    };
    if user_id.is_empty() {
        return Err(invalid(format!("{}: empty id", ty.name)));
    }

    Ok(decl
        .fields
        .iter()
        .fold(Fact::new(ty.name.clone(), &user_id), |fact, (name, value)| {
            fact.with_field(name.clone(), value.clone())
        }))
}

/// Derives a user id for a fact declared without one.
///
/// Uses the escaped primary-key value when the type has one, otherwise the
/// short digest of the `field=value` pairs sorted by field name.
#[must_use]
pub fn generate_user_id(ty: &TypeDecl, fields: &[(Arc<str>, Value)]) -> String {
    if let Some(key) = ty.primary_key() {
        if let Some((_, value)) = fields.iter().find(|(name, _)| *name == key.name) {
            return escape_id(&value.to_plain_string());
        }
    }
    let mut pairs: Vec<(&str, String)> = fields
        .iter()
        .map(|(name, value)| (name.as_ref(), value.to_plain_string()))
        .collect();
    pairs.sort();
    let joined = pairs
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join(",");
    short_digest(&joined)
}

/// Percent-escapes the characters that carry meaning in generated ids.
#[must_use]
pub fn escape_id(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '%' => out.push_str("%25"),
            '~' => out.push_str("%7E"),
            '_' => out.push_str("%5F"),
            ' ' => out.push_str("%20"),
            other => out.push(other),
        }
    }
    out
}

fn invalid(message: String) -> Error {
    Error::new(ErrorKind::InvalidFact(message))
}

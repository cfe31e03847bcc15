//! Incremental semantic validation.
//!
//! [`ProgramState`] accumulates the types, actions and rule ids the engine
//! has accepted so far. A new program is validated against it and, when
//! valid, produces the next state; the engine swaps states only on commit.

use std::collections::HashSet;
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use tracing::debug;

use discern_foundation::{Error, ErrorContext, ErrorKind, Fact, RESERVED_ID_FIELD, Result, Type};

use crate::ast::{ActionDecl, AggregateFunction, Expr, FactDecl, Item, Program, RuleDecl, TypeDecl};
use crate::facts::build_fact;

/// Declarations accepted so far.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProgramState {
    types: IndexMap<Arc<str>, TypeDecl>,
    actions: IndexMap<Arc<str>, ActionDecl>,
    rules: IndexSet<Arc<str>>,
}

/// Variables visible to an expression.
struct Scope<'a> {
    facts: IndexMap<Arc<str>, &'a TypeDecl>,
    values: HashSet<Arc<str>>,
}

impl ProgramState {
    /// An empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A declared type.
    #[must_use]
    pub fn type_decl(&self, name: &str) -> Option<&TypeDecl> {
        self.types.get(name)
    }

    /// A declared action.
    #[must_use]
    pub fn action(&self, name: &str) -> Option<&ActionDecl> {
        self.actions.get(name)
    }

    /// Declared types in declaration order.
    pub fn types(&self) -> impl Iterator<Item = &TypeDecl> {
        self.types.values()
    }

    /// Whether a rule id is taken.
    #[must_use]
    pub fn has_rule(&self, id: &str) -> bool {
        self.rules.contains(id)
    }

    /// Registered rule ids in registration order.
    pub fn rule_ids(&self) -> impl Iterator<Item = &Arc<str>> {
        self.rules.iter()
    }

    /// Records a rule id.
    pub fn register_rule(&mut self, id: Arc<str>) {
        self.rules.insert(id);
    }

    /// Forgets a rule id. Returns whether it was registered.
    pub fn unregister_rule(&mut self, id: &str) -> bool {
        self.rules.shift_remove(id)
    }

    /// Validates `program` against this state and returns the resulting
    /// state. `self` is left untouched.
    ///
    /// # Errors
    ///
    /// Returns the first semantic error found, with the offending rule in
    /// its context when there is one.
    pub fn merge(&self, program: &Program) -> Result<ProgramState> {
        let mut next = self.clone();
        for item in &program.items {
            match item {
                Item::Type(decl) => next.declare_type(decl)?,
                Item::Action(decl) => next.declare_action(decl)?,
                Item::Rule(rule) => {
                    next.validate_rule(rule)?;
                    next.register_rule(rule.id.clone());
                }
                Item::Fact(decl) => {
                    next.build_fact(decl)?;
                }
                Item::Retract(_) => {}
                Item::Reset => next = ProgramState::default(),
            }
        }
        debug!(
            types = next.types.len(),
            actions = next.actions.len(),
            rules = next.rules.len(),
            "program validated"
        );
        Ok(next)
    }

    /// Checks `program` against this state without producing the next one.
    ///
    /// # Errors
    ///
    /// As [`Self::merge`].
    pub fn validate(&self, program: &Program) -> Result<()> {
        self.merge(program).map(|_| ())
    }

    /// Adds a type, accepting an identical redeclaration.
    ///
    /// # Errors
    ///
    /// Returns `IncompatibleRedefinition` when the type exists with another
    /// shape, `ReservedField` for `_id_`, and a parse error for repeated
    /// fields or more than one primary key.
    pub fn declare_type(&mut self, decl: &TypeDecl) -> Result<()> {
        if let Some(existing) = self.types.get(&decl.name) {
            if existing == decl {
                return Ok(());
            }
            return Err(Error::new(ErrorKind::IncompatibleRedefinition(
                decl.name.to_string(),
            )));
        }
        let mut names = HashSet::new();
        for field in &decl.fields {
            if field.name.as_ref() == RESERVED_ID_FIELD {
                return Err(Error::reserved_field(field.name.as_ref()));
            }
            if !names.insert(field.name.clone()) {
                return Err(Error::parse(format!(
                    "field {} declared twice in {}",
                    field.name, decl.name
                )));
            }
            if let Type::Ref(target) = &field.ty {
                if *target != decl.name && !self.types.contains_key(target) {
                    return Err(Error::undefined_type(target.as_ref()));
                }
            }
        }
        if decl.fields.iter().filter(|f| f.primary_key).count() > 1 {
            return Err(Error::parse(format!(
                "type {} has more than one primary key",
                decl.name
            )));
        }
        self.types.insert(decl.name.clone(), decl.clone());
        Ok(())
    }

    /// Adds an action, accepting an identical redeclaration.
    ///
    /// # Errors
    ///
    /// Returns `IncompatibleRedefinition` for a conflicting redeclaration,
    /// `UndefinedType` for a parameter referencing an unknown type, and a
    /// parse error when a required parameter follows an optional one.
    pub fn declare_action(&mut self, decl: &ActionDecl) -> Result<()> {
        if let Some(existing) = self.actions.get(&decl.name) {
            if existing == decl {
                return Ok(());
            }
            return Err(Error::new(ErrorKind::IncompatibleRedefinition(
                decl.name.to_string(),
            )));
        }
        let mut optional_seen = false;
        for param in &decl.params {
            if let Type::Ref(target) = &param.ty {
                if !self.types.contains_key(target) {
                    return Err(Error::undefined_type(target.as_ref()));
                }
            }
            if param.optional {
                optional_seen = true;
            } else if optional_seen {
                return Err(Error::parse(format!(
                    "required parameter {} follows an optional one in {}",
                    param.name, decl.name
                )));
            }
        }
        self.actions.insert(decl.name.clone(), decl.clone());
        Ok(())
    }

    /// Builds a fact against its declared type.
    ///
    /// # Errors
    ///
    /// Returns `UndefinedType` for an unknown type, otherwise as
    /// [`build_fact`].
    pub fn build_fact(&self, decl: &FactDecl) -> Result<Fact> {
        let ty = self
            .types
            .get(&decl.type_name)
            .ok_or_else(|| Error::undefined_type(decl.type_name.as_ref()))?;
        build_fact(ty, decl)
    }

    /// Checks a rule against the declared types and actions.
    ///
    /// # Errors
    ///
    /// Returns the first problem found, with the rule id in the context.
    pub fn validate_rule(&self, rule: &RuleDecl) -> Result<()> {
        self.check_rule(rule)
            .map_err(|e| e.with_context(ErrorContext::new().with_rule(rule.id.as_ref())))
    }

    fn check_rule(&self, rule: &RuleDecl) -> Result<()> {
        if self.rules.contains(&rule.id) {
            return Err(Error::new(ErrorKind::DuplicateRule(rule.id.to_string())));
        }
        if rule.variables.is_empty() && rule.quantifiers.is_empty() && rule.aggregates.is_empty()
        {
            return Err(Error::parse(format!("rule {} binds nothing", rule.id)));
        }
        if rule.variables.is_empty() && rule.condition.is_some() {
            return Err(Error::parse(format!(
                "rule {} has a condition but no pattern variable",
                rule.id
            )));
        }

        let mut scope = Scope {
            facts: IndexMap::new(),
            values: HashSet::new(),
        };
        for var in &rule.variables {
            let ty = self.resolve_type(&var.type_name)?;
            if scope.facts.insert(var.name.clone(), ty).is_some() {
                return Err(bound_twice(&var.name));
            }
        }
        if let Some(condition) = &rule.condition {
            check_expr(condition, &scope)?;
        }

        for quantifier in &rule.quantifiers {
            let ty = self.resolve_type(&quantifier.variable.type_name)?;
            let local = scope.extended(&quantifier.variable.name, ty)?;
            if let Some(condition) = &quantifier.condition {
                check_expr(condition, &local)?;
            }
        }

        for aggregate in &rule.aggregates {
            let ty = self.resolve_type(&aggregate.source.type_name)?;
            match (&aggregate.field, aggregate.function) {
                (None, AggregateFunction::Count) => {}
                (None, function) => {
                    return Err(Error::parse(format!("{function} needs a target field")));
                }
                (Some(field), function) => {
                    let decl = field_decl(ty, field)?;
                    if function != AggregateFunction::Count
                        && !(decl.ty.is_numeric() || decl.ty.is_any())
                    {
                        return Err(Error::type_mismatch(Type::Number, decl.ty.clone()));
                    }
                }
            }
            let local = scope.extended(&aggregate.source.name, ty)?;
            if let Some(condition) = &aggregate.condition {
                check_expr(condition, &local)?;
            }
            if scope.facts.contains_key(&aggregate.result)
                || !scope.values.insert(aggregate.result.clone())
            {
                return Err(bound_twice(&aggregate.result));
            }
            if let Some(having) = &aggregate.having {
                check_expr(having, &scope)?;
            }
        }

        let action = self
            .actions
            .get(&rule.action.name)
            .ok_or_else(|| Error::new(ErrorKind::UndefinedAction(rule.action.name.to_string())))?;
        let required = action.required_count();
        let total = action.params.len();
        let actual = rule.action.args.len();
        if actual < required || actual > total {
            let expected = if required == total {
                total.to_string()
            } else {
                format!("{required}..={total}")
            };
            return Err(Error::new(ErrorKind::ArityMismatch {
                name: action.name.to_string(),
                expected,
                actual,
            }));
        }
        for arg in &rule.action.args {
            check_expr(arg, &scope)?;
        }
        Ok(())
    }

    fn resolve_type(&self, name: &str) -> Result<&TypeDecl> {
        self.types
            .get(name)
            .ok_or_else(|| Error::undefined_type(name))
    }
}

impl<'a> Scope<'a> {
    fn extended(&self, name: &Arc<str>, ty: &'a TypeDecl) -> Result<Scope<'a>> {
        if self.facts.contains_key(name) || self.values.contains(name) {
            return Err(bound_twice(name));
        }
        let mut facts = self.facts.clone();
        facts.insert(name.clone(), ty);
        Ok(Scope {
            facts,
            values: self.values.clone(),
        })
    }
}

fn bound_twice(name: &str) -> Error {
    Error::parse(format!("variable {name} bound twice"))
}

fn field_decl<'a>(ty: &'a TypeDecl, field: &str) -> Result<&'a crate::ast::FieldDecl> {
    if field == RESERVED_ID_FIELD {
        return Err(Error::reserved_field(field));
    }
    ty.get_field(field)
        .ok_or_else(|| Error::undefined_field(ty.name.as_ref(), field))
}

fn check_expr(expr: &Expr, scope: &Scope<'_>) -> Result<()> {
    let mut outcome = Ok(());
    expr.walk(&mut |e| {
        if outcome.is_err() {
            return;
        }
        outcome = match e {
            Expr::FieldAccess { object, field } => match scope.facts.get(object) {
                Some(ty) => field_decl(ty, field).map(|_| ()),
                None => Err(Error::unresolvable_variable(object.as_ref())),
            },
            Expr::Variable(name) => {
                if scope.facts.contains_key(name) || scope.values.contains(name) {
                    Ok(())
                } else {
                    Err(Error::unresolvable_variable(name.as_ref()))
                }
            }
            Expr::TempRef(temp) => Err(Error::parse(format!(
                "intermediate {} cannot appear in a rule",
                temp.name
            ))),
            _ => Ok(()),
        };
    });
    outcome
}

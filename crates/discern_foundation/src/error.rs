//! Error types for the Discern engine.
//!
//! Uses `thiserror` for ergonomic error definition with rich context.
//! Every kind belongs to one [`ErrorCategory`], which decides how the
//! engine reacts to it (abort and roll back, swallow and log, or surface).

use std::fmt;

use thiserror::Error;

use crate::fact::FactId;
use crate::types::Type;

/// The main error type for Discern operations.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct Error {
    /// The kind of error that occurred.
    pub kind: ErrorKind,
    /// Optional context about where the error occurred.
    pub context: Option<ErrorContext>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: None,
        }
    }

    /// Adds context to this error.
    #[must_use]
    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Returns the taxonomy category of this error.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// Creates a parse error.
    #[must_use]
    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Parse(message.into()))
    }

    /// Creates an undefined type error.
    #[must_use]
    pub fn undefined_type(name: impl Into<String>) -> Self {
        Self::new(ErrorKind::UndefinedType(name.into()))
    }

    /// Creates an undefined field error.
    #[must_use]
    pub fn undefined_field(type_name: impl Into<String>, field: impl Into<String>) -> Self {
        Self::new(ErrorKind::UndefinedField {
            type_name: type_name.into(),
            field: field.into(),
        })
    }

    /// Creates an unresolvable variable error.
    #[must_use]
    pub fn unresolvable_variable(name: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnresolvableVariable(name.into()))
    }

    /// Creates a reserved field error.
    #[must_use]
    pub fn reserved_field(field: impl Into<String>) -> Self {
        Self::new(ErrorKind::ReservedField(field.into()))
    }

    /// Creates a missing dependency error for a decomposed chain.
    #[must_use]
    pub fn missing_dependency(name: impl Into<String>) -> Self {
        Self::new(ErrorKind::MissingDependency(name.into()))
    }

    /// Creates a type mismatch error.
    #[must_use]
    pub fn type_mismatch(expected: Type, actual: Type) -> Self {
        Self::new(ErrorKind::TypeMismatch { expected, actual })
    }

    /// Creates a missing field error for a fact.
    #[must_use]
    pub fn missing_field(fact: FactId, field: impl Into<String>) -> Self {
        Self::new(ErrorKind::MissingField {
            fact,
            field: field.into(),
        })
    }

    /// Creates an unknown fact error.
    #[must_use]
    pub fn unknown_fact(id: FactId) -> Self {
        Self::new(ErrorKind::UnknownFact(id))
    }

    /// Creates an unknown rule error.
    #[must_use]
    pub fn unknown_rule(id: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnknownRule(id.into()))
    }

    /// Creates an error for an operation refused during action delivery.
    #[must_use]
    pub fn reentered(operation: impl Into<String>) -> Self {
        Self::new(ErrorKind::Reentered(operation.into()))
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal(message.into()))
    }
}

/// Taxonomy of errors, used to pick a propagation policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Malformed input AST.
    Parse,
    /// Program refers to undefined or incompatible declarations.
    Semantic,
    /// The network was built or traversed inconsistently.
    Structural,
    /// A predicate could not be evaluated.
    Evaluation,
    /// A fact or rule that the caller named does not exist.
    Lifecycle,
    /// Transaction protocol violation or resource cap.
    Transaction,
    /// Storage backend failure.
    Storage,
    /// Bug in the engine.
    Internal,
}

impl ErrorCategory {
    /// Returns true when errors of this category abort the surrounding
    /// ingestion and trigger automatic rollback.
    #[must_use]
    pub const fn aborts_ingestion(self) -> bool {
        !matches!(self, Self::Evaluation)
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Parse => "parse",
            Self::Semantic => "semantic",
            Self::Structural => "structural",
            Self::Evaluation => "evaluation",
            Self::Lifecycle => "lifecycle",
            Self::Transaction => "transaction",
            Self::Storage => "storage",
            Self::Internal => "internal",
        };
        write!(f, "{name}")
    }
}

/// Categorized error kinds for pattern matching.
#[derive(Debug, Error)]
pub enum ErrorKind {
    /// The rule AST was malformed.
    #[error("parse error: {0}")]
    Parse(String),

    /// A rule or fact references a type that was never declared.
    #[error("undefined type: {0}")]
    UndefinedType(String),

    /// A field access names a field that its type does not declare.
    #[error("undefined field: {type_name}.{field}")]
    UndefinedField {
        /// The owning type.
        type_name: String,
        /// The missing field.
        field: String,
    },

    /// A type was redeclared with a different structure.
    #[error("incompatible redefinition of type {0}")]
    IncompatibleRedefinition(String),

    /// An expression uses a variable that the rule does not bind.
    #[error("unresolvable variable: {0}")]
    UnresolvableVariable(String),

    /// The reserved `_id_` field was declared or accessed.
    #[error("reserved field: {0}")]
    ReservedField(String),

    /// A rule id was reused.
    #[error("duplicate rule: {0}")]
    DuplicateRule(String),

    /// A rule calls an action that was never declared.
    #[error("undefined action: {0}")]
    UndefinedAction(String),

    /// An action call has the wrong number of arguments.
    #[error("arity mismatch for {name}: expected {expected}, got {actual}")]
    ArityMismatch {
        /// The action name.
        name: String,
        /// Description of expected arity.
        expected: String,
        /// Actual number of arguments.
        actual: usize,
    },

    /// A fact does not conform to its type declaration.
    #[error("invalid fact: {0}")]
    InvalidFact(String),

    /// A decomposed step references an intermediate result that was
    /// not computed upstream.
    #[error("missing dependency in decomposed chain: {0}")]
    MissingDependency(String),

    /// A join cascade could not be assembled.
    #[error("invalid cascade: {0}")]
    InvalidCascade(String),

    /// Propagation reached a node that is no longer part of the network.
    #[error("detached node: {0}")]
    DetachedNode(String),

    /// Division or modulo by zero inside a predicate.
    #[error("division by zero")]
    DivisionByZero,

    /// Operand types are not valid for an operator.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// The expected type.
        expected: Type,
        /// The actual type encountered.
        actual: Type,
    },

    /// A fact has no value for the requested field.
    #[error("missing field {field} on {fact}")]
    MissingField {
        /// The fact that was read.
        fact: FactId,
        /// The absent field.
        field: String,
    },

    /// The named fact is not in the engine.
    #[error("unknown fact: {0}")]
    UnknownFact(FactId),

    /// The named rule is not in the engine.
    #[error("unknown rule: {0}")]
    UnknownRule(String),

    /// A fact with the same internal id is already present.
    #[error("duplicate fact: {0}")]
    DuplicateFact(FactId),

    /// The transaction is not in the active state.
    #[error("transaction is not active")]
    TransactionNotActive,

    /// An explicit transaction is already open.
    #[error("a transaction is already active")]
    TransactionAlreadyActive,

    /// The operation was called from an observer while its actions were
    /// being delivered; only fact operations may re-enter.
    #[error("{0} cannot run while actions are being delivered")]
    Reentered(String),

    /// The undo log grew past the configured cap.
    #[error("transaction footprint exceeded: {used} bytes over a limit of {limit}")]
    FootprintExceeded {
        /// Bytes accounted so far.
        used: usize,
        /// The configured cap.
        limit: usize,
    },

    /// The transaction outlived its deadline.
    #[error("transaction deadline exceeded after {elapsed_ms} ms")]
    DeadlineExceeded {
        /// Time since the transaction began.
        elapsed_ms: u128,
    },

    /// The storage backend failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// Internal error (should not happen).
    #[error("internal error: {0}")]
    Internal(String),
}

impl ErrorKind {
    /// Returns the taxonomy category of this kind.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Parse(_) => ErrorCategory::Parse,
            Self::UndefinedType(_)
            | Self::UndefinedField { .. }
            | Self::IncompatibleRedefinition(_)
            | Self::UnresolvableVariable(_)
            | Self::ReservedField(_)
            | Self::DuplicateRule(_)
            | Self::UndefinedAction(_)
            | Self::ArityMismatch { .. }
            | Self::InvalidFact(_) => ErrorCategory::Semantic,
            Self::MissingDependency(_) | Self::InvalidCascade(_) | Self::DetachedNode(_) => {
                ErrorCategory::Structural
            }
            Self::DivisionByZero | Self::TypeMismatch { .. } | Self::MissingField { .. } => {
                ErrorCategory::Evaluation
            }
            Self::UnknownFact(_) | Self::UnknownRule(_) | Self::DuplicateFact(_) => {
                ErrorCategory::Lifecycle
            }
            Self::TransactionNotActive
            | Self::TransactionAlreadyActive
            | Self::Reentered(_)
            | Self::FootprintExceeded { .. }
            | Self::DeadlineExceeded { .. } => ErrorCategory::Transaction,
            Self::Storage(_) => ErrorCategory::Storage,
            Self::Internal(_) => ErrorCategory::Internal,
        }
    }
}

/// Context about where an error occurred.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// Source unit (file, program name) being ingested.
    pub source: Option<String>,
    /// Rule being compiled or evaluated.
    pub rule: Option<String>,
    /// Node being built or activated.
    pub node: Option<String>,
    /// Trail of enclosing operations, outermost first.
    pub stack: Vec<String>,
}

impl ErrorContext {
    /// Creates a new empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the source unit.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Sets the rule.
    #[must_use]
    pub fn with_rule(mut self, rule: impl Into<String>) -> Self {
        self.rule = Some(rule.into());
        self
    }

    /// Sets the node.
    #[must_use]
    pub fn with_node(mut self, node: impl Into<String>) -> Self {
        self.node = Some(node.into());
        self
    }

    /// Adds a stack frame.
    #[must_use]
    pub fn with_frame(mut self, frame: impl Into<String>) -> Self {
        self.stack.push(frame.into());
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut sep = "";
        if let Some(source) = &self.source {
            write!(f, "in {source}")?;
            sep = ", ";
        }
        if let Some(rule) = &self.rule {
            write!(f, "{sep}rule {rule}")?;
            sep = ", ";
        }
        if let Some(node) = &self.node {
            write!(f, "{sep}node {node}")?;
        }
        if !self.stack.is_empty() {
            writeln!(f)?;
            for frame in &self.stack {
                writeln!(f, "  in {frame}")?;
            }
        }
        Ok(())
    }
}

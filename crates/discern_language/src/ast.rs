//! Abstract syntax consumed by the engine.
//!
//! The surface parser is an external collaborator; it produces a
//! [`Program`] of typed declarations whose constraints are [`Expr`] trees.
//! Operator spellings (including the encoded forms some producers emit)
//! are resolved when an operator is constructed, so no raw spelling
//! survives into the tree.

use std::fmt;
use std::ops::{Add, Div, Mul, Not, Rem, Sub};
use std::sync::Arc;

use discern_foundation::{Error, FactId, Result, Type, Value};

// =============================================================================
// Operators
// =============================================================================

/// Arithmetic and comparison operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BinaryOperator {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Mod,
    /// `==`
    Eq,
    /// `!=` (also spelled `<>`)
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

impl BinaryOperator {
    /// Resolves an operator spelling.
    ///
    /// Accepts the plain symbols and the base64-encoded forms `Kg==` (`*`),
    /// `Kw==` (`+`), `LQ==` (`-`), `Lw==` (`/`) and `JQ==` (`%`).
    ///
    /// # Errors
    ///
    /// Returns a parse error for any other spelling.
    pub fn parse(spelling: &str) -> Result<Self> {
        Ok(match spelling {
            "+" | "Kw==" => Self::Add,
            "-" | "LQ==" => Self::Sub,
            "*" | "Kg==" => Self::Mul,
            "/" | "Lw==" => Self::Div,
            "%" | "JQ==" => Self::Mod,
            "==" | "=" => Self::Eq,
            "!=" | "<>" => Self::Ne,
            "<" => Self::Lt,
            "<=" => Self::Le,
            ">" => Self::Gt,
            ">=" => Self::Ge,
            other => return Err(Error::parse(format!("unknown operator {other:?}"))),
        })
    }

    /// The canonical symbol.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }

    /// Returns true for `+ - * / %`.
    #[must_use]
    pub const fn is_arithmetic(self) -> bool {
        matches!(
            self,
            Self::Add | Self::Sub | Self::Mul | Self::Div | Self::Mod
        )
    }

    /// Returns true for the six comparisons.
    #[must_use]
    pub const fn is_comparison(self) -> bool {
        !self.is_arithmetic()
    }

    /// Returns true when operand order does not matter.
    #[must_use]
    pub const fn is_commutative(self) -> bool {
        matches!(self, Self::Add | Self::Mul | Self::Eq | Self::Ne)
    }
}

impl fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

/// Logical connectives. Both are commutative.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LogicalOperator {
    /// `AND` / `&&`
    And,
    /// `OR` / `||`
    Or,
}

impl LogicalOperator {
    /// Resolves a connective spelling.
    ///
    /// # Errors
    ///
    /// Returns a parse error for unknown spellings.
    pub fn parse(spelling: &str) -> Result<Self> {
        match spelling {
            "AND" | "and" | "&&" => Ok(Self::And),
            "OR" | "or" | "||" => Ok(Self::Or),
            other => Err(Error::parse(format!("unknown connective {other:?}"))),
        }
    }

    /// The canonical keyword.
    #[must_use]
    pub const fn keyword(self) -> &'static str {
        match self {
            Self::And => "AND",
            Self::Or => "OR",
        }
    }
}

impl fmt::Display for LogicalOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.keyword())
    }
}

// =============================================================================
// Expressions
// =============================================================================

/// Reference to an intermediate result of a decomposed arithmetic step.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TempRef {
    /// Rule-local display name (`temp_k`).
    pub name: Arc<str>,
    /// Structural key of the step, shared by every rule computing it.
    pub key: Arc<str>,
}

/// A constraint expression.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    /// `object.field`
    FieldAccess {
        /// The rule variable.
        object: Arc<str>,
        /// The field name.
        field: Arc<str>,
    },
    /// A constant.
    Literal(Value),
    /// A bare variable: a bound fact (as a reference) or an aggregate result.
    Variable(Arc<str>),
    /// `left op right`
    BinaryOp {
        /// Left operand.
        left: Box<Expr>,
        /// Operator.
        op: BinaryOperator,
        /// Right operand.
        right: Box<Expr>,
    },
    /// `first op1 e1 op2 e2 ...`; AND binds tighter than OR in mixed chains.
    Logical {
        /// First operand.
        first: Box<Expr>,
        /// Remaining operands with the connective preceding each.
        rest: Vec<(LogicalOperator, Expr)>,
    },
    /// `NOT e`
    Not(Box<Expr>),
    /// Intermediate result of a decomposed step.
    TempRef(TempRef),
}

impl Expr {
    /// `object.field`
    #[must_use]
    pub fn field(object: impl Into<Arc<str>>, field: impl Into<Arc<str>>) -> Self {
        Self::FieldAccess {
            object: object.into(),
            field: field.into(),
        }
    }

    /// A literal.
    #[must_use]
    pub fn lit(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    /// A bare variable.
    #[must_use]
    pub fn var(name: impl Into<Arc<str>>) -> Self {
        Self::Variable(name.into())
    }

    /// `left op right`
    #[must_use]
    pub fn binary(left: impl Into<Expr>, op: BinaryOperator, right: impl Into<Expr>) -> Self {
        Self::BinaryOp {
            left: Box::new(left.into()),
            op,
            right: Box::new(right.into()),
        }
    }

    /// A logical chain from parts. A single operand is returned unchanged.
    #[must_use]
    pub fn chain(first: Expr, rest: Vec<(LogicalOperator, Expr)>) -> Self {
        if rest.is_empty() {
            first
        } else {
            Self::Logical {
                first: Box::new(first),
                rest,
            }
        }
    }

    /// Conjunction of `operands`; `None` when empty.
    #[must_use]
    pub fn all(operands: Vec<Expr>) -> Option<Self> {
        Self::uniform(LogicalOperator::And, operands)
    }

    /// Disjunction of `operands`; `None` when empty.
    #[must_use]
    pub fn any(operands: Vec<Expr>) -> Option<Self> {
        Self::uniform(LogicalOperator::Or, operands)
    }

    fn uniform(op: LogicalOperator, operands: Vec<Expr>) -> Option<Self> {
        let mut iter = operands.into_iter();
        let first = iter.next()?;
        Some(Self::chain(first, iter.map(|e| (op, e)).collect()))
    }

    /// `self AND other`
    #[must_use]
    pub fn and(self, other: impl Into<Expr>) -> Self {
        self.connect(LogicalOperator::And, other.into())
    }

    /// `self OR other`
    #[must_use]
    pub fn or(self, other: impl Into<Expr>) -> Self {
        self.connect(LogicalOperator::Or, other.into())
    }

    fn connect(self, op: LogicalOperator, other: Expr) -> Self {
        match self {
            Self::Logical { first, mut rest } if rest.iter().all(|(o, _)| *o == op) => {
                rest.push((op, other));
                Self::Logical { first, rest }
            }
            single => Self::Logical {
                first: Box::new(single),
                rest: vec![(op, other)],
            },
        }
    }

    /// `self == other`
    #[must_use]
    pub fn equals(self, other: impl Into<Expr>) -> Self {
        Self::binary(self, BinaryOperator::Eq, other)
    }

    /// `self != other`
    #[must_use]
    pub fn not_equals(self, other: impl Into<Expr>) -> Self {
        Self::binary(self, BinaryOperator::Ne, other)
    }

    /// `self < other`
    #[must_use]
    pub fn lt(self, other: impl Into<Expr>) -> Self {
        Self::binary(self, BinaryOperator::Lt, other)
    }

    /// `self <= other`
    #[must_use]
    pub fn le(self, other: impl Into<Expr>) -> Self {
        Self::binary(self, BinaryOperator::Le, other)
    }

    /// `self > other`
    #[must_use]
    pub fn gt(self, other: impl Into<Expr>) -> Self {
        Self::binary(self, BinaryOperator::Gt, other)
    }

    /// `self >= other`
    #[must_use]
    pub fn ge(self, other: impl Into<Expr>) -> Self {
        Self::binary(self, BinaryOperator::Ge, other)
    }

    /// Returns true for literals.
    #[must_use]
    pub const fn is_literal(&self) -> bool {
        matches!(self, Self::Literal(_))
    }

    /// Visits this node and every descendant, parents first.
    pub fn walk(&self, visit: &mut impl FnMut(&Expr)) {
        visit(self);
        match self {
            Self::BinaryOp { left, right, .. } => {
                left.walk(visit);
                right.walk(visit);
            }
            Self::Logical { first, rest } => {
                first.walk(visit);
                for (_, operand) in rest {
                    operand.walk(visit);
                }
            }
            Self::Not(inner) => inner.walk(visit),
            Self::FieldAccess { .. } | Self::Literal(_) | Self::Variable(_) | Self::TempRef(_) => {
            }
        }
    }

    /// Every `(object, field)` pair read by this expression.
    #[must_use]
    pub fn field_accesses(&self) -> Vec<(Arc<str>, Arc<str>)> {
        let mut out = Vec::new();
        self.walk(&mut |e| {
            if let Self::FieldAccess { object, field } = e {
                out.push((object.clone(), field.clone()));
            }
        });
        out
    }
}

impl From<Value> for Expr {
    fn from(value: Value) -> Self {
        Self::Literal(value)
    }
}

impl From<i64> for Expr {
    fn from(n: i64) -> Self {
        Self::Literal(Value::Int(n))
    }
}

impl From<i32> for Expr {
    fn from(n: i32) -> Self {
        Self::Literal(Value::from(n))
    }
}

impl From<f64> for Expr {
    fn from(n: f64) -> Self {
        Self::Literal(Value::Float(n))
    }
}

impl From<bool> for Expr {
    fn from(b: bool) -> Self {
        Self::Literal(Value::Bool(b))
    }
}

macro_rules! arithmetic_op {
    ($trait:ident, $method:ident, $op:expr) => {
        impl<T: Into<Expr>> $trait<T> for Expr {
            type Output = Expr;

            fn $method(self, rhs: T) -> Expr {
                Expr::binary(self, $op, rhs)
            }
        }
    };
}

arithmetic_op!(Add, add, BinaryOperator::Add);
arithmetic_op!(Sub, sub, BinaryOperator::Sub);
arithmetic_op!(Mul, mul, BinaryOperator::Mul);
arithmetic_op!(Div, div, BinaryOperator::Div);
arithmetic_op!(Rem, rem, BinaryOperator::Mod);

impl Not for Expr {
    type Output = Expr;

    fn not(self) -> Expr {
        Expr::Not(Box::new(self))
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FieldAccess { object, field } => write!(f, "{object}.{field}"),
            Self::Literal(value) => write!(f, "{value}"),
            Self::Variable(name) => write!(f, "{name}"),
            Self::BinaryOp { left, op, right } => {
                write_operand(f, left)?;
                write!(f, " {op} ")?;
                write_operand(f, right)
            }
            Self::Logical { first, rest } => {
                write_operand(f, first)?;
                for (op, operand) in rest {
                    write!(f, " {op} ")?;
                    write_operand(f, operand)?;
                }
                Ok(())
            }
            Self::Not(inner) => {
                write!(f, "NOT ")?;
                write_operand(f, inner)
            }
            Self::TempRef(temp) => write!(f, "{}", temp.name),
        }
    }
}

fn write_operand(f: &mut fmt::Formatter<'_>, expr: &Expr) -> fmt::Result {
    match expr {
        Expr::BinaryOp { .. } | Expr::Logical { .. } => write!(f, "({expr})"),
        _ => write!(f, "{expr}"),
    }
}

// =============================================================================
// Declarations
// =============================================================================

/// A field of a type declaration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldDecl {
    /// Field name.
    pub name: Arc<str>,
    /// Declared type.
    pub ty: Type,
    /// Whether this field is the primary key.
    pub primary_key: bool,
}

impl FieldDecl {
    /// A plain field.
    #[must_use]
    pub fn new(name: impl Into<Arc<str>>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
            primary_key: false,
        }
    }

    /// The primary-key field.
    #[must_use]
    pub fn key(name: impl Into<Arc<str>>, ty: Type) -> Self {
        Self {
            primary_key: true,
            ..Self::new(name, ty)
        }
    }
}

/// `type T(field: τ, ...)`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeDecl {
    /// Type name.
    pub name: Arc<str>,
    /// Fields in declaration order.
    pub fields: Vec<FieldDecl>,
}

impl TypeDecl {
    /// A type with no fields yet.
    #[must_use]
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Adds a field.
    #[must_use]
    pub fn field(mut self, name: impl Into<Arc<str>>, ty: Type) -> Self {
        self.fields.push(FieldDecl::new(name, ty));
        self
    }

    /// Adds the primary-key field.
    #[must_use]
    pub fn key(mut self, name: impl Into<Arc<str>>, ty: Type) -> Self {
        self.fields.push(FieldDecl::key(name, ty));
        self
    }

    /// Looks a field up by name.
    #[must_use]
    pub fn get_field(&self, name: &str) -> Option<&FieldDecl> {
        self.fields.iter().find(|f| f.name.as_ref() == name)
    }

    /// The primary-key field, if any.
    #[must_use]
    pub fn primary_key(&self) -> Option<&FieldDecl> {
        self.fields.iter().find(|f| f.primary_key)
    }
}

/// A parameter of an action declaration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParamDecl {
    /// Parameter name.
    pub name: Arc<str>,
    /// Declared type.
    pub ty: Type,
    /// Whether the argument may be omitted.
    pub optional: bool,
}

/// `action A(param: τ, ...)`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionDecl {
    /// Action name.
    pub name: Arc<str>,
    /// Parameters in order; optional ones trail.
    pub params: Vec<ParamDecl>,
}

impl ActionDecl {
    /// An action with no parameters yet.
    #[must_use]
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
        }
    }

    /// Adds a required parameter.
    #[must_use]
    pub fn param(mut self, name: impl Into<Arc<str>>, ty: Type) -> Self {
        self.params.push(ParamDecl {
            name: name.into(),
            ty,
            optional: false,
        });
        self
    }

    /// Adds an optional parameter.
    #[must_use]
    pub fn optional_param(mut self, name: impl Into<Arc<str>>, ty: Type) -> Self {
        self.params.push(ParamDecl {
            name: name.into(),
            ty,
            optional: true,
        });
        self
    }

    /// Number of parameters that must be supplied.
    #[must_use]
    pub fn required_count(&self) -> usize {
        self.params.iter().filter(|p| !p.optional).count()
    }
}

/// `var: Type` inside a rule head.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VarDecl {
    /// Variable name.
    pub name: Arc<str>,
    /// Fact type it ranges over.
    pub type_name: Arc<str>,
}

impl VarDecl {
    /// Creates a variable declaration.
    #[must_use]
    pub fn new(name: impl Into<Arc<str>>, type_name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }
}

/// Kind of quantified sub-pattern.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QuantifierKind {
    /// Holds iff no fact matches.
    NotExists,
    /// Holds iff at least one fact matches.
    Exists,
    /// Holds iff every fact satisfies the condition.
    ForAll,
}

/// `NOT EXISTS {v: T} / cond` and friends.
#[derive(Clone, Debug, PartialEq)]
pub struct Quantifier {
    /// Kind of quantification.
    pub kind: QuantifierKind,
    /// The quantified variable.
    pub variable: VarDecl,
    /// Condition over the quantified variable and outer variables.
    pub condition: Option<Expr>,
}

/// Aggregate functions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AggregateFunction {
    /// Sum of the target field.
    Sum,
    /// Number of matching facts.
    Count,
    /// Mean of the target field.
    Avg,
    /// Minimum of the target field.
    Min,
    /// Maximum of the target field.
    Max,
}

impl AggregateFunction {
    /// Resolves a function name.
    ///
    /// # Errors
    ///
    /// Returns a parse error for unknown names.
    pub fn parse(name: &str) -> Result<Self> {
        match name.to_ascii_uppercase().as_str() {
            "SUM" => Ok(Self::Sum),
            "COUNT" => Ok(Self::Count),
            "AVG" | "AVERAGE" => Ok(Self::Avg),
            "MIN" => Ok(Self::Min),
            "MAX" => Ok(Self::Max),
            _ => Err(Error::parse(format!("unknown aggregate function {name:?}"))),
        }
    }

    /// The canonical name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Sum => "SUM",
            Self::Count => "COUNT",
            Self::Avg => "AVG",
            Self::Min => "MIN",
            Self::Max => "MAX",
        }
    }
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// `result := FN(v.field) for {v: T} / cond ; having`
#[derive(Clone, Debug, PartialEq)]
pub struct AggregateDecl {
    /// Variable the result is bound to.
    pub result: Arc<str>,
    /// Aggregate function.
    pub function: AggregateFunction,
    /// The aggregated variable.
    pub source: VarDecl,
    /// Target field; absent for COUNT.
    pub field: Option<Arc<str>>,
    /// Filter and grouping condition.
    pub condition: Option<Expr>,
    /// Test on the result.
    pub having: Option<Expr>,
}

impl AggregateDecl {
    /// Creates an aggregate with no condition or test.
    #[must_use]
    pub fn new(
        result: impl Into<Arc<str>>,
        function: AggregateFunction,
        source: VarDecl,
        field: Option<&str>,
    ) -> Self {
        Self {
            result: result.into(),
            function,
            source,
            field: field.map(Arc::from),
            condition: None,
            having: None,
        }
    }

    /// Sets the filter and grouping condition.
    #[must_use]
    pub fn filter(mut self, condition: Expr) -> Self {
        self.condition = Some(condition);
        self
    }

    /// Sets the test on the result.
    #[must_use]
    pub fn having(mut self, having: Expr) -> Self {
        self.having = Some(having);
        self
    }
}

/// `A(args...)` on the right of `==>`.
#[derive(Clone, Debug, PartialEq)]
pub struct ActionCall {
    /// Action name.
    pub name: Arc<str>,
    /// Argument expressions.
    pub args: Vec<Expr>,
}

impl ActionCall {
    /// A call with no arguments.
    #[must_use]
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
        }
    }

    /// Adds an argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<Expr>) -> Self {
        self.args.push(arg.into());
        self
    }
}

/// `rule R : { v: T, ... } / condition ==> action`
#[derive(Clone, Debug, PartialEq)]
pub struct RuleDecl {
    /// Unique rule id.
    pub id: Arc<str>,
    /// Human-readable name; defaults to the id.
    pub name: Option<Arc<str>>,
    /// Variables joined by the rule, in introduction order.
    pub variables: Vec<VarDecl>,
    /// Constraint over the variables.
    pub condition: Option<Expr>,
    /// Negated, existential and universal sub-patterns.
    pub quantifiers: Vec<Quantifier>,
    /// Aggregations.
    pub aggregates: Vec<AggregateDecl>,
    /// Action fired on a complete match.
    pub action: ActionCall,
}

impl RuleDecl {
    /// A rule with no patterns whose action is `action`.
    #[must_use]
    pub fn new(id: impl Into<Arc<str>>, action: ActionCall) -> Self {
        Self {
            id: id.into(),
            name: None,
            variables: Vec::new(),
            condition: None,
            quantifiers: Vec::new(),
            aggregates: Vec::new(),
            action,
        }
    }

    /// Sets the display name.
    #[must_use]
    pub fn named(mut self, name: impl Into<Arc<str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Binds a variable.
    #[must_use]
    pub fn bind(mut self, name: impl Into<Arc<str>>, type_name: impl Into<Arc<str>>) -> Self {
        self.variables.push(VarDecl::new(name, type_name));
        self
    }

    /// Sets the constraint.
    #[must_use]
    pub fn when(mut self, condition: Expr) -> Self {
        self.condition = Some(condition);
        self
    }

    /// Adds a quantified sub-pattern.
    #[must_use]
    pub fn quantify(
        mut self,
        kind: QuantifierKind,
        variable: VarDecl,
        condition: Option<Expr>,
    ) -> Self {
        self.quantifiers.push(Quantifier {
            kind,
            variable,
            condition,
        });
        self
    }

    /// Adds an aggregation.
    #[must_use]
    pub fn aggregate(mut self, aggregate: AggregateDecl) -> Self {
        self.aggregates.push(aggregate);
        self
    }

    /// The display name, falling back to the id.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// `T(field: v, ...)`
#[derive(Clone, Debug, PartialEq)]
pub struct FactDecl {
    /// Fact type.
    pub type_name: Arc<str>,
    /// Explicit user id; derived from the primary key or a digest when absent.
    pub id: Option<Arc<str>>,
    /// Field values.
    pub fields: Vec<(Arc<str>, Value)>,
}

impl FactDecl {
    /// A fact with no fields yet.
    #[must_use]
    pub fn new(type_name: impl Into<Arc<str>>) -> Self {
        Self {
            type_name: type_name.into(),
            id: None,
            fields: Vec::new(),
        }
    }

    /// Sets the explicit id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<Arc<str>>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Adds a field value.
    #[must_use]
    pub fn set(mut self, name: impl Into<Arc<str>>, value: impl Into<Value>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }
}

/// One top-level program item.
#[derive(Clone, Debug, PartialEq)]
pub enum Item {
    /// Type declaration.
    Type(TypeDecl),
    /// Action declaration.
    Action(ActionDecl),
    /// Rule declaration.
    Rule(RuleDecl),
    /// Fact assertion.
    Fact(FactDecl),
    /// Fact retraction by internal id.
    Retract(FactId),
    /// Clear the engine before continuing.
    Reset,
}

/// A batch of declarations applied as one transaction.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Program {
    /// Items in source order.
    pub items: Vec<Item>,
}

impl Program {
    /// An empty program.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an item.
    #[must_use]
    pub fn with(mut self, item: Item) -> Self {
        self.items.push(item);
        self
    }

    /// Appends a type declaration.
    #[must_use]
    pub fn with_type(self, decl: TypeDecl) -> Self {
        self.with(Item::Type(decl))
    }

    /// Appends an action declaration.
    #[must_use]
    pub fn with_action(self, decl: ActionDecl) -> Self {
        self.with(Item::Action(decl))
    }

    /// Appends a rule.
    #[must_use]
    pub fn with_rule(self, decl: RuleDecl) -> Self {
        self.with(Item::Rule(decl))
    }

    /// Appends a fact.
    #[must_use]
    pub fn with_fact(self, decl: FactDecl) -> Self {
        self.with(Item::Fact(decl))
    }

    /// Appends a reset.
    #[must_use]
    pub fn with_reset(self) -> Self {
        self.with(Item::Reset)
    }

    /// Iterates the rules of the program.
    pub fn rules(&self) -> impl Iterator<Item = &RuleDecl> {
        self.items.iter().filter_map(|item| match item {
            Item::Rule(rule) => Some(rule),
            _ => None,
        })
    }
}

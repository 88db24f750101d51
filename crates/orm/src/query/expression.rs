//! Predicate expressions
//!
//! Predicates are small expression trees over entity fields. They are written
//! as a closure over a named parameter, mirroring `x => x.Age > 18`:
//!
//! ```ignore
//! let adults = Predicate::<Person>::new(|x| x.field("Age").gt(18) & x.field("Name").equals("Max"));
//! ```

use std::fmt;
use std::marker::PhantomData;
use std::ops::{BitAnd, BitOr};

use crate::backends::DatabaseValue;
use crate::entity::EntityType;

/// Comparison and boolean operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equal,
    NotEqual,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    Like,
    And,
    Or,
}

impl Operator {
    /// SQL text of the operator; comparisons against null use `IS`/`IS NOT`
    pub fn as_sql(&self, null_operand: bool) -> &'static str {
        match (self, null_operand) {
            (Operator::Equal, true) => "IS",
            (Operator::NotEqual, true) => "IS NOT",
            (Operator::Equal, false) => "=",
            (Operator::NotEqual, false) => "!=",
            (Operator::GreaterThan, _) => ">",
            (Operator::GreaterThanOrEqual, _) => ">=",
            (Operator::LessThan, _) => "<",
            (Operator::LessThanOrEqual, _) => "<=",
            (Operator::Like, _) => "LIKE",
            (Operator::And, _) => "AND",
            (Operator::Or, _) => "OR",
        }
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, Operator::And | Operator::Or)
    }

    /// The operator with its operands swapped, `18 < x.Age` becomes `x.Age > 18`
    pub fn mirrored(&self) -> Operator {
        match self {
            Operator::GreaterThan => Operator::LessThan,
            Operator::GreaterThanOrEqual => Operator::LessThanOrEqual,
            Operator::LessThan => Operator::GreaterThan,
            Operator::LessThanOrEqual => Operator::GreaterThanOrEqual,
            other => *other,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql(false))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// Dotted field path, starting with the predicate's parameter name
    Member(String),
    Constant(DatabaseValue),
    Binary {
        op: Operator,
        left: Box<Expression>,
        right: Box<Expression>,
    },
}

impl Expression {
    pub fn member(path: impl Into<String>) -> Self {
        Expression::Member(path.into())
    }

    pub fn constant(value: impl Into<DatabaseValue>) -> Self {
        Expression::Constant(value.into())
    }

    pub fn binary(op: Operator, left: Expression, right: Expression) -> Self {
        Expression::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    fn compare(self, op: Operator, value: impl Into<DatabaseValue>) -> Self {
        Expression::binary(op, self, Expression::constant(value))
    }

    pub fn equals(self, value: impl Into<DatabaseValue>) -> Self {
        self.compare(Operator::Equal, value)
    }

    pub fn not_equals(self, value: impl Into<DatabaseValue>) -> Self {
        self.compare(Operator::NotEqual, value)
    }

    pub fn gt(self, value: impl Into<DatabaseValue>) -> Self {
        self.compare(Operator::GreaterThan, value)
    }

    pub fn ge(self, value: impl Into<DatabaseValue>) -> Self {
        self.compare(Operator::GreaterThanOrEqual, value)
    }

    pub fn lt(self, value: impl Into<DatabaseValue>) -> Self {
        self.compare(Operator::LessThan, value)
    }

    pub fn le(self, value: impl Into<DatabaseValue>) -> Self {
        self.compare(Operator::LessThanOrEqual, value)
    }

    pub fn like(self, pattern: impl Into<String>) -> Self {
        self.compare(Operator::Like, pattern.into())
    }

    pub fn is_null(self) -> Self {
        self.compare(Operator::Equal, DatabaseValue::Null)
    }

    pub fn is_not_null(self) -> Self {
        self.compare(Operator::NotEqual, DatabaseValue::Null)
    }

    pub fn and(self, other: Expression) -> Self {
        Expression::binary(Operator::And, self, other)
    }

    pub fn or(self, other: Expression) -> Self {
        Expression::binary(Operator::Or, self, other)
    }
}

impl BitAnd for Expression {
    type Output = Expression;

    fn bitand(self, rhs: Expression) -> Expression {
        self.and(rhs)
    }
}

impl BitOr for Expression {
    type Output = Expression;

    fn bitor(self, rhs: Expression) -> Expression {
        self.or(rhs)
    }
}

/// The lambda parameter a predicate is written against
#[derive(Debug, Clone)]
pub struct Parameter {
    name: String,
}

impl Parameter {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// A field, or a dotted path through reference fields
    pub fn field(&self, path: &str) -> Expression {
        Expression::Member(format!("{}.{}", self.name, path))
    }
}

/// A boolean expression evaluated against entities of type `T`
#[derive(Debug, Clone)]
pub struct Predicate<T> {
    parameter: Parameter,
    body: Expression,
    entity: PhantomData<fn() -> T>,
}

impl<T: EntityType> Predicate<T> {
    pub fn new(build: impl FnOnce(&Parameter) -> Expression) -> Self {
        Self::with_parameter("x", build)
    }

    pub fn with_parameter(name: &str, build: impl FnOnce(&Parameter) -> Expression) -> Self {
        let parameter = Parameter::new(name);
        let body = build(&parameter);
        Self::from_expression(parameter, body)
    }

    pub fn from_expression(parameter: Parameter, body: Expression) -> Self {
        Self {
            parameter,
            body,
            entity: PhantomData,
        }
    }

    pub fn parameter(&self) -> &Parameter {
        &self.parameter
    }

    pub fn body(&self) -> &Expression {
        &self.body
    }
}

use serde::{Deserialize, Serialize};

use crate::bitmap::RelOp;
use crate::core::types::{Offset, TypeKind, Value};

/// A predicate over events.
///
/// Relations pair an extractor (left) with a constant (right); boolean
/// connectives combine sub-expressions. The tree is sealed, so
/// evaluation dispatches by match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Constant(Value),
    Relation(Relation),
    /// The event name (its record type name).
    NameExtractor,
    /// The event timestamp.
    TimestampExtractor,
    /// The event ID. Recognized but not evaluated.
    IdExtractor,
    /// A record field addressed by offset.
    OffsetExtractor(Offset),
    /// Any field of the given type kind.
    TypeExtractor(TypeKind),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub op: RelOp,
    pub lhs: Box<Expr>,
    pub rhs: Box<Expr>,
}

impl Expr {
    pub fn relation(op: RelOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Relation(Relation {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    /// `name == <value>`
    pub fn name_is(name: impl Into<String>) -> Self {
        Expr::relation(
            RelOp::Eq,
            Expr::NameExtractor,
            Expr::Constant(Value::Str(name.into())),
        )
    }

    /// `timestamp <op> <ns>`
    pub fn timestamp(op: RelOp, ns: i64) -> Self {
        Expr::relation(
            op,
            Expr::TimestampExtractor,
            Expr::Constant(Value::Timestamp(ns)),
        )
    }

    /// `<offset> <op> <value>`
    pub fn field(offset: Offset, op: RelOp, value: Value) -> Self {
        Expr::relation(op, Expr::OffsetExtractor(offset), Expr::Constant(value))
    }

    /// `:<kind> <op> <value>`
    pub fn typed(op: RelOp, value: Value) -> Self {
        Expr::relation(
            op,
            Expr::TypeExtractor(value.kind()),
            Expr::Constant(value),
        )
    }
}

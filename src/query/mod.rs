pub mod ast;
pub mod evaluator;

pub use ast::{Expr, Relation};
pub use evaluator::Evaluator;

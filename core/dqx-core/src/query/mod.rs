//! Query front end
//!
//! ```text
//! predicate object → parse_query → QueryTree → visit (index substitution) → compiler
//! ```

pub mod ast;
mod parser;
mod visitor;

pub use ast::{
    Clause, IndexLookup, IndexRef, Logical, LiteralSet, MutateNode, MutateOp, Operand, Operator,
    QueryNode, QueryTree,
};
pub use parser::{normalize, parse_mutate, parse_query};
pub use visitor::visit;

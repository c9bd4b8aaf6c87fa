//! Bytecode compiler and virtual machine
//!
//! ```text
//! QueryTree → compile_query → Program ─┐
//! mutate    → compile_mutate → Program ─┴→ VirtualMachine::execute → [DocId]
//! ```

mod cache;
mod compiler;
mod machine;
mod mutate;
mod opcode;
mod predicate;
mod program;

pub use cache::{CacheStats, ProgramCache, ProgramKey};
pub use compiler::{compile_mutate, compile_query};
pub use machine::{Phase, Registers, StackValue, VirtualMachine};
pub use mutate::apply as apply_mutation;
pub use opcode::Opcode;
pub use predicate::evaluate;
pub use program::{Instruction, Program, QueryConditions, SortOrder, SortSpec};

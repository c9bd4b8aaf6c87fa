//! Bytecode compiler
//!
//! 쿼리 AST를 선형 명령어 스트림으로 변환한다.
//!
//! ```text
//! find/range ... [intersect] | scan      ← source
//! store
//! read ; <predicates> ; shift ; jump END ; goto READ   ← loop (residual predicates)
//! transpose                                            ← (no residual predicates)
//! [sort] [limit] halt
//! ```

use super::mutate::check as check_mutation;
use super::program::{Instruction, Program, QueryConditions};
use crate::error::{DqxError, DqxResult};
use crate::query::{IndexLookup, IndexRef, Logical, QueryNode, QueryTree, parse_mutate};
use serde_json::Value;
use tracing::debug;

/// Nested instruction block. Each block linearizes with addresses relative
/// to its own start; the parent relocates them.
enum Block {
    Plain(Vec<Instruction>),
    And(Vec<Block>),
    Or(Vec<Block>),
    /// `read, body, shift, jump END, goto START`
    Loop(Box<Block>),
}

impl Block {
    fn linearize(self) -> Vec<Instruction> {
        match self {
            Block::Plain(instructions) => instructions,
            Block::And(children) => Self::reduce(children, Instruction::And),
            Block::Or(children) => Self::reduce(children, Instruction::Or),
            Block::Loop(body) => {
                let mut out = vec![Instruction::Read];
                append(&mut out, body.linearize());
                out.push(Instruction::Shift);
                let end = out.len() + 2;
                out.push(Instruction::Jump(end));
                out.push(Instruction::Goto(0));
                out
            }
        }
    }

    fn reduce(children: Vec<Block>, reducer: fn(usize) -> Instruction) -> Vec<Instruction> {
        let n = children.len();
        let mut out = Vec::new();
        for child in children {
            append(&mut out, child.linearize());
        }
        if n > 1 {
            out.push(reducer(n));
        }
        out
    }
}

fn append(out: &mut Vec<Instruction>, block: Vec<Instruction>) {
    let offset = out.len();
    out.extend(block.into_iter().map(|mut i| {
        i.relocate(offset);
        i
    }));
}

fn lookup_instruction(index: &IndexRef) -> Instruction {
    match &index.lookup {
        IndexLookup::Exact(key) => Instruction::Find {
            index: index.index,
            name: index.name.clone(),
            key: key.clone(),
        },
        IndexLookup::Range {
            min,
            max,
            include_min,
            include_max,
        } => Instruction::Range {
            index: index.index,
            name: index.name.clone(),
            min: min.clone(),
            max: max.clone(),
            include_min: *include_min,
            include_max: *include_max,
        },
    }
}

/// Blocks for one node; each pushes exactly one boolean.
fn node_blocks(node: &QueryNode) -> DqxResult<Vec<Block>> {
    match node {
        QueryNode::Variable { attribute, clauses } => Ok(clauses
            .iter()
            .map(|clause| {
                Block::Plain(vec![Instruction::Test {
                    op: clause.op,
                    path: attribute.clone(),
                    operand: clause.operand.clone(),
                }])
            })
            .collect()),
        QueryNode::Selective {
            op: Logical::And,
            children,
        } => {
            let mut blocks = Vec::new();
            for child in children {
                blocks.extend(node_blocks(child)?);
            }
            Ok(vec![Block::And(blocks)])
        }
        QueryNode::Selective {
            op: Logical::Or,
            children,
        } => Ok(vec![Block::Or(
            children.iter().map(single_block).collect::<DqxResult<_>>()?,
        )]),
        QueryNode::Index(index) => Err(DqxError::Compile {
            message: "index lookups must lead the query".into(),
            context: index.name.clone(),
        }),
    }
}

fn single_block(node: &QueryNode) -> DqxResult<Block> {
    let mut blocks = node_blocks(node)?;
    match blocks.len() {
        0 => Err(DqxError::Compile {
            message: "empty predicate inside $or".into(),
            context: format!("{node:?}"),
        }),
        1 => Ok(blocks.remove(0)),
        _ => Ok(Block::And(blocks)),
    }
}

/// Compile a (visited) query tree.
pub fn compile_query(
    tree: &QueryTree,
    conditions: &QueryConditions,
    collection: &str,
) -> DqxResult<Program> {
    let leading: Vec<Instruction> = tree
        .root
        .iter()
        .map_while(|node| match node {
            QueryNode::Index(index) => Some(lookup_instruction(index)),
            _ => None,
        })
        .collect();
    let residual = &tree.root[leading.len()..];

    let mut out = Vec::new();
    if leading.is_empty() {
        out.push(Instruction::Scan {
            collection: collection.to_string(),
        });
    } else {
        let lookups = leading.len();
        out.extend(leading);
        if lookups > 1 {
            out.push(Instruction::Intersect);
        }
    }
    out.push(Instruction::Store);

    let mut predicates = Vec::new();
    for node in residual {
        predicates.extend(node_blocks(node)?);
    }
    if predicates.is_empty() {
        out.push(Instruction::Transpose);
    } else {
        append(
            &mut out,
            Block::Loop(Box::new(Block::And(predicates))).linearize(),
        );
    }

    if let Some(sort) = &conditions.sort {
        out.push(Instruction::Sort(sort.clone()));
    }
    if let Some(limit) = conditions.limit {
        out.push(Instruction::Limit(limit));
    }
    out.push(Instruction::Halt);

    debug!(collection, instructions = out.len(), "compiled query");
    Ok(Program::new(out))
}

/// Compile a mutate object into the second-phase program
/// `rread, <mutations>, rindex, goto 0, halt`.
pub fn compile_mutate(mutate: &Value) -> DqxResult<Program> {
    let nodes = parse_mutate(mutate)?;
    for node in &nodes {
        check_mutation(node.op, &node.attribute, &node.operand)
            .map_err(|e| DqxError::compile(e.to_string(), mutate))?;
    }
    let mut out = Vec::with_capacity(nodes.len() + 4);
    out.push(Instruction::RRead);
    out.extend(nodes.into_iter().map(|node| Instruction::Mutate {
        op: node.op,
        path: node.attribute,
        operand: node.operand,
    }));
    out.push(Instruction::RIndex);
    out.push(Instruction::Goto(0));
    out.push(Instruction::Halt);

    debug!(instructions = out.len(), "compiled mutate");
    Ok(Program::new(out))
}

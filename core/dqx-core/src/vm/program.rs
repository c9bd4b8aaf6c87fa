//! Instructions and compiled programs

use super::opcode::Opcode;
use crate::error::{DqxError, DqxResult};
use crate::index::IndexKey;
use crate::query::{MutateOp, Operand, Operator};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{self, Write as _};

/// Sort direction (`1` / `-1` in query conditions).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl SortOrder {
    pub fn from_sign(sign: i64) -> Self {
        if sign < 0 {
            SortOrder::Descending
        } else {
            SortOrder::Ascending
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortSpec {
    pub path: String,
    pub order: SortOrder,
}

/// Post-filter conditions appended after the predicate program.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryConditions {
    pub sort: Option<SortSpec>,
    pub limit: Option<usize>,
}

impl QueryConditions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sort_by(mut self, path: impl Into<String>, order: SortOrder) -> Self {
        self.sort = Some(SortSpec {
            path: path.into(),
            order,
        });
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    /// Read `{"sort": {"path": 1 | -1}, "limit": n}`; both keys are optional.
    pub fn from_value(value: &Value) -> DqxResult<Self> {
        let Value::Object(map) = value else {
            return Err(DqxError::parse("query conditions must be an object", value));
        };
        let mut conditions = Self::new();
        for (key, setting) in map {
            match (key.as_str(), setting) {
                ("sort", Value::Object(spec)) if spec.len() == 1 => {
                    for (path, sign) in spec {
                        let sign = sign.as_i64().filter(|s| *s == 1 || *s == -1).ok_or_else(|| {
                            DqxError::parse(format!("sort direction for '{path}' must be 1 or -1"), value)
                        })?;
                        conditions = conditions.sort_by(path.as_str(), SortOrder::from_sign(sign));
                    }
                }
                ("limit", Value::Number(n)) => {
                    let n = n
                        .as_u64()
                        .and_then(|n| usize::try_from(n).ok())
                        .ok_or_else(|| DqxError::parse("limit must be a non-negative integer", value))?;
                    conditions = conditions.limit(n);
                }
                ("sort" | "limit", _) => {
                    return Err(DqxError::parse(format!("malformed '{key}' condition"), value));
                }
                _ => return Err(DqxError::parse(format!("unknown condition '{key}'"), value)),
            }
        }
        Ok(conditions)
    }
}

/// One VM instruction with its typed arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    Halt,
    /// Pop `n` booleans, push their conjunction
    And(usize),
    /// Pop `n` booleans, push their disjunction
    Or(usize),
    /// Predicate on the current document; pushes a boolean
    Test {
        op: Operator,
        path: String,
        operand: Operand,
    },
    /// In-place mutation of the current document
    Mutate {
        op: MutateOp,
        path: String,
        operand: Value,
    },
    Break,
    Find {
        index: usize,
        name: String,
        key: IndexKey,
    },
    Scan {
        collection: String,
    },
    Range {
        index: usize,
        name: String,
        min: Option<IndexKey>,
        max: Option<IndexKey>,
        include_min: bool,
        include_max: bool,
    },
    Shift,
    Store,
    Intersect,
    Start,
    /// Branch once the document pointer reaches the end of register 0
    Jump(usize),
    Goto(usize),
    Read,
    Transpose,
    Limit(usize),
    Sort(SortSpec),
    RRead,
    RIndex,
}

impl Instruction {
    pub fn opcode(&self) -> Opcode {
        match self {
            Instruction::Halt => Opcode::Halt,
            Instruction::And(_) => Opcode::And,
            Instruction::Or(_) => Opcode::Or,
            Instruction::Test { op, .. } => op.opcode(),
            Instruction::Mutate { op, .. } => op.opcode(),
            Instruction::Break => Opcode::Break,
            Instruction::Find { .. } => Opcode::Find,
            Instruction::Scan { .. } => Opcode::Scan,
            Instruction::Range { .. } => Opcode::Range,
            Instruction::Shift => Opcode::Shift,
            Instruction::Store => Opcode::Store,
            Instruction::Intersect => Opcode::Intersect,
            Instruction::Start => Opcode::Start,
            Instruction::Jump(_) => Opcode::Jump,
            Instruction::Goto(_) => Opcode::Goto,
            Instruction::Read => Opcode::Read,
            Instruction::Transpose => Opcode::Transpose,
            Instruction::Limit(_) => Opcode::Limit,
            Instruction::Sort(_) => Opcode::Sort,
            Instruction::RRead => Opcode::RRead,
            Instruction::RIndex => Opcode::RIndex,
        }
    }

    /// Shift branch targets by `offset` (used when a block is relocated).
    pub(crate) fn relocate(&mut self, offset: usize) {
        if let Instruction::Jump(target) | Instruction::Goto(target) = self {
            *target += offset;
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mnemonic = self.opcode().mnemonic();
        match self {
            Instruction::And(n) | Instruction::Or(n) | Instruction::Limit(n) => {
                write!(f, "{mnemonic:<10} {n}")
            }
            Instruction::Jump(target) | Instruction::Goto(target) => {
                write!(f, "{mnemonic:<10} {target:04}")
            }
            Instruction::Test { path, operand, .. } => write!(f, "{mnemonic:<10} {path} {operand}"),
            Instruction::Mutate { path, operand, .. } => {
                write!(f, "{mnemonic:<10} {path} {operand}")
            }
            Instruction::Find { name, key, .. } => write!(f, "{mnemonic:<10} {name} {key}"),
            Instruction::Range {
                name,
                min,
                max,
                include_min,
                include_max,
                ..
            } => {
                let open = if *include_min { '[' } else { '(' };
                let close = if *include_max { ']' } else { ')' };
                let lo = min.as_ref().map_or_else(|| "-inf".to_string(), |k| k.to_string());
                let hi = max.as_ref().map_or_else(|| "+inf".to_string(), |k| k.to_string());
                write!(f, "{mnemonic:<10} {name} {open}{lo}, {hi}{close}")
            }
            Instruction::Scan { collection } => write!(f, "{mnemonic:<10} {collection}"),
            Instruction::Sort(spec) => {
                let dir = match spec.order {
                    SortOrder::Ascending => 1,
                    SortOrder::Descending => -1,
                };
                write!(f, "{mnemonic:<10} {} {dir}", spec.path)
            }
            _ => f.write_str(mnemonic),
        }
    }
}

/// A linear, compiled instruction stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Program {
    instructions: Vec<Instruction>,
}

impl Program {
    pub fn new(instructions: Vec<Instruction>) -> Self {
        Self { instructions }
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn get(&self, ip: usize) -> Option<&Instruction> {
        self.instructions.get(ip)
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Opcode bytes, in order.
    pub fn opcodes(&self) -> Vec<u8> {
        self.instructions.iter().map(|i| i.opcode().into()).collect()
    }

    pub fn contains(&self, opcode: Opcode) -> bool {
        self.instructions.iter().any(|i| i.opcode() == opcode)
    }

    /// Human-readable listing, one instruction per line.
    pub fn explain(&self) -> String {
        let mut out = String::new();
        for (line, instruction) in self.instructions.iter().enumerate() {
            let _ = writeln!(out, "{line:04}  {instruction}");
        }
        out
    }
}

impl From<Vec<Instruction>> for Program {
    fn from(instructions: Vec<Instruction>) -> Self {
        Self::new(instructions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_explain_listing() {
        let program = Program::new(vec![
            Instruction::Scan {
                collection: "users".into(),
            },
            Instruction::Store,
            Instruction::Read,
            Instruction::Test {
                op: Operator::Gt,
                path: "age".into(),
                operand: Operand::Literal(json!(30)),
            },
            Instruction::Shift,
            Instruction::Jump(7),
            Instruction::Goto(2),
            Instruction::Halt,
        ]);
        let listing = program.explain();
        let lines: Vec<&str> = listing.lines().collect();
        assert_eq!(lines.len(), 8);
        assert_eq!(lines[0], "0000  scan       users");
        assert_eq!(lines[3], "0003  gt         age 30");
        assert_eq!(lines[5], "0005  jump       0007");
        assert_eq!(lines[7], "0007  halt");
    }

    #[test]
    fn test_conditions_from_value() {
        let conditions = QueryConditions::from_value(&json!({"sort": {"age": -1}, "limit": 3})).unwrap();
        assert_eq!(
            conditions,
            QueryConditions::new().sort_by("age", SortOrder::Descending).limit(3)
        );
        assert_eq!(QueryConditions::from_value(&json!({})).unwrap(), QueryConditions::default());
        assert_eq!(
            QueryConditions::from_value(&json!({"sort": {"name": 1}})).unwrap().sort,
            Some(SortSpec {
                path: "name".into(),
                order: SortOrder::Ascending
            })
        );

        for bad in [
            json!([]),
            json!({"sort": {"a": 0}}),
            json!({"sort": {"a": 1, "b": 1}}),
            json!({"limit": -1}),
            json!({"skip": 2}),
        ] {
            assert!(QueryConditions::from_value(&bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn test_opcodes() {
        let program = Program::new(vec![
            Instruction::Scan {
                collection: "c".into(),
            },
            Instruction::Store,
            Instruction::Transpose,
            Instruction::Halt,
        ]);
        assert_eq!(program.opcodes(), vec![0x1C, 0x21, 0x28, 0x00]);
        assert!(program.contains(Opcode::Transpose));
        assert!(!program.contains(Opcode::Read));
    }

    #[test]
    fn test_relocate_only_moves_branches() {
        let mut jump = Instruction::Jump(3);
        jump.relocate(10);
        assert_eq!(jump, Instruction::Jump(13));
        let mut read = Instruction::Read;
        read.relocate(10);
        assert_eq!(read, Instruction::Read);
    }
}

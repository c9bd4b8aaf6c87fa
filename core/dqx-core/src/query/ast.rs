//! Query AST
//!
//! 파서가 만들고, 비지터가 인덱스 노드로 재작성하고, 컴파일러가 소비한다.

use crate::document::literal_key;
use crate::geo::GeoQuery;
use crate::index::IndexKey;
use crate::vm::Opcode;
use ahash::AHashSet;
use serde_json::Value;
use std::fmt;

/// Parsed predicate. The root is an implicit conjunction of its nodes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryTree {
    pub root: Vec<QueryNode>,
}

impl QueryTree {
    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Number of leading index lookups (after visitation).
    pub fn leading_indices(&self) -> usize {
        self.root
            .iter()
            .take_while(|n| matches!(n, QueryNode::Index(_)))
            .count()
    }

    /// Root-level variable for `attribute`, if any.
    pub fn variable(&self, attribute: &str) -> Option<&[Clause]> {
        self.root.iter().find_map(|n| match n {
            QueryNode::Variable { attribute: a, clauses } if a == attribute => {
                Some(clauses.as_slice())
            }
            _ => None,
        })
    }
}

/// AST node.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryNode {
    /// Attribute with its operator clauses (implicitly AND-ed)
    Variable {
        attribute: String,
        clauses: Vec<Clause>,
    },
    /// `$and` / `$or` group
    Selective {
        op: Logical,
        children: Vec<QueryNode>,
    },
    /// Index lookup substituted by the visitor
    Index(IndexRef),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Logical {
    And,
    Or,
}

impl Logical {
    pub fn symbol(self) -> &'static str {
        match self {
            Logical::And => "$and",
            Logical::Or => "$or",
        }
    }

    pub fn opcode(self) -> Opcode {
        match self {
            Logical::And => Opcode::And,
            Logical::Or => Opcode::Or,
        }
    }
}

/// One `operator: operand` pair under a variable.
#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    pub op: Operator,
    pub operand: Operand,
}

/// Structural role of an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Binary,
    Range,
    Array,
    Geospatial,
}

/// Predicate operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Nin,
    All,
    Size,
    Exists,
    Near,
    Within,
}

impl Operator {
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        Some(match symbol {
            "$eq" => Operator::Eq,
            "$ne" => Operator::Ne,
            "$gt" => Operator::Gt,
            "$gte" => Operator::Gte,
            "$lt" => Operator::Lt,
            "$lte" => Operator::Lte,
            "$in" => Operator::In,
            "$nin" => Operator::Nin,
            "$all" => Operator::All,
            "$size" => Operator::Size,
            "$exists" => Operator::Exists,
            "$near" => Operator::Near,
            "$within" => Operator::Within,
            _ => return None,
        })
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Eq => "$eq",
            Operator::Ne => "$ne",
            Operator::Gt => "$gt",
            Operator::Gte => "$gte",
            Operator::Lt => "$lt",
            Operator::Lte => "$lte",
            Operator::In => "$in",
            Operator::Nin => "$nin",
            Operator::All => "$all",
            Operator::Size => "$size",
            Operator::Exists => "$exists",
            Operator::Near => "$near",
            Operator::Within => "$within",
        }
    }

    pub fn arity(self) -> Arity {
        match self {
            Operator::Eq | Operator::Ne | Operator::Size | Operator::Exists => Arity::Binary,
            Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => Arity::Range,
            Operator::In | Operator::Nin | Operator::All => Arity::Array,
            Operator::Near | Operator::Within => Arity::Geospatial,
        }
    }

    pub fn opcode(self) -> Opcode {
        match self {
            Operator::Eq => Opcode::Eq,
            Operator::Ne => Opcode::Ne,
            Operator::Gt => Opcode::Gt,
            Operator::Gte => Opcode::Gte,
            Operator::Lt => Opcode::Lt,
            Operator::Lte => Opcode::Lte,
            Operator::In => Opcode::In,
            Operator::Nin => Opcode::Nin,
            Operator::All => Opcode::All,
            Operator::Size => Opcode::Size,
            Operator::Exists => Opcode::Exists,
            Operator::Near => Opcode::Near,
            Operator::Within => Opcode::Within,
        }
    }
}

/// Right-hand side of a clause.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Literal(Value),
    Set(LiteralSet),
    Geo(GeoQuery),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Literal(v) => write!(f, "{v}"),
            Operand::Set(set) => write!(f, "{}", Value::Array(set.items.clone())),
            Operand::Geo(g) => write!(f, "({}, {}) r={}km", g.lat, g.lon, g.distance),
        }
    }
}

/// Literal array materialised as a hash set for membership tests.
#[derive(Debug, Clone)]
pub struct LiteralSet {
    pub items: Vec<Value>,
    keys: AHashSet<String>,
}

impl LiteralSet {
    pub fn new(items: Vec<Value>) -> Self {
        let keys = items.iter().map(literal_key).collect();
        Self { items, keys }
    }

    pub fn contains(&self, value: &Value) -> bool {
        self.keys.contains(&literal_key(value))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl PartialEq for LiteralSet {
    fn eq(&self, other: &Self) -> bool {
        self.keys == other.keys
    }
}

/// Visitor-produced reference to a collection index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRef {
    /// Position in the collection's index list
    pub index: usize,
    pub name: String,
    pub lookup: IndexLookup,
}

impl IndexRef {
    pub fn is_range(&self) -> bool {
        matches!(self.lookup, IndexLookup::Range { .. })
    }
}

/// Pre-resolved lookup arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexLookup {
    Exact(IndexKey),
    Range {
        min: Option<IndexKey>,
        max: Option<IndexKey>,
        include_min: bool,
        include_max: bool,
    },
}

/// Mutation operators (`$set`, `$inc`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutateOp {
    Set,
    Unset,
    Inc,
    Push,
    PushAll,
    Pull,
    PullAll,
    Pop,
}

impl MutateOp {
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        Some(match symbol {
            "$set" => MutateOp::Set,
            "$unset" => MutateOp::Unset,
            "$inc" => MutateOp::Inc,
            "$push" => MutateOp::Push,
            "$pushAll" => MutateOp::PushAll,
            "$pull" => MutateOp::Pull,
            "$pullAll" => MutateOp::PullAll,
            "$pop" => MutateOp::Pop,
            _ => return None,
        })
    }

    pub fn opcode(self) -> Opcode {
        match self {
            MutateOp::Set => Opcode::Set,
            MutateOp::Unset => Opcode::Unset,
            MutateOp::Inc => Opcode::Inc,
            MutateOp::Push => Opcode::Push,
            MutateOp::PushAll => Opcode::PushAll,
            MutateOp::Pull => Opcode::Pull,
            MutateOp::PullAll => Opcode::PullAll,
            MutateOp::Pop => Opcode::Pop,
        }
    }
}

/// One `path: operand` pair of a mutate object.
#[derive(Debug, Clone, PartialEq)]
pub struct MutateNode {
    pub op: MutateOp,
    pub attribute: String,
    pub operand: Value,
}

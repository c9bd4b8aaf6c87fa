//! Comparable index keys

use crate::document::{as_number, literal_key, lookup_path};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// 2^53: every integer below this magnitude has an exact `f64`
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

/// Totally ordered key stored in index trees and hash maps.
///
/// Order across kinds: `Null < Bool < Number < Text < Json`.
/// Multi-attribute keys are a single `Text` of comma-joined canonical literals.
#[derive(Debug, Clone)]
pub enum IndexKey {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    /// Arrays and objects, by canonical serialisation
    Json(String),
}

impl IndexKey {
    /// Key for a single attribute value; a missing value keys as `Null`.
    pub fn from_value(value: Option<&Value>) -> Self {
        match value {
            None | Some(Value::Null) => IndexKey::Null,
            Some(Value::Bool(b)) => IndexKey::Bool(*b),
            Some(v @ Value::Number(_)) => IndexKey::Number(as_number(v).unwrap_or(0.0)),
            Some(Value::String(s)) => IndexKey::Text(s.clone()),
            Some(v) => IndexKey::Json(literal_key(v)),
        }
    }

    /// Comma-joined composite key, in attribute order.
    pub fn composite<'a>(values: impl IntoIterator<Item = Option<&'a Value>>) -> Self {
        let parts: Vec<String> = values
            .into_iter()
            .map(|v| v.map(literal_key).unwrap_or_else(|| "null".to_string()))
            .collect();
        IndexKey::Text(parts.join(","))
    }

    /// Key a document under the given attribute list.
    pub fn for_document(doc: &Value, attributes: &[String]) -> Self {
        match attributes {
            [single] => Self::from_value(lookup_path(doc, single)),
            many => Self::composite(many.iter().map(|a| lookup_path(doc, a))),
        }
    }

    /// Key built from query operands, one per index attribute.
    pub fn for_operands(operands: &[&Value]) -> Self {
        match operands {
            [single] => Self::from_value(Some(single)),
            many => Self::composite(many.iter().map(|v| Some(*v))),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            IndexKey::Null => 0,
            IndexKey::Bool(_) => 1,
            IndexKey::Number(_) => 2,
            IndexKey::Text(_) => 3,
            IndexKey::Json(_) => 4,
        }
    }

    /// Whether `value` keys without losing precision.
    ///
    /// Number keys are `f64`, so integers at or beyond 2^53 (and floats in
    /// that range) can share a key with a different value.
    pub fn is_exact(value: &Value) -> bool {
        match value {
            Value::Number(_) => as_number(value).is_some_and(|f| f.abs() < MAX_EXACT_INTEGER),
            _ => true,
        }
    }

    /// Whether both keys are of the same kind (e.g. both numbers).
    pub fn same_kind(&self, other: &IndexKey) -> bool {
        self.rank() == other.rank()
    }
}

impl Ord for IndexKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (IndexKey::Bool(a), IndexKey::Bool(b)) => a.cmp(b),
            (IndexKey::Number(a), IndexKey::Number(b)) => a.total_cmp(b),
            (IndexKey::Text(a), IndexKey::Text(b)) => a.cmp(b),
            (IndexKey::Json(a), IndexKey::Json(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for IndexKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for IndexKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for IndexKey {}

impl Hash for IndexKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            IndexKey::Null => {}
            IndexKey::Bool(b) => b.hash(state),
            IndexKey::Number(n) => n.to_bits().hash(state),
            IndexKey::Text(s) | IndexKey::Json(s) => s.hash(state),
        }
    }
}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexKey::Null => write!(f, "null"),
            IndexKey::Bool(b) => write!(f, "{b}"),
            IndexKey::Number(n) => write!(f, "{n}"),
            IndexKey::Text(s) => write!(f, "{s:?}"),
            IndexKey::Json(s) => write!(f, "{s}"),
        }
    }
}

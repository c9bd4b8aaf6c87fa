//! Recursive-descent predicate parser
//!
//! Predicate objects follow the familiar document-store shape:
//!
//! ```text
//! { "age": { "$gte": 18 }, "tags": { "$in": ["a", "b"] },
//!   "$or": [ { "city": "Seoul" }, { "city": "Busan" } ] }
//! ```
//!
//! The root and every `$and` element form one conjunction; repeated
//! attributes within it are merged into a single variable node. `$or`
//! groups are parsed independently and attached at the end.

use super::ast::{
    Arity, Clause, LiteralSet, Logical, MutateNode, MutateOp, Operand, Operator, QueryNode, QueryTree,
};
use crate::error::{DqxError, DqxResult};
use crate::geo::GeoQuery;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::debug;

/// Attribute name → position of its variable node in the current conjunction
type AttributeTable = HashMap<String, usize>;

/// Parse a predicate object into a [`QueryTree`].
///
/// # Errors
///
/// [`DqxError::QueryParse`] for malformed `$and`/`$or` groups, malformed
/// geospatial clauses, unknown operators and wrongly shaped operands. No
/// partial tree is returned.
pub fn parse_query(predicate: &Value) -> DqxResult<QueryTree> {
    let Value::Object(map) = predicate else {
        return Err(DqxError::parse("predicate must be an object", predicate));
    };

    let mut root = Vec::new();
    let mut ors = Vec::new();
    let mut attributes = AttributeTable::new();
    parse_conjunction(map, predicate, &mut root, &mut attributes, &mut ors)?;
    set_ors(&mut root, ors);

    let tree = QueryTree {
        root: normalize(root),
    };
    debug!(nodes = tree.root.len(), "parsed query");
    Ok(tree)
}

fn parse_conjunction(
    map: &Map<String, Value>,
    query: &Value,
    out: &mut Vec<QueryNode>,
    attributes: &mut AttributeTable,
    ors: &mut Vec<QueryNode>,
) -> DqxResult<()> {
    for (key, value) in map {
        match key.as_str() {
            // AND is associative: hoist into the enclosing conjunction
            "$and" => {
                for item in group_items(Logical::And, value, query)? {
                    parse_conjunction(item, query, out, attributes, ors)?;
                }
            }
            "$or" => {
                let branches = group_items(Logical::Or, value, query)?
                    .into_iter()
                    .map(|item| parse_branch(item, query))
                    .collect::<DqxResult<Vec<_>>>()?;
                ors.push(QueryNode::Selective {
                    op: Logical::Or,
                    children: branches,
                });
            }
            op if op.starts_with('$') => {
                return Err(DqxError::parse(
                    format!("unknown top-level operator '{op}'"),
                    query,
                ));
            }
            attribute => {
                let clauses = parse_clauses(attribute, value, query)?;
                match attributes.get(attribute) {
                    Some(&position) => match out.get_mut(position) {
                        Some(QueryNode::Variable {
                            clauses: existing, ..
                        }) => existing.extend(clauses),
                        _ => {
                            return Err(DqxError::parse(
                                format!("attribute table out of sync for '{attribute}'"),
                                query,
                            ));
                        }
                    },
                    None => {
                        attributes.insert(attribute.to_string(), out.len());
                        out.push(QueryNode::Variable {
                            attribute: attribute.to_string(),
                            clauses,
                        });
                    }
                }
            }
        }
    }
    Ok(())
}

/// One `$or` branch: its own conjunction with a fresh attribute table.
fn parse_branch(map: &Map<String, Value>, query: &Value) -> DqxResult<QueryNode> {
    let mut nodes = Vec::new();
    let mut ors = Vec::new();
    let mut attributes = AttributeTable::new();
    parse_conjunction(map, query, &mut nodes, &mut attributes, &mut ors)?;
    set_ors(&mut nodes, ors);
    Ok(QueryNode::Selective {
        op: Logical::And,
        children: nodes,
    })
}

fn group_items<'a>(
    op: Logical,
    value: &'a Value,
    query: &Value,
) -> DqxResult<Vec<&'a Map<String, Value>>> {
    let symbol = op.symbol();
    let Value::Array(items) = value else {
        return Err(DqxError::parse(format!("{symbol} requires an array"), query));
    };
    if items.len() < 2 {
        return Err(DqxError::parse(
            format!("{symbol} requires at least 2 sub-expressions"),
            query,
        ));
    }
    items
        .iter()
        .map(|item| match item {
            Value::Object(map) if map.contains_key(symbol) => Err(DqxError::parse(
                format!("{symbol} cannot nest directly inside {symbol}"),
                query,
            )),
            Value::Object(map) if map.is_empty() => Err(DqxError::parse(
                format!("{symbol} sub-expressions must not be empty"),
                query,
            )),
            Value::Object(map) => Ok(map),
            _ => Err(DqxError::parse(
                format!("{symbol} sub-expressions must be objects"),
                query,
            )),
        })
        .collect()
}

/// Attach collected `$or` groups as one trailing `$and` node.
fn set_ors(nodes: &mut Vec<QueryNode>, ors: Vec<QueryNode>) {
    if !ors.is_empty() {
        nodes.push(QueryNode::Selective {
            op: Logical::And,
            children: ors,
        });
    }
}

fn parse_clauses(attribute: &str, value: &Value, query: &Value) -> DqxResult<Vec<Clause>> {
    match value {
        Value::Object(map) if map.keys().any(|k| k.starts_with('$')) => {
            if !map.keys().all(|k| k.starts_with('$')) {
                return Err(DqxError::parse(
                    format!("'{attribute}' mixes operators and plain fields"),
                    query,
                ));
            }
            map.iter()
                .map(|(symbol, operand)| parse_clause(attribute, symbol, operand, query))
                .collect()
        }
        // scalar, array or plain object: implicit $eq
        literal => Ok(vec![Clause {
            op: Operator::Eq,
            operand: Operand::Literal(literal.clone()),
        }]),
    }
}

fn parse_clause(attribute: &str, symbol: &str, operand: &Value, query: &Value) -> DqxResult<Clause> {
    let op = Operator::from_symbol(symbol).ok_or_else(|| match symbol {
        "$and" | "$or" => DqxError::parse(
            format!("{symbol} is not allowed inside attribute '{attribute}'"),
            query,
        ),
        _ => DqxError::parse(format!("unknown operator '{symbol}'"), query),
    })?;

    let operand = match op.arity() {
        Arity::Array => match operand {
            Value::Array(items) => Operand::Set(LiteralSet::new(items.clone())),
            _ => {
                return Err(DqxError::parse(
                    format!("{symbol} on '{attribute}' requires an array"),
                    query,
                ));
            }
        },
        Arity::Geospatial => Operand::Geo(parse_geo(attribute, symbol, operand, query)?),
        Arity::Binary if op == Operator::Size && operand.as_u64().is_none() => {
            return Err(DqxError::parse(
                format!("$size on '{attribute}' requires a non-negative integer"),
                query,
            ));
        }
        Arity::Binary if op == Operator::Exists && !operand.is_boolean() => {
            return Err(DqxError::parse(
                format!("$exists on '{attribute}' requires a boolean"),
                query,
            ));
        }
        Arity::Binary | Arity::Range => Operand::Literal(operand.clone()),
    };
    Ok(Clause { op, operand })
}

fn parse_geo(attribute: &str, symbol: &str, operand: &Value, query: &Value) -> DqxResult<GeoQuery> {
    let field = |name: &str| operand.get(name).and_then(Value::as_f64);
    match (field("lat"), field("lon"), field("distance")) {
        (Some(lat), Some(lon), Some(distance)) if distance >= 0.0 => {
            Ok(GeoQuery { lat, lon, distance })
        }
        _ => Err(DqxError::parse(
            format!("{symbol} on '{attribute}' requires numeric lat, lon and distance"),
            query,
        )),
    }
}

/// Prune empty selective nodes and unwrap single-child ones.
pub fn normalize(nodes: Vec<QueryNode>) -> Vec<QueryNode> {
    nodes.into_iter().filter_map(normalize_node).collect()
}

fn normalize_node(node: QueryNode) -> Option<QueryNode> {
    match node {
        QueryNode::Selective { op, children } => {
            let mut children = normalize(children);
            match children.len() {
                0 => None,
                1 => children.pop(),
                _ => Some(QueryNode::Selective { op, children }),
            }
        }
        other => Some(other),
    }
}

/// Parse a mutate object (`{"$set": {"a.b": 1}, "$inc": {"n": 2}}`).
///
/// # Errors
///
/// [`DqxError::Compile`] for unknown mutate operators or non-object clauses.
pub fn parse_mutate(mutate: &Value) -> DqxResult<Vec<MutateNode>> {
    let Value::Object(map) = mutate else {
        return Err(DqxError::compile("mutate must be an object", mutate));
    };

    let mut nodes = Vec::new();
    for (symbol, fields) in map {
        let op = MutateOp::from_symbol(symbol).ok_or_else(|| {
            DqxError::compile(format!("unknown mutate operator '{symbol}'"), mutate)
        })?;
        let Value::Object(fields) = fields else {
            return Err(DqxError::compile(
                format!("{symbol} expects an object of paths"),
                mutate,
            ));
        };
        nodes.extend(fields.iter().map(|(path, operand)| MutateNode {
            op,
            attribute: path.clone(),
            operand: operand.clone(),
        }));
    }
    Ok(nodes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eq(value: Value) -> Clause {
        Clause {
            op: Operator::Eq,
            operand: Operand::Literal(value),
        }
    }

    #[test]
    fn test_two_variables() {
        let tree = parse_query(&json!({"a": 1, "b": 2})).unwrap();
        assert_eq!(
            tree.root,
            vec![
                QueryNode::Variable {
                    attribute: "a".into(),
                    clauses: vec![eq(json!(1))]
                },
                QueryNode::Variable {
                    attribute: "b".into(),
                    clauses: vec![eq(json!(2))]
                },
            ]
        );
    }

    #[test]
    fn test_single_element_and_rejected() {
        let err = parse_query(&json!({"a": 1, "$and": [{"b": 2}]})).unwrap_err();
        assert!(matches!(err, DqxError::QueryParse { .. }));
        assert!(parse_query(&json!({"a": 1, "$and": [{"b": 2}, {"c": 3}]})).is_ok());
    }

    #[test]
    fn test_and_hoisted_and_unnested() {
        let tree = parse_query(&json!({
            "a": {"$gt": 1},
            "$and": [{"a": {"$lt": 9}}, {"b": 2}]
        }))
        .unwrap();
        assert_eq!(tree.root.len(), 2);
        let a = tree.variable("a").unwrap();
        assert_eq!(a.len(), 2);
        assert!(a.iter().any(|c| c.op == Operator::Gt));
        assert!(a.iter().any(|c| c.op == Operator::Lt));
    }

    #[test]
    fn test_or_attached_at_end() {
        let tree = parse_query(&json!({
            "$or": [{"a": 1}, {"a": 2, "b": 3}],
            "z": 0
        }))
        .unwrap();
        assert_eq!(tree.root.len(), 2);
        assert!(matches!(tree.root[0], QueryNode::Variable { .. }));
        let QueryNode::Selective { op, children } = &tree.root[1] else {
            panic!("expected $or group");
        };
        assert_eq!(*op, Logical::Or);
        assert!(matches!(children[0], QueryNode::Variable { .. }));
        assert!(matches!(
            children[1],
            QueryNode::Selective { op: Logical::And, .. }
        ));
    }

    #[test]
    fn test_or_branches_do_not_share_attributes() {
        let tree = parse_query(&json!({"a": 1, "$or": [{"a": 2}, {"a": 3}]})).unwrap();
        assert_eq!(tree.variable("a").unwrap().len(), 1);
    }

    #[test]
    fn test_illegal_nesting() {
        assert!(parse_query(&json!({"$or": [{"$or": [{"a": 1}, {"b": 1}]}, {"c": 1}]})).is_err());
        assert!(parse_query(&json!({"$and": [{"$and": [{"a": 1}, {"b": 1}]}, {"c": 1}]})).is_err());
        assert!(parse_query(&json!({"$or": [{"a": 1}, 5]})).is_err());
        assert!(parse_query(&json!({"$or": [{"a": 1}, {}]})).is_err());
        assert!(parse_query(&json!({"a": {"$or": [1, 2]}})).is_err());
    }

    #[test]
    fn test_geo_clause_requires_fields() {
        assert!(parse_query(&json!({"loc": {"$near": {"lat": 1, "lon": 2}}})).is_err());
        let tree = parse_query(&json!({"loc": {"$near": {"lat": 1, "lon": 2, "distance": 5}}})).unwrap();
        let clauses = tree.variable("loc").unwrap();
        assert!(matches!(clauses[0].operand, Operand::Geo(_)));
    }

    #[test]
    fn test_set_operators_require_arrays() {
        assert!(parse_query(&json!({"a": {"$in": 1}})).is_err());
        let tree = parse_query(&json!({"a": {"$nin": [1, 2]}})).unwrap();
        let Operand::Set(set) = &tree.variable("a").unwrap()[0].operand else {
            panic!("expected a literal set");
        };
        assert!(set.contains(&json!(2)));
    }

    #[test]
    fn test_operand_shapes() {
        assert!(parse_query(&json!({"a": {"$size": -1}})).is_err());
        assert!(parse_query(&json!({"a": {"$exists": 1}})).is_err());
        assert!(parse_query(&json!({"a": {"$regex": "x"}})).is_err());
        assert!(parse_query(&json!({"a": {"$gt": 1, "b": 2}})).is_err());
        assert!(parse_query(&json!({"$nor": []})).is_err());
        assert!(parse_query(&json!([1, 2])).is_err());
    }

    #[test]
    fn test_literal_object_and_array_are_equality() {
        let tree = parse_query(&json!({"a": {"x": 1}, "b": [1, 2]})).unwrap();
        assert_eq!(tree.variable("a").unwrap()[0], eq(json!({"x": 1})));
        assert_eq!(tree.variable("b").unwrap()[0], eq(json!([1, 2])));
    }

    #[test]
    fn test_empty_predicate() {
        assert!(parse_query(&json!({})).unwrap().is_empty());
    }

    #[test]
    fn test_normalize_prunes_and_unwraps() {
        let nodes = vec![
            QueryNode::Selective {
                op: Logical::And,
                children: vec![],
            },
            QueryNode::Selective {
                op: Logical::Or,
                children: vec![QueryNode::Variable {
                    attribute: "a".into(),
                    clauses: vec![eq(json!(1))],
                }],
            },
        ];
        let normalized = normalize(nodes);
        assert_eq!(normalized.len(), 1);
        assert!(matches!(normalized[0], QueryNode::Variable { .. }));
    }

    #[test]
    fn test_parse_mutate() {
        let nodes = parse_mutate(&json!({"$set": {"foo": "bar", "a.b": 1}, "$inc": {"n": 2}})).unwrap();
        assert_eq!(nodes.len(), 3);
        assert!(nodes.iter().any(|n| n.op == MutateOp::Inc && n.attribute == "n"));

        let err = parse_mutate(&json!({"$rename": {"a": "b"}})).unwrap_err();
        assert!(matches!(err, DqxError::Compile { .. }));
        assert!(parse_mutate(&json!({"$set": 1})).is_err());
    }
}

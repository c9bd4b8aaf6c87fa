//! Index selection
//!
//! Rewrites root-level predicates into [`IndexRef`] lookups when a
//! registered index covers them. Selection is best-effort: any failure
//! leaves the query untouched and it falls back to a scan.

use super::ast::{Arity, Clause, IndexLookup, IndexRef, Operand, Operator, QueryNode, QueryTree};
use crate::error::{DqxError, DqxResult};
use crate::index::{AttributeSet, DocumentIndex, IndexKey, IndexMatch};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Substitute index lookups for covered predicates.
///
/// Works on a copy; on error the original tree is returned unchanged.
pub fn visit(tree: &QueryTree, indices: &[Box<dyn DocumentIndex>]) -> QueryTree {
    match rewrite(tree, indices) {
        Ok(rewritten) => {
            debug!(
                lookups = rewritten.leading_indices(),
                residual = rewritten.root.len() - rewritten.leading_indices(),
                "index selection done"
            );
            rewritten
        }
        Err(e) => {
            warn!(error = %e, "index selection failed, keeping original query");
            tree.clone()
        }
    }
}

fn rewrite(tree: &QueryTree, indices: &[Box<dyn DocumentIndex>]) -> DqxResult<QueryTree> {
    let mut root = tree.root.clone();
    if indices.is_empty() || root.is_empty() {
        return Ok(QueryTree { root });
    }

    // Nested boolean groups are never indexed; only root-level variables.
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut exact = AttributeSet::default();
    let mut range = AttributeSet::default();
    for (position, node) in root.iter().enumerate() {
        if let QueryNode::Variable { attribute, clauses } = node {
            positions.insert(attribute.clone(), position);
            for clause in clauses {
                match (clause.op, &clause.operand) {
                    (Operator::Eq, Operand::Literal(_)) => {
                        exact.insert(attribute.clone());
                    }
                    (op, _) if op.arity() == Arity::Range => {
                        range.insert(attribute.clone());
                    }
                    _ => {}
                }
            }
        }
    }

    let mut lookups = Vec::new();
    for (position, index) in indices.iter().enumerate() {
        let substituted = if let Some(matched) = index.applies(&exact, false) {
            substitute_exact(&mut root, &positions, position, index.as_ref(), &matched)?
        } else if let Some(matched) = index.applies(&range, true) {
            substitute_range(&mut root, &positions, position, index.as_ref(), &matched)?
        } else {
            None
        };
        if let Some(node) = substituted {
            debug!(index = index.name(), range = node.is_range(), "substituted index lookup");
            lookups.insert(0, QueryNode::Index(node));
        }
    }

    lookups.extend(root.into_iter().filter(|node| match node {
        QueryNode::Variable { clauses, .. } => !clauses.is_empty(),
        _ => true,
    }));
    Ok(QueryTree { root: lookups })
}

fn clauses_of<'a>(
    root: &'a [QueryNode],
    positions: &HashMap<String, usize>,
    attribute: &str,
) -> DqxResult<(usize, &'a [Clause])> {
    let position = *positions.get(attribute).ok_or_else(|| {
        DqxError::IndexSelection(format!("no root-level predicate on '{attribute}'"))
    })?;
    match root.get(position) {
        Some(QueryNode::Variable { clauses, .. }) => Ok((position, clauses)),
        _ => Err(DqxError::IndexSelection(format!(
            "'{attribute}' is not a plain attribute predicate"
        ))),
    }
}

/// Remove staged `(node, clause)` pairs, latest first.
fn remove_staged(root: &mut [QueryNode], mut staged: Vec<(usize, usize)>) {
    staged.sort_unstable();
    for (position, clause) in staged.into_iter().rev() {
        if let Some(QueryNode::Variable { clauses, .. }) = root.get_mut(position) {
            clauses.remove(clause);
        }
    }
}

fn substitute_exact(
    root: &mut [QueryNode],
    positions: &HashMap<String, usize>,
    position: usize,
    index: &dyn DocumentIndex,
    matched: &IndexMatch,
) -> DqxResult<Option<IndexRef>> {
    if matched.attributes.is_empty() {
        return Err(DqxError::IndexSelection(format!(
            "index '{}' covers no attributes",
            index.name()
        )));
    }

    let mut operands: Vec<Value> = Vec::with_capacity(matched.attributes.len());
    let mut staged = Vec::with_capacity(matched.attributes.len());
    for attribute in &matched.attributes {
        let (node, clauses) = clauses_of(root, positions, attribute)?;
        let found = clauses.iter().enumerate().find_map(|(i, c)| match (c.op, &c.operand) {
            (Operator::Eq, Operand::Literal(v)) if IndexKey::is_exact(v) => Some((i, v)),
            _ => None,
        });
        if let Some((clause, value)) = found {
            operands.push(value.clone());
            staged.push((node, clause));
        }
    }
    // Partially satisfiable (an earlier index already consumed a clause)
    if staged.len() != matched.attributes.len() {
        return Ok(None);
    }

    remove_staged(root, staged);
    let refs: Vec<&Value> = operands.iter().collect();
    Ok(Some(IndexRef {
        index: position,
        name: index.name().to_string(),
        lookup: IndexLookup::Exact(IndexKey::for_operands(&refs)),
    }))
}

fn range_bound(value: &Value) -> Option<IndexKey> {
    if !IndexKey::is_exact(value) {
        return None;
    }
    match value {
        Value::Number(_) | Value::String(_) => Some(IndexKey::from_value(Some(value))),
        _ => None,
    }
}

fn substitute_range(
    root: &mut [QueryNode],
    positions: &HashMap<String, usize>,
    position: usize,
    index: &dyn DocumentIndex,
    matched: &IndexMatch,
) -> DqxResult<Option<IndexRef>> {
    let [attribute] = matched.attributes.as_slice() else {
        return Err(DqxError::IndexSelection(format!(
            "range index '{}' must cover exactly one attribute",
            index.name()
        )));
    };

    let (node, clauses) = clauses_of(root, positions, attribute)?;
    let mut min: Option<(usize, IndexKey, bool)> = None;
    let mut max: Option<(usize, IndexKey, bool)> = None;
    for (i, clause) in clauses.iter().enumerate() {
        let Operand::Literal(value) = &clause.operand else {
            continue;
        };
        let Some(bound) = range_bound(value) else {
            continue;
        };
        match clause.op {
            Operator::Gt | Operator::Gte if min.is_none() => {
                min = Some((i, bound, clause.op == Operator::Gte));
            }
            Operator::Lt | Operator::Lte if max.is_none() => {
                max = Some((i, bound, clause.op == Operator::Lte));
            }
            _ => {}
        }
    }
    if let (Some((_, lo, _)), Some((_, hi, _))) = (&min, &max)
        && !lo.same_kind(hi)
    {
        return Ok(None);
    }
    if min.is_none() && max.is_none() {
        return Ok(None);
    }

    let staged = min
        .iter()
        .chain(max.iter())
        .map(|(i, _, _)| (node, *i))
        .collect();
    remove_staged(root, staged);

    let (min, include_min) = min.map_or((None, true), |(_, k, inc)| (Some(k), inc));
    let (max, include_max) = max.map_or((None, true), |(_, k, inc)| (Some(k), inc));
    Ok(Some(IndexRef {
        index: position,
        name: index.name().to_string(),
        lookup: IndexLookup::Range {
            min,
            max,
            include_min,
            include_max,
        },
    }))
}

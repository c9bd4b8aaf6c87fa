//! In-place document mutation (`$set`, `$inc`, `$push`, ...)

use crate::document::{ID_FIELD, resolve_path_mut, values_equal};
use crate::error::{DqxError, DqxResult};
use crate::query::MutateOp;
use serde_json::{Number, Value};

/// Apply one mutation to `doc` at the dotted `path`.
///
/// With `upsert`, missing intermediate objects are created; otherwise a
/// mutation whose containing object does not exist is skipped.
pub fn apply(
    op: MutateOp,
    doc: &mut Value,
    path: &str,
    operand: &Value,
    upsert: bool,
) -> DqxResult<()> {
    let opcode = op.opcode().mnemonic();
    check(op, path, operand)?;

    let create = upsert && matches!(op, MutateOp::Set | MutateOp::Inc | MutateOp::Push | MutateOp::PushAll);
    let Some((container, key)) = resolve_path_mut(doc, path, create) else {
        return Ok(());
    };

    match op {
        MutateOp::Set => {
            container.insert(key, operand.clone());
        }
        MutateOp::Unset => {
            container.remove(&key);
        }
        MutateOp::Inc => {
            let current = container.get(&key).cloned().unwrap_or(Value::from(0));
            container.insert(key, increment(&current, operand)?);
        }
        MutateOp::Push | MutateOp::PushAll => {
            let target = container
                .entry(key)
                .or_insert_with(|| Value::Array(Vec::new()));
            let Value::Array(items) = target else {
                return Err(DqxError::execution(opcode, format!("'{path}' is not an array")));
            };
            match (op, operand) {
                (MutateOp::PushAll, Value::Array(values)) => items.extend(values.iter().cloned()),
                _ => items.push(operand.clone()),
            }
        }
        MutateOp::Pull | MutateOp::PullAll | MutateOp::Pop => {
            let Some(target) = container.get_mut(&key) else {
                return Ok(());
            };
            let Value::Array(items) = target else {
                return Err(DqxError::execution(opcode, format!("'{path}' is not an array")));
            };
            match (op, operand) {
                (MutateOp::Pull, _) => items.retain(|item| !values_equal(item, operand)),
                (MutateOp::PullAll, Value::Array(values)) => {
                    items.retain(|item| !values.iter().any(|v| values_equal(item, v)))
                }
                (MutateOp::Pop, _) if operand.as_i64() == Some(-1) => {
                    if !items.is_empty() {
                        items.remove(0);
                    }
                }
                (MutateOp::Pop, _) => {
                    items.pop();
                }
                _ => {}
            }
        }
    }
    Ok(())
}

/// Reject a mutation that would fail on every document.
///
/// Run by the compiler so that a bad operand never reaches the mutate
/// phase, and again by [`apply`] for hand-built programs.
pub(crate) fn check(op: MutateOp, path: &str, operand: &Value) -> DqxResult<()> {
    let opcode = op.opcode().mnemonic();
    if path == ID_FIELD {
        return Err(DqxError::execution(opcode, "_id cannot be modified"));
    }
    match op {
        MutateOp::PushAll | MutateOp::PullAll if !operand.is_array() => Err(
            DqxError::execution(opcode, "operand must be an array"),
        ),
        MutateOp::Inc if !operand.is_number() => {
            Err(DqxError::execution(opcode, "operand must be a number"))
        }
        MutateOp::Pop if !matches!(operand.as_i64(), Some(1 | -1)) => {
            Err(DqxError::execution(opcode, "operand must be 1 or -1"))
        }
        _ => Ok(()),
    }
}

fn increment(current: &Value, by: &Value) -> DqxResult<Value> {
    let (Value::Number(a), Value::Number(b)) = (current, by) else {
        return Err(DqxError::execution("inc", "target is not a number"));
    };
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return x
            .checked_add(y)
            .map(Value::from)
            .ok_or_else(|| DqxError::execution("inc", "integer overflow"));
    }
    let sum = a.as_f64().unwrap_or(f64::NAN) + b.as_f64().unwrap_or(f64::NAN);
    Number::from_f64(sum)
        .map(Value::Number)
        .ok_or_else(|| DqxError::execution("inc", "result is not a finite number"))
}

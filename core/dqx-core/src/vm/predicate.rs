//! Predicate opcode semantics

use crate::document::{compare_values, values_equal};
use crate::geo::GeoPoint;
use crate::query::{LiteralSet, Operand, Operator};
use serde_json::Value;
use std::cmp::Ordering;

/// Evaluate one clause against the value found at its path.
///
/// A missing path reads as `null`; ordered comparisons across types are false.
pub fn evaluate(op: Operator, value: Option<&Value>, operand: &Operand) -> bool {
    let field = value.unwrap_or(&Value::Null);
    match (op, operand) {
        (Operator::Eq, Operand::Literal(v)) => values_equal(field, v),
        (Operator::Ne, Operand::Literal(v)) => !values_equal(field, v),
        (Operator::Gt, Operand::Literal(v)) => compare_values(field, v) == Some(Ordering::Greater),
        (Operator::Gte, Operand::Literal(v)) => {
            matches!(compare_values(field, v), Some(Ordering::Greater | Ordering::Equal))
        }
        (Operator::Lt, Operand::Literal(v)) => compare_values(field, v) == Some(Ordering::Less),
        (Operator::Lte, Operand::Literal(v)) => {
            matches!(compare_values(field, v), Some(Ordering::Less | Ordering::Equal))
        }
        (Operator::In, Operand::Set(set)) => member(field, set),
        (Operator::Nin, Operand::Set(set)) => !member(field, set),
        (Operator::All, Operand::Set(set)) => match field {
            Value::Array(items) => set
                .items
                .iter()
                .all(|wanted| items.iter().any(|item| values_equal(item, wanted))),
            _ => false,
        },
        (Operator::Size, Operand::Literal(n)) => match field {
            Value::Array(items) => n.as_u64() == Some(items.len() as u64),
            _ => false,
        },
        (Operator::Exists, Operand::Literal(Value::Bool(wanted))) => value.is_some() == *wanted,
        (Operator::Near, Operand::Geo(geo)) => {
            GeoPoint::from_value(field).is_some_and(|p| geo.is_near(&p))
        }
        (Operator::Within, Operand::Geo(geo)) => {
            GeoPoint::from_value(field).is_some_and(|p| geo.is_within(&p))
        }
        _ => false,
    }
}

fn member(field: &Value, set: &LiteralSet) -> bool {
    set.contains(field)
        || matches!(field, Value::Array(items) if items.iter().any(|item| set.contains(item)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::GeoQuery;
    use serde_json::json;

    fn lit(v: Value) -> Operand {
        Operand::Literal(v)
    }

    fn set(items: Value) -> Operand {
        match items {
            Value::Array(items) => Operand::Set(LiteralSet::new(items)),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_equality_and_missing() {
        assert!(evaluate(Operator::Eq, Some(&json!(1.0)), &lit(json!(1))));
        assert!(evaluate(Operator::Eq, None, &lit(Value::Null)));
        assert!(evaluate(Operator::Ne, None, &lit(json!(1))));
        assert!(!evaluate(Operator::Eq, Some(&json!([1])), &lit(json!(1))));
    }

    #[test]
    fn test_ordering_is_type_strict() {
        assert!(evaluate(Operator::Gt, Some(&json!(5)), &lit(json!(3))));
        assert!(evaluate(Operator::Lte, Some(&json!("abc")), &lit(json!("abd"))));
        assert!(!evaluate(Operator::Gt, Some(&json!("5")), &lit(json!(3))));
        assert!(!evaluate(Operator::Lt, None, &lit(json!(3))));
        assert!(evaluate(Operator::Gte, Some(&json!(3)), &lit(json!(3.0))));
    }

    #[test]
    fn test_membership() {
        let s = set(json!([1, "x"]));
        assert!(evaluate(Operator::In, Some(&json!("x")), &s));
        assert!(evaluate(Operator::In, Some(&json!([9, 1])), &s));
        assert!(!evaluate(Operator::In, Some(&json!(2)), &s));
        assert!(evaluate(Operator::Nin, None, &s));
        assert!(evaluate(Operator::All, Some(&json!(["x", 1, 3])), &s));
        assert!(!evaluate(Operator::All, Some(&json!(["x"])), &s));
    }

    #[test]
    fn test_size_and_exists() {
        assert!(evaluate(Operator::Size, Some(&json!([1, 2])), &lit(json!(2))));
        assert!(!evaluate(Operator::Size, Some(&json!("ab")), &lit(json!(2))));
        assert!(evaluate(Operator::Exists, Some(&Value::Null), &lit(json!(true))));
        assert!(evaluate(Operator::Exists, None, &lit(json!(false))));
    }

    #[test]
    fn test_geo() {
        let q = Operand::Geo(GeoQuery {
            lat: 37.5665,
            lon: 126.9780,
            distance: 50.0,
        });
        let incheon = json!([37.4563, 126.7052]);
        let busan = json!({"lat": 35.1796, "lon": 129.0756});
        assert!(evaluate(Operator::Near, Some(&incheon), &q));
        assert!(!evaluate(Operator::Near, Some(&busan), &q));
        assert!(evaluate(Operator::Within, Some(&incheon), &q));
        assert!(!evaluate(Operator::Within, Some(&json!("nowhere")), &q));
    }
}

//! Document model and value helpers
//!
//! Documents are JSON objects (`serde_json::Value`). Attribute paths are
//! dotted (`address.city`, `tags.0`); numeric segments index into arrays.

use serde_json::{Map, Number, Value};
use std::cmp::Ordering;

/// Collection-assigned document identity
pub type DocId = u64;

/// A stored document (always a JSON object)
pub type Document = Value;

/// Attribute holding the document id
pub const ID_FIELD: &str = "_id";

/// Read a dotted path. `None` when any segment is missing.
pub fn lookup_path<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(doc, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Walk to the object containing the last path segment.
///
/// Returns `(containing_object, leaf_key)`. With `create`, missing
/// intermediate objects are inserted; otherwise a missing container yields
/// `None`. A scalar in the middle of the path always yields `None`.
pub fn resolve_path_mut<'a>(
    doc: &'a mut Value,
    path: &str,
    create: bool,
) -> Option<(&'a mut Map<String, Value>, String)> {
    let mut segments: Vec<&str> = path.split('.').collect();
    let leaf = segments.pop()?.to_string();

    let mut current = doc;
    for segment in segments {
        current = match current {
            Value::Object(map) => {
                if create && !map.contains_key(segment) {
                    map.insert(segment.to_string(), Value::Object(Map::new()));
                }
                map.get_mut(segment)?
            }
            Value::Array(items) => items.get_mut(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    match current {
        Value::Object(map) => Some((map, leaf)),
        _ => None,
    }
}

fn number_as_f64(n: &Number) -> f64 {
    n.as_f64().unwrap_or(f64::NAN)
}

fn numbers_equal(a: &Number, b: &Number) -> bool {
    match (a.as_i64(), b.as_i64()) {
        (Some(x), Some(y)) => x == y,
        _ => match (a.as_u64(), b.as_u64()) {
            (Some(x), Some(y)) => x == y,
            _ => number_as_f64(a) == number_as_f64(b),
        },
    }
}

fn numbers_cmp(a: &Number, b: &Number) -> Ordering {
    match (a.as_i64(), b.as_i64()) {
        (Some(x), Some(y)) => x.cmp(&y),
        _ => number_as_f64(a).total_cmp(&number_as_f64(b)),
    }
}

/// Deep equality where `1 == 1.0`.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => numbers_equal(x, y),
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| values_equal(l, r))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, l)| y.get(k).is_some_and(|r| values_equal(l, r)))
        }
        _ => a == b,
    }
}

/// Ordering for range predicates: numbers with numbers, strings with
/// strings. Any other pairing is incomparable.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => Some(numbers_cmp(x, y)),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order used by `sort`: `Null < Bool < Number < String < Array < Object`.
pub fn canonical_cmp(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => numbers_cmp(x, y),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => x
            .iter()
            .zip(y)
            .map(|(l, r)| canonical_cmp(l, r))
            .find(|o| o.is_ne())
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        (Value::Object(_), Value::Object(_)) => literal_key(a).cmp(&literal_key(b)),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// Canonical text form of a literal.
///
/// Equal values (per [`values_equal`]) always produce the same key:
/// integral floats print as integers, object keys are sorted, strings are
/// JSON-quoted so embedded commas stay unambiguous in composite keys.
pub fn literal_key(v: &Value) -> String {
    match v {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => number_key(n),
        Value::String(s) => Value::String(s.clone()).to_string(),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(literal_key).collect();
            format!("[{}]", parts.join(","))
        }
        Value::Object(map) => {
            let mut parts: Vec<(&String, String)> =
                map.iter().map(|(k, v)| (k, literal_key(v))).collect();
            parts.sort_by(|a, b| a.0.cmp(b.0));
            let parts: Vec<String> = parts
                .into_iter()
                .map(|(k, v)| format!("{}:{}", Value::String(k.clone()), v))
                .collect();
            format!("{{{}}}", parts.join(","))
        }
    }
}

fn number_key(n: &Number) -> String {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    if let Some(u) = n.as_u64() {
        return u.to_string();
    }
    let f = number_as_f64(n);
    if f.fract() == 0.0 && f.abs() < 9.007_199_254_740_992e15 {
        (f as i64).to_string()
    } else {
        f.to_string()
    }
}

/// Numeric view of a JSON number, normalising `-0.0`.
pub fn as_number(v: &Value) -> Option<f64> {
    v.as_f64().map(|f| if f == 0.0 { 0.0 } else { f })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lookup_path() {
        let doc = json!({"a": {"b": [10, {"c": "deep"}]}, "x": 1});
        assert_eq!(lookup_path(&doc, "x"), Some(&json!(1)));
        assert_eq!(lookup_path(&doc, "a.b.0"), Some(&json!(10)));
        assert_eq!(lookup_path(&doc, "a.b.1.c"), Some(&json!("deep")));
        assert_eq!(lookup_path(&doc, "a.missing"), None);
        assert_eq!(lookup_path(&doc, "x.y"), None);
    }

    #[test]
    fn test_resolve_path_mut_without_create() {
        let mut doc = json!({"a": {"b": 1}});
        let (map, leaf) = resolve_path_mut(&mut doc, "a.c", false).unwrap();
        assert_eq!(leaf, "c");
        map.insert(leaf, json!(2));
        assert_eq!(doc, json!({"a": {"b": 1, "c": 2}}));

        assert!(resolve_path_mut(&mut doc, "z.y", false).is_none());
        assert!(resolve_path_mut(&mut doc, "a.b.c", true).is_none());
    }

    #[test]
    fn test_resolve_path_mut_creates_containers() {
        let mut doc = json!({});
        let (map, leaf) = resolve_path_mut(&mut doc, "p.q.r", true).unwrap();
        map.insert(leaf, json!(true));
        assert_eq!(doc, json!({"p": {"q": {"r": true}}}));
    }

    #[test]
    fn test_resolve_path_mut_create_keeps_existing_parents() {
        let mut doc = json!({"p": {"keep": 1}, "list": [{"x": 0}]});
        let (map, leaf) = resolve_path_mut(&mut doc, "p.q.r", true).unwrap();
        map.insert(leaf, json!(2));
        let (map, leaf) = resolve_path_mut(&mut doc, "list.0.y", true).unwrap();
        map.insert(leaf, json!(3));
        assert_eq!(
            doc,
            json!({"p": {"keep": 1, "q": {"r": 2}}, "list": [{"x": 0, "y": 3}]})
        );
    }

    #[test]
    fn test_values_equal_numeric() {
        assert!(values_equal(&json!(1), &json!(1.0)));
        assert!(values_equal(&json!([1, {"a": 2.0}]), &json!([1.0, {"a": 2}])));
        assert!(!values_equal(&json!("1"), &json!(1)));
        assert!(!values_equal(&json!([1, 2]), &json!([1])));
    }

    #[test]
    fn test_compare_values_same_kind_only() {
        assert_eq!(compare_values(&json!(2), &json!(10)), Some(Ordering::Less));
        assert_eq!(compare_values(&json!("b"), &json!("a")), Some(Ordering::Greater));
        assert_eq!(compare_values(&json!("2"), &json!(1)), None);
        assert_eq!(compare_values(&json!(null), &json!(1)), None);
    }

    #[test]
    fn test_canonical_cmp_ranks() {
        let mut values = vec![json!("s"), json!({"a": 1}), json!(3), json!(null), json!([1]), json!(false)];
        values.sort_by(canonical_cmp);
        assert_eq!(
            values,
            vec![json!(null), json!(false), json!(3), json!("s"), json!([1]), json!({"a": 1})]
        );
    }

    #[test]
    fn test_literal_key_normalises() {
        assert_eq!(literal_key(&json!(1.0)), literal_key(&json!(1)));
        assert_eq!(literal_key(&json!("a,b")), "\"a,b\"");
        assert_eq!(literal_key(&json!(2.5)), "2.5");
        assert_eq!(
            literal_key(&json!({"b": 1, "a": [true, null]})),
            "{\"a\":[true,null],\"b\":1}"
        );
    }
}

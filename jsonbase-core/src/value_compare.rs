// jsonbase-core/src/value_compare.rs
//! Value comparison shared by the query and update engines
//!
//! All comparisons operate on `serde_json::Value` trees in which timestamps
//! appear as Date-tagged objects (see `date_tag`). Two timestamps are equal
//! iff their epoch milliseconds are equal, regardless of the ISO rendering.
//!
//! Ordering is strictly per-type: number/number, string/string, date/date.
//! Every other pairing is "not ordered" (`None`) - callers must never treat
//! that as equality.

use crate::date_tag;
use crate::error::{JsonBaseError, Result};
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// True for values that act as scalars in query semantics
///
/// Date-tagged objects count as scalars even though they are JSON objects.
pub fn is_scalar(value: &Value) -> bool {
    match value {
        Value::Array(_) => false,
        Value::Object(_) => date_tag::is_date(value),
        _ => true,
    }
}

/// Strict deep equality with optional array-membership semantics
///
/// When `array_contains_scalar` is true and `a` is an array while `b` is a
/// scalar, the result is true iff any element of `a` strictly equals `b`.
pub fn values_equal(a: &Value, b: &Value, array_contains_scalar: bool) -> bool {
    if array_contains_scalar {
        if let Value::Array(arr) = a {
            if is_scalar(b) {
                return arr.iter().any(|elem| strict_equal(elem, b));
            }
        }
    }
    strict_equal(a, b)
}

fn strict_equal(a: &Value, b: &Value) -> bool {
    if let (Some(ams), Some(bms)) = (date_tag::epoch_ms(a), date_tag::epoch_ms(b)) {
        return ams == bms;
    }

    match (a, b) {
        // All numbers are IEEE-754 doubles; 1 and 1.0 are the same value
        (Value::Number(n1), Value::Number(n2)) => match (n1.as_f64(), n2.as_f64()) {
            (Some(f1), Some(f2)) => f1 == f2,
            _ => n1 == n2,
        },
        (Value::Array(a1), Value::Array(a2)) => {
            a1.len() == a2.len() && a1.iter().zip(a2.iter()).all(|(x, y)| strict_equal(x, y))
        }
        (Value::Object(o1), Value::Object(o2)) => {
            o1.len() == o2.len()
                && o1
                    .iter()
                    .all(|(k, v)| o2.get(k).map(|w| strict_equal(v, w)).unwrap_or(false))
        }
        _ => a == b,
    }
}

/// Compare two values that share an ordered type
///
/// Returns `Some(Ordering)` for number/number, string/string (lexicographic)
/// and date/date (epoch milliseconds). Every other pairing, including
/// cross-type, returns `None`.
pub fn compare_order(a: &Value, b: &Value) -> Option<Ordering> {
    if let (Some(ams), Some(bms)) = (date_tag::epoch_ms(a), date_tag::epoch_ms(b)) {
        return Some(ams.cmp(&bms));
    }

    match (a, b) {
        (Value::Number(n1), Value::Number(n2)) => {
            let f1 = n1.as_f64()?;
            let f2 = n2.as_f64()?;
            f1.partial_cmp(&f2)
        }
        (Value::String(s1), Value::String(s2)) => Some(s1.cmp(s2)),
        _ => None,
    }
}

/// The value's map, when it is a non-empty object whose keys all start with '$'
pub fn operator_map(value: &Value) -> Option<&Map<String, Value>> {
    value
        .as_object()
        .filter(|map| !map.is_empty() && map.keys().all(|k| k.starts_with('$')))
}

/// True iff the value is a non-empty object whose keys all start with '$'
pub fn is_operator_object(value: &Value) -> bool {
    operator_map(value).is_some()
}

/// Evaluate a comparison operator object against a document value
///
/// Only `$eq`, `$gt` and `$lt` are supported here; anything else is an
/// `InvalidQuery`. Multiple keys form a conjunction. A missing document
/// value equals only `null`; `$gt`/`$lt` against missing or null is false.
pub fn apply_operators(actual: Option<&Value>, ops: &Map<String, Value>) -> Result<bool> {
    for (op, operand) in ops {
        let matched = match op.as_str() {
            "$eq" => match actual {
                Some(v) => values_equal(v, operand, true),
                None => operand.is_null(),
            },
            "$gt" => ordered(actual, operand, Ordering::Greater),
            "$lt" => ordered(actual, operand, Ordering::Less),
            other => {
                return Err(JsonBaseError::InvalidQuery(format!(
                    "Unsupported operator: {}",
                    other
                )));
            }
        };

        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

fn ordered(actual: Option<&Value>, operand: &Value, expected: Ordering) -> bool {
    match actual {
        None | Some(Value::Null) => false,
        Some(v) => compare_order(v, operand) == Some(expected),
    }
}

/// Check that every field of `predicate` matches `candidate`
///
/// Operator-object predicate values route through [`apply_operators`] when
/// `operator_support` is set, nested plain objects recurse, and everything
/// else is strict equality. Date tags on either side force strict equality.
pub fn subset_match(candidate: &Value, predicate: &Value, operator_support: bool) -> Result<bool> {
    if operator_support {
        if let Some(ops) = operator_map(predicate) {
            return apply_operators(Some(candidate), ops);
        }
    }

    if date_tag::is_date(predicate) || date_tag::is_date(candidate) {
        return Ok(values_equal(candidate, predicate, false));
    }

    match (candidate, predicate) {
        (Value::Object(cand), Value::Object(pred)) => {
            for (key, pv) in pred {
                let cv = cand.get(key);

                if operator_support {
                    if let Some(ops) = operator_map(pv) {
                        if !apply_operators(cv, ops)? {
                            return Ok(false);
                        }
                        continue;
                    }
                }

                if pv.is_object() && !date_tag::is_date(pv) {
                    match cv {
                        Some(inner) if inner.is_object() => {
                            if !subset_match(inner, pv, operator_support)? {
                                return Ok(false);
                            }
                        }
                        _ => return Ok(false),
                    }
                } else {
                    let matched = match cv {
                        Some(v) => values_equal(v, pv, false),
                        None => pv.is_null(),
                    };
                    if !matched {
                        return Ok(false);
                    }
                }
            }
            Ok(true)
        }
        _ => Ok(values_equal(candidate, predicate, false)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn date(ms: i64) -> Value {
        date_tag::encode(&Utc.timestamp_millis_opt(ms).unwrap())
    }

    #[test]
    fn test_strict_equality_primitives() {
        assert!(values_equal(&json!(5), &json!(5), false));
        assert!(values_equal(&json!(5), &json!(5.0), false));
        assert!(values_equal(&json!("a"), &json!("a"), false));
        assert!(!values_equal(&json!(5), &json!("5"), false));
        assert!(!values_equal(&json!(true), &json!(1), false));
        assert!(values_equal(&json!(null), &json!(null), false));
    }

    #[test]
    fn test_equality_objects_key_order_irrelevant() {
        let a = json!({"x": 1, "y": {"z": [1, 2]}});
        let b = json!({"y": {"z": [1, 2]}, "x": 1});
        assert!(values_equal(&a, &b, false));
        assert!(!values_equal(&a, &json!({"x": 1}), false));
    }

    #[test]
    fn test_equality_arrays_elementwise() {
        assert!(values_equal(&json!([1, 2]), &json!([1, 2]), false));
        assert!(!values_equal(&json!([1, 2]), &json!([2, 1]), false));
        assert!(!values_equal(&json!([1]), &json!([1, 1]), false));
    }

    #[test]
    fn test_equality_dates_by_epoch_ms() {
        let a = json!({"__type": "Date", "value": "2024-01-01T02:00:00.000+02:00"});
        let b = json!({"__type": "Date", "value": "2024-01-01T00:00:00.000Z"});
        assert!(values_equal(&a, &b, false));
        assert!(!values_equal(&a, &date(0), false));
    }

    #[test]
    fn test_array_contains_scalar() {
        let arr = json!(["red", "green", "blue"]);
        assert!(values_equal(&arr, &json!("green"), true));
        assert!(!values_equal(&arr, &json!("yellow"), true));
        // Flag off: array vs scalar is plain inequality
        assert!(!values_equal(&arr, &json!("green"), false));
        // Array vs array stays element-wise even with the flag on
        assert!(values_equal(&arr, &json!(["red", "green", "blue"]), true));
    }

    #[test]
    fn test_compare_order_same_types() {
        assert_eq!(compare_order(&json!(10), &json!(5)), Some(Ordering::Greater));
        assert_eq!(compare_order(&json!(2.5), &json!(3)), Some(Ordering::Less));
        assert_eq!(
            compare_order(&json!("apple"), &json!("banana")),
            Some(Ordering::Less)
        );
        assert_eq!(compare_order(&date(100), &date(50)), Some(Ordering::Greater));
        assert_eq!(compare_order(&date(100), &date(100)), Some(Ordering::Equal));
    }

    #[test]
    fn test_compare_order_cross_type_is_none() {
        assert_eq!(compare_order(&json!("a"), &json!(1)), None);
        assert_eq!(compare_order(&json!(true), &json!(false)), None);
        assert_eq!(compare_order(&json!([1]), &json!([2])), None);
        assert_eq!(compare_order(&date(0), &json!(0)), None);
        assert_eq!(compare_order(&json!(null), &json!(null)), None);
    }

    #[test]
    fn test_is_operator_object() {
        assert!(is_operator_object(&json!({"$gt": 5})));
        assert!(is_operator_object(&json!({"$gt": 5, "$lt": 10})));
        assert!(!is_operator_object(&json!({})));
        assert!(!is_operator_object(&json!({"$gt": 5, "plain": 1})));
        assert!(!is_operator_object(&json!({"name": "x"})));
        assert!(!is_operator_object(&json!(null)));
        assert!(!is_operator_object(&json!([])));
    }

    #[test]
    fn test_apply_operators_conjunction() {
        let ops = json!({"$gt": 5, "$lt": 10});
        let ops = ops.as_object().unwrap();
        assert!(apply_operators(Some(&json!(7)), ops).unwrap());
        assert!(!apply_operators(Some(&json!(5)), ops).unwrap());
        assert!(!apply_operators(Some(&json!(12)), ops).unwrap());
    }

    #[test]
    fn test_apply_operators_eq_membership() {
        let ops = json!({"$eq": "b"});
        let ops = ops.as_object().unwrap();
        assert!(apply_operators(Some(&json!(["a", "b"])), ops).unwrap());
        assert!(!apply_operators(Some(&json!(["a", "c"])), ops).unwrap());
    }

    #[test]
    fn test_apply_operators_missing_value() {
        let eq_null = json!({"$eq": null});
        assert!(apply_operators(None, eq_null.as_object().unwrap()).unwrap());

        let eq_five = json!({"$eq": 5});
        assert!(!apply_operators(None, eq_five.as_object().unwrap()).unwrap());

        let gt = json!({"$gt": 1});
        assert!(!apply_operators(None, gt.as_object().unwrap()).unwrap());
        assert!(!apply_operators(Some(&json!(null)), gt.as_object().unwrap()).unwrap());
    }

    #[test]
    fn test_apply_operators_rejects_unknown() {
        let ops = json!({"$gte": 5});
        let err = apply_operators(Some(&json!(7)), ops.as_object().unwrap()).unwrap_err();
        assert!(matches!(err, JsonBaseError::InvalidQuery(_)));
        assert!(err.to_string().contains("$gte"));
    }

    #[test]
    fn test_subset_match_plain_fields() {
        let cand = json!({"name": "Alice", "age": 30, "city": "NYC"});
        assert!(subset_match(&cand, &json!({"age": 30}), true).unwrap());
        assert!(subset_match(&cand, &json!({"age": 30, "city": "NYC"}), true).unwrap());
        assert!(!subset_match(&cand, &json!({"age": 31}), true).unwrap());
        assert!(!subset_match(&cand, &json!({"missing": 1}), true).unwrap());
    }

    #[test]
    fn test_subset_match_with_operators() {
        let cand = json!({"score": 80});
        assert!(subset_match(&cand, &json!({"score": {"$gt": 50}}), true).unwrap());
        assert!(!subset_match(&cand, &json!({"score": {"$lt": 50}}), true).unwrap());
        // Operator support off: the operator object is literal structure
        assert!(!subset_match(&cand, &json!({"score": {"$gt": 50}}), false).unwrap());
    }

    #[test]
    fn test_subset_match_nested_recursion() {
        let cand = json!({"profile": {"city": "NYC", "zip": 10001}});
        assert!(subset_match(&cand, &json!({"profile": {"city": "NYC"}}), true).unwrap());
        assert!(!subset_match(&cand, &json!({"profile": {"city": "LA"}}), true).unwrap());
    }

    #[test]
    fn test_subset_match_operator_object_against_scalar() {
        assert!(subset_match(&json!(75), &json!({"$gt": 50}), true).unwrap());
        assert!(!subset_match(&json!(40), &json!({"$gt": 50}), true).unwrap());
    }
}

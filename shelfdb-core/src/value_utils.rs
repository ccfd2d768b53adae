//! Value utility functions shared across modules
//!
//! Documents are `serde_json::Value` objects. This module owns the rules for
//! walking field paths, comparing values of mixed types and encoding
//! timestamps, so the matcher, the projection code and the pipeline all agree.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// Key of the extended-JSON timestamp wrapper: `{"$date": "2024-01-05T10:00:00Z"}`
pub const DATE_KEY: &str = "$date";

/// Get a single nested value with dot notation support
///
/// Supports:
/// - Simple fields: "name"
/// - Nested objects: "address.city"
/// - Array indexing: "items.0.name"
///
/// Does not distribute over arrays; see [`resolve_path`] for that.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use shelfdb_core::value_utils::get_nested_value;
///
/// let doc = json!({"address": {"city": "NYC"}});
/// assert_eq!(get_nested_value(&doc, "address.city"), Some(&json!("NYC")));
/// ```
pub fn get_nested_value<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    if !path.contains('.') {
        return doc.get(path);
    }

    let mut value = doc;
    for part in path.split('.') {
        match value {
            Value::Object(map) => value = map.get(part)?,
            Value::Array(arr) => value = arr.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        }
    }
    Some(value)
}

/// Resolve a dotted path to every value it reaches
///
/// When a segment meets an array, the rest of the path is applied to each
/// element (a numeric segment indexes instead). Missing fields contribute
/// nothing, so the result may be empty.
///
/// ```
/// use serde_json::json;
/// use shelfdb_core::value_utils::resolve_path;
///
/// let doc = json!({"reviews": [{"rating": 5}, {"rating": 3}, {"user": "x"}]});
/// assert_eq!(resolve_path(&doc, "reviews.rating"), vec![&json!(5), &json!(3)]);
/// ```
pub fn resolve_path<'a>(doc: &'a Value, path: &str) -> Vec<&'a Value> {
    let parts: Vec<&str> = path.split('.').collect();
    let mut out = Vec::new();
    resolve_parts(doc, &parts, &mut out);
    out
}

fn resolve_parts<'a>(current: &'a Value, parts: &[&str], out: &mut Vec<&'a Value>) {
    let Some((head, rest)) = parts.split_first() else {
        out.push(current);
        return;
    };

    match current {
        Value::Object(map) => {
            if let Some(next) = map.get(*head) {
                resolve_parts(next, rest, out);
            }
        }
        Value::Array(items) => {
            if let Ok(index) = head.parse::<usize>() {
                if let Some(next) = items.get(index) {
                    resolve_parts(next, rest, out);
                }
            } else {
                for item in items {
                    resolve_parts(item, parts, out);
                }
            }
        }
        _ => {}
    }
}

/// Set a value at a nested path, creating intermediate objects
///
/// Returns `false` when a non-object sits in the way.
///
/// ```
/// use serde_json::json;
/// use shelfdb_core::value_utils::set_nested_value;
///
/// let mut doc = json!({"name": "Alice"});
/// set_nested_value(&mut doc, "address.city", json!("NYC"));
/// assert_eq!(doc["address"]["city"], "NYC");
/// ```
pub fn set_nested_value(doc: &mut Value, path: &str, value: Value) -> bool {
    let mut current = doc;
    let mut parts = path.split('.').peekable();

    while let Some(part) = parts.next() {
        let Value::Object(map) = current else {
            return false;
        };
        if parts.peek().is_none() {
            map.insert(part.to_string(), value);
            return true;
        }
        current = map
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    false
}

/// Remove the value at a nested path, returning it
pub fn remove_nested_value(doc: &mut Value, path: &str) -> Option<Value> {
    match path.rsplit_once('.') {
        None => doc.as_object_mut()?.shift_remove(path),
        Some((parent, leaf)) => {
            let mut current = doc;
            for part in parent.split('.') {
                current = current.as_object_mut()?.get_mut(part)?;
            }
            current.as_object_mut()?.shift_remove(leaf)
        }
    }
}

/// Remove a dotted path wherever it resolves, descending into arrays
///
/// Array elements are visited the same way [`resolve_path`] visits them;
/// returns whether anything was removed.
///
/// ```
/// use serde_json::json;
/// use shelfdb_core::value_utils::remove_resolved_path;
///
/// let mut doc = json!({"reviews": [{"rating": 5, "user": "a"}, {"rating": 3}]});
/// assert!(remove_resolved_path(&mut doc, "reviews.rating"));
/// assert_eq!(doc, json!({"reviews": [{"user": "a"}, {}]}));
/// ```
pub fn remove_resolved_path(doc: &mut Value, path: &str) -> bool {
    let parts: Vec<&str> = path.split('.').collect();
    remove_parts(doc, &parts)
}

fn remove_parts(current: &mut Value, parts: &[&str]) -> bool {
    let Some((head, rest)) = parts.split_first() else {
        return false;
    };

    match current {
        Value::Object(map) if rest.is_empty() => map.shift_remove(*head).is_some(),
        Value::Object(map) => map
            .get_mut(*head)
            .map_or(false, |next| remove_parts(next, rest)),
        Value::Array(items) => match head.parse::<usize>() {
            Ok(index) => items
                .get_mut(index)
                .map_or(false, |next| remove_parts(next, rest)),
            Err(_) => items
                .iter_mut()
                .fold(false, |removed, item| remove_parts(item, parts) || removed),
        },
        _ => false,
    }
}

/// Value of a `"$path"` reference, gathering array elements into an array
///
/// `reviews.rating` over `{"reviews": [{"rating": 5}, {"rating": 3}]}`
/// yields `[5, 3]`; elements lacking the field are skipped.
pub fn reference_value(doc: &Value, path: &str) -> Option<Value> {
    let parts: Vec<&str> = path.split('.').collect();
    collect_reference(doc, &parts)
}

fn collect_reference(current: &Value, parts: &[&str]) -> Option<Value> {
    let Some((head, rest)) = parts.split_first() else {
        return Some(current.clone());
    };

    match current {
        Value::Object(map) => collect_reference(map.get(*head)?, rest),
        Value::Array(items) => Some(Value::Array(
            items
                .iter()
                .filter_map(|item| collect_reference(item, parts))
                .collect(),
        )),
        _ => None,
    }
}

/// Encode a timestamp as `{"$date": "<RFC 3339>"}`
pub fn timestamp_value(ts: DateTime<Utc>) -> Value {
    let mut map = Map::new();
    map.insert(
        DATE_KEY.to_string(),
        Value::String(ts.to_rfc3339_opts(SecondsFormat::Millis, true)),
    );
    Value::Object(map)
}

/// Decode a `{"$date": ...}` wrapper
pub fn as_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    let map = value.as_object()?;
    if map.len() != 1 {
        return None;
    }
    let raw = map.get(DATE_KEY)?.as_str()?;
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Numeric view of a value; integers and floats both count
pub fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

/// Compare two values of the same kind
///
/// Returns `None` for incompatible kinds (e.g. string vs number); callers
/// treat that as "condition does not hold".
///
/// ```
/// use serde_json::json;
/// use std::cmp::Ordering;
/// use shelfdb_core::value_utils::compare_values;
///
/// assert_eq!(compare_values(&json!(10), &json!(5.5)), Some(Ordering::Greater));
/// assert_eq!(compare_values(&json!("a"), &json!("b")), Some(Ordering::Less));
/// assert_eq!(compare_values(&json!("a"), &json!(1)), None);
/// ```
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => as_number(a)?.partial_cmp(&as_number(b)?),
        (Value::String(s1), Value::String(s2)) => Some(s1.cmp(s2)),
        (Value::Bool(b1), Value::Bool(b2)) => Some(b1.cmp(b2)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Object(_), Value::Object(_)) => match (as_timestamp(a), as_timestamp(b)) {
            (Some(t1), Some(t2)) => Some(t1.cmp(&t2)),
            _ => None,
        },
        _ => None,
    }
}

/// Equality with numeric normalisation (`4 == 4.0`)
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => compare_values(a, b) == Some(Ordering::Equal),
        _ => a == b,
    }
}

/// Type rank for ordering mixed kinds: null < number < string < bool < timestamp < object < array
fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        Value::Bool(_) => 3,
        Value::Object(_) if as_timestamp(value).is_some() => 4,
        Value::Object(_) => 5,
        Value::Array(_) => 6,
    }
}

/// Total order used for sorting
///
/// Missing values sort before everything; values of different kinds are
/// ordered by [`type_rank`]; same-kind values that cannot be compared are
/// treated as equal so a stable sort keeps their input order.
pub fn sort_compare(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(av), Some(bv)) => {
            let (ra, rb) = (type_rank(av), type_rank(bv));
            if ra != rb {
                return ra.cmp(&rb);
            }
            compare_values(av, bv).unwrap_or(Ordering::Equal)
        }
    }
}

/// Canonical string form of a value with object keys sorted
///
/// Numbers are normalised so `4` and `4.0` produce the same key. Used to
/// bucket documents by group key.
pub fn canonical_json_string(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut pairs: Vec<_> = map.iter().collect();
            pairs.sort_by(|a, b| a.0.cmp(b.0));

            let inner: String = pairs
                .iter()
                .map(|(k, v)| format!("{:?}:{}", k, canonical_json_string(v)))
                .collect::<Vec<_>>()
                .join(",");

            format!("{{{}}}", inner)
        }
        Value::Array(arr) => {
            let inner: String = arr
                .iter()
                .map(canonical_json_string)
                .collect::<Vec<_>>()
                .join(",");
            format!("[{}]", inner)
        }
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => i.to_string(),
            (None, Some(f)) if f.fract() == 0.0 && f.abs() < 9.0e15 => (f as i64).to_string(),
            _ => n.to_string(),
        },
        _ => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_get_nested_value_simple() {
        let doc = json!({"name": "Alice", "age": 30});
        assert_eq!(get_nested_value(&doc, "name"), Some(&json!("Alice")));
        assert_eq!(get_nested_value(&doc, "missing"), None);
    }

    #[test]
    fn test_get_nested_value_array_index() {
        let doc = json!({"items": [{"name": "item1"}, {"name": "item2"}]});
        assert_eq!(get_nested_value(&doc, "items.1.name"), Some(&json!("item2")));
        assert_eq!(get_nested_value(&doc, "items.5.name"), None);
        assert_eq!(get_nested_value(&doc, "items.name"), None);
    }

    #[test]
    fn test_resolve_path_distributes_over_arrays() {
        let doc = json!({
            "variants": [
                {"sizes": [{"eu": 40}, {"eu": 41}]},
                {"sizes": [{"eu": 42}]}
            ]
        });
        let found = resolve_path(&doc, "variants.sizes.eu");
        assert_eq!(found, vec![&json!(40), &json!(41), &json!(42)]);
    }

    #[test]
    fn test_resolve_path_missing_intermediate() {
        let doc = json!({"specs": {"ram": "16GB"}});
        assert!(resolve_path(&doc, "dimensions.width").is_empty());
        assert!(resolve_path(&doc, "specs.ram.size").is_empty());
    }

    #[test]
    fn test_resolve_path_returns_terminal_array() {
        let doc = json!({"tags": ["a", "b"]});
        assert_eq!(resolve_path(&doc, "tags"), vec![&json!(["a", "b"])]);
        assert_eq!(resolve_path(&doc, "tags.1"), vec![&json!("b")]);
    }

    #[test]
    fn test_set_nested_value_blocked_by_scalar() {
        let mut doc = json!({"price": 10});
        assert!(!set_nested_value(&mut doc, "price.amount", json!(5)));
        assert_eq!(doc["price"], 10);
    }

    #[test]
    fn test_remove_nested_value() {
        let mut doc = json!({"a": 1, "b": {"c": 2, "d": 3}});
        assert_eq!(remove_nested_value(&mut doc, "b.c"), Some(json!(2)));
        assert_eq!(remove_nested_value(&mut doc, "a"), Some(json!(1)));
        assert_eq!(remove_nested_value(&mut doc, "x.y"), None);
        assert_eq!(doc, json!({"b": {"d": 3}}));
    }

    #[test]
    fn test_remove_resolved_path_through_arrays() {
        let mut doc = json!({
            "name": "Laptop",
            "reviews": [{"rating": 5, "user": "a"}, {"rating": 3}, "loose"],
            "specs": {"ram": "8GB", "cpu": "i7"}
        });
        assert!(remove_resolved_path(&mut doc, "reviews.rating"));
        assert!(remove_resolved_path(&mut doc, "specs.cpu"));
        assert!(!remove_resolved_path(&mut doc, "reviews.missing"));
        assert_eq!(
            doc,
            json!({"name": "Laptop", "reviews": [{"user": "a"}, {}, "loose"], "specs": {"ram": "8GB"}})
        );

        let mut doc = json!({"reviews": [{"rating": 5}, {"rating": 3}]});
        assert!(remove_resolved_path(&mut doc, "reviews.1.rating"));
        assert_eq!(doc, json!({"reviews": [{"rating": 5}, {}]}));
    }

    #[test]
    fn test_reference_value_gathers_array_elements() {
        let doc = json!({"_id": 1, "reviews": [{"rating": 5}, {"user": "x"}, {"rating": 3}]});
        assert_eq!(reference_value(&doc, "reviews.rating"), Some(json!([5, 3])));
        assert_eq!(reference_value(&doc, "_id"), Some(json!(1)));
        assert_eq!(reference_value(&doc, "price"), None);
    }

    #[test]
    fn test_timestamp_roundtrip_and_order() {
        let early = Utc.with_ymd_and_hms(2024, 1, 15, 8, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2024, 3, 2, 8, 0, 0).unwrap();
        let a = timestamp_value(early);
        let b = timestamp_value(late);

        assert_eq!(as_timestamp(&a), Some(early));
        assert_eq!(compare_values(&a, &b), Some(Ordering::Less));
        assert_eq!(compare_values(&a, &json!({"other": 1})), None);
    }

    #[test]
    fn test_compare_values_mixed_numbers() {
        assert_eq!(compare_values(&json!(4), &json!(4.0)), Some(Ordering::Equal));
        assert!(values_equal(&json!(4), &json!(4.0)));
        assert!(!values_equal(&json!("4"), &json!(4)));
    }

    #[test]
    fn test_sort_compare_type_ranks() {
        assert_eq!(sort_compare(None, Some(&json!(null))), Ordering::Less);
        assert_eq!(sort_compare(Some(&json!(100)), Some(&json!("1"))), Ordering::Less);
        assert_eq!(sort_compare(Some(&json!(true)), Some(&json!("z"))), Ordering::Greater);
        assert_eq!(sort_compare(Some(&json!([1])), Some(&json!({"a": 1}))), Ordering::Greater);
    }

    #[test]
    fn test_canonical_json_string_key_order_and_numbers() {
        assert_eq!(
            canonical_json_string(&json!({"a": 1, "b": 2})),
            canonical_json_string(&json!({"b": 2, "a": 1}))
        );
        assert_eq!(canonical_json_string(&json!(4)), canonical_json_string(&json!(4.0)));
        assert_ne!(canonical_json_string(&json!("4")), canonical_json_string(&json!(4)));
    }
}

//! Total accessors over exported documents
//!
//! Source documents are arbitrary nested JSON. Every accessor here returns an
//! `Option` or a default instead of failing on absent or wrong-shaped data,
//! so decomposers can read fields without defensive branching.

use serde_json::{Map, Value};

/// Resolve a dotted path (`"updatedBy.user.id"`). Nulls count as absent.
pub fn path<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = doc;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    if current.is_null() {
        None
    } else {
        Some(current)
    }
}

/// Loose truthiness: null, false, zero and empty containers are falsy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Text form of a scalar. Strings pass through, numbers and booleans are
/// rendered, `$oid` wrappers are unwrapped. Composite values yield `None`.
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Object(map) => match map.get("$oid") {
            Some(Value::String(s)) => Some(s.clone()),
            _ => None,
        },
        _ => None,
    }
}

pub fn str_at(doc: &Value, key: &str) -> Option<String> {
    path(doc, key).and_then(scalar_text)
}

/// First non-empty string among several candidate paths, mirroring
/// `a or b` fallbacks between camelCase and legacy field names.
pub fn first_str(doc: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| str_at(doc, k))
        .find(|s| !s.is_empty())
}

pub fn bool_at(doc: &Value, key: &str) -> Option<bool> {
    match path(doc, key)? {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|i| i != 0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

pub fn bool_or(doc: &Value, key: &str, default: bool) -> bool {
    bool_at(doc, key).unwrap_or(default)
}

/// Integer coercion. Handles `$numberInt`/`$numberLong` wrappers, integral
/// floats and numeric strings.
pub fn int_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        Value::Object(map) => map
            .get("$numberInt")
            .or_else(|| map.get("$numberLong"))
            .and_then(int_value),
        _ => None,
    }
}

pub fn i64_at(doc: &Value, key: &str) -> Option<i64> {
    path(doc, key).and_then(int_value)
}

pub fn f64_at(doc: &Value, key: &str) -> Option<f64> {
    match path(doc, key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Object(map) => map
            .get("$numberDouble")
            .or_else(|| map.get("$numberDecimal"))
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok()),
        _ => None,
    }
}

/// Natural identifier of an entity reference: a plain string, a number or an
/// `{"$oid": ...}` wrapper.
pub fn object_id(value: Option<&Value>) -> Option<String> {
    value.and_then(scalar_text).filter(|s| !s.is_empty())
}

pub fn id_at(doc: &Value, key: &str) -> Option<String> {
    object_id(path(doc, key))
}

/// Identifier of an embedded reference that may be either a scalar id or an
/// object carrying `id`/`_id`.
pub fn reference_id(value: &Value) -> Option<String> {
    match value {
        Value::Object(map) if !map.contains_key("$oid") => {
            object_id(map.get("id")).or_else(|| object_id(map.get("_id")))
        }
        other => object_id(Some(other)),
    }
}

pub fn array_at<'a>(doc: &'a Value, key: &str) -> &'a [Value] {
    match path(doc, key) {
        Some(Value::Array(items)) => items.as_slice(),
        _ => &[],
    }
}

pub fn object_at<'a>(doc: &'a Value, key: &str) -> Option<&'a Map<String, Value>> {
    path(doc, key).and_then(Value::as_object)
}

/// Irregular structure kept as a semi-structured column. Empty containers
/// and falsy values store as NULL.
pub fn json_at(doc: &Value, key: &str) -> Option<Value> {
    path(doc, key).filter(|v| is_truthy(v)).cloned()
}

/// Strings inside an array, skipping anything that is not a scalar.
pub fn string_list(doc: &Value, key: &str) -> Vec<String> {
    array_at(doc, key).iter().filter_map(scalar_text).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_path_walks_nested_objects() {
        let doc = json!({"updatedBy": {"user": {"id": "u-1"}}, "gone": null});
        assert_eq!(str_at(&doc, "updatedBy.user.id"), Some("u-1".to_string()));
        assert!(path(&doc, "updatedBy.user.missing").is_none());
        assert!(path(&doc, "updatedBy.user.id.deeper").is_none());
        assert!(path(&doc, "gone").is_none());
    }

    #[test]
    fn test_object_id_shapes() {
        assert_eq!(object_id(Some(&json!({"$oid": "abc"}))), Some("abc".to_string()));
        assert_eq!(object_id(Some(&json!("abc"))), Some("abc".to_string()));
        assert_eq!(object_id(Some(&json!(42))), Some("42".to_string()));
        assert_eq!(object_id(Some(&json!(""))), None);
        assert_eq!(object_id(Some(&json!([1]))), None);
        assert_eq!(reference_id(&json!({"_id": {"$oid": "x1"}})), Some("x1".to_string()));
        assert_eq!(reference_id(&json!({"id": "x2", "_id": "x3"})), Some("x2".to_string()));
    }

    #[test]
    fn test_coercions() {
        let doc = json!({
            "flag": "true",
            "num": {"$numberLong": "12"},
            "float_int": 3.0,
            "empty": {},
            "conf": {"a": 1},
            "list": ["a", 2, {"x": 1}]
        });
        assert_eq!(bool_at(&doc, "flag"), Some(true));
        assert!(bool_or(&doc, "missing", true));
        assert_eq!(i64_at(&doc, "num"), Some(12));
        assert_eq!(i64_at(&doc, "float_int"), Some(3));
        assert_eq!(json_at(&doc, "empty"), None);
        assert_eq!(json_at(&doc, "conf"), Some(json!({"a": 1})));
        assert_eq!(string_list(&doc, "list"), vec!["a".to_string(), "2".to_string()]);
        assert!(array_at(&doc, "flag").is_empty());
    }

    #[test]
    fn test_first_str_skips_empty() {
        let doc = json!({"firstName": "", "firstname": "Ana"});
        assert_eq!(first_str(&doc, &["firstName", "firstname"]), Some("Ana".to_string()));
        assert_eq!(first_str(&doc, &["nope"]), None);
    }
}

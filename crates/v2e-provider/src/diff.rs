//! Field-level diffing (`spec.md` §4.3). Recursive structural equality over
//! JSON values, in the same style as `v2e_config`'s canonicalization: objects
//! compare by keyset + pairwise value equality, arrays by length + index-wise
//! equality, everything else by value.

use serde_json::Value;

/// Recursive deep equality. Unknown/incomparable shapes (a mismatched
/// variant, e.g. object vs array) fall back to `false` rather than panicking.
pub fn deep_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(k, v)| b.get(k).is_some_and(|bv| deep_equal(v, bv)))
        }
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| deep_equal(x, y))
        }
        _ => a == b,
    }
}

/// Returns the keys present in `incoming` whose value differs from `existing`
/// by deep equality, excluding `id_key`. Both inputs are expected to be
/// objects; a non-object `incoming` yields an empty diff (nothing to patch).
pub fn diff_keys(existing: &Value, incoming: &Value, id_key: &str) -> Vec<String> {
    let Some(incoming_map) = incoming.as_object() else {
        return Vec::new();
    };

    let mut changed: Vec<String> = incoming_map
        .iter()
        .filter(|(k, _)| k.as_str() != id_key)
        .filter(|(k, v)| {
            let existing_val = existing.as_object().and_then(|m| m.get(k.as_str()));
            match existing_val {
                Some(ev) => !deep_equal(ev, v),
                None => true,
            }
        })
        .map(|(k, _)| k.clone())
        .collect();

    changed.sort();
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identical_objects_are_deep_equal() {
        let a = json!({"a": 1, "b": {"c": [1, 2, 3]}});
        let b = json!({"b": {"c": [1, 2, 3]}, "a": 1});
        assert!(deep_equal(&a, &b));
    }

    #[test]
    fn differing_nested_value_is_not_equal() {
        let a = json!({"a": {"b": 1}});
        let b = json!({"a": {"b": 2}});
        assert!(!deep_equal(&a, &b));
    }

    #[test]
    fn array_order_matters() {
        let a = json!([1, 2, 3]);
        let b = json!([3, 2, 1]);
        assert!(!deep_equal(&a, &b));
    }

    #[test]
    fn s7_identical_record_produces_empty_diff() {
        let existing = json!({"id": "X", "description": "old", "severity": "MEDIUM"});
        let incoming = json!({"id": "X", "description": "old", "severity": "MEDIUM"});
        assert!(diff_keys(&existing, &incoming, "id").is_empty());
    }

    #[test]
    fn changed_field_is_reported_excluding_id() {
        let existing = json!({"id": "X", "description": "old", "severity": "MEDIUM"});
        let incoming = json!({"id": "X", "description": "new", "severity": "MEDIUM"});
        assert_eq!(diff_keys(&existing, &incoming, "id"), vec!["description"]);
    }

    #[test]
    fn new_key_not_in_existing_counts_as_changed() {
        let existing = json!({"id": "X"});
        let incoming = json!({"id": "X", "severity": "HIGH"});
        assert_eq!(diff_keys(&existing, &incoming, "id"), vec!["severity"]);
    }
}

// src/filter.rs - Change detection over incoming tag update batches

use crate::value::Value;
use serde_json::{Map, Value as Json};
use std::collections::HashMap;

/// Keep the members of an update batch that are primitive and differ from
/// the last-seen snapshot.
///
/// A key the snapshot has never seen counts as changed. Nested objects,
/// arrays, null and non-numeric text never qualify. This is what makes
/// event emission level-triggered on change rather than firing on every
/// repeated input.
pub fn changed_values(
    previous: &HashMap<String, Value>,
    incoming: &Map<String, Json>,
) -> Vec<(String, Value)> {
    let mut changed = Vec::new();
    for (tag, json) in incoming {
        let Some(value) = Value::from_json(json) else {
            continue;
        };
        if previous.get(tag) != Some(&value) {
            changed.push((tag.clone(), value));
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn incoming(json: Json) -> Map<String, Json> {
        json.as_object().cloned().unwrap()
    }

    #[test]
    fn test_unknown_keys_count_as_changed() {
        let previous = HashMap::new();
        let changed = changed_values(&previous, &incoming(json!({"a": 1, "b": true})));
        assert_eq!(changed.len(), 2);
    }

    #[test]
    fn test_unchanged_values_are_dropped() {
        let mut previous = HashMap::new();
        previous.insert("a".to_string(), Value::Int(1));
        previous.insert("b".to_string(), Value::Bool(true));

        let changed = changed_values(&previous, &incoming(json!({"a": 1, "b": false})));
        assert_eq!(changed, vec![("b".to_string(), Value::Bool(false))]);
    }

    #[test]
    fn test_non_primitives_never_qualify() {
        let previous = HashMap::new();
        let batch = incoming(json!({
            "nested": {"x": 1},
            "list": [1, 2],
            "none": null,
            "label": "running",
            "ok": 5
        }));
        let changed = changed_values(&previous, &batch);
        assert_eq!(changed, vec![("ok".to_string(), Value::Int(5))]);
    }

    #[test]
    fn test_numeric_text_is_tracked() {
        let mut previous = HashMap::new();
        let changed = changed_values(&previous, &incoming(json!({"a": "5"})));
        assert_eq!(changed, vec![("a".to_string(), Value::Text("5".into()))]);

        previous.insert("a".to_string(), Value::Text("5".into()));
        assert!(changed_values(&previous, &incoming(json!({"a": "5"}))).is_empty());

        // text five and numeric five are different readings
        assert_eq!(
            changed_values(&previous, &incoming(json!({"a": 5}))),
            vec![("a".to_string(), Value::Int(5))]
        );
    }

    #[test]
    fn test_numeric_kind_does_not_matter() {
        let mut previous = HashMap::new();
        previous.insert("a".to_string(), Value::Int(5));
        assert!(changed_values(&previous, &incoming(json!({"a": 5.0}))).is_empty());
    }
}

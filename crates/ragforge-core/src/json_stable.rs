//! Canonical JSON serialization used to derive a stable cache key.
//!
//! Object keys are sorted recursively; array order is preserved. Two values
//! that differ only in object key order serialize to the same string.

use serde_json::Value;

pub fn to_stable_string(value: &Value) -> String {
    let mut out = String::new();
    write_stable(value, &mut out);
    out
}

fn write_stable(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => {
            out.push_str(&serde_json::to_string(s).expect("string serialization cannot fail"));
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_stable(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key).expect("string serialization cannot fail"));
                out.push(':');
                write_stable(&map[*key], out);
            }
            out.push('}');
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_affect_output() {
        let a = json!({"b": 1, "a": 2, "c": {"y": 1, "x": 2}});
        let b = json!({"a": 2, "c": {"x": 2, "y": 1}, "b": 1});
        assert_eq!(to_stable_string(&a), to_stable_string(&b));
    }

    #[test]
    fn array_order_is_preserved() {
        let a = json!([1, 2, 3]);
        let b = json!([3, 2, 1]);
        assert_ne!(to_stable_string(&a), to_stable_string(&b));
    }

    #[test]
    fn nested_objects_sort_at_every_level() {
        let v = json!({"z": {"b": 1, "a": 2}, "a": 1});
        assert_eq!(to_stable_string(&v), r#"{"a":1,"z":{"a":2,"b":1}}"#);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::Map;

    /// Arbitrary flat object with a handful of string/number keys, shuffled
    /// into two different insertion orders, must serialize identically —
    /// this is the property `cache_key` relies on for stability.
    fn flat_object(seed: Vec<(String, i64)>) -> Value {
        let mut map = Map::new();
        for (k, v) in seed {
            map.insert(k, Value::from(v));
        }
        Value::Object(map)
    }

    proptest! {
        #[test]
        fn stable_string_is_independent_of_key_insertion_order(
            mut pairs in prop::collection::vec(("[a-z]{1,6}", any::<i64>()), 0..8),
        ) {
            pairs.sort();
            pairs.dedup_by(|a, b| a.0 == b.0);
            let forward = flat_object(pairs.clone());
            let mut shuffled = pairs;
            shuffled.reverse();
            let backward = flat_object(shuffled);
            prop_assert_eq!(to_stable_string(&forward), to_stable_string(&backward));
        }
    }
}

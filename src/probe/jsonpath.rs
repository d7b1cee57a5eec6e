//! Dotted-path JSON value extraction: object keys and non-negative integer
//! array indices, nothing more elaborate than that.

use serde_json::Value;

/// Resolve `path` (e.g. `"data.items.0.id"`) against `value`. Returns an
/// error describing the first segment that failed to resolve.
pub fn resolve<'a>(value: &'a Value, path: &str) -> Result<&'a Value, String> {
    let mut current = value;
    for segment in path.split('.').filter(|s| !s.is_empty()) {
        current = match current {
            Value::Object(map) => map
                .get(segment)
                .ok_or_else(|| format!("no key '{segment}' in object"))?,
            Value::Array(items) => {
                let index: usize = segment
                    .parse()
                    .map_err(|_| format!("'{segment}' is not a valid array index"))?;
                items
                    .get(index)
                    .ok_or_else(|| format!("index {index} out of bounds (len {})", items.len()))?
            }
            other => {
                return Err(format!(
                    "cannot descend into '{segment}': value is {}",
                    describe(other)
                ));
            }
        };
    }
    Ok(current)
}

fn describe(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a bool",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolves_nested_object_key() {
        let v = json!({"data": {"status": "ok"}});
        assert_eq!(resolve(&v, "data.status").unwrap(), &json!("ok"));
    }

    #[test]
    fn resolves_array_index() {
        let v = json!({"items": [1, 2, 3]});
        assert_eq!(resolve(&v, "items.1").unwrap(), &json!(2));
    }

    #[test]
    fn missing_key_is_an_error() {
        let v = json!({"data": {}});
        assert!(resolve(&v, "data.missing").is_err());
    }

    #[test]
    fn out_of_bounds_index_is_an_error() {
        let v = json!({"items": [1]});
        assert!(resolve(&v, "items.5").is_err());
    }

    #[test]
    fn empty_path_returns_root() {
        let v = json!({"a": 1});
        assert_eq!(resolve(&v, "").unwrap(), &v);
    }
}

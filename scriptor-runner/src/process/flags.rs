//! Parameter to command-line flag rendering
//!
//! Rules, applied per parameter in key order:
//! - `null` values and keys starting with `_` are skipped
//! - keys already starting with `-` are used verbatim, others become
//!   `--key` with `_` replaced by `-`
//! - `true` renders `--key`, `false` renders `--no-key`
//! - arrays repeat the flag once per element
//! - strings are passed as-is, other values as their JSON text

use serde_json::{Map, Value};

/// Render `params` as command-line arguments
pub fn render_flags(params: &Map<String, Value>) -> Vec<String> {
    let mut args = Vec::new();

    for (key, value) in params {
        if key.starts_with('_') || value.is_null() {
            continue;
        }
        let flag = flag_name(key);

        match value {
            Value::Bool(true) => args.push(flag),
            Value::Bool(false) => args.push(negated(&flag)),
            Value::Array(items) => {
                for item in items.iter().filter(|item| !item.is_null()) {
                    args.push(flag.clone());
                    args.push(render_value(item));
                }
            }
            other => {
                args.push(flag);
                args.push(render_value(other));
            }
        }
    }

    args
}

fn flag_name(key: &str) -> String {
    if key.starts_with('-') {
        key.to_string()
    } else {
        format!("--{}", key.replace('_', "-"))
    }
}

fn negated(flag: &str) -> String {
    format!("--no-{}", flag.trim_start_matches('-'))
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn render(value: Value) -> Vec<String> {
        render_flags(value.as_object().unwrap())
    }

    #[test]
    fn test_scalar_flags() {
        assert_eq!(
            render(json!({ "search_term": "dentist in austin", "count": 50, "ratio": 0.5 })),
            vec!["--count", "50", "--ratio", "0.5", "--search-term", "dentist in austin"]
        );
    }

    #[test]
    fn test_bool_flags() {
        assert_eq!(
            render(json!({ "verbose": true, "dry_run": false })),
            vec!["--no-dry-run", "--verbose"]
        );
    }

    #[test]
    fn test_list_flags_repeat() {
        assert_eq!(
            render(json!({ "tag": ["a", 2, null] })),
            vec!["--tag", "a", "--tag", "2"]
        );
    }

    #[test]
    fn test_skipped_and_verbatim_keys() {
        assert_eq!(
            render(json!({ "_internal": 1, "gone": null, "-x": "y", "obj": { "k": 1 } })),
            vec!["-x", "y", "--obj", "{\"k\":1}"]
        );
    }

    #[test]
    fn test_empty_params() {
        assert!(render(json!({})).is_empty());
    }
}

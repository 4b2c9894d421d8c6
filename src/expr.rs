//! `${var.NAME}` references inside configuration values.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::Value;

/// `$${` is an escaped literal `${`; only `${var.NAME}` matches capture a name.
static VAR_REF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\$\{|\$\{\s*var\.([A-Za-z_][A-Za-z0-9_-]*)\s*\}").expect("var pattern is valid")
});

/// Names of every variable referenced anywhere in `value`.
pub fn references(value: &Value) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    collect(value, &mut names);
    names
}

fn collect(value: &Value, names: &mut BTreeSet<String>) {
    match value {
        Value::String(s) => {
            for caps in VAR_REF_RE.captures_iter(s) {
                if let Some(name) = caps.get(1) {
                    names.insert(name.as_str().to_string());
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|v| collect(v, names)),
        Value::Object(map) => map.values().for_each(|v| collect(v, names)),
        _ => {}
    }
}

fn splice(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Substitutes variable references. A string consisting of exactly one
/// reference takes the variable's value as-is; otherwise values are spliced in
/// as text, and `$${` becomes a literal `${`. Returns the name of the first
/// variable `lookup` cannot supply.
pub fn interpolate<F>(value: &Value, lookup: &F) -> Result<Value, String>
where
    F: Fn(&str) -> Option<Value>,
{
    match value {
        Value::String(s) => {
            if let Some(caps) = VAR_REF_RE.captures(s) {
                if let Some(name) = caps.get(1) {
                    if caps.get(0).is_some_and(|m| m.as_str().len() == s.len()) {
                        return lookup(name.as_str()).ok_or_else(|| name.as_str().to_string());
                    }
                }
            }

            let mut missing = None;
            let spliced = VAR_REF_RE.replace_all(s, |caps: &Captures| {
                let Some(name) = caps.get(1) else {
                    return "${".to_string();
                };
                match lookup(name.as_str()) {
                    Some(v) => splice(&v),
                    None => {
                        missing.get_or_insert_with(|| name.as_str().to_string());
                        String::new()
                    }
                }
            });
            match missing {
                Some(name) => Err(name),
                None => Ok(Value::String(spliced.into_owned())),
            }
        }
        Value::Array(items) => items
            .iter()
            .map(|v| interpolate(v, lookup))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| interpolate(v, lookup).map(|v| (k.clone(), v)))
            .collect::<Result<serde_json::Map<_, _>, _>>()
            .map(Value::Object),
        other => Ok(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(name: &str) -> Option<Value> {
        match name {
            "foo" => Some(json!("bar")),
            "port" => Some(json!(8080)),
            "tags" => Some(json!({"env": "prod"})),
            _ => None,
        }
    }

    #[test]
    fn test_references_nested() {
        let value = json!({
            "a": "${var.foo}",
            "b": ["x-${var.port}-${ var.foo }", 3],
            "c": { "d": "${var.tags}" },
            "e": "$${not.a.var}",
            "f": "$${var.escaped}"
        });
        let names: Vec<String> = references(&value).into_iter().collect();
        assert_eq!(names, vec!["foo", "port", "tags"]);
    }

    #[test]
    fn test_interpolate_whole_reference_keeps_type() {
        assert_eq!(interpolate(&json!("${var.port}"), &vars).unwrap(), json!(8080));
        assert_eq!(
            interpolate(&json!("${var.tags}"), &vars).unwrap(),
            json!({"env": "prod"})
        );
    }

    #[test]
    fn test_interpolate_splices_text() {
        assert_eq!(
            interpolate(&json!("http://${var.foo}:${var.port}/"), &vars).unwrap(),
            json!("http://bar:8080/")
        );
    }

    #[test]
    fn test_interpolate_recurses_and_keeps_literals() {
        let value = json!({"list": ["${var.foo}", true, null], "n": 1});
        assert_eq!(
            interpolate(&value, &vars).unwrap(),
            json!({"list": ["bar", true, null], "n": 1})
        );
    }

    #[test]
    fn test_interpolate_escaped_reference_is_literal() {
        assert_eq!(
            interpolate(&json!("$${var.foo}"), &vars).unwrap(),
            json!("${var.foo}")
        );
        assert_eq!(
            interpolate(&json!("$${var.nope}-${var.foo}"), &vars).unwrap(),
            json!("${var.nope}-bar")
        );
    }

    #[test]
    fn test_interpolate_reports_missing() {
        assert_eq!(
            interpolate(&json!("a-${var.nope}"), &vars).unwrap_err(),
            "nope"
        );
        assert_eq!(interpolate(&json!("${var.nope}"), &vars).unwrap_err(), "nope");
    }
}

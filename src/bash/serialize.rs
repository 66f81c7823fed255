// src/bash/serialize.rs

//! Render structured variables back into bash source
//!
//! The inverse of [`extract`](super::extract): produces a declaration
//! fragment that, when run through a shell, reproduces the given values.
//! Used to re-inject package state into generated maintainer scripts.
//!
//! Round-trip law: `extract(render(v))` reproduces `v` for every
//! representable value, with one documented exception: unset slots of
//! indexed arrays are dropped on render and are not reconstructible.

use super::{Value, Variables};

/// Shell-quote a string. Values made only of unambiguously safe
/// characters pass through bare; everything else is single-quoted.
pub fn quote(value: &str) -> String {
    let safe = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/' | ':' | '+'));

    if safe {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', "'\\''"))
    }
}

/// Render variables as a fragment of bash declarations, one per line.
pub fn render(variables: &Variables) -> String {
    let mut out = String::new();

    for (name, value) in variables {
        match value {
            Value::Scalar(v) => {
                out.push_str(&format!("declare -- {}={}\n", name, quote(v)));
            }
            Value::IndexedArray(items) => {
                let values: Vec<String> =
                    items.iter().flatten().map(|v| quote(v)).collect();
                out.push_str(&format!("declare -a {}=({})\n", name, values.join(" ")));
            }
            Value::AssociativeArray(map) => {
                let entries: Vec<String> = map
                    .iter()
                    .map(|(k, v)| format!("[{}]={}", quote(k), quote(v)))
                    .collect();
                out.push_str(&format!("declare -A {}=({})\n", name, entries.join(" ")));
            }
            Value::Unset => {
                out.push_str(&format!("declare -- {}\n", name));
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bash::extract;
    use std::collections::BTreeMap;

    #[test]
    fn test_quote_safe_values_pass_through() {
        assert_eq!(quote("abc-1.2/x:y+z"), "abc-1.2/x:y+z");
    }

    #[test]
    fn test_quote_special_values() {
        assert_eq!(quote("a b"), "'a b'");
        assert_eq!(quote(""), "''");
        assert_eq!(quote("it's"), "'it'\\''s'");
        assert_eq!(quote("~user"), "'~user'");
    }

    #[test]
    fn test_render_scalar() {
        let mut vars = Variables::new();
        vars.insert("greeting".into(), Value::Scalar("hello world".into()));
        assert_eq!(render(&vars), "declare -- greeting='hello world'\n");
    }

    #[test]
    fn test_render_drops_unset_array_slots() {
        let mut vars = Variables::new();
        vars.insert(
            "xs".into(),
            Value::IndexedArray(vec![Some("a".into()), None, Some("c".into())]),
        );
        assert_eq!(render(&vars), "declare -a xs=(a c)\n");
    }

    #[test]
    fn test_round_trip_scalar() {
        let mut vars = Variables::new();
        vars.insert("v".into(), Value::Scalar("cost $5 \"quoted\" \\ done".into()));
        vars.insert("empty".into(), Value::Scalar(String::new()));
        vars.insert("missing".into(), Value::Unset);

        let (parsed, _) = extract(&render(&vars)).unwrap();
        assert_eq!(parsed, vars);
    }

    #[test]
    fn test_round_trip_indexed_array() {
        let mut vars = Variables::new();
        vars.insert(
            "xs".into(),
            Value::IndexedArray(vec![Some("a a".into()), Some("b".into())]),
        );

        let (parsed, _) = extract(&render(&vars)).unwrap();
        assert_eq!(parsed, vars);
    }

    #[test]
    fn test_round_trip_associative_array() {
        let mut map = BTreeMap::new();
        map.insert("key one".to_string(), "value one".to_string());
        map.insert("two".to_string(), "2".to_string());
        let mut vars = Variables::new();
        vars.insert("m".into(), Value::AssociativeArray(map));

        let (parsed, _) = extract(&render(&vars)).unwrap();
        assert_eq!(parsed, vars);
    }
}

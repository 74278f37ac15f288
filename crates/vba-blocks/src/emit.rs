//! TOML tree parsing and deterministic emission.
//!
//! Reading goes through the `toml` crate unchanged. Writing is done by a
//! small emitter that produces a canonical form: keys alphabetised within
//! each table, scalars before sub-tables, and multi-line arrays with
//! trailing commas. Canonical output means a document can be parsed and
//! re-emitted byte-for-byte, which keeps lockfile diffs minimal.

use anyhow::{Context, Result};
use toml::Value;

pub use toml::Table;

/// Parse a TOML document into a generic tree.
pub fn parse(text: &str) -> Result<Table> {
    toml::from_str(text).context("failed to parse TOML")
}

/// Emit a tree as canonical TOML.
pub fn to_string(table: &Table) -> String {
    let mut out = String::new();
    emit_table_body(&mut out, table, &[]);
    out
}

/// Emit a single `key = value` assignment line.
pub fn assignment(key: &str, value: &Value) -> String {
    format!("{} = {}", emit_key(key), emit_value(value, 0))
}

fn sorted_keys(table: &Table) -> Vec<&String> {
    let mut keys: Vec<&String> = table.keys().collect();
    keys.sort();
    keys
}

fn is_array_of_tables(value: &Value) -> bool {
    match value {
        Value::Array(items) => {
            !items.is_empty() && items.iter().all(|item| matches!(item, Value::Table(_)))
        }
        _ => false,
    }
}

fn emit_table_body(out: &mut String, table: &Table, path: &[&str]) {
    let keys = sorted_keys(table);

    // Scalars and plain arrays first; sub-tables and arrays of tables need
    // their own headers and must follow.
    for key in &keys {
        let value = &table[key.as_str()];
        if matches!(value, Value::Table(_)) || is_array_of_tables(value) {
            continue;
        }
        out.push_str(&assignment(key, value));
        out.push('\n');
    }

    for key in &keys {
        let value = &table[key.as_str()];
        let mut child_path: Vec<&str> = path.to_vec();
        child_path.push(key);

        match value {
            Value::Table(child) => {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(&header(&child_path, false));
                out.push('\n');
                emit_table_body(out, child, &child_path);
            }
            Value::Array(items) if is_array_of_tables(value) => {
                for item in items {
                    if let Value::Table(child) = item {
                        if !out.is_empty() {
                            out.push('\n');
                        }
                        out.push_str(&header(&child_path, true));
                        out.push('\n');
                        emit_table_body(out, child, &child_path);
                    }
                }
            }
            _ => {}
        }
    }
}

fn header(path: &[&str], array: bool) -> String {
    let joined = path
        .iter()
        .map(|part| emit_key(part))
        .collect::<Vec<_>>()
        .join(".");
    if array {
        format!("[[{joined}]]")
    } else {
        format!("[{joined}]")
    }
}

fn emit_key(key: &str) -> String {
    let bare = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if bare {
        key.to_string()
    } else {
        emit_string(key)
    }
}

fn emit_value(value: &Value, indent: usize) -> String {
    match value {
        Value::String(s) => emit_string(s),
        Value::Integer(i) => i.to_string(),
        Value::Float(f) => {
            if f.fract() == 0.0 && f.is_finite() {
                format!("{f:.1}")
            } else {
                f.to_string()
            }
        }
        Value::Boolean(b) => b.to_string(),
        Value::Datetime(dt) => dt.to_string(),
        Value::Array(items) => emit_array(items, indent),
        Value::Table(table) => emit_inline_table(table),
    }
}

fn emit_array(items: &[Value], indent: usize) -> String {
    if items.is_empty() {
        return "[]".to_string();
    }

    let inner_pad = "    ".repeat(indent + 1);
    let close_pad = "    ".repeat(indent);
    let mut out = String::from("[\n");
    for item in items {
        out.push_str(&inner_pad);
        out.push_str(&emit_value(item, indent + 1));
        out.push_str(",\n");
    }
    out.push_str(&close_pad);
    out.push(']');
    out
}

fn emit_inline_table(table: &Table) -> String {
    let parts: Vec<String> = sorted_keys(table)
        .into_iter()
        .map(|key| format!("{} = {}", emit_key(key), emit_value(&table[key.as_str()], 0)))
        .collect();
    format!("{{ {} }}", parts.join(", "))
}

fn emit_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04X}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_of(pairs: &[(&str, Value)]) -> Table {
        let mut table = Table::new();
        for (key, value) in pairs {
            table.insert((*key).to_string(), value.clone());
        }
        table
    }

    #[test]
    fn keys_are_alphabetised() {
        let table = table_of(&[
            ("zeta", Value::Integer(1)),
            ("alpha", Value::Boolean(true)),
        ]);

        assert_eq!(to_string(&table), "alpha = true\nzeta = 1\n");
    }

    #[test]
    fn arrays_are_multiline_with_trailing_commas() {
        let table = table_of(&[(
            "dependencies",
            Value::Array(vec![
                Value::String("a 1.0.0 registry+default".to_string()),
                Value::String("b 2.0.0 registry+default".to_string()),
            ]),
        )]);

        assert_eq!(
            to_string(&table),
            "dependencies = [\n    \"a 1.0.0 registry+default\",\n    \"b 2.0.0 registry+default\",\n]\n"
        );
    }

    #[test]
    fn empty_arrays_stay_inline() {
        let table = table_of(&[("dependencies", Value::Array(vec![]))]);
        assert_eq!(to_string(&table), "dependencies = []\n");
    }

    #[test]
    fn sub_tables_get_headers_after_scalars() {
        let mut inner = Table::new();
        inner.insert("version".to_string(), Value::String("1".to_string()));
        let table = table_of(&[
            ("metadata", Value::Table(inner)),
            ("name", Value::String("demo".to_string())),
        ]);

        assert_eq!(
            to_string(&table),
            "name = \"demo\"\n\n[metadata]\nversion = \"1\"\n"
        );
    }

    #[test]
    fn arrays_of_tables_use_double_bracket_headers() {
        let mut first = Table::new();
        first.insert("name".to_string(), Value::String("a".to_string()));
        let mut second = Table::new();
        second.insert("name".to_string(), Value::String("b".to_string()));
        let table = table_of(&[(
            "package",
            Value::Array(vec![Value::Table(first), Value::Table(second)]),
        )]);

        assert_eq!(
            to_string(&table),
            "[[package]]\nname = \"a\"\n\n[[package]]\nname = \"b\"\n"
        );
    }

    #[test]
    fn strings_are_escaped() {
        let table = table_of(&[(
            "path",
            Value::String("a\\b \"quoted\"\n".to_string()),
        )]);

        assert_eq!(to_string(&table), "path = \"a\\\\b \\\"quoted\\\"\\n\"\n");
    }

    #[test]
    fn non_bare_keys_are_quoted() {
        let table = table_of(&[("needs quoting", Value::Integer(1))]);
        assert_eq!(to_string(&table), "\"needs quoting\" = 1\n");
    }

    #[test]
    fn emission_is_stable_under_reparse() {
        let mut inner = Table::new();
        inner.insert("version".to_string(), Value::String("1.0.0".to_string()));
        inner.insert(
            "dependencies".to_string(),
            Value::Array(vec![Value::String("x 1.0.0 registry+default".to_string())]),
        );
        let table = table_of(&[("root", Value::Table(inner))]);

        let first = to_string(&table);
        let reparsed = parse(&first).expect("parse emitted TOML");
        let second = to_string(&reparsed);

        assert_eq!(first, second);
    }
}

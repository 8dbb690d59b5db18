//! Evaluation of `where` documents and `order` specs against stored rows.
//!
//! Supports literal equality (array fields match when they contain the
//! literal), `$or`, `$ne`, `$gt`, `$gte`, `$lt`, `$lte`, `$in`, `$nin`,
//! `$exists`, `$inQuery`, and `$regex`/`$options` limited to literal text
//! with optional `^`/`$` anchors and the `i` flag.

use std::cmp::Ordering;

use serde_json::{Map, Value};

use crate::Store;

pub type Row = Map<String, Value>;

/// True when `row` satisfies every clause of `clause`.
pub fn matches(store: &Store, row: &Row, clause: &Row) -> bool {
    clause.iter().all(|(key, condition)| {
        if key == "$or" {
            return condition.as_array().is_some_and(|alternatives| {
                alternatives
                    .iter()
                    .filter_map(Value::as_object)
                    .any(|alternative| matches(store, row, alternative))
            });
        }
        let field = row.get(key);
        match condition {
            Value::Object(operators) if is_operator_map(operators) => operators
                .iter()
                .all(|(op, operand)| apply(store, op, field, operand, operators)),
            literal => equals(field, literal),
        }
    })
}

fn is_operator_map(map: &Row) -> bool {
    !map.is_empty() && map.keys().all(|k| k.starts_with('$'))
}

fn apply(store: &Store, op: &str, field: Option<&Value>, operand: &Value, all: &Row) -> bool {
    match op {
        "$ne" => !equals(field, operand),
        "$gt" => compare(field, operand) == Some(Ordering::Greater),
        "$gte" => matches!(compare(field, operand), Some(Ordering::Greater | Ordering::Equal)),
        "$lt" => compare(field, operand) == Some(Ordering::Less),
        "$lte" => matches!(compare(field, operand), Some(Ordering::Less | Ordering::Equal)),
        "$in" => operand
            .as_array()
            .is_some_and(|candidates| candidates.iter().any(|c| equals(field, c))),
        "$nin" => operand
            .as_array()
            .is_some_and(|candidates| !candidates.iter().any(|c| equals(field, c))),
        "$exists" => {
            let present = field.is_some_and(|v| !v.is_null());
            operand.as_bool() == Some(present)
        }
        "$regex" => {
            let insensitive = all
                .get("$options")
                .and_then(Value::as_str)
                .is_some_and(|o| o.contains('i'));
            match (field.and_then(Value::as_str), operand.as_str()) {
                (Some(text), Some(pattern)) => regex_like(pattern, text, insensitive),
                _ => false,
            }
        }
        "$options" => true,
        "$inQuery" => in_query(store, field, operand),
        _ => false,
    }
}

fn equals(field: Option<&Value>, literal: &Value) -> bool {
    match field {
        Some(Value::Array(items)) if !literal.is_array() => items.contains(literal),
        Some(value) => value == literal,
        None => literal.is_null(),
    }
}

fn compare(field: Option<&Value>, operand: &Value) -> Option<Ordering> {
    match (field?, operand) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn regex_like(pattern: &str, text: &str, insensitive: bool) -> bool {
    let (pattern, text) = if insensitive {
        (pattern.to_lowercase(), text.to_lowercase())
    } else {
        (pattern.to_string(), text.to_string())
    };
    let anchored_start = pattern.starts_with('^');
    let anchored_end = pattern.ends_with('$') && pattern.len() > 1;
    let core = pattern.trim_start_matches('^');
    let core = if anchored_end { &core[..core.len() - 1] } else { core };
    match (anchored_start, anchored_end) {
        (true, true) => text == core,
        (true, false) => text.starts_with(core),
        (false, true) => text.ends_with(core),
        (false, false) => text.contains(core),
    }
}

/// The field must point at an object of the sub-query's class that the
/// sub-query matches.
fn in_query(store: &Store, field: Option<&Value>, operand: &Value) -> bool {
    let Some(target) = field.and_then(|f| f.get("objectId")).and_then(Value::as_str) else {
        return false;
    };
    let Some(class_name) = operand.get("className").and_then(Value::as_str) else {
        return false;
    };
    let clause = operand
        .get("where")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    store
        .find(class_name, &clause)
        .iter()
        .any(|row| row.get("objectId").and_then(Value::as_str) == Some(target))
}

/// Sort by a comma-separated key list; `-key` sorts descending.
pub fn sort_rows(rows: &mut [Row], order: &str) {
    let keys: Vec<(&str, bool)> = order
        .split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(|k| match k.strip_prefix('-') {
            Some(key) => (key, true),
            None => (k, false),
        })
        .collect();
    rows.sort_by(|a, b| {
        for (key, descending) in &keys {
            let ordering = sort_key_cmp(a.get(*key), b.get(*key));
            let ordering = if *descending { ordering.reverse() } else { ordering };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

fn sort_key_cmp(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => compare(Some(a), b).unwrap_or(Ordering::Equal),
    }
}

//! JSONPath-lite resolution for the legacy dialect.
//!
//! Supports the subset the legacy operators need: `$.a.b`, `$.items[0]`,
//! `$.items[].name` (wildcard expansion). `single` returns the first
//! match, `multiple` every match.

use serde_json::Value;

use crate::{Error, Result};

/// A single segment in a parsed path.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    /// Object key: `"foo"`.
    Key(String),
    /// Array wildcard: `"[]"`.
    Wildcard,
    /// Array index: `"[0]"`.
    Index(usize),
}

/// Parse a `$.a.b[0]` expression into segments. The bare root `$` has none.
fn parse(expr: &str) -> Vec<Segment> {
    let body = expr.trim_start_matches('$').trim_start_matches('.');
    let mut segments = Vec::new();
    for part in body.split('.') {
        if part.is_empty() {
            continue;
        }
        let mut rest = part;
        if let Some(bracket) = part.find('[') {
            let key = &part[..bracket];
            if !key.is_empty() {
                segments.push(Segment::Key(key.to_string()));
            }
            rest = &part[bracket..];
            while let Some(close) = rest.find(']') {
                let inner = &rest[1..close];
                if inner.is_empty() {
                    segments.push(Segment::Wildcard);
                } else if let Ok(index) = inner.parse::<usize>() {
                    segments.push(Segment::Index(index));
                }
                rest = &rest[close + 1..];
                if !rest.starts_with('[') {
                    break;
                }
            }
            continue;
        }
        segments.push(Segment::Key(rest.to_string()));
    }
    segments
}

/// Collect every value the path matches.
fn resolve(value: &Value, path: &[Segment]) -> Vec<Value> {
    if path.is_empty() {
        return vec![value.clone()];
    }
    match &path[0] {
        Segment::Key(key) => match value.get(key.as_str()) {
            Some(child) => resolve(child, &path[1..]),
            None => vec![],
        },
        Segment::Wildcard => match value.as_array() {
            Some(items) => items.iter().flat_map(|v| resolve(v, &path[1..])).collect(),
            None => vec![],
        },
        Segment::Index(index) => match value.as_array().and_then(|items| items.get(*index)) {
            Some(child) => resolve(child, &path[1..]),
            None => vec![],
        },
    }
}

/// First match of `expr` against `value`, or null.
#[must_use]
pub fn single(value: &Value, expr: &str) -> Value {
    resolve(value, &parse(expr))
        .into_iter()
        .next()
        .unwrap_or(Value::Null)
}

/// All matches of `expr` against `value`.
#[must_use]
pub fn multiple(value: &Value, expr: &str) -> Vec<Value> {
    resolve(value, &parse(expr))
}

pub(crate) fn op_single(arg: &Value, input: &Value) -> Result<Value> {
    let expr = arg
        .as_str()
        .ok_or_else(|| Error::invalid_argument("single", "expected a JSONPath string"))?;
    Ok(single(input, expr))
}

pub(crate) fn op_multiple(arg: &Value, input: &Value) -> Result<Value> {
    let expr = arg
        .as_str()
        .ok_or_else(|| Error::invalid_argument("multiple", "expected a JSONPath string"))?;
    Ok(Value::Array(multiple(input, expr)))
}

//! GraphQL-like query layer.
//!
//! The syntax is compact:
//!
//! ```text
//! {
//!   user: readUser(id: "u1") { name, posts { title } }
//!   total: countPost(author: "u1")
//! }
//! ```
//!
//! Method names split into an operation prefix and an entity
//! (`createUser` -> `create` + `User`); a missing prefix means `read`.
//! Positional `?` placeholders and named `$name` bindings are
//! substituted (JSON-encoded) into the query string before parsing, so
//! callers never build query strings from raw user input.

use serde_json::Value;

use crate::{Error, Result};

pub mod executor;
pub mod parser;

pub use parser::parse;

/// A parsed query: one or more aliased method calls.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    /// Top-level method calls.
    pub fields: Vec<QueryField>,
}

/// One method call or field selection.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryField {
    /// Result key; defaults to the method name.
    pub alias: String,
    /// Method (top level) or field (nested) name.
    pub name: String,
    /// Call parameters.
    pub params: serde_json::Map<String, Value>,
    /// Sub-selection.
    pub fields: Vec<QueryField>,
}

/// Split a method name into `(operation prefix, Entity)`.
///
/// The shape is `^([a-z]+)?([A-Z]\w*)$`: an optional lowercase prefix
/// followed by a capitalized entity name.
pub fn split_method(method: &str) -> Result<(String, String)> {
    let split_at = method
        .find(|c: char| c.is_ascii_uppercase())
        .ok_or_else(|| {
            Error::ParseError(format!("method '{method}' does not name an entity"))
        })?;
    let (prefix, entity) = method.split_at(split_at);
    if !prefix.chars().all(|c| c.is_ascii_lowercase()) {
        return Err(Error::ParseError(format!(
            "method '{method}' has an invalid operation prefix"
        )));
    }
    if !entity.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return Err(Error::ParseError(format!(
            "method '{method}' has an invalid entity name"
        )));
    }
    Ok((prefix.to_string(), entity.to_string()))
}

/// Substitute `?` placeholders (positional, from an array) or `$name`
/// bindings (from an object) into a raw query string.
///
/// The scan skips string literals, so a `?` or `$` inside quotes (in
/// the query or in an already-substituted value) is never treated as a
/// placeholder.
pub fn substitute(query: &str, arguments: Option<&Value>) -> Result<String> {
    let Some(arguments) = arguments else {
        return Ok(query.to_string());
    };

    let mut out = String::with_capacity(query.len());
    let mut positional = 0usize;
    let chars: Vec<char> = query.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '"' => {
                // Copy the string literal verbatim, honoring escapes.
                out.push('"');
                i += 1;
                while i < chars.len() {
                    out.push(chars[i]);
                    if chars[i] == '\\' && i + 1 < chars.len() {
                        out.push(chars[i + 1]);
                        i += 2;
                        continue;
                    }
                    if chars[i] == '"' {
                        i += 1;
                        break;
                    }
                    i += 1;
                }
            }
            '?' => {
                let items = arguments.as_array().ok_or_else(|| {
                    Error::ParseError("positional placeholder without an argument list".to_string())
                })?;
                let value = items.get(positional).ok_or_else(|| {
                    Error::ParseError(format!("missing argument for placeholder #{positional}"))
                })?;
                out.push_str(&serde_json::to_string(value)?);
                positional += 1;
                i += 1;
            }
            '$' => {
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && (chars[end].is_alphanumeric() || chars[end] == '_') {
                    end += 1;
                }
                if end == start {
                    out.push('$');
                    i += 1;
                    continue;
                }
                let name: String = chars[start..end].iter().collect();
                let map = arguments.as_object().ok_or_else(|| {
                    Error::ParseError("named binding without an argument mapping".to_string())
                })?;
                let value = map.get(&name).ok_or_else(|| {
                    Error::ParseError(format!("missing argument for binding ${name}"))
                })?;
                out.push_str(&serde_json::to_string(value)?);
                i = end;
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    Ok(out)
}

//! Caller identity and access predicate evaluation.
//!
//! A [`Context`] carries the authenticated user, if any. Query dispatch
//! with no context at all runs in admin mode and skips every check; the
//! executor never calls into this module in that case.
//!
//! Access predicates are small expressions over two terms: `u` (the
//! user) and `i` (the item being accessed), e.g. `u.id == i.owner` or
//! `u.role == 'editor' || u.id == i.id`. Missing predicates allow.

use serde_json::Value;

use crate::transform::is_truthy;

/// Dotted lookup (`a.b.0`) against a JSON value.
fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for part in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Authenticated caller identity.
#[derive(Debug, Clone, Default)]
pub struct Context {
    user: Option<Value>,
}

impl Context {
    /// Context for an authenticated user object.
    #[must_use]
    pub fn new(user: Value) -> Self {
        Self { user: Some(user) }
    }

    /// Context with no user attached. Predicates referencing `u` resolve
    /// to null and generally deny.
    #[must_use]
    pub fn anonymous() -> Self {
        Self { user: None }
    }

    /// The authenticated user, if any.
    #[must_use]
    pub fn user(&self) -> Option<&Value> {
        self.user.as_ref()
    }

    /// The authenticated user's id as a string.
    #[must_use]
    pub fn user_id(&self) -> Option<String> {
        let id = self.user.as_ref()?.get("id")?;
        match id {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Evaluate an access predicate against this caller and `item`.
    #[must_use]
    pub fn evaluate(&self, predicate: &str, item: &Value) -> bool {
        let user = self.user.clone().unwrap_or(Value::Null);
        predicate
            .split("||")
            .any(|branch| branch.split("&&").all(|term| check(term, &user, item)))
    }
}

/// Resolve one side of a comparison: `u.path`, `i.path`, or a literal.
fn resolve(term: &str, user: &Value, item: &Value) -> Value {
    let term = term.trim();
    if term == "u" {
        return user.clone();
    }
    if term == "i" {
        return item.clone();
    }
    if let Some(path) = term.strip_prefix("u.") {
        return lookup(user, path).cloned().unwrap_or(Value::Null);
    }
    if let Some(path) = term.strip_prefix("i.") {
        return lookup(item, path).cloned().unwrap_or(Value::Null);
    }
    let unquoted = term.trim_matches('\'').trim_matches('"');
    if unquoted != term {
        return Value::String(unquoted.to_string());
    }
    serde_json::from_str(term).unwrap_or_else(|_| Value::String(term.to_string()))
}

/// Evaluate a single `lhs <op> rhs` term, or a bare truthiness check.
fn check(term: &str, user: &Value, item: &Value) -> bool {
    let term = term.trim();
    if term.is_empty() {
        return false;
    }

    for op in ["==", "!=", " in "] {
        if let Some((lhs, rhs)) = term.split_once(op) {
            let left = resolve(lhs, user, item);
            let right = resolve(rhs, user, item);
            return match op {
                "==" => left == right,
                "!=" => left != right,
                _ => right.as_array().is_some_and(|items| items.contains(&left)),
            };
        }
    }
    is_truthy(&resolve(term, user, item))
}

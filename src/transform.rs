//! Pure value-to-value transformation chains.
//!
//! A transformation is an ordered mapping from operator name to operator
//! argument; iteration order defines chain order. Evaluation is strict
//! about operator names (unknown names fail at construction) and lenient
//! about data: a null input, or any operator producing null, bails the
//! rest of the chain and yields null.
//!
//! ```text
//! Input value
//!       │
//!       ▼
//! ┌─────────────┐
//! │  op 1       │──▶ null? ──▶ bail with null
//! │  op 2       │
//! │  …          │
//! └─────────────┘
//!       │
//!       ▼
//! Output value
//! ```
//!
//! Two dialects exist and are never merged: the pointer dialect resolves
//! paths with `get` (JSON pointers, `/a/b`), the legacy JSONPath dialect
//! with `single`/`multiple` (`$.a.b`). String shorthands follow the
//! dialect's path sigil; strings without it are literals.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::pointer;
use crate::{Error, Result};

pub mod codec;
pub mod datetime;
pub mod html;
pub mod objects;
pub mod path;
pub mod strings;

// ============================================================================
// Dialects and operator registry
// ============================================================================

/// Path dialect a transformation is constructed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    /// JSON-pointer paths, `get` operator. The current dialect.
    #[default]
    Pointer,
    /// JSONPath paths, `single`/`multiple` operators. The legacy dialect.
    JsonPath,
}

/// Operators available in both dialects.
const SHARED_OPERATORS: &[&str] = &[
    "static",
    "object",
    "map",
    "array",
    "substring",
    "length",
    "count",
    "hash",
    "join",
    "split",
    "filter",
    "union",
    "slice",
    "case",
    "replace",
    "match",
    "render",
    "parseDate",
    "formatDate",
    "now",
    "fromJson",
    "toJson",
    "fromXml",
    "toXml",
    "fromBase64",
    "toBase64",
    "toFormData",
    "fromFormData",
    "lowerCase",
    "upperCase",
    "camelCase",
    "kebabCase",
    "snakeCase",
    "nameCase",
    "capitalize",
    "deburr",
    "htmlTag",
    "htmlTags",
    "htmlTagText",
    "htmlTagsText",
    "htmlAttribute",
    "htmlTable",
    "assert",
    "keys",
    "omit",
    "pick",
    "changed",
    "change",
];

/// Check whether `name` is a registered operator in `dialect`.
#[must_use]
pub fn is_operator(name: &str, dialect: Dialect) -> bool {
    match (dialect, name) {
        (Dialect::Pointer, "get") | (Dialect::JsonPath, "single" | "multiple") => true,
        _ => SHARED_OPERATORS.contains(&name),
    }
}

// ============================================================================
// Transformation
// ============================================================================

/// One element of a compiled chain.
#[derive(Debug, Clone)]
enum Step {
    /// A named operator with its argument.
    Operator { name: String, arg: Value },
    /// A shorthand sub-expression (string path/literal or nested template).
    Shorthand(Value),
}

/// A compiled transformation chain.
#[derive(Debug, Clone)]
pub struct Transformation {
    steps: Vec<Step>,
    dialect: Dialect,
}

impl Transformation {
    /// Compile a template in the current (pointer) dialect.
    pub fn new(template: &Value) -> Result<Self> {
        Self::with_dialect(template, Dialect::Pointer)
    }

    /// Compile a template in an explicit dialect.
    ///
    /// Accepts a mapping (operator chain) or an array (sequence of
    /// sub-templates applied in order). Every operator name is checked
    /// against the dialect's registry here.
    pub fn with_dialect(template: &Value, dialect: Dialect) -> Result<Self> {
        let mut steps = Vec::new();
        collect_steps(template, dialect, &mut steps)?;
        Ok(Self { steps, dialect })
    }

    /// The dialect this chain was compiled with.
    #[must_use]
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Run the chain over `input`.
    ///
    /// A null input short-circuits to null, as does any operator
    /// producing null mid-chain.
    pub fn transform(&self, input: &Value) -> Result<Value> {
        let mut current = input.clone();
        for step in &self.steps {
            if current.is_null() {
                return Ok(Value::Null);
            }
            current = match step {
                Step::Operator { name, arg } => apply_operator(name, arg, &current, self.dialect)?,
                Step::Shorthand(spec) => evaluate_spec(spec, &current, self.dialect)?,
            };
        }
        Ok(current)
    }
}

fn collect_steps(template: &Value, dialect: Dialect, steps: &mut Vec<Step>) -> Result<()> {
    match template {
        Value::Object(map) => {
            for (name, arg) in map {
                if !is_operator(name, dialect) {
                    return Err(Error::UnknownOperator(name.clone()));
                }
                validate_operator(name, arg, dialect)?;
                steps.push(Step::Operator {
                    name: name.clone(),
                    arg: arg.clone(),
                });
            }
            Ok(())
        }
        Value::Array(items) => {
            for item in items {
                match item {
                    Value::Object(_) => collect_steps(item, dialect, steps)?,
                    other => steps.push(Step::Shorthand(other.clone())),
                }
            }
            Ok(())
        }
        _ => Err(Error::Internal(
            "transformation template must be a mapping or an array".to_string(),
        )),
    }
}

/// Construction-time validation for arguments that nest sub-templates,
/// so a typo'd operator inside `object`/`map`/`array` fails before the
/// chain ever runs.
fn validate_operator(name: &str, arg: &Value, dialect: Dialect) -> Result<()> {
    match name {
        "object" => {
            if let Value::Object(map) = arg {
                for (key, spec) in map {
                    if key != objects::SPREAD_KEY && spec.is_object() {
                        Transformation::with_dialect(spec, dialect)?;
                    }
                }
            }
            Ok(())
        }
        "map" => {
            if let Value::Object(map) = arg {
                if !map.is_empty() {
                    Transformation::with_dialect(arg, dialect)?;
                }
            }
            Ok(())
        }
        "filter" => {
            // The empty form and the {source, filter} form validate their
            // parts at evaluation time; anything else is a sub-template.
            if let Value::Object(map) = arg {
                if !map.is_empty() && !objects::is_source_filter(map) {
                    Transformation::with_dialect(arg, dialect)?;
                }
            }
            Ok(())
        }
        "array" | "union" => {
            if let Value::Array(items) = arg {
                for item in items {
                    if item.is_object() {
                        Transformation::with_dialect(item, dialect)?;
                    }
                }
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

// ============================================================================
// Shorthand coercion
// ============================================================================

/// Evaluate a sub-transformation spec against `input`.
///
/// - a string carrying the dialect's path sigil resolves as a path
///   (pointer dialect: empty string or leading `/`; JSONPath dialect:
///   leading `$`);
/// - any other scalar is a literal;
/// - a mapping is a nested template, an array a nested chain.
pub(crate) fn evaluate_spec(spec: &Value, input: &Value, dialect: Dialect) -> Result<Value> {
    match spec {
        Value::String(s) => match dialect {
            Dialect::Pointer if s.is_empty() || s.starts_with('/') => Ok(pointer::get(input, s)),
            Dialect::JsonPath if s.starts_with('$') => Ok(path::single(input, s)),
            _ => Ok(spec.clone()),
        },
        Value::Object(_) | Value::Array(_) => {
            Transformation::with_dialect(spec, dialect)?.transform(input)
        }
        other => Ok(other.clone()),
    }
}

// ============================================================================
// Operator dispatch
// ============================================================================

/// Apply a single named operator. `name` must already be registered.
pub(crate) fn apply_operator(
    name: &str,
    arg: &Value,
    input: &Value,
    dialect: Dialect,
) -> Result<Value> {
    match name {
        "get" => op_get(arg, input),
        "single" => path::op_single(arg, input),
        "multiple" => path::op_multiple(arg, input),
        "static" => Ok(arg.clone()),
        "object" => objects::op_object(arg, input, dialect),
        "map" => objects::op_map(arg, input, dialect),
        "array" => objects::op_array(arg, input, dialect),
        "filter" => objects::op_filter(arg, input, dialect),
        "union" => objects::op_union(arg, input, dialect),
        "slice" => objects::op_slice(arg, input),
        "case" => objects::op_case(arg, input),
        "keys" => objects::op_keys(input),
        "omit" => objects::op_omit(arg, input),
        "pick" => objects::op_pick(arg, input),
        "changed" => objects::op_changed(arg, input, dialect),
        "change" => objects::op_change(arg, input, dialect),
        "assert" => objects::op_assert(arg, input),
        "render" => objects::op_render(arg, input),
        "substring" => strings::op_substring(arg, input),
        "length" => strings::op_length(input),
        "count" => strings::op_count(input),
        "join" => strings::op_join(arg, input),
        "split" => strings::op_split(arg, input),
        "replace" => strings::op_replace(arg, input),
        "match" => strings::op_match(arg, input),
        "lowerCase" | "upperCase" | "camelCase" | "kebabCase" | "snakeCase" | "nameCase"
        | "capitalize" | "deburr" => strings::op_recase(name, input),
        "hash" => codec::op_hash(arg, input),
        "fromJson" => codec::op_from_json(input),
        "toJson" => codec::op_to_json(input),
        "fromXml" => codec::op_from_xml(input),
        "toXml" => codec::op_to_xml(input),
        "fromBase64" => codec::op_from_base64(input),
        "toBase64" => codec::op_to_base64(input),
        "toFormData" => codec::op_to_form_data(input),
        "fromFormData" => codec::op_from_form_data(input),
        "parseDate" => datetime::op_parse_date(arg, input),
        "formatDate" => datetime::op_format_date(arg, input),
        "now" => Ok(datetime::op_now()),
        "htmlTag" | "htmlTags" | "htmlTagText" | "htmlTagsText" => html::op_select(name, arg, input),
        "htmlAttribute" => html::op_attribute(arg, input),
        "htmlTable" => html::op_table(arg, input),
        other => Err(Error::UnknownOperator(other.to_string())),
    }
}

fn op_get(arg: &Value, input: &Value) -> Result<Value> {
    let ptr = arg
        .as_str()
        .ok_or_else(|| Error::invalid_argument("get", "expected a JSON pointer string"))?;
    Ok(pointer::get(input, ptr))
}

// ============================================================================
// Shared helpers
// ============================================================================

/// Decode an operator argument into a typed struct.
pub(crate) fn decode_args<T: DeserializeOwned>(operator: &str, arg: &Value) -> Result<T> {
    serde_json::from_value(arg.clone())
        .map_err(|e| Error::invalid_argument(operator, e.to_string()))
}

/// Require a string input for `operator`.
pub(crate) fn require_str<'a>(operator: &str, input: &'a Value) -> Result<&'a str> {
    input
        .as_str()
        .ok_or_else(|| Error::invalid_argument(operator, "input must be a string"))
}

/// Render a value the way it reads in text: strings verbatim, scalars
/// via display, containers as JSON.
pub(crate) fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// JSON truthiness: null, false, 0, "" and empty containers are falsy.
#[must_use]
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn object_shorthand_with_pointer() {
        let t = Transformation::new(&json!({"object": {"baz": "/foo"}})).unwrap();
        let out = t.transform(&json!({"foo": "bar"})).unwrap();
        assert_eq!(out, json!({"baz": "bar"}));
    }

    #[test]
    fn chain_bails_on_null() {
        let t = Transformation::new(&json!({
            "get": "/unknown",
            "hash": {"algorithm": "md5"}
        }))
        .unwrap();
        assert_eq!(t.transform(&json!({})).unwrap(), Value::Null);
    }

    #[test]
    fn null_input_yields_null() {
        let t = Transformation::new(&json!({"static": 42})).unwrap();
        assert_eq!(t.transform(&Value::Null).unwrap(), Value::Null);
    }

    #[test]
    fn unknown_operator_fails_at_construction() {
        let err = Transformation::new(&json!({"frobnicate": {}})).unwrap_err();
        assert!(matches!(err, Error::UnknownOperator(name) if name == "frobnicate"));
    }

    #[test]
    fn unknown_operator_in_nested_object_fails_at_construction() {
        let err =
            Transformation::new(&json!({"object": {"x": {"frobnicate": {}}}})).unwrap_err();
        assert!(matches!(err, Error::UnknownOperator(_)));
    }

    #[test]
    fn get_is_not_registered_in_legacy_dialect() {
        let err =
            Transformation::with_dialect(&json!({"get": "/a"}), Dialect::JsonPath).unwrap_err();
        assert!(matches!(err, Error::UnknownOperator(_)));
    }

    #[test]
    fn single_is_not_registered_in_pointer_dialect() {
        let err = Transformation::new(&json!({"single": "$.a"})).unwrap_err();
        assert!(matches!(err, Error::UnknownOperator(_)));
    }

    #[test]
    fn array_template_is_a_chain() {
        let t = Transformation::new(&json!([
            {"object": {"wrapped": "/value"}},
            {"toJson": {}}
        ]))
        .unwrap();
        let out = t.transform(&json!({"value": 1})).unwrap();
        assert_eq!(out, json!("{\"wrapped\":1}"));
    }

    #[test]
    fn template_order_is_chain_order() {
        // substring after upperCase sees the uppercased value
        let t = Transformation::new(&json!({
            "upperCase": {},
            "substring": {"start": 0, "length": 3}
        }))
        .unwrap();
        assert_eq!(t.transform(&json!("weft rocks")).unwrap(), json!("WEF"));
    }

    #[test]
    fn string_without_sigil_is_literal() {
        let t = Transformation::new(&json!({"object": {"foo": "/foo", "bar": "baz"}})).unwrap();
        let out = t.transform(&json!({})).unwrap();
        assert_eq!(out, json!({"foo": null, "bar": "baz"}));
    }

    #[test]
    fn legacy_string_shorthand_uses_jsonpath() {
        let t = Transformation::with_dialect(
            &json!({"object": {"name": "$.user.name", "kind": "person"}}),
            Dialect::JsonPath,
        )
        .unwrap();
        let out = t.transform(&json!({"user": {"name": "Ada"}})).unwrap();
        assert_eq!(out, json!({"name": "Ada", "kind": "person"}));
    }

    #[test]
    fn empty_pointer_shorthand_passes_whole_input() {
        let t = Transformation::new(&json!({"object": {"all": ""}})).unwrap();
        let out = t.transform(&json!({"a": 1})).unwrap();
        assert_eq!(out, json!({"all": {"a": 1}}));
    }

    #[test]
    fn truthiness() {
        assert!(!is_truthy(&Value::Null));
        assert!(!is_truthy(&json!(false)));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!("")));
        assert!(!is_truthy(&json!([])));
        assert!(!is_truthy(&json!({})));
        assert!(is_truthy(&json!(1)));
        assert!(is_truthy(&json!("x")));
        assert!(is_truthy(&json!([0])));
    }
}

//! Structural operators: building objects and arrays, filtering,
//! diffing, schema assertion and template rendering.

use serde_json::{Map, Value};

use crate::pointer;
use crate::transform::{decode_args, evaluate_spec, is_truthy, value_to_string, Dialect};
use crate::{Error, Result};

/// Key whose sub-expression result is merged into the surrounding object.
pub(crate) const SPREAD_KEY: &str = "...";

/// Recognize the `{source, filter}` form of the `filter` operator.
pub(crate) fn is_source_filter(map: &Map<String, Value>) -> bool {
    map.len() == 2 && map.contains_key("source") && map.contains_key("filter")
}

pub(crate) fn op_object(arg: &Value, input: &Value, dialect: Dialect) -> Result<Value> {
    let spec = arg
        .as_object()
        .ok_or_else(|| Error::invalid_argument("object", "expected a mapping"))?;

    let mut out = Map::new();
    for (key, sub) in spec {
        if key == SPREAD_KEY {
            if let Value::Object(merged) = evaluate_spec(sub, input, dialect)? {
                out.extend(merged);
            }
            continue;
        }
        out.insert(key.clone(), evaluate_spec(sub, input, dialect)?);
    }
    Ok(Value::Object(out))
}

pub(crate) fn op_map(arg: &Value, input: &Value, dialect: Dialect) -> Result<Value> {
    let items = input
        .as_array()
        .ok_or_else(|| Error::invalid_argument("map", "input must be an array"))?;
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        out.push(evaluate_spec(arg, item, dialect)?);
    }
    Ok(Value::Array(out))
}

pub(crate) fn op_array(arg: &Value, input: &Value, dialect: Dialect) -> Result<Value> {
    let specs = arg
        .as_array()
        .ok_or_else(|| Error::invalid_argument("array", "expected an array of expressions"))?;
    let mut out = Vec::with_capacity(specs.len());
    for spec in specs {
        out.push(evaluate_spec(spec, input, dialect)?);
    }
    Ok(Value::Array(out))
}

pub(crate) fn op_filter(arg: &Value, input: &Value, dialect: Dialect) -> Result<Value> {
    if let Value::Object(map) = arg {
        if map.is_empty() {
            let items = input
                .as_array()
                .ok_or_else(|| Error::invalid_argument("filter", "input must be an array"))?;
            return Ok(Value::Array(
                items.iter().filter(|v| is_truthy(v)).cloned().collect(),
            ));
        }
        if is_source_filter(map) {
            let source = evaluate_spec(&map["source"], input, dialect)?;
            let items = source.as_array().ok_or_else(|| {
                Error::invalid_argument("filter", "source must resolve to an array")
            })?;
            let mut kept = Vec::new();
            for item in items {
                // The subscript sees the input with the current element
                // mounted at /item.
                let mut scope = if input.is_object() {
                    input.clone()
                } else {
                    Value::Object(Map::new())
                };
                pointer::set(&mut scope, "/item", item.clone());
                if is_truthy(&evaluate_spec(&map["filter"], &scope, dialect)?) {
                    kept.push(item.clone());
                }
            }
            return Ok(Value::Array(kept));
        }
    }

    let items = input
        .as_array()
        .ok_or_else(|| Error::invalid_argument("filter", "input must be an array"))?;
    let mut kept = Vec::new();
    for item in items {
        if is_truthy(&evaluate_spec(arg, item, dialect)?) {
            kept.push(item.clone());
        }
    }
    Ok(Value::Array(kept))
}

pub(crate) fn op_union(arg: &Value, input: &Value, dialect: Dialect) -> Result<Value> {
    let specs = arg
        .as_array()
        .ok_or_else(|| Error::invalid_argument("union", "expected an array of expressions"))?;
    let mut out: Vec<Value> = Vec::new();
    for spec in specs {
        let resolved = evaluate_spec(spec, input, dialect)?;
        let candidates = match resolved {
            Value::Null => continue,
            Value::Array(items) => items,
            other => vec![other],
        };
        for candidate in candidates {
            if !out.contains(&candidate) {
                out.push(candidate);
            }
        }
    }
    Ok(Value::Array(out))
}

#[derive(serde::Deserialize)]
struct SliceArgs {
    #[serde(default)]
    from: i64,
    #[serde(default)]
    to: Option<i64>,
}

pub(crate) fn op_slice(arg: &Value, input: &Value) -> Result<Value> {
    let args: SliceArgs = decode_args("slice", arg)?;
    let items = input
        .as_array()
        .ok_or_else(|| Error::invalid_argument("slice", "input must be an array"))?;

    let len = items.len() as i64;
    let clamp = |index: i64| -> usize {
        let resolved = if index < 0 { len + index } else { index };
        resolved.clamp(0, len) as usize
    };
    let from = clamp(args.from);
    let to = clamp(args.to.unwrap_or(len));
    if from >= to {
        return Ok(Value::Array(Vec::new()));
    }
    Ok(Value::Array(items[from..to].to_vec()))
}

pub(crate) fn op_case(arg: &Value, input: &Value) -> Result<Value> {
    let table = arg
        .as_object()
        .ok_or_else(|| Error::invalid_argument("case", "expected a mapping"))?;
    let key = value_to_string(input);
    if let Some(found) = table.get(&key) {
        return Ok(found.clone());
    }
    Ok(table.get("default").cloned().unwrap_or(Value::Null))
}

pub(crate) fn op_keys(input: &Value) -> Result<Value> {
    let map = input
        .as_object()
        .ok_or_else(|| Error::invalid_argument("keys", "input must be an object"))?;
    Ok(Value::Array(
        map.keys().map(|k| Value::String(k.clone())).collect(),
    ))
}

/// Accept a bare string or an array of strings as a key list.
fn key_list(operator: &str, arg: &Value) -> Result<Vec<String>> {
    match arg {
        Value::String(s) => Ok(vec![s.clone()]),
        Value::Array(items) => items
            .iter()
            .map(|v| {
                v.as_str()
                    .map(ToString::to_string)
                    .ok_or_else(|| Error::invalid_argument(operator, "keys must be strings"))
            })
            .collect(),
        _ => Err(Error::invalid_argument(
            operator,
            "expected a key or an array of keys",
        )),
    }
}

pub(crate) fn op_omit(arg: &Value, input: &Value) -> Result<Value> {
    let keys = key_list("omit", arg)?;
    let map = input
        .as_object()
        .ok_or_else(|| Error::invalid_argument("omit", "input must be an object"))?;
    Ok(Value::Object(
        map.iter()
            .filter(|(k, _)| !keys.contains(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    ))
}

pub(crate) fn op_pick(arg: &Value, input: &Value) -> Result<Value> {
    let keys = key_list("pick", arg)?;
    let map = input
        .as_object()
        .ok_or_else(|| Error::invalid_argument("pick", "input must be an object"))?;
    Ok(Value::Object(
        map.iter()
            .filter(|(k, _)| keys.contains(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    ))
}

fn as_object_or_empty(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Diff two objects: added and updated keys carry the right-hand value,
/// deleted keys carry null.
pub(crate) fn op_changed(arg: &Value, input: &Value, dialect: Dialect) -> Result<Value> {
    let spec = arg
        .as_object()
        .ok_or_else(|| Error::invalid_argument("changed", "expected {left, right}"))?;
    let (Some(left_spec), Some(right_spec)) = (spec.get("left"), spec.get("right")) else {
        return Err(Error::invalid_argument("changed", "expected {left, right}"));
    };
    let left = as_object_or_empty(evaluate_spec(left_spec, input, dialect)?);
    let right = as_object_or_empty(evaluate_spec(right_spec, input, dialect)?);

    let mut diff = Map::new();
    for (key, value) in &right {
        if left.get(key) != Some(value) {
            diff.insert(key.clone(), value.clone());
        }
    }
    for key in left.keys() {
        if !right.contains_key(key) {
            diff.insert(key.clone(), Value::Null);
        }
    }
    Ok(Value::Object(diff))
}

/// Apply a diff produced by `changed`: null deletes, anything else sets.
pub(crate) fn op_change(arg: &Value, input: &Value, dialect: Dialect) -> Result<Value> {
    let spec = arg
        .as_object()
        .ok_or_else(|| Error::invalid_argument("change", "expected {target, changes}"))?;
    let (Some(target_spec), Some(changes_spec)) = (spec.get("target"), spec.get("changes")) else {
        return Err(Error::invalid_argument(
            "change",
            "expected {target, changes}",
        ));
    };
    let mut target = as_object_or_empty(evaluate_spec(target_spec, input, dialect)?);
    let changes = as_object_or_empty(evaluate_spec(changes_spec, input, dialect)?);

    for (key, value) in changes {
        if value.is_null() {
            target.remove(&key);
        } else {
            target.insert(key, value);
        }
    }
    Ok(Value::Object(target))
}

pub(crate) fn op_assert(arg: &Value, input: &Value) -> Result<Value> {
    let validator = jsonschema::validator_for(arg)
        .map_err(|e| Error::invalid_argument("assert", e.to_string()))?;
    validator
        .validate(input)
        .map_err(|e| Error::invalid_argument("assert", e.to_string()))?;
    Ok(input.clone())
}

/// Look up a dotted path (`a.b.0`) inside a value.
fn dotted_lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
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

pub(crate) fn op_render(arg: &Value, input: &Value) -> Result<Value> {
    let template = arg
        .as_str()
        .ok_or_else(|| Error::invalid_argument("render", "expected a template string"))?;

    let re = regex::Regex::new(r"\{\{\s*([\w][\w.]*)\s*\}\}").expect("static regex");
    let mut rendered = template.to_string();
    for capture in re.captures_iter(template) {
        let placeholder = &capture[0];
        let resolved = dotted_lookup(input, &capture[1])
            .cloned()
            .unwrap_or(Value::Null);
        rendered = rendered.replace(placeholder, &value_to_string(&resolved));
    }
    Ok(Value::String(rendered))
}

//! String operators: slicing, splitting, matching and case conversion.

use heck::{ToKebabCase, ToLowerCamelCase, ToSnakeCase, ToTitleCase};
use regex::Regex;
use serde_json::Value;

use crate::pointer;
use crate::transform::{decode_args, require_str, value_to_string};
use crate::{Error, Result};

#[derive(serde::Deserialize)]
struct SubstringArgs {
    #[serde(default)]
    start: usize,
    #[serde(default)]
    length: Option<usize>,
}

pub(crate) fn op_substring(arg: &Value, input: &Value) -> Result<Value> {
    let args: SubstringArgs = decode_args("substring", arg)?;
    let s = require_str("substring", input)?;
    let taken: String = s
        .chars()
        .skip(args.start)
        .take(args.length.unwrap_or(usize::MAX))
        .collect();
    Ok(Value::String(taken))
}

pub(crate) fn op_length(input: &Value) -> Result<Value> {
    match input {
        Value::String(s) => Ok(Value::from(s.chars().count())),
        Value::Array(items) => Ok(Value::from(items.len())),
        _ => Err(Error::invalid_argument(
            "length",
            "input must be a string or an array",
        )),
    }
}

pub(crate) fn op_count(input: &Value) -> Result<Value> {
    match input {
        Value::String(s) => Ok(Value::from(s.chars().count())),
        Value::Array(items) => Ok(Value::from(items.len())),
        _ => Ok(Value::from(0)),
    }
}

#[derive(serde::Deserialize)]
struct JoinArgs {
    #[serde(default)]
    separator: String,
}

pub(crate) fn op_join(arg: &Value, input: &Value) -> Result<Value> {
    let args: JoinArgs = decode_args("join", arg)?;
    let items = input
        .as_array()
        .ok_or_else(|| Error::invalid_argument("join", "input must be an array"))?;
    let parts: Vec<String> = items.iter().map(value_to_string).collect();
    Ok(Value::String(parts.join(&args.separator)))
}

#[derive(serde::Deserialize)]
struct SplitArgs {
    separator: String,
    #[serde(default, rename = "maxItems")]
    max_items: Option<usize>,
    #[serde(default, rename = "addRemainder")]
    add_remainder: bool,
    #[serde(default)]
    input: Option<String>,
}

pub(crate) fn op_split(arg: &Value, input: &Value) -> Result<Value> {
    let args: SplitArgs = decode_args("split", arg)?;
    let source = match &args.input {
        Some(ptr) => pointer::get(input, ptr),
        None => input.clone(),
    };
    let s = require_str("split", &source)?;

    let parts: Vec<String> = if args.separator.is_empty() {
        s.chars().map(String::from).collect()
    } else {
        match args.max_items {
            Some(max) if args.add_remainder => {
                s.splitn(max, &args.separator).map(String::from).collect()
            }
            Some(max) => s.split(&args.separator).take(max).map(String::from).collect(),
            None => s.split(&args.separator).map(String::from).collect(),
        }
    };
    Ok(Value::Array(parts.into_iter().map(Value::String).collect()))
}

/// Parse a `/pattern/flags` literal into a compiled regex plus its
/// `g` (global) flag. Returns `None` when the string is not
/// regex-shaped, including when the trailing segment is not a flag
/// list (so a plain path like `/api/v1` stays a literal search).
fn parse_regex(operator: &str, raw: &str) -> Result<Option<(Regex, bool)>> {
    let Some(body) = raw.strip_prefix('/') else {
        return Ok(None);
    };
    let Some(close) = body.rfind('/') else {
        return Ok(None);
    };
    let (pattern, flags) = (&body[..close], &body[close + 1..]);
    if !flags.chars().all(|c| matches!(c, 'g' | 'i' | 'm' | 's')) {
        return Ok(None);
    }
    let mut source = String::new();
    for flag in ['i', 'm', 's'] {
        if flags.contains(flag) {
            source.push_str(&format!("(?{flag})"));
        }
    }
    source.push_str(pattern);
    let regex =
        Regex::new(&source).map_err(|e| Error::invalid_argument(operator, e.to_string()))?;
    Ok(Some((regex, flags.contains('g'))))
}

#[derive(serde::Deserialize)]
struct ReplaceArgs {
    search: String,
    replace: String,
}

pub(crate) fn op_replace(arg: &Value, input: &Value) -> Result<Value> {
    let args: ReplaceArgs = decode_args("replace", arg)?;
    let s = require_str("replace", input)?;

    let replaced = match parse_regex("replace", &args.search)? {
        Some((regex, global)) if global => regex.replace_all(s, args.replace.as_str()).into_owned(),
        Some((regex, _)) => regex.replace(s, args.replace.as_str()).into_owned(),
        None => s.replacen(&args.search, &args.replace, 1),
    };
    Ok(Value::String(replaced))
}

#[derive(serde::Deserialize)]
struct MatchArgs {
    pattern: String,
    #[serde(default)]
    input: Option<String>,
}

pub(crate) fn op_match(arg: &Value, input: &Value) -> Result<Value> {
    let args: MatchArgs = match arg {
        Value::String(pattern) => MatchArgs {
            pattern: pattern.clone(),
            input: None,
        },
        other => decode_args("match", other)?,
    };
    let source = match &args.input {
        Some(ptr) => pointer::get(input, ptr),
        None => input.clone(),
    };
    let s = require_str("match", &source)?;

    let regex = match parse_regex("match", &args.pattern)? {
        Some((regex, _)) => regex,
        None => Regex::new(&args.pattern)
            .map_err(|e| Error::invalid_argument("match", e.to_string()))?,
    };

    match regex.captures(s) {
        Some(captures) => Ok(Value::Array(
            captures
                .iter()
                .map(|group| match group {
                    Some(m) => Value::String(m.as_str().to_string()),
                    None => Value::Null,
                })
                .collect(),
        )),
        None => Ok(Value::Bool(false)),
    }
}

/// Case transforms share a dispatcher; non-string input yields null.
pub(crate) fn op_recase(name: &str, input: &Value) -> Result<Value> {
    let Some(s) = input.as_str() else {
        return Ok(Value::Null);
    };
    let out = match name {
        "lowerCase" => s.to_lowercase(),
        "upperCase" => s.to_uppercase(),
        "camelCase" => s.to_lower_camel_case(),
        "kebabCase" => s.to_kebab_case(),
        "snakeCase" => s.to_snake_case(),
        "nameCase" => s.to_title_case(),
        "capitalize" => {
            let mut chars = s.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
                None => String::new(),
            }
        }
        "deburr" => deunicode::deunicode(s),
        _ => return Err(Error::UnknownOperator(name.to_string())),
    };
    Ok(Value::String(out))
}

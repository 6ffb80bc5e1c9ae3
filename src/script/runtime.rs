//! Script execution: the program-counter loop over labeled steps.

use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use super::{
    JumpCondition, JumpSpec, QuerySpec, QueryStep, RequestSpec, RequestStep, Script, StepDef,
};
use crate::context::Context;
use crate::pointer;
use crate::transform::{apply_operator, evaluate_spec, Dialect};
use crate::{Error, Result};

/// Default landing pointer for query and request results.
const RESULT_POINTER: &str = "/result";

/// One recorded step of a debug run.
#[derive(Debug, Clone, Serialize)]
pub struct StepTrace {
    /// The step as written.
    pub definition: Value,
    /// State after the step.
    pub output: Value,
    /// Extra note (taken jumps).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
    /// Traces of nested `eval`/`script` runs.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<StepTrace>,
}

/// Clears the running flag when an activation ends, however it ends.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Execute a script. Boxed so nested `eval` steps can recurse.
pub(crate) fn execute<'a>(
    script: &'a Script,
    input: Value,
    context: Option<&'a Context>,
    debug_trace: bool,
) -> BoxFuture<'a, Result<(Value, Vec<StepTrace>)>> {
    async move {
        if script
            .running_flag()
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::ConcurrentRun(script.name().to_string()));
        }
        let _guard = RunGuard(script.running_flag());

        let definition = script.definition();
        let mut state = if input.is_null() {
            Value::Object(Map::new())
        } else {
            input
        };
        let mut trace = Vec::new();
        let mut executed: u64 = 0;
        let mut pc = 0usize;

        while pc < definition.steps.len() {
            executed += 1;
            if executed > definition.max_steps {
                return Err(Error::StepBudgetExceeded {
                    script: script.name().to_string(),
                    budget: definition.max_steps,
                });
            }

            let mut next = pc + 1;
            let mut info = None;
            let mut children = Vec::new();

            if let StepDef::Step(spec) = &definition.steps[pc] {
                if let Some(query) = &spec.query {
                    apply_query(script, query, &mut state, context).await?;
                }
                if let Some(request) = &spec.request {
                    apply_request(script, request, &mut state).await?;
                }
                if let Some(template) = &spec.transform {
                    state = crate::transform::Transformation::new(template)?.transform(&state)?;
                }
                for (name, arg) in &spec.inline {
                    apply_inline(
                        script,
                        name,
                        arg,
                        &mut state,
                        context,
                        debug_trace,
                        &mut children,
                    )
                    .await?;
                }
                if let Some(ptr) = &spec.increment {
                    apply_increment(&mut state, ptr);
                }
                if let Some(jump) = &spec.jump {
                    if let Some(target) = evaluate_jump(script, jump, &state)? {
                        info = Some(format!("jump to step {target}"));
                        next = target;
                    }
                }
            }

            if debug_trace {
                trace.push(StepTrace {
                    definition: script.raw_step(pc).clone(),
                    output: state.clone(),
                    info,
                    children,
                });
            }

            if next < definition.steps.len() {
                if let Some(ms) = definition.delay {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                }
            }
            pc = next;
        }

        debug!(script = %script.name(), steps = executed, "Script run finished");
        Ok((state, trace))
    }
    .boxed()
}

/// Write a substep result at its `resultProperty` pointer. The default
/// is `/result`; the empty pointer replaces the whole state.
fn write_result(state: &mut Value, result_property: Option<&str>, value: Value) {
    pointer::set(state, result_property.unwrap_or(RESULT_POINTER), value);
}

async fn apply_query(
    script: &Script,
    spec: &QuerySpec,
    state: &mut Value,
    context: Option<&Context>,
) -> Result<()> {
    let plain;
    let step: &QueryStep = match spec {
        QuerySpec::Plain(query) => {
            plain = QueryStep {
                query: query.clone(),
                arguments: None,
                result_property: None,
                run_in_context: false,
            };
            &plain
        }
        QuerySpec::Full(full) => full,
    };

    // Each argument is an expression over the current state.
    let arguments = match &step.arguments {
        None => None,
        Some(Value::Object(map)) => {
            let mut resolved = Map::new();
            for (key, expr) in map {
                resolved.insert(key.clone(), evaluate_spec(expr, state, Dialect::Pointer)?);
            }
            Some(Value::Object(resolved))
        }
        Some(Value::Array(items)) => {
            let mut resolved = Vec::with_capacity(items.len());
            for expr in items {
                resolved.push(evaluate_spec(expr, state, Dialect::Pointer)?);
            }
            Some(Value::Array(resolved))
        }
        Some(_) => {
            return Err(Error::invalid_argument(
                "query",
                "arguments must be a mapping or an array",
            ))
        }
    };

    let run_context = if step.run_in_context { context } else { None };
    let result = script
        .env()
        .storage
        .query(&step.query, run_context, arguments.as_ref())
        .await?;
    write_result(state, step.result_property.as_deref(), result);
    Ok(())
}

/// Parse a response body by content type: JSON and XML become values,
/// everything else stays a string.
fn parse_body(content_type: Option<&str>, text: String) -> Value {
    let content_type = content_type.unwrap_or_default();
    if content_type.contains("json") {
        return serde_json::from_str(&text).unwrap_or(Value::String(text));
    }
    if content_type.contains("xml") {
        return crate::transform::codec::op_from_xml(&Value::String(text.clone()))
            .unwrap_or(Value::String(text));
    }
    Value::String(text)
}

async fn apply_request(script: &Script, spec: &RequestSpec, state: &mut Value) -> Result<()> {
    let plain;
    let step: &RequestStep = match spec {
        RequestSpec::Plain(url) => {
            plain = RequestStep {
                url: Value::String(url.clone()),
                method: None,
                headers: None,
                body: None,
                result_property: None,
            };
            &plain
        }
        RequestSpec::Full(full) => full,
    };

    let url_value = evaluate_spec(&step.url, state, Dialect::Pointer)?;
    let url = url_value
        .as_str()
        .ok_or_else(|| Error::invalid_argument("request", "url must resolve to a string"))
        .and_then(|raw| {
            url::Url::parse(raw).map_err(|e| Error::invalid_argument("request", e.to_string()))
        })?;
    let method = match &step.method {
        Some(name) => reqwest::Method::from_bytes(name.to_uppercase().as_bytes())
            .map_err(|_| Error::invalid_argument("request", format!("unknown method '{name}'")))?,
        None => reqwest::Method::GET,
    };

    let mut builder = script.env().http.request(method, url);
    if let Some(headers_expr) = &step.headers {
        let headers = evaluate_spec(headers_expr, state, Dialect::Pointer)?;
        if let Value::Object(map) = headers {
            for (name, value) in map {
                builder = builder.header(name.as_str(), crate::transform::value_to_string(&value));
            }
        }
    }
    if let Some(body_expr) = &step.body {
        let body = evaluate_spec(body_expr, state, Dialect::Pointer)?;
        builder = match body {
            Value::Null => builder,
            Value::String(text) => builder.body(text),
            other => builder.json(&other),
        };
    }

    let response = builder.send().await?;
    let status = response.status().as_u16();

    let mut headers = Map::new();
    for (name, value) in response.headers() {
        headers.insert(
            name.as_str().to_string(),
            Value::String(String::from_utf8_lossy(value.as_bytes()).into_owned()),
        );
    }
    let mut cookies = Map::new();
    for cookie in response.cookies() {
        cookies.insert(
            cookie.name().to_string(),
            Value::String(cookie.value().to_string()),
        );
    }
    let content_type = headers
        .get("content-type")
        .and_then(Value::as_str)
        .map(ToString::to_string);

    let text = response.text().await?;
    let body = parse_body(content_type.as_deref(), text);

    let result = json!({
        "status": status,
        "headers": Value::Object(headers),
        "body": body,
        "cookies": Value::Object(cookies),
    });
    write_result(state, step.result_property.as_deref(), result);
    Ok(())
}

async fn apply_inline(
    script: &Script,
    name: &str,
    arg: &Value,
    state: &mut Value,
    context: Option<&Context>,
    debug_trace: bool,
    children: &mut Vec<StepTrace>,
) -> Result<()> {
    match name {
        "eval" => {
            let nested = Script::new(
                json!({"name": format!("{}.eval", script.name()), "steps": arg}),
                Arc::clone(script.env()),
            )?;
            let (result, sub_trace) = execute(&nested, state.clone(), context, debug_trace).await?;
            children.extend(sub_trace);
            *state = result;
        }
        "script" => {
            // Named script invocation is an admin affordance: a caller
            // context must not smuggle itself into another script.
            if context.is_some() {
                return Err(Error::PermissionDenied {
                    entity: "Script".to_string(),
                    operation: "run".to_string(),
                    field: None,
                });
            }
            let registry = script.registry().ok_or_else(|| {
                Error::Internal("script registry is no longer available".to_string())
            })?;

            let (nested, data, nested_debug) = match arg {
                Value::String(name) => {
                    let found = registry.get(name).ok_or_else(|| {
                        Error::Config(format!("script '{name}' is not registered"))
                    })?;
                    (found, state.clone(), false)
                }
                Value::Object(map) => {
                    let nested = if let Some(steps) = map.get("steps") {
                        Script::new(
                            json!({
                                "name": format!("{}.script", script.name()),
                                "steps": steps
                            }),
                            Arc::clone(script.env()),
                        )?
                    } else {
                        let name = map.get("name").and_then(Value::as_str).ok_or_else(|| {
                            Error::invalid_argument("script", "expected a script name or steps")
                        })?;
                        registry.get(name).ok_or_else(|| {
                            Error::Config(format!("script '{name}' is not registered"))
                        })?
                    };
                    let data = match map.get("data") {
                        Some(expr) => evaluate_spec(expr, state, Dialect::Pointer)?,
                        None => state.clone(),
                    };
                    let nested_debug =
                        map.get("debug").and_then(Value::as_bool).unwrap_or(false);
                    (nested, data, nested_debug)
                }
                _ => {
                    return Err(Error::invalid_argument(
                        "script",
                        "expected a script name or {name | steps, data, debug}",
                    ))
                }
            };
            let (result, sub_trace) =
                execute(&nested, data, None, nested_debug || debug_trace).await?;
            if nested_debug {
                *state = json!({
                    "output": result,
                    "steps": serde_json::to_value(&sub_trace)?,
                });
            } else {
                *state = result;
            }
            children.extend(sub_trace);
        }
        operator => {
            // Regular transformation operator against the whole state,
            // with the usual null bail.
            if !state.is_null() {
                *state = apply_operator(operator, arg, state, Dialect::Pointer)?;
            }
        }
    }
    Ok(())
}

fn apply_increment(state: &mut Value, ptr: &str) {
    let current = pointer::get(state, ptr);
    let next = if current.is_null() {
        json!(0)
    } else if let Some(n) = current.as_i64() {
        json!(n + 1)
    } else if let Some(f) = current.as_f64() {
        json!(f + 1.0)
    } else {
        json!(0)
    };
    pointer::set(state, ptr, next);
}

/// Numeric or lexicographic comparison for the ordering jump operators.
fn compare(left: &Value, right: &Value) -> Option<CmpOrdering> {
    if let (Some(l), Some(r)) = (left.as_f64(), right.as_f64()) {
        return l.partial_cmp(&r);
    }
    if let (Some(l), Some(r)) = (left.as_str(), right.as_str()) {
        return Some(l.cmp(r));
    }
    None
}

/// Resolve a jump operand: mappings evaluate as transformations,
/// strings with a leading `/` are pointers, everything else (arrays
/// included) is a literal.
fn jump_operand(operand: &Value, state: &Value) -> Result<Value> {
    match operand {
        Value::Object(_) => evaluate_spec(operand, state, Dialect::Pointer),
        Value::String(s) if s.starts_with('/') => Ok(pointer::get(state, s)),
        other => Ok(other.clone()),
    }
}

fn evaluate_jump(script: &Script, jump: &JumpSpec, state: &Value) -> Result<Option<usize>> {
    let (to, taken) = match jump {
        JumpSpec::Unconditional(to) => (to, true),
        JumpSpec::Conditional(JumpCondition {
            to,
            left,
            right,
            operator,
        }) => {
            let left = jump_operand(left, state)?;
            let right = jump_operand(right, state)?;
            let taken = match operator.as_str() {
                "==" | "===" => left == right,
                "!=" | "!==" => left != right,
                "<" => compare(&left, &right) == Some(CmpOrdering::Less),
                ">" => compare(&left, &right) == Some(CmpOrdering::Greater),
                "<=" => matches!(
                    compare(&left, &right),
                    Some(CmpOrdering::Less | CmpOrdering::Equal)
                ),
                ">=" => matches!(
                    compare(&left, &right),
                    Some(CmpOrdering::Greater | CmpOrdering::Equal)
                ),
                "in" => right.as_array().is_some_and(|items| items.contains(&left)),
                // Unknown operator: the jump is simply not taken.
                _ => false,
            };
            (to, taken)
        }
    };

    if !taken {
        return Ok(None);
    }
    script
        .label_index(to)
        .map(Some)
        .ok_or_else(|| Error::UnknownLabel {
            script: script.name().to_string(),
            label: to.clone(),
        })
}

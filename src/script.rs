//! Scripted workflows over labeled step lists.
//!
//! A script is a finite state machine: each step may run a storage
//! query, an HTTP request, a transformation, an increment, and a jump,
//! in that order, against a single mutable JSON state. Jumps target
//! labels; a step budget bounds runaway loops; at most one activation
//! of a script runs at a time.
//!
//! ```text
//! run(input)
//!   │
//!   ▼
//! ┌──────────────────────────────────────────────┐
//! │ state ◀── query ── request ── transform ──┐  │
//! │   ▲                                       │  │
//! │   └── increment ── jump? ─────────────────┘  │
//! └──────────────────────────────────────────────┘
//!   │
//!   ▼
//! final state (or debug trace)
//! ```

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::context::Context;
use crate::storage::{ScriptRunner, Storage};
use crate::transform;
use crate::{Error, Result};

pub mod runtime;
pub mod scheduler;

/// Step operators handled by the runtime rather than the transformation
/// registry.
const RUNTIME_OPERATORS: &[&str] = &["eval", "script"];

// ============================================================================
// Definition types (deserialized from YAML/JSON)
// ============================================================================

/// A script definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptDefinition {
    /// Unique name.
    #[serde(default)]
    pub name: String,

    /// Ordered steps.
    #[serde(default)]
    pub steps: Vec<StepDef>,

    /// Step budget; exceeding it fails the run.
    #[serde(default = "default_max_steps", rename = "maxSteps")]
    pub max_steps: u64,

    /// Milliseconds to wait between steps.
    #[serde(default)]
    pub delay: Option<u64>,

    /// Six-field cron expression (seconds first).
    #[serde(default)]
    pub schedule: Option<String>,

    /// Run once, two seconds after startup.
    #[serde(default, rename = "runOnStartup")]
    pub run_on_startup: bool,
}

const fn default_max_steps() -> u64 {
    1000
}

/// One step: a bare label or a step mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StepDef {
    /// A jump target with no behavior.
    Label(String),
    /// A step with substeps.
    Step(StepSpec),
}

/// A step mapping. Substeps execute in the order query, request,
/// transform and inline operators, increment, jump.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepSpec {
    /// Jump target name for this step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// Storage query substep.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<QuerySpec>,

    /// Outbound HTTP substep.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<RequestSpec>,

    /// Transformation template applied to the whole state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<Value>,

    /// Pointer to a counter: missing becomes 0, otherwise adds 1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub increment: Option<String>,

    /// Conditional or unconditional jump.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jump: Option<JumpSpec>,

    /// Inline operator keys (`object: …`, `eval: …`, `script: …`),
    /// applied to the state in template order.
    #[serde(flatten)]
    pub inline: serde_json::Map<String, Value>,
}

/// Query substep: a bare query string or the full form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QuerySpec {
    /// Just a query string; result lands at `/result`.
    Plain(String),
    /// Full form with arguments and result routing.
    Full(QueryStep),
}

/// Full query substep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryStep {
    /// The query string, with `?`/`$name` placeholders.
    pub query: String,

    /// Placeholder arguments: each entry is an expression evaluated
    /// against the current state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,

    /// Where to write the response; empty string replaces the state.
    #[serde(default, rename = "resultProperty", skip_serializing_if = "Option::is_none")]
    pub result_property: Option<String>,

    /// Pass the caller context to storage instead of admin mode.
    #[serde(default, rename = "runInContext")]
    pub run_in_context: bool,
}

/// Request substep: a bare URL or the full form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestSpec {
    /// GET this URL; response lands at `/result`.
    Plain(String),
    /// Full form.
    Full(RequestStep),
}

/// Full HTTP request substep. `url`, `headers` and `body` are
/// expressions evaluated against the current state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestStep {
    /// Target URL expression.
    pub url: Value,

    /// HTTP method, default GET.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    /// Header mapping expression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<Value>,

    /// Body expression; objects and arrays are sent as JSON.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,

    /// Where to write `{status, headers, body, cookies}`.
    #[serde(default, rename = "resultProperty", skip_serializing_if = "Option::is_none")]
    pub result_property: Option<String>,
}

/// Jump: a bare target label (unconditional) or a guarded form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JumpSpec {
    /// Unconditional jump.
    Unconditional(String),
    /// Jump when the comparison holds.
    Conditional(JumpCondition),
}

/// Guarded jump. Operands that are mappings or arrays evaluate as
/// transformations against the state; strings with a leading `/` are
/// pointers; anything else is a literal. Defaults compare `true == true`,
/// so `{to: …}` alone is an unconditional jump.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JumpCondition {
    /// Target label.
    pub to: String,

    /// Left operand.
    #[serde(default = "default_operand")]
    pub left: Value,

    /// Right operand.
    #[serde(default = "default_operand")]
    pub right: Value,

    /// One of `==`, `===`, `!=`, `!==`, `<`, `>`, `<=`, `>=`, `in`.
    /// Anything else means the jump is never taken.
    #[serde(default = "default_jump_operator")]
    pub operator: String,
}

fn default_operand() -> Value {
    Value::Bool(true)
}

fn default_jump_operator() -> String {
    "==".to_string()
}

// ============================================================================
// Environment
// ============================================================================

/// Shared services a script executes against.
#[derive(Debug)]
pub struct ScriptEnv {
    /// Storage façade for query substeps.
    pub storage: Arc<Storage>,
    /// HTTP client for request substeps.
    pub http: reqwest::Client,
    /// Registry backing the `script` operator.
    registry: Weak<ScriptSet>,
}

// ============================================================================
// Script
// ============================================================================

/// A validated, runnable script.
#[derive(Debug)]
pub struct Script {
    definition: ScriptDefinition,
    /// Raw step values, kept for debug traces.
    raw_steps: Vec<Value>,
    labels: HashMap<String, usize>,
    schedule: Option<cron::Schedule>,
    running: AtomicBool,
    env: Arc<ScriptEnv>,
}

impl Script {
    /// Validate a definition and bind it to an environment.
    pub fn new(definition: Value, env: Arc<ScriptEnv>) -> Result<Arc<Self>> {
        let name_present = definition
            .get("name")
            .and_then(Value::as_str)
            .is_some_and(|n| !n.is_empty());
        if !name_present {
            return Err(Error::MissingName);
        }

        let parsed: ScriptDefinition = serde_json::from_value(definition)?;
        if parsed.steps.is_empty() {
            return Err(Error::MissingSteps(parsed.name));
        }

        let raw_steps: Vec<Value> = parsed
            .steps
            .iter()
            .map(serde_json::to_value)
            .collect::<std::result::Result<_, _>>()?;

        let mut labels = HashMap::new();
        for (index, step) in parsed.steps.iter().enumerate() {
            let label = match step {
                StepDef::Label(label) => Some(label),
                StepDef::Step(spec) => spec.label.as_ref(),
            };
            if let Some(label) = label {
                if labels.insert(label.clone(), index).is_some() {
                    return Err(Error::Config(format!(
                        "script '{}' defines label '{label}' twice",
                        parsed.name
                    )));
                }
            }
        }

        for step in &parsed.steps {
            if let StepDef::Step(spec) = step {
                validate_step(&parsed.name, spec, &labels)?;
            }
        }

        let schedule = match &parsed.schedule {
            Some(expr) => Some(
                cron::Schedule::from_str(expr)
                    .map_err(|e| Error::Schedule(format!("{}: {e}", parsed.name)))?,
            ),
            None => None,
        };

        Ok(Arc::new(Self {
            definition: parsed,
            raw_steps,
            labels,
            schedule,
            running: AtomicBool::new(false),
            env,
        }))
    }

    /// Script name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    /// Parsed cron schedule, if declared.
    #[must_use]
    pub fn schedule(&self) -> Option<&cron::Schedule> {
        self.schedule.as_ref()
    }

    /// Whether the script wants a startup activation.
    #[must_use]
    pub fn runs_on_startup(&self) -> bool {
        self.definition.run_on_startup
    }

    /// Whether an activation is currently in flight.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run context-free. Rejects with [`Error::ConcurrentRun`] before
    /// executing anything when an activation is already in flight.
    pub async fn run(&self, input: Value) -> Result<Value> {
        let (state, _) = runtime::execute(self, input, None, false).await?;
        Ok(state)
    }

    /// Run with a caller context available to `runInContext` queries.
    pub async fn run_in(&self, input: Value, context: Option<&Context>) -> Result<Value> {
        let (state, _) = runtime::execute(self, input, context, false).await?;
        Ok(state)
    }

    /// Run context-free, recording a trace per executed step.
    pub async fn run_debug(&self, input: Value) -> Result<(Value, Vec<runtime::StepTrace>)> {
        runtime::execute(self, input, None, true).await
    }

    pub(crate) fn definition(&self) -> &ScriptDefinition {
        &self.definition
    }

    pub(crate) fn raw_step(&self, index: usize) -> &Value {
        &self.raw_steps[index]
    }

    pub(crate) fn label_index(&self, label: &str) -> Option<usize> {
        self.labels.get(label).copied()
    }

    pub(crate) fn env(&self) -> &Arc<ScriptEnv> {
        &self.env
    }

    pub(crate) fn registry(&self) -> Option<Arc<ScriptSet>> {
        self.env.registry.upgrade()
    }

    pub(crate) fn running_flag(&self) -> &AtomicBool {
        &self.running
    }
}

/// Construction-time validation of one step.
fn validate_step(script: &str, spec: &StepSpec, labels: &HashMap<String, usize>) -> Result<()> {
    if let Some(template) = &spec.transform {
        transform::Transformation::new(template)?;
    }
    for name in spec.inline.keys() {
        if !RUNTIME_OPERATORS.contains(&name.as_str())
            && !transform::is_operator(name, transform::Dialect::Pointer)
        {
            return Err(Error::UnknownOperator(name.clone()));
        }
    }
    let target = match &spec.jump {
        Some(JumpSpec::Unconditional(to)) => Some(to),
        Some(JumpSpec::Conditional(cond)) => Some(&cond.to),
        None => None,
    };
    if let Some(to) = target {
        if !labels.contains_key(to) {
            return Err(Error::UnknownLabel {
                script: script.to_string(),
                label: to.clone(),
            });
        }
    }
    Ok(())
}

// ============================================================================
// Registry
// ============================================================================

/// Named script registry, shared with the scheduler and the storage
/// postprocessor hook.
pub struct ScriptSet {
    scripts: DashMap<String, Arc<Script>>,
    env: Arc<ScriptEnv>,
}

impl ScriptSet {
    /// Create a registry bound to a storage façade.
    #[must_use]
    pub fn new(storage: Arc<Storage>, http: reqwest::Client) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| Self {
            scripts: DashMap::new(),
            env: Arc::new(ScriptEnv {
                storage,
                http,
                registry: weak.clone(),
            }),
        })
    }

    /// The shared environment, for constructing scripts outside the
    /// registry (nested `eval` steps use this too).
    #[must_use]
    pub fn env(&self) -> Arc<ScriptEnv> {
        Arc::clone(&self.env)
    }

    /// Validate and register a script definition.
    pub fn register(&self, definition: Value) -> Result<Arc<Script>> {
        let script = Script::new(definition, self.env())?;
        self.scripts
            .insert(script.name().to_string(), Arc::clone(&script));
        Ok(script)
    }

    /// Load every `*.yaml` definition in a directory. Files that fail
    /// to parse are skipped with a warning.
    pub fn load_directory(&self, dir: &std::path::Path) -> Result<usize> {
        if !dir.is_dir() {
            return Ok(0);
        }
        let mut count = 0;
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
                continue;
            }
            let content = std::fs::read_to_string(&path)?;
            let parsed: std::result::Result<Value, _> = serde_yaml::from_str(&content);
            match parsed.map_err(Error::from).and_then(|v| self.register(v)) {
                Ok(script) => {
                    debug!(script = %script.name(), path = %path.display(), "Loaded script");
                    count += 1;
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to load script");
                }
            }
        }
        Ok(count)
    }

    /// Look up a registered script.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<Script>> {
        self.scripts.get(name).map(|s| Arc::clone(&s))
    }

    /// All registered scripts.
    #[must_use]
    pub fn all(&self) -> Vec<Arc<Script>> {
        self.scripts.iter().map(|s| Arc::clone(&s)).collect()
    }
}

#[async_trait::async_trait]
impl ScriptRunner for ScriptSet {
    async fn run(&self, name: &str, input: Value) -> Result<Value> {
        let script = self
            .get(name)
            .ok_or_else(|| Error::Config(format!("script '{name}' is not registered")))?;
        script.run(input).await
    }
}

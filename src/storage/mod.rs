//! Storage façade: the model registry queries are dispatched against.
//!
//! Owns the registered models and field plugins, and optionally a
//! script runner used for model postprocessors. Backends register
//! models at bootstrap; afterwards the façade is read-only and shared
//! behind an `Arc`.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;

use crate::context::Context;
use crate::model::{FieldPlugin, Model};
use crate::query::executor::{self, QueryOutcome};
use crate::query::{parse, substitute};
use crate::Result;

pub mod memory;

/// Hook for running registered scripts by name (model postprocessors).
///
/// Implemented by the script registry; a trait keeps the storage layer
/// from depending on the script runtime.
#[async_trait]
pub trait ScriptRunner: Send + Sync {
    /// Run the named script over `input`, context-free.
    async fn run(&self, name: &str, input: Value) -> Result<Value>;
}

/// Model registry and query entry point.
pub struct Storage {
    models: DashMap<String, Arc<dyn Model>>,
    plugins: DashMap<String, Arc<dyn FieldPlugin>>,
    script_runner: RwLock<Option<Arc<dyn ScriptRunner>>>,
    user_model: String,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("user_model", &self.user_model)
            .finish_non_exhaustive()
    }
}

impl Storage {
    /// Empty registry. `user_model` names the entity a bare `User`-style
    /// query auto-binds the caller against.
    #[must_use]
    pub fn new(user_model: impl Into<String>) -> Self {
        Self {
            models: DashMap::new(),
            plugins: DashMap::new(),
            script_runner: RwLock::new(None),
            user_model: user_model.into(),
        }
    }

    /// Register a model under its schema name.
    pub fn register_model(&self, model: Arc<dyn Model>) {
        self.models.insert(model.schema().name.clone(), model);
    }

    /// Register a field plugin under its name.
    pub fn register_plugin(&self, plugin: Arc<dyn FieldPlugin>) {
        self.plugins.insert(plugin.name().to_string(), plugin);
    }

    /// Attach the script runner used for model postprocessors.
    pub fn set_script_runner(&self, runner: Arc<dyn ScriptRunner>) {
        *self.script_runner.write() = Some(runner);
    }

    pub(crate) fn script_runner(&self) -> Option<Arc<dyn ScriptRunner>> {
        self.script_runner.read().clone()
    }

    /// Look up a model by entity name.
    #[must_use]
    pub fn model(&self, entity: &str) -> Option<Arc<dyn Model>> {
        self.models.get(entity).map(|m| Arc::clone(&m))
    }

    /// Look up a field plugin by name.
    #[must_use]
    pub fn plugin(&self, name: &str) -> Option<Arc<dyn FieldPlugin>> {
        self.plugins.get(name).map(|p| Arc::clone(&p))
    }

    /// Entity name the caller identity binds against.
    #[must_use]
    pub fn user_model(&self) -> &str {
        &self.user_model
    }

    /// Execute a query, collecting per-alias errors.
    ///
    /// `arguments` fills `?` placeholders (array) or `$name` bindings
    /// (mapping). A missing context means admin mode: no access checks.
    pub async fn execute_query(
        &self,
        query: &str,
        context: Option<&Context>,
        arguments: Option<&Value>,
    ) -> Result<QueryOutcome> {
        let substituted = substitute(query, arguments)?;
        let parsed = parse(&substituted)?;
        Ok(executor::execute(self, &parsed, context).await)
    }

    /// Execute a query, failing on the first alias error.
    ///
    /// This is the strict entry point the script runtime uses; the HTTP
    /// boundary uses [`Storage::execute_query`] to render partial
    /// results alongside errors.
    pub async fn query(
        &self,
        query: &str,
        context: Option<&Context>,
        arguments: Option<&Value>,
    ) -> Result<Value> {
        let outcome = self.execute_query(query, context, arguments).await?;
        match outcome.errors.into_iter().next() {
            Some(alias_error) => Err(alias_error.error),
            None => Ok(outcome.data),
        }
    }
}

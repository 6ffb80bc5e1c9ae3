//! Query dispatch: routes parsed methods to models, enforces access,
//! expands references and resolves plugin fields.

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{json, Map, Value};

use super::{split_method, Query, QueryField};
use crate::context::Context;
use crate::model::{Model, Operation};
use crate::storage::Storage;
use crate::{Error, Result};

/// Outcome of a query: partial data plus per-alias errors.
#[derive(Debug)]
pub struct QueryOutcome {
    /// Successfully resolved aliases.
    pub data: Value,
    /// Aliases that failed, in query order.
    pub errors: Vec<AliasError>,
}

/// One failed alias.
#[derive(Debug)]
pub struct AliasError {
    /// The alias that failed.
    pub alias: String,
    /// Why it failed.
    pub error: Error,
}

impl QueryOutcome {
    /// HTTP status the outcome surfaces as: clean queries are 200,
    /// otherwise the most specific error status wins (403 over 401
    /// over 400 over 500).
    #[must_use]
    pub fn status(&self) -> u16 {
        if self.errors.is_empty() {
            return 200;
        }
        for status in [403, 401, 400] {
            if self.errors.iter().any(|e| e.error.status_code() == status) {
                return status;
            }
        }
        500
    }

    /// Error payload for the boundary: `[{alias, field?, message}]`.
    #[must_use]
    pub fn error_payload(&self) -> Value {
        Value::Array(
            self.errors
                .iter()
                .map(|alias_error| {
                    let mut entry = Map::new();
                    entry.insert("alias".to_string(), json!(alias_error.alias));
                    if let Error::PermissionDenied {
                        field: Some(field), ..
                    } = &alias_error.error
                    {
                        entry.insert("field".to_string(), json!(field));
                    }
                    entry.insert("message".to_string(), json!(alias_error.error.to_string()));
                    Value::Object(entry)
                })
                .collect(),
        )
    }
}

/// Execute every top-level alias, collecting failures per alias.
pub(crate) async fn execute(
    storage: &Storage,
    query: &Query,
    context: Option<&Context>,
) -> QueryOutcome {
    let mut data = Map::new();
    let mut errors = Vec::new();

    for field in &query.fields {
        match execute_alias(storage, field, context).await {
            Ok(value) => {
                data.insert(field.alias.clone(), value);
            }
            Err(error) => errors.push(AliasError {
                alias: field.alias.clone(),
                error,
            }),
        }
    }

    QueryOutcome {
        data: Value::Object(data),
        errors,
    }
}

async fn execute_alias(
    storage: &Storage,
    field: &QueryField,
    context: Option<&Context>,
) -> Result<Value> {
    let (prefix, entity) = split_method(&field.name)?;
    let operation = Operation::parse(&prefix);
    let model = storage
        .model(&entity)
        .ok_or_else(|| Error::UnknownEntity(entity.clone()))?;
    let schema = model.schema();

    let mut params = field.params.clone();

    // A bare read of the user entity with no parameters binds the caller.
    if operation == Operation::Read && params.is_empty() && entity == storage.user_model() {
        if let Some(id) = context.and_then(Context::user_id) {
            params.insert("id".to_string(), json!(id));
        }
    }

    if let Some(ctx) = context {
        // list/create gate on the full parameters, everything else on
        // the id alone: the item is not loaded yet.
        let gate_data = match operation {
            Operation::List | Operation::Create => Value::Object(params.clone()),
            _ => json!({"id": params.get("id").cloned().unwrap_or(Value::Null)}),
        };
        if let Some(predicate) = schema.access.operations.get(operation.as_str()) {
            if !ctx.evaluate(predicate, &gate_data) {
                return Err(Error::PermissionDenied {
                    entity: entity.clone(),
                    operation: operation.as_str().to_string(),
                    field: None,
                });
            }
        }
    }

    if !model.supports(&operation) {
        return Err(Error::UnsupportedOperation {
            entity: entity.clone(),
            operation: operation.as_str().to_string(),
        });
    }

    for selected in &field.fields {
        if !schema.has_field(&selected.name) {
            return Err(Error::UnknownField {
                entity: entity.clone(),
                field: selected.name.clone(),
            });
        }
    }

    let requested: Vec<String> = if field.fields.is_empty() {
        schema.field_names()
    } else {
        field.fields.iter().map(|f| f.name.clone()).collect()
    };

    let result = model
        .execute(&operation, Value::Object(params), &requested)
        .await?;

    let processed = match result {
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(process_item(storage, &model, item, &field.fields, context).await?);
            }
            Value::Array(out)
        }
        item @ Value::Object(_) => {
            process_item(storage, &model, item, &field.fields, context).await?
        }
        // Scalars (count) pass through untouched.
        scalar => scalar,
    };

    if let Some(script) = &schema.postprocess {
        let runner = storage.script_runner().ok_or_else(|| {
            Error::Config(format!(
                "model '{entity}' wants postprocessor '{script}' but no script runner is attached"
            ))
        })?;
        return runner.run(script, processed).await;
    }
    Ok(processed)
}

/// Post-process a single returned item: field access checks, plugin
/// resolution, reference expansion, one re-read for missing fields,
/// then projection to the selection.
fn process_item<'a>(
    storage: &'a Storage,
    model: &'a Arc<dyn Model>,
    mut item: Value,
    selection: &'a [QueryField],
    context: Option<&'a Context>,
) -> BoxFuture<'a, Result<Value>> {
    async move {
        let schema = model.schema();
        if selection.is_empty() || !item.is_object() {
            return Ok(item);
        }

        if let Some(ctx) = context {
            for selected in selection {
                if let Some(predicate) = schema.access.fields.get(&selected.name) {
                    if !ctx.evaluate(predicate, &item) {
                        return Err(Error::PermissionDenied {
                            entity: schema.name.clone(),
                            operation: "read".to_string(),
                            field: Some(selected.name.clone()),
                        });
                    }
                }
            }
        }

        for selected in selection {
            let Some(spec) = schema.properties.get(&selected.name) else {
                continue;
            };

            if let Some(plugin_name) = &spec.plugin {
                let plugin = storage.plugin(plugin_name).ok_or_else(|| {
                    Error::Config(format!("field plugin '{plugin_name}' is not registered"))
                })?;
                let id = item.get("id").cloned().unwrap_or(Value::Null);
                let resolved = plugin
                    .resolve(
                        &schema.name,
                        &selected.name,
                        &id,
                        context.and_then(Context::user),
                    )
                    .await?;
                item[&selected.name] = resolved;
                continue;
            }

            if let (Some(target), false) = (&spec.references, selected.fields.is_empty()) {
                let reference = item.get(&selected.name).cloned().unwrap_or(Value::Null);
                if reference.is_null() {
                    continue;
                }
                let target_model = storage
                    .model(target)
                    .ok_or_else(|| Error::UnknownEntity(target.clone()))?;
                let nested_fields: Vec<String> =
                    selected.fields.iter().map(|f| f.name.clone()).collect();
                let nested = target_model
                    .execute(
                        &Operation::Read,
                        json!({"id": reference}),
                        &nested_fields,
                    )
                    .await?;
                item[&selected.name] =
                    process_item(storage, &target_model, nested, &selected.fields, context)
                        .await?;
            }
        }

        // Single retry for fields the backend did not return.
        let missing: Vec<String> = selection
            .iter()
            .filter(|s| item.get(&s.name).is_none())
            .map(|s| s.name.clone())
            .collect();
        if !missing.is_empty() {
            if let Some(id) = item.get("id").cloned() {
                let reread = model
                    .execute(&Operation::Read, json!({"id": id}), &missing)
                    .await?;
                if let Value::Object(map) = reread {
                    for (key, value) in map {
                        if missing.contains(&key) {
                            item[&key] = value;
                        }
                    }
                }
            }
        }

        // Project to the selection, applying aliases.
        let mut projected = Map::new();
        for selected in selection {
            projected.insert(
                selected.alias.clone(),
                item.get(&selected.name).cloned().unwrap_or(Value::Null),
            );
        }
        Ok(Value::Object(projected))
    }
    .boxed()
}

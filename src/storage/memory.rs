//! In-memory model backend.
//!
//! Backs the bundled model definitions when no external storage is
//! wired in, and doubles as the fixture backend for tests. Items live
//! in a map keyed by id; filtering is plain field equality.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::model::{Model, ModelSchema, Operation};
use crate::{Error, Result};

/// A model holding its items in memory.
pub struct MemoryModel {
    schema: ModelSchema,
    items: RwLock<HashMap<String, Value>>,
}

impl MemoryModel {
    /// Empty model for a schema.
    #[must_use]
    pub fn new(schema: ModelSchema) -> Self {
        Self {
            schema,
            items: RwLock::new(HashMap::new()),
        }
    }

    /// Insert fixture items directly, assigning ids where missing.
    pub fn seed(&self, items: Vec<Value>) {
        let mut store = self.items.write();
        for mut item in items {
            let id = match item.get("id").and_then(Value::as_str) {
                Some(id) => id.to_string(),
                None => {
                    let id = Uuid::new_v4().to_string();
                    item["id"] = json!(id);
                    id
                }
            };
            store.insert(id, item);
        }
    }

    /// Number of stored items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    /// Whether the model holds no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    fn id_param(params: &Value) -> Result<String> {
        match params.get("id") {
            Some(Value::String(id)) => Ok(id.clone()),
            Some(Value::Number(n)) => Ok(n.to_string()),
            _ => Err(Error::Internal("missing id parameter".to_string())),
        }
    }

    fn matches(item: &Value, filter: &Map<String, Value>) -> bool {
        filter
            .iter()
            .all(|(key, expected)| item.get(key) == Some(expected))
    }
}

#[async_trait]
impl Model for MemoryModel {
    fn schema(&self) -> &ModelSchema {
        &self.schema
    }

    async fn execute(
        &self,
        operation: &Operation,
        params: Value,
        _fields: &[String],
    ) -> Result<Value> {
        let filter = params.as_object().cloned().unwrap_or_default();
        match operation {
            Operation::Read => {
                let id = Self::id_param(&params)?;
                Ok(self.items.read().get(&id).cloned().unwrap_or(Value::Null))
            }
            Operation::List => {
                let store = self.items.read();
                let mut found: Vec<Value> = store
                    .values()
                    .filter(|item| Self::matches(item, &filter))
                    .cloned()
                    .collect();
                // Stable output order for callers and tests.
                found.sort_by(|a, b| {
                    let left = a.get("id").and_then(Value::as_str).unwrap_or_default();
                    let right = b.get("id").and_then(Value::as_str).unwrap_or_default();
                    left.cmp(right)
                });
                Ok(Value::Array(found))
            }
            Operation::Count => {
                let store = self.items.read();
                let count = store
                    .values()
                    .filter(|item| Self::matches(item, &filter))
                    .count();
                Ok(json!(count))
            }
            Operation::Create => {
                let mut item = Value::Object(filter);
                let id = match item.get("id").and_then(Value::as_str) {
                    Some(id) => id.to_string(),
                    None => {
                        let id = Uuid::new_v4().to_string();
                        item["id"] = json!(id);
                        id
                    }
                };
                self.items.write().insert(id, item.clone());
                Ok(item)
            }
            Operation::Update => {
                let id = Self::id_param(&params)?;
                let mut store = self.items.write();
                let item = store
                    .get_mut(&id)
                    .ok_or_else(|| Error::Internal(format!("no item '{id}' to update")))?;
                for (key, value) in filter {
                    if key != "id" {
                        item[&key] = value;
                    }
                }
                Ok(item.clone())
            }
            Operation::Remove => {
                let id = Self::id_param(&params)?;
                let removed = self.items.write().remove(&id);
                Ok(removed.unwrap_or_else(|| json!({"id": id})))
            }
            Operation::Other(name) => Err(Error::UnsupportedOperation {
                entity: self.schema.name.clone(),
                operation: name.clone(),
            }),
        }
    }
}

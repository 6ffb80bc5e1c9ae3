//! Model seam: the trait storage backends implement, plus the YAML
//! schema describing an entity's fields and access rules.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Result;

/// Operations the query layer can route to a model.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Fetch a filtered collection.
    List,
    /// Fetch one item, usually by id. The default when the method name
    /// carries no operation prefix.
    Read,
    /// Insert a new item.
    Create,
    /// Update fields of an existing item.
    Update,
    /// Delete an item. `delete` in queries is an alias.
    Remove,
    /// Count a filtered collection.
    Count,
    /// A model-specific extension operation.
    Other(String),
}

impl Operation {
    /// Parse a lowercase operation prefix.
    #[must_use]
    pub fn parse(prefix: &str) -> Self {
        match prefix {
            "" | "read" => Self::Read,
            "list" => Self::List,
            "create" => Self::Create,
            "update" => Self::Update,
            "delete" | "remove" => Self::Remove,
            "count" => Self::Count,
            other => Self::Other(other.to_string()),
        }
    }

    /// Canonical lowercase name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::List => "list",
            Self::Read => "read",
            Self::Create => "create",
            Self::Update => "update",
            Self::Remove => "remove",
            Self::Count => "count",
            Self::Other(name) => name,
        }
    }
}

/// One declared field of an entity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldSpec {
    /// JSON type name, informational.
    #[serde(rename = "type", default)]
    pub field_type: Option<String>,

    /// Entity this field points at; triggers reference expansion when
    /// the field is queried with a sub-selection.
    #[serde(default)]
    pub references: Option<String>,

    /// Registered resolver that computes this field instead of storage.
    #[serde(default)]
    pub plugin: Option<String>,
}

/// Access predicates for an entity.
///
/// Missing entries allow: models opt in to restrictions. Admin-mode
/// dispatch (no context) never consults these.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccessRules {
    /// Predicate per operation name.
    #[serde(default)]
    pub operations: HashMap<String, String>,

    /// Read predicate per field name.
    #[serde(default)]
    pub fields: HashMap<String, String>,
}

/// Entity schema, deserialized from a `models/*.yaml` definition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelSchema {
    /// Entity name, capitalized (`User`, `AuthnToken`).
    pub name: String,

    /// Declared fields.
    #[serde(default)]
    pub properties: HashMap<String, FieldSpec>,

    /// Access predicates.
    #[serde(default)]
    pub access: AccessRules,

    /// Script run over query results before they are returned.
    #[serde(default)]
    pub postprocess: Option<String>,
}

impl ModelSchema {
    /// Parse a schema from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Whether `field` is declared.
    #[must_use]
    pub fn has_field(&self, field: &str) -> bool {
        self.properties.contains_key(field)
    }

    /// All declared field names.
    #[must_use]
    pub fn field_names(&self) -> Vec<String> {
        self.properties.keys().cloned().collect()
    }
}

/// A pluggable storage model.
///
/// Backends implement this per entity; the query executor routes parsed
/// operations here and postprocesses the results.
#[async_trait]
pub trait Model: Send + Sync {
    /// The entity schema.
    fn schema(&self) -> &ModelSchema;

    /// Whether the backend can execute `operation`.
    fn supports(&self, operation: &Operation) -> bool {
        !matches!(operation, Operation::Other(_))
    }

    /// Execute an operation. `fields` is the requested projection; the
    /// backend may return more fields than asked for, never fewer than
    /// it has.
    async fn execute(&self, operation: &Operation, params: Value, fields: &[String])
        -> Result<Value>;
}

/// Resolver for fields computed outside storage.
#[async_trait]
pub trait FieldPlugin: Send + Sync {
    /// Plugin name, referenced by `FieldSpec::plugin`.
    fn name(&self) -> &str;

    /// Resolve a plugin field for one item.
    async fn resolve(
        &self,
        entity: &str,
        field: &str,
        id: &Value,
        user: Option<&Value>,
    ) -> Result<Value>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_parsing() {
        assert_eq!(Operation::parse("list"), Operation::List);
        assert_eq!(Operation::parse(""), Operation::Read);
        assert_eq!(Operation::parse("read"), Operation::Read);
        assert_eq!(Operation::parse("delete"), Operation::Remove);
        assert_eq!(Operation::parse("remove"), Operation::Remove);
        assert_eq!(
            Operation::parse("archive"),
            Operation::Other("archive".to_string())
        );
    }

    #[test]
    fn schema_from_yaml() {
        let schema = ModelSchema::from_yaml(
            r"
name: Post
properties:
  id:
    type: string
  title:
    type: string
  author:
    type: string
    references: User
access:
  operations:
    update: u.id == i.author
  fields:
    title: 'true'
",
        )
        .unwrap();
        assert_eq!(schema.name, "Post");
        assert!(schema.has_field("title"));
        assert!(!schema.has_field("body"));
        assert_eq!(
            schema.properties["author"].references.as_deref(),
            Some("User")
        );
        assert_eq!(
            schema.access.operations["update"],
            "u.id == i.author"
        );
    }
}

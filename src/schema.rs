// Schema query contract and an in-memory registry implementing it
//
// The graph never parses schemas itself. It asks a [SchemaQuery] for the relationship fields of
// a type and caches what it derives. [SchemaRegistry] is the bundled implementation: schemas can
// be registered at runtime or loaded from a TOML document.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashMap},
    fs::read_to_string,
    path::Path,
    sync::Arc,
};

use crate::GraphError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationshipKind {
    #[serde(alias = "belongsTo", alias = "belongs-to")]
    One,
    #[serde(alias = "hasMany", alias = "has-many")]
    Many,
}

impl RelationshipKind {
    pub fn is_collection(&self) -> bool {
        matches!(self, RelationshipKind::Many)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipOptions {
    #[serde(rename = "async", default)]
    pub is_async: bool,
    /// Field name of the inverse relationship on the related type. `None` declares that the
    /// relationship has no schema-visible inverse.
    #[serde(default)]
    pub inverse: Option<String>,
    #[serde(default)]
    pub polymorphic: bool,
    /// The abstract type this field's owner implements when it satisfies a polymorphic
    /// relationship.
    #[serde(rename = "as", default)]
    pub as_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipSchema {
    #[serde(default)]
    pub name: String,
    pub kind: RelationshipKind,
    #[serde(rename = "type")]
    pub resource_type: String,
    #[serde(flatten)]
    pub options: RelationshipOptions,
}

impl RelationshipSchema {
    pub fn belongs_to(resource_type: &str) -> Self {
        RelationshipSchema {
            name: String::new(),
            kind: RelationshipKind::One,
            resource_type: resource_type.to_string(),
            options: RelationshipOptions::default(),
        }
    }

    pub fn has_many(resource_type: &str) -> Self {
        RelationshipSchema {
            kind: RelationshipKind::Many,
            ..Self::belongs_to(resource_type)
        }
    }

    pub fn inverse(mut self, inverse: &str) -> Self {
        self.options.inverse = Some(inverse.to_string());
        self
    }

    pub fn is_async(mut self, is_async: bool) -> Self {
        self.options.is_async = is_async;
        self
    }

    pub fn polymorphic(mut self) -> Self {
        self.options.polymorphic = true;
        self
    }

    pub fn as_type(mut self, abstract_type: &str) -> Self {
        self.options.as_type = Some(abstract_type.to_string());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeSchema {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSchema {
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeSchema>,
    #[serde(default)]
    pub relationships: BTreeMap<String, RelationshipSchema>,
}

impl ResourceSchema {
    pub fn with_attribute(mut self, name: &str) -> Self {
        self.attributes.insert(
            name.to_string(),
            AttributeSchema {
                name: name.to_string(),
                kind: None,
            },
        );
        self
    }

    pub fn with_relationship(mut self, name: &str, mut relationship: RelationshipSchema) -> Self {
        relationship.name = name.to_string();
        self.relationships.insert(name.to_string(), relationship);
        self
    }

    /// Field names are map keys in serialized schemas; copy them into the entries.
    fn normalize_names(&mut self) {
        for (name, attr) in self.attributes.iter_mut() {
            attr.name = name.clone();
        }
        for (name, rel) in self.relationships.iter_mut() {
            rel.name = name.clone();
        }
    }
}

/// The schema contract the graph consumes. Implementations must be pure and stable for a given
/// type for the lifetime of a session.
pub trait SchemaQuery: Send + Sync {
    fn resource_schema(&self, resource_type: &str) -> Option<Arc<ResourceSchema>>;

    fn relationships_definition_for(
        &self,
        resource_type: &str,
    ) -> Option<BTreeMap<String, RelationshipSchema>> {
        self.resource_schema(resource_type)
            .map(|schema| schema.relationships.clone())
    }

    fn attributes_definition_for(
        &self,
        resource_type: &str,
    ) -> Option<BTreeMap<String, AttributeSchema>> {
        self.resource_schema(resource_type)
            .map(|schema| schema.attributes.clone())
    }

    fn relationship(&self, resource_type: &str, field: &str) -> Option<RelationshipSchema> {
        self.resource_schema(resource_type)
            .and_then(|schema| schema.relationships.get(field).cloned())
    }
}

/// Thread-safe registry of resource schemas.
#[derive(Debug)]
pub struct SchemaRegistry(Arc<RwLock<HashMap<String, Arc<ResourceSchema>>>>);

impl Clone for SchemaRegistry {
    fn clone(&self) -> Self {
        SchemaRegistry(self.0.clone())
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaRegistry {
    pub fn new() -> Self {
        SchemaRegistry(Arc::new(RwLock::new(HashMap::new())))
    }

    /// Register a schema for `resource_type`.
    ///
    /// If a schema for this type already exists, it will be overwritten and a log message
    /// emitted. Definitions already derived by a graph from the previous schema are not
    /// recomputed.
    pub fn register(&self, resource_type: &str, mut schema: ResourceSchema) {
        schema.normalize_names();
        let mut writer = self.0.write();
        if writer.contains_key(resource_type) {
            tracing::info!(
                "[SchemaRegistry::register] Overwriting existing schema: {}",
                resource_type
            );
        }
        writer.insert(resource_type.to_string(), Arc::new(schema));
    }

    /// Retrieve a schema by type name. Returns a cheap Arc clone if the schema exists.
    pub fn get(&self, resource_type: &str) -> Option<Arc<ResourceSchema>> {
        self.0.read().get(resource_type).cloned()
    }

    pub fn list_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.0.read().keys().cloned().collect();
        types.sort();
        types
    }

    /// Parse a TOML document whose top-level tables are resource types.
    pub fn from_toml_str(content: &str) -> Result<SchemaRegistry, GraphError> {
        let schemas: BTreeMap<String, ResourceSchema> = toml::from_str(content)?;
        let registry = SchemaRegistry::new();
        for (resource_type, schema) in schemas {
            registry.register(&resource_type, schema);
        }
        Ok(registry)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<SchemaRegistry, GraphError> {
        tracing::debug!("[SchemaRegistry::from_path] Reading {:?}", path.as_ref());
        SchemaRegistry::from_toml_str(&read_to_string(path)?)
    }
}

impl SchemaQuery for SchemaRegistry {
    fn resource_schema(&self, resource_type: &str) -> Option<Arc<ResourceSchema>> {
        self.get(resource_type)
    }
}

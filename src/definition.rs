//! Relationship definitions.
//!
//! A [RelationshipDefinition] is the immutable, bidirectional description of one relationship
//! field: what it points at and what its inverse looks like. The [DefinitionTable] derives each
//! definition from the [SchemaQuery] exactly once per `(type, field)` and shares it via `Arc`.
//!
//! Relationships declared with `inverse: None` still get an inverse for bookkeeping. That
//! inverse is *implicit*: it has a synthetic field name of the form `implicit-{type}:{field}`
//! and is never visible through the schema.

use serde::Serialize;
use std::{collections::HashMap, sync::Arc};

use crate::{
    schema::{RelationshipKind, RelationshipSchema, SchemaQuery},
    GraphError,
};

pub const IMPLICIT_KEY_PREFIX: &str = "implicit-";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelationshipDefinition {
    /// Field name on `resource_type`.
    pub key: String,
    /// The type that owns this field.
    pub resource_type: String,
    pub kind: RelationshipKind,
    pub target_type: String,
    pub is_async: bool,
    pub is_polymorphic: bool,
    /// True for the synthetic side of a relationship declared without an inverse.
    pub is_implicit: bool,
    pub inverse_key: String,
    /// The type the inverse field points at.
    pub inverse_type: String,
    pub inverse_kind: RelationshipKind,
    pub inverse_is_async: bool,
    pub inverse_is_polymorphic: bool,
    pub inverse_is_implicit: bool,
}

impl RelationshipDefinition {
    pub fn is_collection(&self) -> bool {
        self.kind.is_collection()
    }

    pub fn inverse_is_collection(&self) -> bool {
        self.inverse_kind.is_collection()
    }

    /// Either side of the pair is synthetic, so there is no declared inverse contract.
    pub fn has_implicit_side(&self) -> bool {
        self.is_implicit || self.inverse_is_implicit
    }

    /// The definition of the synthetic inverse of a relationship declared without one.
    fn implicit_inverse(&self) -> RelationshipDefinition {
        RelationshipDefinition {
            key: self.inverse_key.clone(),
            resource_type: self.target_type.clone(),
            kind: RelationshipKind::Many,
            target_type: self.resource_type.clone(),
            is_async: false,
            is_polymorphic: false,
            is_implicit: true,
            inverse_key: self.key.clone(),
            inverse_type: self.target_type.clone(),
            inverse_kind: self.kind,
            inverse_is_async: self.is_async,
            inverse_is_polymorphic: self.is_polymorphic,
            inverse_is_implicit: false,
        }
    }
}

pub fn implicit_key(resource_type: &str, field: &str) -> String {
    format!("{IMPLICIT_KEY_PREFIX}{resource_type}:{field}")
}

pub fn is_implicit_key(field: &str) -> bool {
    field.starts_with(IMPLICIT_KEY_PREFIX)
}

/// Cache of derived definitions for one session.
pub struct DefinitionTable {
    schema: Arc<dyn SchemaQuery>,
    definitions: HashMap<String, HashMap<String, Arc<RelationshipDefinition>>>,
    implicit: HashMap<String, Arc<RelationshipDefinition>>,
    strict: bool,
}

impl DefinitionTable {
    pub fn new(schema: Arc<dyn SchemaQuery>) -> Self {
        DefinitionTable {
            schema,
            definitions: HashMap::new(),
            implicit: HashMap::new(),
            strict: false,
        }
    }

    /// Reject declared inverses that do not point back at the declaring field.
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn schema(&self) -> &Arc<dyn SchemaQuery> {
        &self.schema
    }

    /// Cached lookup that never consults the schema.
    pub fn peek(&self, resource_type: &str, field: &str) -> Option<Arc<RelationshipDefinition>> {
        if is_implicit_key(field) {
            return self.implicit.get(field).cloned();
        }
        self.definitions
            .get(resource_type)
            .and_then(|fields| fields.get(field))
            .cloned()
    }

    /// The definition of `resource_type.field`, derived on first use.
    ///
    /// Implicit field names resolve only once the declaring side has been derived.
    pub fn get(
        &mut self,
        resource_type: &str,
        field: &str,
    ) -> Result<Arc<RelationshipDefinition>, GraphError> {
        if let Some(definition) = self.peek(resource_type, field) {
            return Ok(definition);
        }
        if is_implicit_key(field) {
            return Err(GraphError::unknown_field(resource_type, field));
        }
        let relationship = self
            .schema
            .relationship(resource_type, field)
            .ok_or_else(|| GraphError::unknown_field(resource_type, field))?;
        let definition = Arc::new(self.upgrade(resource_type, field, &relationship)?);
        tracing::debug!(
            "[DefinitionTable::get] derived {}.{} -> {} (inverse {}{})",
            resource_type,
            field,
            definition.target_type,
            definition.inverse_key,
            if definition.inverse_is_implicit {
                ", implicit"
            } else {
                ""
            }
        );
        if definition.inverse_is_implicit {
            self.implicit
                .entry(definition.inverse_key.clone())
                .or_insert_with(|| Arc::new(definition.implicit_inverse()));
        }
        self.definitions
            .entry(resource_type.to_string())
            .or_default()
            .insert(field.to_string(), definition.clone());
        Ok(definition)
    }

    /// Definition of the inverse side of `definition` as seen from `related_type`.
    pub fn inverse_of(
        &mut self,
        definition: &RelationshipDefinition,
        related_type: &str,
    ) -> Result<Arc<RelationshipDefinition>, GraphError> {
        if definition.inverse_is_implicit {
            self.implicit
                .get(&definition.inverse_key)
                .cloned()
                .ok_or_else(|| GraphError::unknown_field(related_type, &definition.inverse_key))
        } else {
            self.get(related_type, &definition.inverse_key)
        }
    }

    fn upgrade(
        &self,
        resource_type: &str,
        field: &str,
        relationship: &RelationshipSchema,
    ) -> Result<RelationshipDefinition, GraphError> {
        let options = &relationship.options;
        let Some(inverse_key) = options.inverse.clone() else {
            return Ok(RelationshipDefinition {
                key: field.to_string(),
                resource_type: resource_type.to_string(),
                kind: relationship.kind,
                target_type: relationship.resource_type.clone(),
                is_async: options.is_async,
                is_polymorphic: options.polymorphic,
                is_implicit: false,
                inverse_key: implicit_key(resource_type, field),
                inverse_type: resource_type.to_string(),
                inverse_kind: RelationshipKind::Many,
                inverse_is_async: false,
                inverse_is_polymorphic: false,
                inverse_is_implicit: true,
            });
        };

        let Some(inverse) = self
            .schema
            .relationship(&relationship.resource_type, &inverse_key)
        else {
            tracing::debug!(
                "[DefinitionTable::upgrade] {}.{} names inverse '{}' which {} does not declare",
                resource_type,
                field,
                inverse_key,
                relationship.resource_type
            );
            return Err(GraphError::unknown_field(
                &relationship.resource_type,
                &inverse_key,
            ));
        };
        if self.strict {
            assert_mutual(resource_type, field, relationship, &inverse)?;
        }

        Ok(RelationshipDefinition {
            key: field.to_string(),
            resource_type: resource_type.to_string(),
            kind: relationship.kind,
            target_type: relationship.resource_type.clone(),
            is_async: options.is_async,
            is_polymorphic: options.polymorphic,
            is_implicit: false,
            inverse_key,
            inverse_type: inverse.resource_type.clone(),
            inverse_kind: inverse.kind,
            inverse_is_async: inverse.options.is_async,
            inverse_is_polymorphic: inverse.options.polymorphic,
            inverse_is_implicit: false,
        })
    }
}

/// `resource_type.field` and its declared inverse must name each other. The inverse points back
/// at the owner type itself, or at the abstract type the owner implements through `as`.
fn assert_mutual(
    resource_type: &str,
    field: &str,
    relationship: &RelationshipSchema,
    inverse: &RelationshipSchema,
) -> Result<(), GraphError> {
    let mut errors = Vec::new();
    let names_field = inverse.options.inverse.as_deref() == Some(field);
    if !names_field {
        errors.push(format!(
            "\t- inverse: expected {field}, found {}",
            inverse.options.inverse.as_deref().unwrap_or("none")
        ));
    }
    let points_back = inverse.resource_type == resource_type
        || relationship.options.as_type.as_deref() == Some(inverse.resource_type.as_str());
    if !points_back {
        errors.push(format!(
            "\t- type: expected {resource_type}, found {}",
            inverse.resource_type
        ));
    }
    if errors.is_empty() {
        return Ok(());
    }
    Err(GraphError::SchemaViolation(format!(
        "'{resource_type}.{field}' declares '{}.{}' as its inverse, but the two do not \
         describe the same relationship:\n{}",
        relationship.resource_type,
        inverse.name,
        errors.join("\n")
    )))
}

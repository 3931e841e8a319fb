//! Polymorphic conformance checking.
//!
//! A relationship declared `polymorphic` accepts any type that *implements* its target: the
//! concrete type must declare the inverse field with `as = <target>` and with options mirroring
//! the declared inverse. Non-polymorphic relationships accept their target type only.
//!
//! Checking is a construction time capability. A checker built with `strict = false` accepts
//! everything, so release builds pay nothing for it.

use std::sync::Arc;

use crate::{
    definition::RelationshipDefinition,
    identifier::ResourceKey,
    schema::{RelationshipKind, RelationshipSchema, SchemaQuery},
    GraphError,
};

#[derive(Clone)]
pub struct ConformanceChecker {
    strict: bool,
    schema: Arc<dyn SchemaQuery>,
}

impl ConformanceChecker {
    pub fn new(schema: Arc<dyn SchemaQuery>, strict: bool) -> Self {
        ConformanceChecker { strict, schema }
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Check that `added` may be placed in the `definition` relationship of `source`.
    ///
    /// The schema is consulted on every call, so a type that gains the required field at
    /// runtime is accepted from then on.
    pub fn assert_conforms(
        &self,
        source: &ResourceKey,
        definition: &RelationshipDefinition,
        added: &ResourceKey,
    ) -> Result<(), GraphError> {
        if !self.strict || definition.has_implicit_side() {
            return Ok(());
        }
        let added_type = added.resource_type();
        if added_type == definition.target_type {
            return Ok(());
        }

        if definition.is_polymorphic {
            let Some(meta) = self.schema.relationship(added_type, &definition.inverse_key) else {
                return Err(GraphError::SchemaViolation(format!(
                    "The '{added_type}' type does not implement '{}' and thus cannot be \
                     assigned to the '{}' relationship in '{}'. Declare the '{}' relationship on \
                     '{added_type}' with `as: '{}'` to make it polymorphic.",
                    definition.target_type,
                    definition.key,
                    source.resource_type(),
                    definition.inverse_key,
                    definition.target_type,
                )));
            };
            let mismatches = self.mismatches(definition, &meta);
            if mismatches.is_empty() {
                return Ok(());
            }
            return Err(GraphError::SchemaViolation(format!(
                "The '{added_type}.{}' relationship cannot be used polymorphically with \
                 '{}.{}' because it does not match the expected definition:\n{}",
                definition.inverse_key,
                source.resource_type(),
                definition.key,
                mismatches.join("\n")
            )));
        }

        let implements_target = self
            .schema
            .relationship(added_type, &definition.inverse_key)
            .and_then(|meta| meta.options.as_type)
            .is_some_and(|as_type| as_type == definition.target_type);
        if implements_target {
            return Err(GraphError::SchemaViolation(format!(
                "The '{added_type}' type implements '{}' but the '{}.{}' relationship is not \
                 polymorphic. Mark '{}.{}' as `polymorphic: true` to assign it.",
                definition.target_type,
                source.resource_type(),
                definition.key,
                definition.inverse_type,
                definition.key,
            )));
        }
        Err(GraphError::SchemaViolation(format!(
            "The '{}' relationship on '{}' expects '{}' but was given '{added_type}'",
            definition.key,
            source.resource_type(),
            definition.target_type
        )))
    }

    fn mismatches(
        &self,
        definition: &RelationshipDefinition,
        meta: &RelationshipSchema,
    ) -> Vec<String> {
        let mut errors = Vec::new();
        let mut expect = |property: &str, expected: String, found: String| {
            if expected != found {
                errors.push(format!("\t- {property}: expected {expected}, found {found}"));
            }
        };
        expect(
            "kind",
            kind_name(definition.inverse_kind).to_string(),
            kind_name(meta.kind).to_string(),
        );
        expect(
            "type",
            definition.inverse_type.clone(),
            meta.resource_type.clone(),
        );
        expect(
            "async",
            definition.inverse_is_async.to_string(),
            meta.options.is_async.to_string(),
        );
        expect(
            "polymorphic",
            definition.inverse_is_polymorphic.to_string(),
            meta.options.polymorphic.to_string(),
        );
        expect(
            "inverse",
            definition.key.clone(),
            meta.options.inverse.clone().unwrap_or_else(|| "null".to_string()),
        );
        expect(
            "as",
            definition.target_type.clone(),
            meta.options.as_type.clone().unwrap_or_else(|| "null".to_string()),
        );
        errors
    }
}

fn kind_name(kind: RelationshipKind) -> &'static str {
    match kind {
        RelationshipKind::One => "one",
        RelationshipKind::Many => "many",
    }
}

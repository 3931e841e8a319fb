//! Shared test utilities for graph testing

use crate::{
    config::GraphConfig,
    graph::Graph,
    identifier::{IdentifierRegistry, ResourceDescriptor, ResourceKey},
    operation::{Operation, RelationshipPayload},
    schema::{RelationshipSchema, ResourceSchema, SchemaRegistry},
};
use std::sync::Arc;

/// Initialize logging for tests
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

/// Schemas exercising every relationship shape the graph supports:
///
/// - `user.best_friend` <-> `user.best_friend`: sync one-to-one onto the same type
/// - `user.company` -> `company`: to-one without inverse (implicit on `company`)
/// - `user.posts` <-> `post.author`: async to-many against sync to-one
/// - `app.configs` <-> `config.app`: sync to-many against sync to-one
/// - `app.tags` -> `tag`: async to-many without inverse
/// - `person.pets` <-> `pet.owner`: polymorphic to-many, implemented by `dog`
pub fn test_schema() -> SchemaRegistry {
    let schemas = SchemaRegistry::new();
    schemas.register(
        "user",
        ResourceSchema::default()
            .with_attribute("name")
            .with_relationship(
                "best_friend",
                RelationshipSchema::belongs_to("user").inverse("best_friend"),
            )
            .with_relationship("company", RelationshipSchema::belongs_to("company"))
            .with_relationship(
                "posts",
                RelationshipSchema::has_many("post")
                    .inverse("author")
                    .is_async(true),
            ),
    );
    schemas.register(
        "post",
        ResourceSchema::default()
            .with_attribute("title")
            .with_relationship(
                "author",
                RelationshipSchema::belongs_to("user").inverse("posts"),
            ),
    );
    schemas.register("company", ResourceSchema::default().with_attribute("name"));
    schemas.register(
        "app",
        ResourceSchema::default()
            .with_relationship(
                "configs",
                RelationshipSchema::has_many("config").inverse("app"),
            )
            .with_relationship("tags", RelationshipSchema::has_many("tag").is_async(true)),
    );
    schemas.register(
        "config",
        ResourceSchema::default().with_relationship(
            "app",
            RelationshipSchema::belongs_to("app").inverse("configs"),
        ),
    );
    schemas.register("tag", ResourceSchema::default());
    schemas.register(
        "person",
        ResourceSchema::default().with_relationship(
            "pets",
            RelationshipSchema::has_many("pet")
                .inverse("owner")
                .polymorphic(),
        ),
    );
    schemas.register(
        "pet",
        ResourceSchema::default().with_relationship(
            "owner",
            RelationshipSchema::belongs_to("person").inverse("pets"),
        ),
    );
    schemas.register(
        "dog",
        ResourceSchema::default().with_relationship(
            "owner",
            RelationshipSchema::belongs_to("person")
                .inverse("pets")
                .as_type("pet"),
        ),
    );
    schemas.register("cat", ResourceSchema::default());
    schemas
}

/// A strict graph over [test_schema], plus the registry and schemas it uses.
pub fn create_test_graph() -> (IdentifierRegistry, SchemaRegistry, Graph) {
    init_logging();
    let schemas = test_schema();
    let registry = IdentifierRegistry::new();
    let graph = Graph::new(
        registry.clone(),
        Arc::new(schemas.clone()),
        GraphConfig::strict(),
    );
    (registry, schemas, graph)
}

pub fn key(registry: &IdentifierRegistry, resource_type: &str, id: &str) -> ResourceKey {
    registry
        .get_or_create(&ResourceDescriptor::new(resource_type, id))
        .unwrap()
}

pub fn update_one(record: &ResourceKey, field: &str, value: Option<&ResourceKey>) -> Operation {
    Operation::UpdateRelationship {
        record: record.clone(),
        field: field.to_string(),
        value: RelationshipPayload::one(value.map(|k| k.descriptor())),
    }
}

pub fn update_many(record: &ResourceKey, field: &str, value: &[&ResourceKey]) -> Operation {
    Operation::UpdateRelationship {
        record: record.clone(),
        field: field.to_string(),
        value: RelationshipPayload::many(value.iter().map(|k| k.descriptor()).collect()),
    }
}

/// Ids of a list of keys, for compact assertions.
pub fn ids(keys: &[ResourceKey]) -> Vec<String> {
    keys.iter()
        .map(|k| k.id().unwrap_or_else(|| k.lid().to_string()))
        .collect()
}

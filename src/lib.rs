//! # relgraph
//!
//! A client-side relationship graph for applications that hold a large, mutable and partially
//! loaded set of server-backed entities in memory.
//!
//! ## Overview
//!
//! relgraph tracks, for every relationship field of every known entity, which members are
//! server-confirmed (**canonical**) and which are locally edited (**local**). It keeps both ends
//! of each bidirectional relationship consistent as payloads arrive, as the application edits
//! relationships optimistically, and as entities are unloaded, deleted or re-identified, without
//! ever requiring the whole graph to be present.
//!
//! ### Key Features
//!
//! - **Stable identity**: one [`identifier::ResourceKey`] per entity, surviving server ids
//! - **Lazy edges**: touching a relationship never materializes the related entity
//! - **Implicit inverses**: relationships without a declared inverse are tracked from both ends
//! - **Optimistic edits**: local state diverges from canonical state, and can be diffed or
//!   rolled back
//! - **Polymorphism**: concrete types are checked against the abstract type they claim to implement
//! - **Batched notifications**: change events are delivered once per field, after each transaction
//!
//! ## Architecture
//!
//! - **[`identifier`]**: `ResourceKey`, `DocumentKey` and the `IdentifierRegistry`
//! - **[`schema`]**: the `SchemaQuery` contract and the in-memory / TOML `SchemaRegistry`
//! - **[`definition`]**: bidirectional relationship definitions derived from the schema
//! - **[`edge`]**: the per `(entity, field)` canonical/local state machine
//! - **[`polymorphic`]**: conformance checking for polymorphic relationships
//! - **[`operation`]**: the operations vocabulary pushed into the graph
//! - **[`graph`]**: the relationship graph, its transactions, cleanup and diff/rollback
//! - **[`cache`]**: resource records, request documents and the commit lifecycle
//! - **[`session`]**: one registry, graph and cache per application instance
//! - **[`event`]**: change notifications
//!
//! ## Quick Start
//!
//! ```rust
//! use relgraph::{
//!     cache::ResourceObject,
//!     config::GraphConfig,
//!     operation::{Operation, RelationshipPayload},
//!     schema::SchemaRegistry,
//!     session::Session,
//! };
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), relgraph::GraphError> {
//! let schemas = SchemaRegistry::from_toml_str(
//!     r#"
//! [app.relationships.configs]
//! kind = "many"
//! type = "config"
//! inverse = "app"
//!
//! [config.relationships.app]
//! kind = "one"
//! type = "app"
//! inverse = "configs"
//! "#,
//! )?;
//! let mut session = Session::new(Arc::new(schemas), GraphConfig::strict());
//! let mut events = session.subscribe();
//!
//! let cache = session.cache_mut();
//! let app = cache.upsert(&ResourceObject::new("app", "1"))?;
//! let config = cache.upsert(&ResourceObject::new("config", "1").with_relationship(
//!     "app",
//!     RelationshipPayload::one(Some(app.descriptor())),
//! ))?;
//!
//! // The inverse side was filled in without loading anything else
//! let configs = cache.get_relationship(&app, "configs")?;
//! assert_eq!(configs.data.as_many(), &[config.clone()]);
//! assert!(events.try_recv().is_ok());
//!
//! // Local edits can be rolled back
//! cache.mutate(Operation::RemoveFromRelatedRecords {
//!     record: app.clone(),
//!     field: "configs".to_string(),
//!     value: vec![config.clone()],
//!     index: None,
//! })?;
//! assert_eq!(cache.rollback_relationships(&app), vec!["configs"]);
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration
//!
//! [`config::GraphConfig`] is a construction time capability: `strict` enables polymorphic
//! conformance checks (on by default in debug builds) and `notify_implicit` extends change
//! notifications to implicit inverse edges. It can be read from the `[graph]` table of a TOML
//! file through [`config::TomlConfigProvider`].

pub mod cache;
pub mod config;
pub mod definition;
pub mod edge;
pub mod error;
pub mod event;
pub mod graph;
pub mod identifier;
pub mod operation;
pub mod polymorphic;
pub mod schema;
pub mod session;
#[cfg(test)]
mod tests;

pub use error::*;

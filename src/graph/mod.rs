//! Graph module: the relationship graph engine.
//!
//! The [Graph] owns every [Edge] of a session and keeps both ends of each bidirectional
//! relationship consistent as canonical payloads and local edits arrive.
//!
//! # Module Organization
//!
//! - [`base`]: Graph storage, lazy edge creation and the push operations
//! - [`cleanup`]: unload, removal, deletion and identifier merges
//! - [`diff`]: change detection and rollback of local state
//!
//! # Transactions
//!
//! All mutation happens through a [Transaction]. Notifications queued while it is open are
//! flushed once, when the guard is dropped:
//!
//! ```rust
//! use relgraph::{
//!     config::GraphConfig,
//!     graph::Graph,
//!     identifier::{IdentifierRegistry, ResourceDescriptor},
//!     operation::{Operation, RelationshipPayload},
//!     schema::{RelationshipSchema, ResourceSchema, SchemaRegistry},
//! };
//! use std::sync::Arc;
//!
//! let schemas = SchemaRegistry::new();
//! schemas.register(
//!     "user",
//!     ResourceSchema::default().with_relationship(
//!         "best_friend",
//!         RelationshipSchema::belongs_to("user").inverse("best_friend"),
//!     ),
//! );
//! let registry = IdentifierRegistry::new();
//! let mut graph = Graph::new(registry.clone(), Arc::new(schemas), GraphConfig::strict());
//! let user = registry.get_or_create(&ResourceDescriptor::new("user", "1")).unwrap();
//! {
//!     let mut tx = graph.transaction();
//!     tx.push(Operation::UpdateRelationship {
//!         record: user.clone(),
//!         field: "best_friend".to_string(),
//!         value: RelationshipPayload::one(Some(ResourceDescriptor::new("user", "2"))),
//!     })
//!     .unwrap();
//! }
//! let friend = registry.peek(&ResourceDescriptor::new("user", "2")).unwrap();
//! assert_eq!(
//!     graph.get(&friend, "best_friend").unwrap().local_state().as_one(),
//!     Some(&user)
//! );
//! ```

mod base;
mod cleanup;
mod diff;

#[cfg(test)]
mod tests;

use serde::Serialize;

use crate::{
    edge::{EdgeFlags, RelationshipValue},
    identifier::ResourceKey,
    operation::{Links, Operation},
    GraphError,
};

pub use base::Graph;

/// Observable state of one relationship.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelationshipState {
    pub data: RelationshipValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub links: Option<Links>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
    pub flags: EdgeFlags,
}

/// Difference between the canonical and local state of one relationship.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum RelationshipDiff {
    #[serde(rename_all = "camelCase")]
    Collection {
        remote_state: Vec<ResourceKey>,
        additions: Vec<ResourceKey>,
        removals: Vec<ResourceKey>,
        local_state: Vec<ResourceKey>,
        reordered: bool,
    },
    #[serde(rename_all = "camelCase")]
    Resource {
        remote_state: Option<ResourceKey>,
        local_state: Option<ResourceKey>,
    },
}

/// Scoped batch of graph mutations.
///
/// The guard borrows the graph exclusively, so nothing can observe the graph between the
/// operations of a transaction. Pending notifications are delivered when the guard drops,
/// including on early returns.
pub struct Transaction<'g> {
    graph: &'g mut Graph,
    applied: usize,
}

impl<'g> Transaction<'g> {
    pub(crate) fn new(graph: &'g mut Graph) -> Self {
        Transaction { graph, applied: 0 }
    }

    pub fn push(&mut self, operation: Operation) -> Result<(), GraphError> {
        self.graph.apply(operation)?;
        self.applied += 1;
        Ok(())
    }

    /// Unload the relationship state of `key`. The key stays usable.
    pub fn unload(&mut self, key: &ResourceKey) {
        self.graph.unload_in_transaction(key);
        self.applied += 1;
    }

    /// Unload `key` and drop its relationship state for good.
    pub fn remove(&mut self, key: &ResourceKey) {
        self.graph.remove_in_transaction(key);
        self.applied += 1;
    }

    pub fn rollback_relationships(&mut self, key: &ResourceKey) -> Vec<String> {
        self.applied += 1;
        self.graph.rollback_in_transaction(key)
    }

    pub fn mark_materialized(&mut self, key: &ResourceKey) {
        self.graph.mark_materialized(key);
    }

    /// Number of operations applied so far.
    pub fn applied(&self) -> usize {
        self.applied
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        self.graph.flush();
    }
}

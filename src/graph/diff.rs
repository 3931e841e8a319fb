//! Change detection and rollback of local relationship state.

use std::collections::{BTreeMap, HashSet};

use crate::{
    edge::{Edge, Layer, RelationshipValue},
    identifier::ResourceKey,
};

use super::{Graph, RelationshipDiff};

impl Graph {
    /// Every explicit relationship of `key` whose local state differs from its canonical state.
    pub fn changed_relationships(&self, key: &ResourceKey) -> BTreeMap<String, RelationshipDiff> {
        let key = self.registry.resolve(key);
        self.edges
            .get(&key)
            .map(|container| {
                container
                    .iter()
                    .filter_map(|(field, edge)| diff_edge(edge).map(|diff| (field.clone(), diff)))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn has_changed_relationships(&self, key: &ResourceKey) -> bool {
        let key = self.registry.resolve(key);
        self.edges
            .get(&key)
            .is_some_and(|container| container.values().any(Edge::is_diverged))
    }

    /// Reset the local state of every changed relationship of `key` to its canonical state,
    /// in its own transaction. Returns the reset field names in sorted order.
    pub fn rollback_relationships(&mut self, key: &ResourceKey) -> Vec<String> {
        self.transaction().rollback_relationships(key)
    }

    pub(crate) fn rollback_in_transaction(&mut self, key: &ResourceKey) -> Vec<String> {
        let key = self.registry.resolve(key);
        let diverged: Vec<(String, RelationshipValue, RelationshipValue)> = self
            .edges
            .get(&key)
            .map(|container| {
                container
                    .iter()
                    .filter(|(_, edge)| edge.is_diverged())
                    .map(|(field, edge)| {
                        (field.clone(), edge.local_state(), edge.canonical_state())
                    })
                    .collect()
            })
            .unwrap_or_default();

        let mut fields = Vec::with_capacity(diverged.len());
        for (field, local, canonical) in diverged {
            let Some(edge) = self.existing_mut(&key, &field) else {
                continue;
            };
            let definition = edge.definition().clone();
            match &canonical {
                RelationshipValue::One(value) => {
                    edge.set_one(Layer::Local, value.clone());
                }
                RelationshipValue::Many(values) => {
                    edge.set_many(Layer::Local, values.iter().cloned().collect());
                }
            }
            let restored: HashSet<ResourceKey> = canonical.keys().into_iter().collect();
            let previous: HashSet<ResourceKey> = local.keys().into_iter().collect();
            for other in local.keys().iter().filter(|k| !restored.contains(k)) {
                self.remove_inverse(&definition, &key, other, false);
            }
            for other in canonical.keys().iter().filter(|k| !previous.contains(k)) {
                if let Err(e) = self.add_inverse(&definition, &key, other, false) {
                    tracing::warn!(
                        "[Graph::rollback_relationships] could not restore inverse of {}.{} \
                         on {}: {}",
                        key,
                        field,
                        other,
                        e
                    );
                }
            }
            self.notify(&key, &field);
            fields.push(field);
        }
        if !fields.is_empty() {
            tracing::debug!(
                "[Graph::rollback_relationships] {} reset {:?}",
                key,
                fields
            );
        }
        fields
    }
}

fn diff_edge(edge: &Edge) -> Option<RelationshipDiff> {
    if !edge.is_diverged() {
        return None;
    }
    match (edge.canonical_state(), edge.local_state()) {
        (RelationshipValue::One(remote_state), RelationshipValue::One(local_state)) => {
            Some(RelationshipDiff::Resource {
                remote_state,
                local_state,
            })
        }
        (remote, local) => {
            let remote_state = remote.keys();
            let local_state = local.keys();
            let remote_members: HashSet<&ResourceKey> = remote_state.iter().collect();
            let local_members: HashSet<&ResourceKey> = local_state.iter().collect();
            let additions: Vec<ResourceKey> = local_state
                .iter()
                .filter(|k| !remote_members.contains(k))
                .cloned()
                .collect();
            let removals: Vec<ResourceKey> = remote_state
                .iter()
                .filter(|k| !local_members.contains(k))
                .cloned()
                .collect();
            // Only a change of order over the same members counts as a reorder
            let same_members = additions.is_empty() && removals.is_empty();
            let reordered = same_members && remote_state != local_state;
            if same_members && !reordered {
                return None;
            }
            Some(RelationshipDiff::Collection {
                remote_state,
                additions,
                removals,
                local_state,
                reordered,
            })
        }
    }
}

//! Unloading, removal, deletion and identifier merges.

use std::{collections::BTreeSet, sync::Arc};

use crate::{
    definition::RelationshipDefinition,
    edge::{Edge, Layer},
    event::GraphEvent,
    identifier::ResourceKey,
};

use super::Graph;

impl Graph {
    /// Unload the relationship state of `key` in its own transaction.
    pub fn unload(&mut self, key: &ResourceKey) {
        self.transaction().unload(key);
    }

    /// Unload `key` and drop its relationship state, in its own transaction.
    pub fn remove(&mut self, key: &ResourceKey) {
        self.transaction().remove(key);
    }

    /// A key is releasable when none of its explicit relationships has an async inverse. Only
    /// releasable keys are detached from the explicit side of their implicit relationships.
    pub fn is_releasable(&self, key: &ResourceKey) -> bool {
        self.edges.get(key).is_none_or(|container| {
            container
                .values()
                .all(|edge| !edge.definition().inverse_is_async)
        })
    }

    pub(crate) fn unload_in_transaction(&mut self, key: &ResourceKey) {
        let key = self.registry.resolve(key);
        tracing::debug!("[Graph::unload] {}", key);
        self.materialized.remove(&key);

        let explicit: Vec<(Arc<RelationshipDefinition>, Vec<ResourceKey>, Vec<ResourceKey>)> =
            self.edges
                .get(&key)
                .map(|container| {
                    container
                        .values()
                        .map(|edge| {
                            (edge.definition().clone(), edge.related_keys(), retained(edge))
                        })
                        .collect()
                })
                .unwrap_or_default();
        let releasable = self.is_releasable(&key);
        let mut touched = BTreeSet::new();

        for (definition, related, keep) in &explicit {
            for other in related.iter().filter(|other| !keep.contains(other)) {
                touched.insert(other.clone());
                if definition.inverse_is_implicit {
                    self.remove_completely(other, &definition.inverse_key, &key);
                } else {
                    self.dematerialize(other, &definition.inverse_key, &key);
                }
            }
            self.clear_own(&key, definition, keep);
        }

        if releasable {
            let implicit: Vec<(Arc<RelationshipDefinition>, Vec<ResourceKey>)> = self
                .implicit
                .get(&key)
                .map(|container| {
                    container
                        .values()
                        .map(|edge| (edge.definition().clone(), edge.related_keys()))
                        .collect()
                })
                .unwrap_or_default();
            for (definition, related) in &implicit {
                for other in related {
                    touched.insert(other.clone());
                    self.remove_completely(other, &definition.inverse_key, &key);
                }
                if let Some(edge) = self.existing_mut(&key, &definition.key) {
                    edge.clear(Layer::Canonical);
                    edge.clear(Layer::Local);
                    edge.recompute_empty();
                }
            }
        } else {
            tracing::debug!(
                "[Graph::unload] {} has async inverses, keeping its implicit relationships",
                key
            );
        }
        if self
            .implicit
            .get(&key)
            .is_some_and(|container| container.values().all(Edge::is_vacant))
        {
            self.implicit.remove(&key);
        }

        touched.remove(&key);
        for other in &touched {
            self.prune(other);
        }
        self.unloaded.insert(key.clone());
        self.queue.push(GraphEvent::ResourceUnloaded { key });
    }

    pub(crate) fn remove_in_transaction(&mut self, key: &ResourceKey) {
        let key = self.registry.resolve(key);
        self.unload_in_transaction(&key);
        self.edges.remove(&key);
        self.implicit.remove(&key);
        self.unloaded.remove(&key);
        self.removed.insert(key);
    }

    /// A committed deletion: `key` disappears from every relationship that references it,
    /// whatever the async-ness of that relationship.
    pub(crate) fn delete_record(&mut self, key: &ResourceKey, is_new: bool) {
        let key = self.registry.resolve(key);
        tracing::debug!("[Graph::delete_record] {} (new: {})", key, is_new);
        let mut touched = BTreeSet::new();
        let containers = [self.edges.remove(&key), self.implicit.remove(&key)];
        for container in containers.into_iter().flatten() {
            for edge in container.values() {
                for other in edge.related_keys() {
                    self.remove_completely(&other, &edge.definition().inverse_key, &key);
                    touched.insert(other);
                }
            }
        }
        touched.remove(&key);
        for other in &touched {
            self.prune(other);
        }
        self.materialized.remove(&key);
        self.unloaded.remove(&key);
        self.removed.insert(key.clone());
        self.queue.push(GraphEvent::ResourceUnloaded { key });
    }

    /// Drop the bookkeeping kept for `key` once its identifier is forgotten. A deleted key stays
    /// in the removed set only until then.
    pub(crate) fn forget(&mut self, key: &ResourceKey) {
        let key = self.registry.resolve(key);
        self.materialized.remove(&key);
        self.unloaded.remove(&key);
        self.removed.remove(&key);
    }

    /// Re-key every edge of `losing` onto `survivor` and point every inverse at the survivor.
    pub(crate) fn merge_identifiers(&mut self, losing: &ResourceKey, survivor: &ResourceKey) {
        if losing.ptr_eq(survivor) || losing == survivor {
            return;
        }
        tracing::debug!("[Graph::merge_identifiers] {} -> {}", losing, survivor);
        for implicit in [false, true] {
            let container = if implicit {
                self.implicit.remove(losing)
            } else {
                self.edges.remove(losing)
            };
            for (field, mut edge) in container.unwrap_or_default() {
                let definition = edge.definition().clone();
                edge.replace_key(losing, survivor);
                for other in edge.related_keys() {
                    self.replace_in(&other, &definition.inverse_key, losing, survivor);
                }
                let conflicts: Vec<(Layer, ResourceKey)> = match self.peek(survivor, &field) {
                    Some(target) if !definition.is_collection() => [Layer::Canonical, Layer::Local]
                        .into_iter()
                        .filter_map(|layer| {
                            let kept = target.value(layer).as_one().cloned()?;
                            let dropped = edge.value(layer).as_one().cloned()?;
                            (kept != dropped).then_some((layer, dropped))
                        })
                        .collect(),
                    _ => Vec::new(),
                };
                match self.existing_mut(survivor, &field) {
                    Some(target) => target.absorb(&edge),
                    None => {
                        edge.rekey(survivor.clone());
                        let containers = if implicit {
                            &mut self.implicit
                        } else {
                            &mut self.edges
                        };
                        containers
                            .entry(survivor.clone())
                            .or_default()
                            .insert(field.clone(), edge);
                    }
                }
                for (layer, dropped) in conflicts {
                    self.detach(&dropped, &definition.inverse_key, survivor, layer);
                }
                self.notify(survivor, &field);
            }
        }
        for set in [&mut self.materialized, &mut self.unloaded, &mut self.removed] {
            if set.remove(losing) {
                set.insert(survivor.clone());
            }
        }
        self.queue.push(GraphEvent::IdentifiersMerged {
            from: losing.clone(),
            to: survivor.clone(),
        });
    }

    /// Handle the unload of `key` on the inverse edge `owner.field`.
    ///
    /// Sync inverses (and any inverse of a never-saved key) drop the key. Async inverses keep
    /// the membership so it can be reloaded, and remember that it was dematerialized.
    fn dematerialize(&mut self, owner: &ResourceKey, field: &str, key: &ResourceKey) {
        let changed = match self.existing_mut(owner, field) {
            None => false,
            Some(edge) => {
                let is_collection = edge.definition().is_collection();
                let points_elsewhere = !is_collection
                    && edge
                        .local_state()
                        .as_one()
                        .is_some_and(|current| current != key);
                if points_elsewhere {
                    false
                } else if !edge.definition().is_async || key.is_new() {
                    let canonical = edge.remove(Layer::Canonical, key);
                    let local = edge.remove(Layer::Local, key);
                    if canonical && !is_collection {
                        edge.flags.has_received_data = true;
                    }
                    edge.recompute_empty();
                    canonical || local
                } else {
                    edge.flags.has_dematerialized_inverse = true;
                    true
                }
            }
        };
        if changed {
            self.notify(owner, field);
        }
    }

    /// Clear the own state of an unloaded edge. `keep` holds local-only members that survive.
    fn clear_own(
        &mut self,
        key: &ResourceKey,
        definition: &RelationshipDefinition,
        keep: &[ResourceKey],
    ) {
        let changed = match self.existing_mut(key, &definition.key) {
            None => false,
            Some(edge) => {
                let was_vacant = edge.is_vacant();
                edge.clear(Layer::Canonical);
                edge.clear(Layer::Local);
                if definition.is_async {
                    edge.flags.is_stale = true;
                    for other in keep {
                        edge.add(Layer::Local, other, None);
                    }
                }
                edge.recompute_empty();
                !was_vacant
            }
        };
        if !keep.is_empty() {
            tracing::warn!(
                "[Graph::unload] {}.{} keeps {} local-only member(s): async to-many relationships \
                 without an inverse are not fully cleared",
                key,
                definition.key,
                keep.len()
            );
        }
        if changed {
            self.notify(key, &definition.key);
        }
    }

    /// Remove `key` from both layers of `owner.field`.
    fn remove_completely(&mut self, owner: &ResourceKey, field: &str, key: &ResourceKey) {
        let changed = match self.existing_mut(owner, field) {
            Some(edge) => {
                let canonical = edge.remove(Layer::Canonical, key);
                let local = edge.remove(Layer::Local, key);
                edge.recompute_empty();
                canonical || local
            }
            None => false,
        };
        if changed {
            self.notify(owner, field);
        }
    }

    fn replace_in(
        &mut self,
        owner: &ResourceKey,
        field: &str,
        old: &ResourceKey,
        new: &ResourceKey,
    ) {
        let changed = self
            .existing_mut(owner, field)
            .is_some_and(|edge| edge.replace_key(old, new));
        if changed {
            self.notify(owner, field);
        }
    }

    /// Drop the containers of a key that nothing keeps alive anymore: it is not materialized
    /// and all of its edges are vacant.
    fn prune(&mut self, key: &ResourceKey) {
        if self.materialized.contains(key) {
            return;
        }
        if self
            .edges
            .get(key)
            .is_some_and(|container| container.values().all(Edge::is_vacant))
        {
            tracing::debug!("[Graph::prune] dropping relationship container of {}", key);
            self.edges.remove(key);
        }
        if self
            .implicit
            .get(key)
            .is_some_and(|container| container.values().all(Edge::is_vacant))
        {
            tracing::debug!("[Graph::prune] dropping implicit container of {}", key);
            self.implicit.remove(key);
        }
    }
}

/// Local-only members an unloaded edge keeps: async to-many relationships with an implicit
/// inverse retain them.
fn retained(edge: &Edge) -> Vec<ResourceKey> {
    let definition = edge.definition();
    if definition.is_async && definition.is_collection() && definition.inverse_is_implicit {
        edge.local_only_keys()
    } else {
        Vec::new()
    }
}

//! Graph: storage of edges and the push operations.
//!
//! Edges live in two containers per resource: one for explicit relationship fields and one for
//! the implicit inverses of relationships declared without an inverse. Both are created lazily
//! and never cause the related resource to be materialized.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fmt,
    sync::Arc,
};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::{
    config::GraphConfig,
    definition::{is_implicit_key, DefinitionTable, RelationshipDefinition},
    edge::{AddOutcome, Edge, EdgeFlags, Layer, Membership, RelationshipValue},
    event::{GraphEvent, NotificationQueue},
    identifier::{IdentifierRegistry, ResourceKey},
    operation::{Links, Operation, RelationshipData, RelationshipPayload},
    polymorphic::ConformanceChecker,
    schema::SchemaQuery,
    GraphError,
};

use super::{RelationshipState, Transaction};

type Container = BTreeMap<String, Edge>;

/// Snapshot used to decide whether an update is observable.
type Observed = Option<(RelationshipValue, EdgeFlags, Option<Links>, Option<serde_json::Value>)>;

pub struct Graph {
    pub(super) registry: IdentifierRegistry,
    pub(super) definitions: DefinitionTable,
    checker: ConformanceChecker,
    config: GraphConfig,
    pub(super) edges: HashMap<ResourceKey, Container>,
    pub(super) implicit: HashMap<ResourceKey, Container>,
    pub(super) materialized: HashSet<ResourceKey>,
    /// Keys whose relationship state was unloaded and has not been refreshed since.
    pub(super) unloaded: HashSet<ResourceKey>,
    pub(super) removed: HashSet<ResourceKey>,
    pub(super) queue: NotificationQueue,
    tx: Option<UnboundedSender<GraphEvent>>,
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("config", &self.config)
            .field("resources", &self.edges.len())
            .field("implicit_resources", &self.implicit.len())
            .field("materialized", &self.materialized.len())
            .field("removed", &self.removed.len())
            .field("pending_notifications", &self.queue.len())
            .finish()
    }
}

impl Graph {
    pub fn new(
        registry: IdentifierRegistry,
        schema: Arc<dyn SchemaQuery>,
        config: GraphConfig,
    ) -> Graph {
        Graph {
            registry,
            definitions: DefinitionTable::new(schema.clone()).with_strict(config.strict),
            checker: ConformanceChecker::new(schema, config.strict),
            config,
            edges: HashMap::new(),
            implicit: HashMap::new(),
            materialized: HashSet::new(),
            unloaded: HashSet::new(),
            removed: HashSet::new(),
            queue: NotificationQueue::new(),
            tx: None,
        }
    }

    pub fn with_sender(mut self, tx: UnboundedSender<GraphEvent>) -> Graph {
        self.tx = Some(tx);
        self
    }

    /// Replace the notification channel with a fresh one and return its receiving end.
    pub fn subscribe(&mut self) -> UnboundedReceiver<GraphEvent> {
        let (tx, rx) = unbounded_channel();
        self.tx = Some(tx);
        rx
    }

    pub fn registry(&self) -> &IdentifierRegistry {
        &self.registry
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    pub fn schema(&self) -> &Arc<dyn SchemaQuery> {
        self.definitions.schema()
    }

    pub fn transaction(&mut self) -> Transaction<'_> {
        Transaction::new(self)
    }

    /// Apply one operation in its own transaction.
    pub fn push(&mut self, operation: Operation) -> Result<(), GraphError> {
        self.transaction().push(operation)
    }

    /// The edge for `key.field`, created on first access.
    ///
    /// Creating an edge resolves its definition but never creates the inverse edges.
    pub fn get(&mut self, key: &ResourceKey, field: &str) -> Result<&Edge, GraphError> {
        let key = self.registry.resolve(key);
        let definition = self.definition_for(&key, field)?;
        Ok(self.edge_mut(&key, &definition))
    }

    /// Non-creating lookup.
    pub fn peek(&self, key: &ResourceKey, field: &str) -> Option<&Edge> {
        let container = if is_implicit_key(field) {
            &self.implicit
        } else {
            &self.edges
        };
        container.get(key).and_then(|edges| edges.get(field))
    }

    pub fn has(&self, key: &ResourceKey, field: &str) -> bool {
        self.peek(key, field).is_some()
    }

    /// Explicit edges of `key`, by field name.
    pub fn edges_of(&self, key: &ResourceKey) -> Option<&BTreeMap<String, Edge>> {
        self.edges.get(key)
    }

    pub fn get_implicit(&self, key: &ResourceKey) -> Option<&BTreeMap<String, Edge>> {
        self.implicit.get(key)
    }

    pub fn has_implicit(&self, key: &ResourceKey) -> bool {
        self.implicit.contains_key(key)
    }

    pub fn get_data(
        &mut self,
        key: &ResourceKey,
        field: &str,
    ) -> Result<RelationshipState, GraphError> {
        let edge = self.get(key, field)?;
        Ok(RelationshipState {
            data: edge.local_state(),
            links: edge.links().cloned(),
            meta: edge.meta().cloned(),
            flags: edge.flags().clone(),
        })
    }

    pub fn mark_materialized(&mut self, key: &ResourceKey) {
        let key = self.registry.resolve(key);
        self.unloaded.remove(&key);
        self.materialized.insert(key);
    }

    pub fn is_materialized(&self, key: &ResourceKey) -> bool {
        self.materialized.contains(key)
    }

    pub fn materialized(&self) -> impl Iterator<Item = &ResourceKey> {
        self.materialized.iter()
    }

    pub fn is_removed(&self, key: &ResourceKey) -> bool {
        self.removed.contains(key)
    }

    /// Number of edges, explicit and implicit.
    pub fn edge_count(&self) -> usize {
        self.edges
            .values()
            .chain(self.implicit.values())
            .map(|container| container.len())
            .sum()
    }

    pub(crate) fn apply(&mut self, operation: Operation) -> Result<(), GraphError> {
        tracing::trace!("[Graph::apply] {}", operation.name());
        match operation {
            Operation::UpdateRelationship {
                record,
                field,
                value,
            } => {
                let record = self.registry.resolve(&record);
                self.update_relationship(&record, &field, value)
            }
            Operation::ReplaceRelatedRecords {
                record,
                field,
                value,
            } => {
                let record = self.registry.resolve(&record);
                let value = self.resolve_all(value);
                self.replace_related_records(&record, &field, value)
            }
            Operation::ReplaceRelatedRecord {
                record,
                field,
                value,
            } => {
                let record = self.registry.resolve(&record);
                let value = value.map(|key| self.registry.resolve(&key));
                self.replace_related_record(&record, &field, value)
            }
            Operation::AddToRelatedRecords {
                record,
                field,
                value,
                index,
            } => {
                let record = self.registry.resolve(&record);
                let value = self.resolve_all(value);
                self.add_to_related_records(&record, &field, value, index)
            }
            Operation::RemoveFromRelatedRecords {
                record,
                field,
                value,
                ..
            } => {
                let record = self.registry.resolve(&record);
                let value = self.resolve_all(value);
                self.remove_from_related_records(&record, &field, value)
            }
            Operation::MergeIdentifiers { record, value } => {
                let survivor = self.registry.resolve(&value);
                self.merge_identifiers(&record, &survivor);
                Ok(())
            }
            Operation::RemoveIdentifier { record } => {
                self.remove_in_transaction(&record);
                Ok(())
            }
            Operation::DeleteRecord { record, is_new } => {
                self.delete_record(&record, is_new);
                Ok(())
            }
        }
    }

    /// Deliver every pending notification.
    pub(crate) fn flush(&mut self) {
        let events = self.queue.drain();
        if events.is_empty() {
            return;
        }
        tracing::debug!("[Graph::flush] delivering {} notification(s)", events.len());
        let mut closed = false;
        if let Some(tx) = &self.tx {
            for event in events {
                if tx.send(event).is_err() {
                    closed = true;
                    break;
                }
            }
        }
        if closed {
            tracing::warn!("[Graph::flush] notification receiver dropped, detaching channel");
            self.tx = None;
        }
    }

    pub(super) fn notify(&mut self, key: &ResourceKey, field: &str) {
        if is_implicit_key(field) && !self.config.notify_implicit {
            return;
        }
        self.queue.relationship_changed(key, field);
    }

    fn resolve_all(&self, keys: Vec<ResourceKey>) -> Vec<ResourceKey> {
        keys.iter().map(|key| self.registry.resolve(key)).collect()
    }

    /// Definition of `key.field`, preferring the definition of an existing edge.
    pub(super) fn definition_for(
        &mut self,
        key: &ResourceKey,
        field: &str,
    ) -> Result<Arc<RelationshipDefinition>, GraphError> {
        if let Some(edge) = self.peek(key, field) {
            return Ok(edge.definition().clone());
        }
        self.definitions.get(key.resource_type(), field)
    }

    /// Definition of the inverse side of `definition` on `related`.
    ///
    /// Concrete types of a polymorphic relationship declare the inverse themselves. When they
    /// don't (lenient graphs only get that far) the declaration of the target type is used.
    pub(super) fn inverse_definition(
        &mut self,
        definition: &RelationshipDefinition,
        related: &ResourceKey,
    ) -> Result<Arc<RelationshipDefinition>, GraphError> {
        if let Some(edge) = self.peek(related, &definition.inverse_key) {
            return Ok(edge.definition().clone());
        }
        if definition.inverse_is_implicit {
            return self
                .definitions
                .inverse_of(definition, related.resource_type());
        }
        if related.resource_type() != definition.target_type {
            if let Ok(inverse) = self
                .definitions
                .get(related.resource_type(), &definition.inverse_key)
            {
                return Ok(inverse);
            }
        }
        self.definitions
            .get(&definition.target_type, &definition.inverse_key)
    }

    pub(super) fn edge_mut(
        &mut self,
        key: &ResourceKey,
        definition: &Arc<RelationshipDefinition>,
    ) -> &mut Edge {
        let container = if definition.is_implicit {
            &mut self.implicit
        } else {
            &mut self.edges
        };
        container
            .entry(key.clone())
            .or_default()
            .entry(definition.key.clone())
            .or_insert_with(|| {
                tracing::debug!("[Graph::edge_mut] creating edge {}.{}", key, definition.key);
                Edge::new(key.clone(), definition.clone())
            })
    }

    pub(super) fn existing_mut(&mut self, key: &ResourceKey, field: &str) -> Option<&mut Edge> {
        let container = if is_implicit_key(field) {
            &mut self.implicit
        } else {
            &mut self.edges
        };
        container.get_mut(key).and_then(|edges| edges.get_mut(field))
    }

    fn observe(&self, key: &ResourceKey, field: &str) -> Observed {
        self.peek(key, field).map(|edge| {
            (
                edge.local_state(),
                edge.flags().clone(),
                edge.links().cloned(),
                edge.meta().cloned(),
            )
        })
    }

    /// Mirror `record` into the inverse of `definition` on `related`. Remote updates write both
    /// layers of the inverse. A to-one inverse that pointed at another owner detaches that owner.
    pub(super) fn add_inverse(
        &mut self,
        definition: &RelationshipDefinition,
        record: &ResourceKey,
        related: &ResourceKey,
        remote: bool,
    ) -> Result<(), GraphError> {
        let inverse = self.inverse_definition(definition, related)?;
        let layers: &[Layer] = if remote {
            &[Layer::Canonical, Layer::Local]
        } else {
            &[Layer::Local]
        };
        let edge = self.edge_mut(related, &inverse);
        let mut changed = false;
        let mut displaced = Vec::new();
        for &layer in layers {
            match edge.add(layer, record, None) {
                AddOutcome::Unchanged => {}
                AddOutcome::Added => changed = true,
                AddOutcome::Replaced(previous) => {
                    changed = true;
                    displaced.push((layer, previous));
                }
            }
        }
        if remote {
            edge.flags.has_received_data = true;
            edge.recompute_empty();
        }
        if changed {
            self.notify(related, &inverse.key);
        }
        for (layer, previous) in displaced {
            tracing::debug!(
                "[Graph::add_inverse] {}.{} moved from {} to {}",
                related,
                inverse.key,
                previous,
                record
            );
            self.detach(&previous, &inverse.inverse_key, related, layer);
        }
        Ok(())
    }

    /// Remove `record` from the inverse of `definition` on `related`, if that edge exists.
    pub(super) fn remove_inverse(
        &mut self,
        definition: &RelationshipDefinition,
        record: &ResourceKey,
        related: &ResourceKey,
        remote: bool,
    ) {
        let field = &definition.inverse_key;
        let changed = match self.existing_mut(related, field) {
            Some(edge) => {
                let mut changed = edge.remove(Layer::Local, record);
                if remote {
                    changed |= edge.remove(Layer::Canonical, record);
                    edge.recompute_empty();
                }
                changed
            }
            None => false,
        };
        if changed {
            self.notify(related, field);
        }
    }

    /// Remove `related` from one layer of `owner.field`.
    pub(super) fn detach(
        &mut self,
        owner: &ResourceKey,
        field: &str,
        related: &ResourceKey,
        layer: Layer,
    ) {
        let changed = match self.existing_mut(owner, field) {
            Some(edge) => {
                let changed = edge.remove(layer, related);
                if layer == Layer::Canonical {
                    edge.recompute_empty();
                }
                changed
            }
            None => false,
        };
        if changed {
            self.notify(owner, field);
        }
    }

    /// Validate a local edit before anything is mutated.
    fn prepare_local(
        &mut self,
        operation: &str,
        record: &ResourceKey,
        field: &str,
        collection: bool,
        keys: &[ResourceKey],
    ) -> Result<Arc<RelationshipDefinition>, GraphError> {
        if self.removed.contains(record) || self.unloaded.contains(record) {
            return Err(GraphError::StaleMutation {
                resource: record.to_string(),
                field: field.to_string(),
            });
        }
        let definition = self.definition_for(record, field)?;
        if definition.is_implicit {
            return Err(GraphError::InvalidOperation(format!(
                "{operation} cannot target the implicit relationship '{field}' of {record}"
            )));
        }
        if definition.is_collection() != collection {
            return Err(GraphError::InvalidOperation(format!(
                "{operation} cannot be applied to the to-{} relationship '{}.{}'",
                if definition.is_collection() {
                    "many"
                } else {
                    "one"
                },
                record.resource_type(),
                field
            )));
        }
        self.prepare_related(record, &definition, keys)?;
        Ok(definition)
    }

    /// Conformance and inverse resolution for every key about to be added.
    fn prepare_related(
        &mut self,
        record: &ResourceKey,
        definition: &RelationshipDefinition,
        keys: &[ResourceKey],
    ) -> Result<(), GraphError> {
        for key in keys {
            self.checker.assert_conforms(record, definition, key)?;
            self.inverse_definition(definition, key)?;
        }
        Ok(())
    }

    /// Run the checks `operation` performs before it mutates anything, without applying it.
    pub(crate) fn validate(&mut self, operation: &Operation) -> Result<(), GraphError> {
        match operation {
            Operation::UpdateRelationship {
                record,
                field,
                value,
            } => {
                let record = self.registry.resolve(record);
                self.prepare_remote(&record, field, value).map(|_| ())
            }
            Operation::ReplaceRelatedRecords {
                record,
                field,
                value,
            }
            | Operation::AddToRelatedRecords {
                record,
                field,
                value,
                ..
            } => {
                let record = self.registry.resolve(record);
                let value = self.resolve_all(value.clone());
                self.prepare_local(operation.name(), &record, field, true, &value)
                    .map(|_| ())
            }
            Operation::RemoveFromRelatedRecords { record, field, .. } => {
                let record = self.registry.resolve(record);
                self.prepare_local(operation.name(), &record, field, true, &[])
                    .map(|_| ())
            }
            Operation::ReplaceRelatedRecord {
                record,
                field,
                value,
            } => {
                let record = self.registry.resolve(record);
                let value: Vec<ResourceKey> =
                    value.iter().map(|key| self.registry.resolve(key)).collect();
                self.prepare_local(operation.name(), &record, field, false, &value)
                    .map(|_| ())
            }
            Operation::MergeIdentifiers { .. }
            | Operation::RemoveIdentifier { .. }
            | Operation::DeleteRecord { .. } => Ok(()),
        }
    }

    /// Resolve a canonical payload for `record.field` and check it against the definition.
    fn prepare_remote(
        &mut self,
        record: &ResourceKey,
        field: &str,
        payload: &RelationshipPayload,
    ) -> Result<(Arc<RelationshipDefinition>, Option<RelationshipValue>), GraphError> {
        let definition = self.definition_for(record, field)?;
        if definition.is_implicit {
            return Err(GraphError::InvalidOperation(format!(
                "updateRelationship cannot target the implicit relationship '{field}' of {record}"
            )));
        }
        let data = match &payload.data {
            None => None,
            Some(RelationshipData::One(pointer)) if definition.is_collection() => {
                if pointer.is_some() {
                    return Err(GraphError::InvalidOperation(format!(
                        "updateRelationship received a single resource for the to-many \
                         relationship '{}.{}'",
                        record.resource_type(),
                        field
                    )));
                }
                Some(RelationshipValue::Many(Vec::new()))
            }
            Some(RelationshipData::One(pointer)) => Some(RelationshipValue::One(
                pointer
                    .as_ref()
                    .map(|pointer| self.registry.get_or_create(pointer))
                    .transpose()?,
            )),
            Some(RelationshipData::Many(pointers)) => {
                if !definition.is_collection() {
                    return Err(GraphError::InvalidOperation(format!(
                        "updateRelationship received a list for the to-one relationship '{}.{}'",
                        record.resource_type(),
                        field
                    )));
                }
                Some(RelationshipValue::Many(
                    pointers
                        .iter()
                        .map(|pointer| self.registry.get_or_create(pointer))
                        .collect::<Result<Vec<_>, _>>()?,
                ))
            }
        };
        if let Some(value) = &data {
            self.prepare_related(record, &definition, &value.keys())?;
        }
        Ok((definition, data))
    }

    fn update_relationship(
        &mut self,
        record: &ResourceKey,
        field: &str,
        payload: RelationshipPayload,
    ) -> Result<(), GraphError> {
        let (definition, data) = self.prepare_remote(record, field, &payload)?;
        if self.removed.contains(record) {
            tracing::warn!(
                "[Graph::update_relationship] ignoring payload for removed resource {}.{}",
                record,
                field
            );
            return Ok(());
        }

        self.unloaded.remove(record);
        let before = self.observe(record, field);
        self.apply_links(record, &definition, payload.links, payload.meta, data.is_none());
        match data {
            Some(RelationshipValue::Many(keys)) => {
                self.replace_canonical_many(record, &definition, keys)?
            }
            Some(RelationshipValue::One(key)) => {
                self.replace_canonical_one(record, &definition, key)?
            }
            None => {}
        }
        if self.observe(record, field) != before {
            self.notify(record, field);
        }
        Ok(())
    }

    fn apply_links(
        &mut self,
        record: &ResourceKey,
        definition: &Arc<RelationshipDefinition>,
        links: Option<Links>,
        meta: Option<serde_json::Value>,
        data_absent: bool,
    ) {
        let edge = self.edge_mut(record, definition);
        if let Some(links) = links {
            let related_changed = links.related.is_some()
                && edge.links.as_ref().and_then(|l| l.related.as_ref()) != links.related.as_ref();
            if data_absent
                && related_changed
                && (definition.is_async || !edge.flags.has_received_data)
            {
                tracing::debug!(
                    "[Graph::apply_links] related link of {}.{} changed, marking stale",
                    record,
                    definition.key
                );
                edge.flags.is_stale = true;
            }
            edge.links = Some(links);
        }
        if let Some(meta) = meta {
            edge.meta = Some(meta);
        }
    }

    /// Replace canonical to-many state, then flush local state onto it.
    ///
    /// Members only present locally survive the flush when their key is still new.
    fn replace_canonical_many(
        &mut self,
        record: &ResourceKey,
        definition: &Arc<RelationshipDefinition>,
        keys: Vec<ResourceKey>,
    ) -> Result<(), GraphError> {
        let incoming: Membership = keys.into_iter().collect();
        let edge = self.edge_mut(record, definition);
        let canonical_order = edge.canonical_state().keys();
        let previous_local = edge.local_state().keys();
        edge.set_many(Layer::Canonical, incoming.clone());
        edge.flags.has_received_data = true;
        edge.flags.is_stale = false;
        edge.recompute_empty();

        // Removals first, so a to-one inverse never holds two owners at once.
        for key in canonical_order.iter().filter(|key| !incoming.contains(key)) {
            self.remove_inverse(definition, record, key, true);
        }
        let previous_canonical: HashSet<ResourceKey> = canonical_order.into_iter().collect();
        for key in incoming.iter() {
            if !previous_canonical.contains(key) {
                self.add_inverse(definition, record, key, true)?;
            }
        }

        let retained = previous_local
            .iter()
            .filter(|key| !incoming.contains(key) && key.is_new())
            .cloned();
        let local: Membership = incoming.iter().cloned().chain(retained).collect();
        let previous_members: HashSet<&ResourceKey> = previous_local.iter().collect();
        self.edge_mut(record, definition)
            .set_many(Layer::Local, local.clone());
        for key in previous_local.iter().filter(|key| !local.contains(key)) {
            self.remove_inverse(definition, record, key, false);
        }
        for key in local.iter().filter(|key| !previous_members.contains(key)) {
            self.add_inverse(definition, record, key, false)?;
        }
        Ok(())
    }

    /// Replace canonical to-one state and reset local state to it.
    fn replace_canonical_one(
        &mut self,
        record: &ResourceKey,
        definition: &Arc<RelationshipDefinition>,
        value: Option<ResourceKey>,
    ) -> Result<(), GraphError> {
        let edge = self.edge_mut(record, definition);
        let previous = edge.set_one(Layer::Canonical, value.clone());
        let previous_local = edge.local_state().as_one().cloned();
        edge.flags.has_received_data = true;
        edge.flags.is_stale = false;
        edge.recompute_empty();

        if previous != value {
            if let Some(previous) = &previous {
                self.remove_inverse(definition, record, previous, true);
            }
            if let Some(value) = &value {
                self.add_inverse(definition, record, value, true)?;
            }
        }

        if value.is_none() {
            if let Some(local) = previous_local.as_ref().filter(|key| key.is_new()) {
                tracing::warn!(
                    "[Graph::replace_canonical_one] canonical null for {}.{} keeps local value {} \
                     which the server has not seen yet",
                    record,
                    definition.key,
                    local
                );
                return Ok(());
            }
        }
        if previous_local != value {
            self.edge_mut(record, definition)
                .set_one(Layer::Local, value.clone());
            if let Some(previous_local) = &previous_local {
                self.remove_inverse(definition, record, previous_local, false);
            }
            if let Some(value) = &value {
                self.add_inverse(definition, record, value, false)?;
            }
        }
        Ok(())
    }

    fn replace_related_records(
        &mut self,
        record: &ResourceKey,
        field: &str,
        keys: Vec<ResourceKey>,
    ) -> Result<(), GraphError> {
        let definition =
            self.prepare_local("replaceRelatedRecords", record, field, true, &keys)?;
        let next: Membership = keys.into_iter().collect();
        let edge = self.edge_mut(record, &definition);
        let previous = edge.local_state().keys();
        edge.set_many(Layer::Local, next.clone());

        let previous_members: HashSet<&ResourceKey> = previous.iter().collect();
        for key in previous.iter().filter(|key| !next.contains(key)) {
            self.remove_inverse(&definition, record, key, false);
        }
        for key in next.iter().filter(|key| !previous_members.contains(key)) {
            self.add_inverse(&definition, record, key, false)?;
        }
        if previous.as_slice() != next.as_slice() {
            self.notify(record, field);
        }
        Ok(())
    }

    fn replace_related_record(
        &mut self,
        record: &ResourceKey,
        field: &str,
        value: Option<ResourceKey>,
    ) -> Result<(), GraphError> {
        let keys: Vec<ResourceKey> = value.iter().cloned().collect();
        let definition = self.prepare_local("replaceRelatedRecord", record, field, false, &keys)?;
        let previous = self
            .edge_mut(record, &definition)
            .set_one(Layer::Local, value.clone());
        if previous == value {
            return Ok(());
        }
        if let Some(previous) = &previous {
            self.remove_inverse(&definition, record, previous, false);
        }
        if let Some(value) = &value {
            self.add_inverse(&definition, record, value, false)?;
        }
        self.notify(record, field);
        Ok(())
    }

    fn add_to_related_records(
        &mut self,
        record: &ResourceKey,
        field: &str,
        keys: Vec<ResourceKey>,
        index: Option<usize>,
    ) -> Result<(), GraphError> {
        let definition = self.prepare_local("addToRelatedRecords", record, field, true, &keys)?;
        let edge = self.edge_mut(record, &definition);
        let mut position = index;
        let mut added = Vec::new();
        for key in &keys {
            if edge.add(Layer::Local, key, position) == AddOutcome::Added {
                added.push(key.clone());
                position = position.map(|i| i + 1);
            }
        }
        for key in &added {
            self.add_inverse(&definition, record, key, false)?;
        }
        if !added.is_empty() {
            self.notify(record, field);
        }
        Ok(())
    }

    fn remove_from_related_records(
        &mut self,
        record: &ResourceKey,
        field: &str,
        keys: Vec<ResourceKey>,
    ) -> Result<(), GraphError> {
        let definition =
            self.prepare_local("removeFromRelatedRecords", record, field, true, &[])?;
        let edge = self.edge_mut(record, &definition);
        let removed: Vec<ResourceKey> = keys
            .into_iter()
            .filter(|key| edge.remove(Layer::Local, key))
            .collect();
        for key in &removed {
            self.remove_inverse(&definition, record, key, false);
        }
        if !removed.is_empty() {
            self.notify(record, field);
        }
        Ok(())
    }
}

//! Cache facade: resource records, request documents and the commit lifecycle around a [Graph].
//!
//! The cache owns the graph of a session. Documents are ingested inside one graph transaction,
//! so their change notifications are delivered together once the document is fully applied.
//! Attributes are stored opaquely as JSON objects.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

use crate::{
    edge::RelationshipValue,
    graph::{Graph, RelationshipDiff, RelationshipState, Transaction},
    identifier::{
        DocumentKey, IdentifierRegistry, KeyUpdate, RequestDescriptor, ResourceDescriptor,
        ResourceKey,
    },
    operation::{Operation, RelationshipPayload},
    schema::SchemaQuery,
    GraphError,
};

/// A resource object as found in the `data` or `included` members of a document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceObject {
    #[serde(rename = "type")]
    pub resource_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lid: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub attributes: Map<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub relationships: BTreeMap<String, RelationshipPayload>,
}

impl ResourceObject {
    pub fn new(resource_type: &str, id: &str) -> Self {
        ResourceObject {
            resource_type: resource_type.to_string(),
            id: Some(id.to_string()),
            ..Default::default()
        }
    }

    pub fn with_attribute(mut self, name: &str, value: Value) -> Self {
        self.attributes.insert(name.to_string(), value);
        self
    }

    pub fn with_relationship(mut self, name: &str, payload: RelationshipPayload) -> Self {
        self.relationships.insert(name.to_string(), payload);
        self
    }

    pub fn descriptor(&self) -> ResourceDescriptor {
        ResourceDescriptor {
            resource_type: self.resource_type.clone(),
            id: self.id.clone(),
            lid: self.lid.clone(),
        }
    }
}

/// Primary data of a document: one (possibly null) resource or a list of resources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrimaryData {
    Many(Vec<ResourceObject>),
    One(Option<ResourceObject>),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<PrimaryData>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub included: Vec<ResourceObject>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
    /// The request this document answers. Only cacheable requests are stored.
    #[serde(skip)]
    pub request: Option<RequestDescriptor>,
}

impl Document {
    pub fn for_request(mut self, request: RequestDescriptor) -> Self {
        self.request = Some(request);
        self
    }
}

/// A document after ingestion: its primary data is reduced to keys.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub key: Option<DocumentKey>,
    pub data: Option<RelationshipValue>,
    pub meta: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecordState {
    pub is_new: bool,
    /// Deleted locally, waiting for the deletion to be committed.
    pub is_deleted: bool,
    pub is_in_flight: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Record {
    pub attributes: Map<String, Value>,
    pub state: RecordState,
}

impl Record {
    fn new(is_new: bool) -> Record {
        Record {
            attributes: Map::new(),
            state: RecordState {
                is_new,
                ..Default::default()
            },
        }
    }
}

/// Resource records and request documents of one session, backed by its relationship graph.
#[derive(Debug)]
pub struct Cache {
    registry: IdentifierRegistry,
    graph: Graph,
    records: HashMap<ResourceKey, Record>,
    documents: HashMap<DocumentKey, StoredDocument>,
}

impl Cache {
    /// Wrap `graph`. The cache uses the identifier registry of the graph.
    pub fn new(graph: Graph) -> Cache {
        Cache {
            registry: graph.registry().clone(),
            graph,
            records: HashMap::new(),
            documents: HashMap::new(),
        }
    }

    pub fn registry(&self) -> &IdentifierRegistry {
        &self.registry
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    /// Ingest a document: every resource in `included` and `data` is upserted within a single
    /// graph transaction. Documents answering a cacheable request are stored under their
    /// [DocumentKey].
    ///
    /// Every relationship of every resource is checked first, so a document that fails leaves
    /// the cache untouched.
    pub fn put(&mut self, document: Document) -> Result<StoredDocument, GraphError> {
        let primary: Vec<&ResourceObject> = match &document.data {
            None | Some(PrimaryData::One(None)) => Vec::new(),
            Some(PrimaryData::One(Some(resource))) => vec![resource],
            Some(PrimaryData::Many(resources)) => resources.iter().collect(),
        };
        for resource in document.included.iter().chain(primary) {
            validate(&self.registry, &mut self.graph, resource)?;
        }

        let key = document
            .request
            .as_ref()
            .and_then(|request| self.registry.get_or_create_document(request));
        let data = {
            let mut tx = self.graph.transaction();
            for resource in &document.included {
                ingest(&self.registry, &mut self.records, &mut tx, resource)?;
            }
            match &document.data {
                None => None,
                Some(PrimaryData::One(None)) => Some(RelationshipValue::One(None)),
                Some(PrimaryData::One(Some(resource))) => Some(RelationshipValue::One(Some(
                    ingest(&self.registry, &mut self.records, &mut tx, resource)?,
                ))),
                Some(PrimaryData::Many(resources)) => {
                    let mut keys = Vec::with_capacity(resources.len());
                    for resource in resources {
                        keys.push(ingest(&self.registry, &mut self.records, &mut tx, resource)?);
                    }
                    Some(RelationshipValue::Many(keys))
                }
            }
        };
        let stored = StoredDocument {
            key: key.clone(),
            data,
            meta: document.meta,
        };
        if let Some(key) = key {
            tracing::debug!("[Cache::put] storing document {}", key);
            self.documents.insert(key, stored.clone());
        }
        Ok(stored)
    }

    /// Ingest a single resource.
    pub fn upsert(&mut self, resource: &ResourceObject) -> Result<ResourceKey, GraphError> {
        validate(&self.registry, &mut self.graph, resource)?;
        let mut tx = self.graph.transaction();
        ingest(&self.registry, &mut self.records, &mut tx, resource)
    }

    pub fn peek(&self, key: &ResourceKey) -> Option<&Record> {
        self.records.get(&self.registry.resolve(key))
    }

    pub fn peek_request(&self, key: &DocumentKey) -> Option<&StoredDocument> {
        self.documents.get(key)
    }

    /// Apply a canonical or identity operation.
    pub fn patch(&mut self, operation: Operation) -> Result<(), GraphError> {
        if operation.is_local() {
            return Err(GraphError::InvalidOperation(format!(
                "{} is a local edit and must go through Cache::mutate",
                operation.name()
            )));
        }
        let dropped = match &operation {
            Operation::RemoveIdentifier { record } | Operation::DeleteRecord { record, .. } => {
                Some(self.registry.resolve(record))
            }
            _ => None,
        };
        self.graph.push(operation)?;
        if let Some(key) = dropped {
            self.records.remove(&key);
        }
        Ok(())
    }

    /// Apply a local edit.
    pub fn mutate(&mut self, operation: Operation) -> Result<(), GraphError> {
        if !operation.is_local() {
            return Err(GraphError::InvalidOperation(format!(
                "{} is not a local edit and must go through Cache::patch",
                operation.name()
            )));
        }
        self.graph.push(operation)
    }

    pub fn get_relationship(
        &mut self,
        key: &ResourceKey,
        field: &str,
    ) -> Result<RelationshipState, GraphError> {
        self.graph.get_data(key, field)
    }

    pub fn changed_relationships(&self, key: &ResourceKey) -> BTreeMap<String, RelationshipDiff> {
        self.graph.changed_relationships(key)
    }

    pub fn rollback_relationships(&mut self, key: &ResourceKey) -> Vec<String> {
        self.graph.rollback_relationships(key)
    }

    /// Changed relationships of every materialized resource.
    pub fn diff(&self) -> BTreeMap<ResourceKey, BTreeMap<String, RelationshipDiff>> {
        self.graph
            .materialized()
            .filter_map(|key| {
                let changes = self.graph.changed_relationships(key);
                (!changes.is_empty()).then(|| (key.clone(), changes))
            })
            .collect()
    }

    /// Create a client-side record. Its key reports `is_new` until the creation is committed.
    pub fn create_record(
        &mut self,
        resource_type: &str,
        attributes: Map<String, Value>,
    ) -> Result<ResourceKey, GraphError> {
        if self.graph.schema().resource_schema(resource_type).is_none() {
            return Err(GraphError::InvalidDescriptor(format!(
                "no schema is registered for type '{resource_type}'"
            )));
        }
        let key = self.registry.create_local(resource_type, None)?;
        tracing::debug!("[Cache::create_record] {}", key);
        self.records.insert(
            key.clone(),
            Record {
                attributes,
                state: RecordState {
                    is_new: true,
                    ..Default::default()
                },
            },
        );
        self.graph.mark_materialized(&key);
        Ok(key)
    }

    pub fn will_commit(&mut self, key: &ResourceKey) -> Result<(), GraphError> {
        let (_, record) = self.record_mut(key)?;
        record.state.is_in_flight = true;
        Ok(())
    }

    /// Settle a successful commit of `key`.
    ///
    /// A committed deletion removes the record from every relationship. Otherwise the server
    /// response assigns the id (merging with a key that already owns it), clears `is_new` and
    /// applies the returned attributes and relationships. Returns the surviving key.
    pub fn did_commit(
        &mut self,
        key: &ResourceKey,
        response: Option<&ResourceObject>,
    ) -> Result<ResourceKey, GraphError> {
        if let Some(resource) = response {
            let key = self.registry.resolve(key);
            validate_relationships(&mut self.graph, &key, resource)?;
        }
        let (mut key, record) = self.record_mut(key)?;
        record.state.is_in_flight = false;
        if record.state.is_deleted {
            tracing::debug!("[Cache::did_commit] deletion of {} committed", key);
            self.graph.push(Operation::DeleteRecord {
                record: key.clone(),
                is_new: key.is_new(),
            })?;
            self.records.remove(&key);
            self.graph.forget(&key);
            self.registry.forget(&key);
            return Ok(key);
        }

        if let Some(resource) = response {
            if let KeyUpdate::MergeRequired { existing, incoming } =
                self.registry.update_key(&key, &resource.descriptor())?
            {
                let outcome = self.registry.merge(&existing, &incoming)?;
                self.graph.push(Operation::MergeIdentifiers {
                    record: outcome.abandoned.clone(),
                    value: outcome.kept.clone(),
                })?;
                if let Some(abandoned) = self.records.remove(&outcome.abandoned) {
                    let kept = self.records.entry(outcome.kept.clone()).or_default();
                    for (name, value) in abandoned.attributes {
                        kept.attributes.entry(name).or_insert(value);
                    }
                }
                key = outcome.kept;
            }
        }

        self.registry.mark_saved(&key);
        if let Some(record) = self.records.get_mut(&key) {
            record.state.is_new = false;
        }
        if let Some(resource) = response {
            let mut tx = self.graph.transaction();
            apply_resource(&mut self.records, &mut tx, &key, resource)?;
        }
        Ok(key)
    }

    /// A commit of `key` failed. Local state is kept so it can be retried or rolled back.
    pub fn commit_was_rejected(&mut self, key: &ResourceKey) -> Result<(), GraphError> {
        let (key, record) = self.record_mut(key)?;
        record.state.is_in_flight = false;
        tracing::warn!("[Cache::commit_was_rejected] {} keeps its local changes", key);
        Ok(())
    }

    /// Drop the record of `key` and unload its relationship state. Records that were never saved
    /// are discarded entirely.
    pub fn unload_record(&mut self, key: &ResourceKey) -> Result<(), GraphError> {
        let key = self.registry.resolve(key);
        self.records.remove(&key);
        if key.is_new() {
            self.graph.push(Operation::DeleteRecord {
                record: key.clone(),
                is_new: true,
            })?;
            self.graph.forget(&key);
            self.registry.forget(&key);
        } else {
            self.graph.unload(&key);
        }
        Ok(())
    }

    /// Delete `key` locally. Saved records wait for [Cache::did_commit]; new records are
    /// discarded right away.
    pub fn delete_record(&mut self, key: &ResourceKey) -> Result<(), GraphError> {
        let (key, record) = self.record_mut(key)?;
        if key.is_new() {
            self.records.remove(&key);
            self.graph.push(Operation::DeleteRecord {
                record: key.clone(),
                is_new: true,
            })?;
            self.graph.forget(&key);
            self.registry.forget(&key);
        } else {
            record.state.is_deleted = true;
        }
        Ok(())
    }

    fn record_mut(&mut self, key: &ResourceKey) -> Result<(ResourceKey, &mut Record), GraphError> {
        let key = self.registry.resolve(key);
        match self.records.get_mut(&key) {
            Some(record) => Ok((key, record)),
            None => Err(GraphError::NotFound(format!("no record is cached for {key}"))),
        }
    }
}

/// Check every relationship of `resource` without applying any of them.
fn validate(
    registry: &IdentifierRegistry,
    graph: &mut Graph,
    resource: &ResourceObject,
) -> Result<(), GraphError> {
    let key = registry.get_or_create(&resource.descriptor())?;
    validate_relationships(graph, &key, resource)
}

fn validate_relationships(
    graph: &mut Graph,
    key: &ResourceKey,
    resource: &ResourceObject,
) -> Result<(), GraphError> {
    for (field, payload) in &resource.relationships {
        graph.validate(&Operation::UpdateRelationship {
            record: key.clone(),
            field: field.clone(),
            value: payload.clone(),
        })?;
    }
    Ok(())
}

fn ingest(
    registry: &IdentifierRegistry,
    records: &mut HashMap<ResourceKey, Record>,
    tx: &mut Transaction<'_>,
    resource: &ResourceObject,
) -> Result<ResourceKey, GraphError> {
    let key = registry.get_or_create(&resource.descriptor())?;
    apply_resource(records, tx, &key, resource)?;
    Ok(key)
}

fn apply_resource(
    records: &mut HashMap<ResourceKey, Record>,
    tx: &mut Transaction<'_>,
    key: &ResourceKey,
    resource: &ResourceObject,
) -> Result<(), GraphError> {
    let record = records
        .entry(key.clone())
        .or_insert_with(|| Record::new(key.is_new()));
    for (name, value) in &resource.attributes {
        record.attributes.insert(name.clone(), value.clone());
    }
    tx.mark_materialized(key);
    for (field, payload) in &resource.relationships {
        tx.push(Operation::UpdateRelationship {
            record: key.clone(),
            field: field.clone(),
            value: payload.clone(),
        })?;
    }
    Ok(())
}

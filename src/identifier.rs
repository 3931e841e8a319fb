//! Identifier stabilization.
//!
//! [ResourceKey]s are long-lived, reference-stable handles for one logical entity. Every clone
//! of a key shares the same allocation, so an id assigned by the server after a client-side
//! creation is visible to everyone already holding the key. [DocumentKey]s do the same for
//! cacheable requests.
//!
//! The [IdentifierRegistry] is a cheap, clonable handle: the graph and the cache of one
//! session share a single registry.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::{
    cmp::Ordering,
    collections::{HashMap, HashSet},
    fmt,
    hash::{Hash, Hasher},
    sync::{
        atomic::{AtomicBool, Ordering as AtomicOrdering},
        Arc,
    },
};
use uuid::Uuid;

use crate::GraphError;

/// Locally generated identity of a [ResourceKey]. Immutable for the lifetime of the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Lid(String);

impl Lid {
    pub fn mint() -> Lid {
        Lid(format!("@lid:{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Lid {
    fn from(s: &str) -> Self {
        Lid(s.to_string())
    }
}

impl From<String> for Lid {
    fn from(s: String) -> Self {
        Lid(s)
    }
}

impl fmt::Display for Lid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The `{type, id?, lid?}` triple used to look up or allocate a [ResourceKey]. This is also the
/// shape of a relationship pointer in wire payloads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    #[serde(rename = "type")]
    pub resource_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lid: Option<String>,
}

impl ResourceDescriptor {
    pub fn new(resource_type: &str, id: &str) -> Self {
        ResourceDescriptor {
            resource_type: resource_type.to_string(),
            id: Some(id.to_string()),
            lid: None,
        }
    }

    pub fn local(resource_type: &str, lid: &str) -> Self {
        ResourceDescriptor {
            resource_type: resource_type.to_string(),
            id: None,
            lid: Some(lid.to_string()),
        }
    }
}

#[derive(Debug)]
struct KeyData {
    lid: Lid,
    resource_type: String,
    id: RwLock<Option<String>>,
    is_new: AtomicBool,
}

/// Stable identity for one logical entity, independent of its (mutable) server id.
///
/// Equality, ordering and hashing use the `lid`. Use [ResourceKey::ptr_eq] to check that two
/// handles are the very same key instance.
#[derive(Clone)]
pub struct ResourceKey(Arc<KeyData>);

impl ResourceKey {
    fn allocate(resource_type: &str, id: Option<String>, lid: Lid, is_new: bool) -> Self {
        ResourceKey(Arc::new(KeyData {
            lid,
            resource_type: resource_type.to_string(),
            id: RwLock::new(id),
            is_new: AtomicBool::new(is_new),
        }))
    }

    pub fn lid(&self) -> &Lid {
        &self.0.lid
    }

    pub fn resource_type(&self) -> &str {
        &self.0.resource_type
    }

    pub fn id(&self) -> Option<String> {
        self.0.id.read().clone()
    }

    /// True for client-created entities the server has not confirmed yet.
    pub fn is_new(&self) -> bool {
        self.0.is_new.load(AtomicOrdering::SeqCst)
    }

    pub fn ptr_eq(&self, other: &ResourceKey) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn descriptor(&self) -> ResourceDescriptor {
        ResourceDescriptor {
            resource_type: self.resource_type().to_string(),
            id: self.id(),
            lid: Some(self.lid().to_string()),
        }
    }

    fn set_id(&self, id: String) {
        *self.0.id.write() = Some(id);
    }

    fn set_is_new(&self, is_new: bool) {
        self.0.is_new.store(is_new, AtomicOrdering::SeqCst);
    }
}

impl PartialEq for ResourceKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.lid == other.0.lid
    }
}

impl Eq for ResourceKey {}

impl Hash for ResourceKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.lid.hash(state)
    }
}

impl PartialOrd for ResourceKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ResourceKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.lid.cmp(&other.0.lid)
    }
}

impl fmt::Debug for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResourceKey({self})")
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id() {
            Some(id) => write!(f, "{}:{}", self.resource_type(), id),
            None => write!(f, "{}:{}", self.resource_type(), self.lid()),
        }
    }
}

impl Serialize for ResourceKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.descriptor().serialize(serializer)
    }
}

/// Describes a request whose response may be cached.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestDescriptor {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub cache_key: Option<String>,
}

impl RequestDescriptor {
    pub fn get(url: &str) -> Self {
        RequestDescriptor {
            url: Some(url.to_string()),
            ..Default::default()
        }
    }

    fn lid(&self) -> Option<String> {
        if let Some(key) = &self.cache_key {
            return Some(key.clone());
        }
        let is_get = self
            .method
            .as_deref()
            .map(|m| m.eq_ignore_ascii_case("GET"))
            .unwrap_or(true);
        match (&self.url, is_get) {
            (Some(url), true) => Some(url.clone()),
            _ => None,
        }
    }
}

/// Stable identity for one cacheable request/response pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentKey(Arc<str>);

impl DocumentKey {
    pub fn lid(&self) -> &str {
        &self.0
    }

    pub fn ptr_eq(&self, other: &DocumentKey) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of [IdentifierRegistry::update_key].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyUpdate {
    Unchanged,
    Updated,
    /// The new `(type, id)` already belongs to `existing`. The caller must issue a merge.
    MergeRequired {
        existing: ResourceKey,
        incoming: ResourceKey,
    },
}

/// Outcome of [IdentifierRegistry::merge].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub kept: ResourceKey,
    pub abandoned: ResourceKey,
}

#[derive(Debug, Default)]
struct RegistryInner {
    by_lid: HashMap<Lid, ResourceKey>,
    by_type_id: HashMap<String, HashMap<String, ResourceKey>>,
    documents: HashMap<String, DocumentKey>,
}

impl RegistryInner {
    fn lookup_id(&self, resource_type: &str, id: &str) -> Option<ResourceKey> {
        self.by_type_id
            .get(resource_type)
            .and_then(|ids| ids.get(id))
            .cloned()
    }

    fn index_id(&mut self, key: &ResourceKey, id: &str) {
        self.by_type_id
            .entry(key.resource_type().to_string())
            .or_default()
            .insert(id.to_string(), key.clone());
    }
}

/// Process-wide (per session) registry of [ResourceKey]s and [DocumentKey]s.
#[derive(Debug, Clone, Default)]
pub struct IdentifierRegistry(Arc<RwLock<RegistryInner>>);

impl IdentifierRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the key for `descriptor`, allocating one if neither its `lid` nor its
    /// `(type, id)` is known yet.
    pub fn get_or_create(
        &self,
        descriptor: &ResourceDescriptor,
    ) -> Result<ResourceKey, GraphError> {
        if descriptor.resource_type.is_empty() {
            return Err(GraphError::InvalidDescriptor(format!(
                "a resource descriptor requires a non-empty type: {descriptor:?}"
            )));
        }
        let mut inner = self.0.write();
        let by_lid = descriptor
            .lid
            .as_ref()
            .and_then(|lid| inner.by_lid.get(&Lid::from(lid.as_str())))
            .cloned();
        let by_id = descriptor
            .id
            .as_ref()
            .and_then(|id| inner.lookup_id(&descriptor.resource_type, id));

        match (by_lid, by_id) {
            (Some(lid_key), Some(id_key)) if !lid_key.ptr_eq(&id_key) => {
                Err(GraphError::IdentityCollision(format!(
                    "lid '{}' resolves to {lid_key} but ({}, {}) resolves to {id_key}",
                    descriptor.lid.as_deref().unwrap_or_default(),
                    descriptor.resource_type,
                    descriptor.id.as_deref().unwrap_or_default(),
                )))
            }
            (Some(key), _) => {
                if key.resource_type() != descriptor.resource_type {
                    return Err(GraphError::IdentityCollision(format!(
                        "lid '{}' belongs to type '{}', not '{}'",
                        key.lid(),
                        key.resource_type(),
                        descriptor.resource_type
                    )));
                }
                if let Some(id) = &descriptor.id {
                    match key.id() {
                        None => {
                            key.set_id(id.clone());
                            inner.index_id(&key, id);
                        }
                        Some(current) if current != *id => {
                            return Err(GraphError::IdentityCollision(format!(
                                "{key} cannot also be identified by id '{id}'"
                            )));
                        }
                        Some(_) => {}
                    }
                }
                Ok(key)
            }
            (None, Some(key)) => {
                if let Some(lid) = &descriptor.lid {
                    inner.by_lid.insert(Lid::from(lid.as_str()), key.clone());
                }
                Ok(key)
            }
            (None, None) => {
                let lid = descriptor
                    .lid
                    .as_deref()
                    .map(Lid::from)
                    .unwrap_or_else(Lid::mint);
                let key = ResourceKey::allocate(
                    &descriptor.resource_type,
                    descriptor.id.clone(),
                    lid.clone(),
                    descriptor.id.is_none(),
                );
                inner.by_lid.insert(lid, key.clone());
                if let Some(id) = &descriptor.id {
                    inner.index_id(&key, id);
                }
                tracing::debug!("[IdentifierRegistry::get_or_create] allocated {key}");
                Ok(key)
            }
        }
    }

    /// Allocate a key for a client-created entity. The key reports [ResourceKey::is_new] until
    /// [IdentifierRegistry::mark_saved] is called.
    pub fn create_local(
        &self,
        resource_type: &str,
        id: Option<&str>,
    ) -> Result<ResourceKey, GraphError> {
        if let Some(id) = id {
            if let Some(existing) = self.0.read().lookup_id(resource_type, id) {
                return Err(GraphError::IdentityCollision(format!(
                    "cannot create a new '{resource_type}' with id '{id}': it is already {existing}"
                )));
            }
        }
        let key = self.get_or_create(&ResourceDescriptor {
            resource_type: resource_type.to_string(),
            id: id.map(str::to_string),
            lid: Some(Lid::mint().to_string()),
        })?;
        key.set_is_new(true);
        Ok(key)
    }

    /// Non-allocating lookup.
    pub fn peek(&self, descriptor: &ResourceDescriptor) -> Option<ResourceKey> {
        let inner = self.0.read();
        descriptor
            .lid
            .as_ref()
            .and_then(|lid| inner.by_lid.get(&Lid::from(lid.as_str())).cloned())
            .or_else(|| {
                descriptor
                    .id
                    .as_ref()
                    .and_then(|id| inner.lookup_id(&descriptor.resource_type, id))
            })
    }

    /// Return the surviving key for `key`, which differs from `key` only after a merge.
    pub fn resolve(&self, key: &ResourceKey) -> ResourceKey {
        self.0
            .read()
            .by_lid
            .get(key.lid())
            .cloned()
            .unwrap_or_else(|| key.clone())
    }

    /// Record new identifying information (usually a server assigned id) on `key`. Object
    /// identity and `lid` of `key` are preserved.
    pub fn update_key(
        &self,
        key: &ResourceKey,
        descriptor: &ResourceDescriptor,
    ) -> Result<KeyUpdate, GraphError> {
        let key = self.resolve(key);
        if descriptor.resource_type != key.resource_type() {
            return Err(GraphError::IdentityCollision(format!(
                "{key} cannot change its type to '{}'",
                descriptor.resource_type
            )));
        }
        let Some(new_id) = &descriptor.id else {
            return Ok(KeyUpdate::Unchanged);
        };
        match key.id() {
            Some(current) if current == *new_id => Ok(KeyUpdate::Unchanged),
            Some(current) => Err(GraphError::IdentityCollision(format!(
                "{key} already has id '{current}' and cannot be re-identified as '{new_id}'"
            ))),
            None => {
                let mut inner = self.0.write();
                match inner.lookup_id(key.resource_type(), new_id) {
                    Some(existing) if !existing.ptr_eq(&key) => Ok(KeyUpdate::MergeRequired {
                        existing,
                        incoming: key,
                    }),
                    _ => {
                        key.set_id(new_id.clone());
                        inner.index_id(&key, new_id);
                        Ok(KeyUpdate::Updated)
                    }
                }
            }
        }
    }

    /// Declare `existing` and `incoming` to denote the same entity. `incoming` (the key the
    /// application holds and is updating) is kept; it adopts the id of `existing` and every
    /// lookup that used to resolve to `existing` resolves to it from now on.
    pub fn merge(
        &self,
        existing: &ResourceKey,
        incoming: &ResourceKey,
    ) -> Result<MergeOutcome, GraphError> {
        if existing.resource_type() != incoming.resource_type() {
            return Err(GraphError::IdentityCollision(format!(
                "cannot merge {existing} into {incoming}: types differ"
            )));
        }
        let kept = self.resolve(incoming);
        let abandoned = self.resolve(existing);
        if kept.ptr_eq(&abandoned) {
            return Ok(MergeOutcome {
                kept: kept.clone(),
                abandoned: kept,
            });
        }
        let mut inner = self.0.write();
        if let Some(id) = abandoned.id() {
            match kept.id() {
                None => kept.set_id(id.clone()),
                Some(kept_id) if kept_id != id => {
                    return Err(GraphError::IdentityCollision(format!(
                        "cannot merge {abandoned} into {kept}: ids differ"
                    )));
                }
                Some(_) => {}
            }
            inner.index_id(&kept, &id);
        }
        for target in inner.by_lid.values_mut() {
            if target.ptr_eq(&abandoned) {
                *target = kept.clone();
            }
        }
        inner
            .by_lid
            .insert(abandoned.lid().clone(), kept.clone());
        tracing::debug!("[IdentifierRegistry::merge] {abandoned} merged into {kept}");
        Ok(MergeOutcome { kept, abandoned })
    }

    /// Clear the `is_new` flag once the server has confirmed the entity.
    pub fn mark_saved(&self, key: &ResourceKey) {
        self.resolve(key).set_is_new(false);
    }

    /// Remove `key` and every lookup resolving to it.
    pub fn forget(&self, key: &ResourceKey) {
        let key = self.resolve(key);
        let mut inner = self.0.write();
        inner.by_lid.retain(|_, target| !target.ptr_eq(&key));
        if let Some(id) = key.id() {
            if let Some(ids) = inner.by_type_id.get_mut(key.resource_type()) {
                if ids.get(&id).is_some_and(|target| target.ptr_eq(&key)) {
                    ids.remove(&id);
                }
            }
        }
    }

    /// Number of distinct keys known to the registry.
    pub fn len(&self) -> usize {
        let inner = self.0.read();
        inner
            .by_lid
            .values()
            .map(|key| key.lid())
            .collect::<HashSet<_>>()
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.read().by_lid.is_empty()
    }

    /// Stable key for a cacheable request, or `None` if the request is not cacheable.
    pub fn get_or_create_document(&self, request: &RequestDescriptor) -> Option<DocumentKey> {
        let lid = request.lid()?;
        let mut inner = self.0.write();
        Some(
            inner
                .documents
                .entry(lid.clone())
                .or_insert_with(|| DocumentKey(Arc::from(lid.as_str())))
                .clone(),
        )
    }

    pub fn forget_document(&self, key: &DocumentKey) {
        self.0.write().documents.remove(key.lid());
    }
}

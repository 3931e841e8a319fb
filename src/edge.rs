//! The per `(resource, field)` relationship state machine.
//!
//! Every [Edge] keeps two layers of membership:
//!
//! - **canonical**: the last server-confirmed value;
//! - **local**: the value the application observes, possibly holding uncommitted edits.
//!
//! Edges never reach across to the related side. Keeping both ends consistent is the job of
//! [crate::graph::Graph], which calls the crate-private mutators below on each side in turn.

use serde::Serialize;
use std::{
    collections::{BTreeSet, HashSet},
    sync::Arc,
};

use crate::{definition::RelationshipDefinition, identifier::ResourceKey, operation::Links};

/// Which membership layer an update targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layer {
    Canonical,
    Local,
}

/// Status flags of an edge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EdgeFlags {
    /// Canonical data has been received at least once.
    pub has_received_data: bool,
    /// Local state must be recomputed against a fresher canonical value before being trusted.
    pub is_stale: bool,
    /// The last canonical payload was empty.
    pub is_empty: bool,
    /// A related resource was unloaded while this edge still references it.
    pub has_dematerialized_inverse: bool,
    pub has_failed_load_attempt: bool,
    pub should_force_reload: bool,
}

/// Observable value of one layer of an edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum RelationshipValue {
    One(Option<ResourceKey>),
    Many(Vec<ResourceKey>),
}

impl RelationshipValue {
    pub fn keys(&self) -> Vec<ResourceKey> {
        match self {
            RelationshipValue::One(key) => key.iter().cloned().collect(),
            RelationshipValue::Many(keys) => keys.clone(),
        }
    }

    pub fn as_one(&self) -> Option<&ResourceKey> {
        match self {
            RelationshipValue::One(key) => key.as_ref(),
            RelationshipValue::Many(_) => None,
        }
    }

    pub fn as_many(&self) -> &[ResourceKey] {
        match self {
            RelationshipValue::One(_) => &[],
            RelationshipValue::Many(keys) => keys,
        }
    }
}

/// Ordered list with set semantics for membership.
#[derive(Debug, Clone, Default)]
pub struct Membership {
    order: Vec<ResourceKey>,
    members: HashSet<ResourceKey>,
}

impl PartialEq for Membership {
    fn eq(&self, other: &Self) -> bool {
        self.order == other.order
    }
}

impl Eq for Membership {}

impl FromIterator<ResourceKey> for Membership {
    /// Duplicates collapse onto their first occurrence.
    fn from_iter<I: IntoIterator<Item = ResourceKey>>(iter: I) -> Self {
        let mut membership = Membership::default();
        for key in iter {
            membership.push(key);
        }
        membership
    }
}

impl Membership {
    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.members.contains(key)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn as_slice(&self) -> &[ResourceKey] {
        &self.order
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResourceKey> {
        self.order.iter()
    }

    pub fn same_members(&self, other: &Membership) -> bool {
        self.members == other.members
    }

    fn push(&mut self, key: ResourceKey) -> bool {
        if self.members.insert(key.clone()) {
            self.order.push(key);
            true
        } else {
            false
        }
    }

    fn insert_at(&mut self, index: Option<usize>, key: ResourceKey) -> bool {
        if self.members.contains(&key) {
            return false;
        }
        self.members.insert(key.clone());
        match index {
            Some(i) if i < self.order.len() => self.order.insert(i, key),
            _ => self.order.push(key),
        }
        true
    }

    fn remove(&mut self, key: &ResourceKey) -> bool {
        if self.members.remove(key) {
            self.order.retain(|k| k != key);
            true
        } else {
            false
        }
    }

    fn replace_key(&mut self, old: &ResourceKey, new: &ResourceKey) -> bool {
        if !self.members.contains(old) {
            return false;
        }
        if self.members.contains(new) {
            self.remove(old);
        } else {
            self.members.remove(old);
            self.members.insert(new.clone());
            for k in self.order.iter_mut() {
                if k == old {
                    *k = new.clone();
                }
            }
        }
        true
    }

    fn clear(&mut self) {
        self.order.clear();
        self.members.clear();
    }
}

#[derive(Debug, Clone)]
pub(crate) enum EdgeState {
    Resource {
        canonical: Option<ResourceKey>,
        local: Option<ResourceKey>,
    },
    Collection {
        canonical: Membership,
        local: Membership,
    },
    Implicit {
        canonical: BTreeSet<ResourceKey>,
        local: BTreeSet<ResourceKey>,
    },
}

/// Outcome of adding a key to one layer of an edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum AddOutcome {
    Unchanged,
    Added,
    /// A to-one layer pointed at another key which was displaced.
    Replaced(ResourceKey),
}

#[derive(Debug, Clone)]
pub struct Edge {
    key: ResourceKey,
    definition: Arc<RelationshipDefinition>,
    state: EdgeState,
    pub(crate) flags: EdgeFlags,
    pub(crate) links: Option<Links>,
    pub(crate) meta: Option<serde_json::Value>,
}

impl Edge {
    pub(crate) fn new(key: ResourceKey, definition: Arc<RelationshipDefinition>) -> Edge {
        let state = if definition.is_implicit {
            EdgeState::Implicit {
                canonical: BTreeSet::new(),
                local: BTreeSet::new(),
            }
        } else if definition.is_collection() {
            EdgeState::Collection {
                canonical: Membership::default(),
                local: Membership::default(),
            }
        } else {
            EdgeState::Resource {
                canonical: None,
                local: None,
            }
        };
        Edge {
            key,
            definition,
            state,
            flags: EdgeFlags {
                is_empty: true,
                ..Default::default()
            },
            links: None,
            meta: None,
        }
    }

    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    pub fn field(&self) -> &str {
        &self.definition.key
    }

    pub fn definition(&self) -> &Arc<RelationshipDefinition> {
        &self.definition
    }

    pub fn flags(&self) -> &EdgeFlags {
        &self.flags
    }

    pub fn links(&self) -> Option<&Links> {
        self.links.as_ref()
    }

    pub fn meta(&self) -> Option<&serde_json::Value> {
        self.meta.as_ref()
    }

    pub fn is_implicit(&self) -> bool {
        matches!(self.state, EdgeState::Implicit { .. })
    }

    pub fn canonical_state(&self) -> RelationshipValue {
        self.value(Layer::Canonical)
    }

    pub fn local_state(&self) -> RelationshipValue {
        self.value(Layer::Local)
    }

    pub fn value(&self, layer: Layer) -> RelationshipValue {
        match (&self.state, layer) {
            (EdgeState::Resource { canonical, .. }, Layer::Canonical) => {
                RelationshipValue::One(canonical.clone())
            }
            (EdgeState::Resource { local, .. }, Layer::Local) => {
                RelationshipValue::One(local.clone())
            }
            (EdgeState::Collection { canonical, .. }, Layer::Canonical) => {
                RelationshipValue::Many(canonical.as_slice().to_vec())
            }
            (EdgeState::Collection { local, .. }, Layer::Local) => {
                RelationshipValue::Many(local.as_slice().to_vec())
            }
            (EdgeState::Implicit { canonical, .. }, Layer::Canonical) => {
                RelationshipValue::Many(canonical.iter().cloned().collect())
            }
            (EdgeState::Implicit { local, .. }, Layer::Local) => {
                RelationshipValue::Many(local.iter().cloned().collect())
            }
        }
    }

    pub fn contains(&self, layer: Layer, key: &ResourceKey) -> bool {
        match (&self.state, layer) {
            (EdgeState::Resource { canonical, .. }, Layer::Canonical) => {
                canonical.as_ref() == Some(key)
            }
            (EdgeState::Resource { local, .. }, Layer::Local) => local.as_ref() == Some(key),
            (EdgeState::Collection { canonical, .. }, Layer::Canonical) => canonical.contains(key),
            (EdgeState::Collection { local, .. }, Layer::Local) => local.contains(key),
            (EdgeState::Implicit { canonical, .. }, Layer::Canonical) => canonical.contains(key),
            (EdgeState::Implicit { local, .. }, Layer::Local) => local.contains(key),
        }
    }

    /// Keys in either layer, canonical first, without duplicates.
    pub fn related_keys(&self) -> Vec<ResourceKey> {
        let mut keys = self.canonical_state().keys();
        for key in self.local_state().keys() {
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        keys
    }

    /// Keys that are in local state but not in canonical state.
    pub fn local_only_keys(&self) -> Vec<ResourceKey> {
        self.local_state()
            .keys()
            .into_iter()
            .filter(|key| !self.contains(Layer::Canonical, key))
            .collect()
    }

    /// Local state differs from canonical state, including in order.
    pub fn is_diverged(&self) -> bool {
        match &self.state {
            EdgeState::Resource { canonical, local } => canonical != local,
            EdgeState::Collection { canonical, local } => canonical != local,
            EdgeState::Implicit { canonical, local } => canonical != local,
        }
    }

    /// Neither layer references anything.
    pub fn is_vacant(&self) -> bool {
        match &self.state {
            EdgeState::Resource { canonical, local } => canonical.is_none() && local.is_none(),
            EdgeState::Collection { canonical, local } => canonical.is_empty() && local.is_empty(),
            EdgeState::Implicit { canonical, local } => canonical.is_empty() && local.is_empty(),
        }
    }

    pub(crate) fn membership(&self, layer: Layer) -> Option<&Membership> {
        match (&self.state, layer) {
            (EdgeState::Collection { canonical, .. }, Layer::Canonical) => Some(canonical),
            (EdgeState::Collection { local, .. }, Layer::Local) => Some(local),
            _ => None,
        }
    }

    /// Add `key` to one layer. Collections insert at `index` (append when absent), to-one
    /// layers replace their current value.
    pub(crate) fn add(
        &mut self,
        layer: Layer,
        key: &ResourceKey,
        index: Option<usize>,
    ) -> AddOutcome {
        match &mut self.state {
            EdgeState::Resource { canonical, local } => {
                let slot = match layer {
                    Layer::Canonical => canonical,
                    Layer::Local => local,
                };
                match slot.replace(key.clone()) {
                    Some(previous) if previous == *key => AddOutcome::Unchanged,
                    Some(previous) => AddOutcome::Replaced(previous),
                    None => AddOutcome::Added,
                }
            }
            EdgeState::Collection { canonical, local } => {
                let members = match layer {
                    Layer::Canonical => canonical,
                    Layer::Local => local,
                };
                if members.insert_at(index, key.clone()) {
                    AddOutcome::Added
                } else {
                    AddOutcome::Unchanged
                }
            }
            EdgeState::Implicit { canonical, local } => {
                let members = match layer {
                    Layer::Canonical => canonical,
                    Layer::Local => local,
                };
                if members.insert(key.clone()) {
                    AddOutcome::Added
                } else {
                    AddOutcome::Unchanged
                }
            }
        }
    }

    /// Remove `key` from one layer. Returns whether anything changed.
    pub(crate) fn remove(&mut self, layer: Layer, key: &ResourceKey) -> bool {
        match &mut self.state {
            EdgeState::Resource { canonical, local } => {
                let slot = match layer {
                    Layer::Canonical => canonical,
                    Layer::Local => local,
                };
                if slot.as_ref() == Some(key) {
                    *slot = None;
                    true
                } else {
                    false
                }
            }
            EdgeState::Collection { canonical, local } => match layer {
                Layer::Canonical => canonical.remove(key),
                Layer::Local => local.remove(key),
            },
            EdgeState::Implicit { canonical, local } => match layer {
                Layer::Canonical => canonical.remove(key),
                Layer::Local => local.remove(key),
            },
        }
    }

    /// Overwrite a to-one layer. Returns the previous value.
    pub(crate) fn set_one(
        &mut self,
        layer: Layer,
        value: Option<ResourceKey>,
    ) -> Option<ResourceKey> {
        match &mut self.state {
            EdgeState::Resource { canonical, local } => match layer {
                Layer::Canonical => std::mem::replace(canonical, value),
                Layer::Local => std::mem::replace(local, value),
            },
            _ => None,
        }
    }

    /// Overwrite a collection layer with already de-duplicated members.
    pub(crate) fn set_many(&mut self, layer: Layer, value: Membership) {
        if let EdgeState::Collection { canonical, local } = &mut self.state {
            match layer {
                Layer::Canonical => *canonical = value,
                Layer::Local => *local = value,
            }
        }
    }

    /// Empty one layer. Returns the keys it held.
    pub(crate) fn clear(&mut self, layer: Layer) -> Vec<ResourceKey> {
        let removed = self.value(layer).keys();
        match &mut self.state {
            EdgeState::Resource { canonical, local } => match layer {
                Layer::Canonical => *canonical = None,
                Layer::Local => *local = None,
            },
            EdgeState::Collection { canonical, local } => match layer {
                Layer::Canonical => canonical.clear(),
                Layer::Local => local.clear(),
            },
            EdgeState::Implicit { canonical, local } => match layer {
                Layer::Canonical => canonical.clear(),
                Layer::Local => local.clear(),
            },
        }
        removed
    }

    /// Point every reference to `old` at `new` in both layers. Returns whether anything changed.
    pub(crate) fn replace_key(&mut self, old: &ResourceKey, new: &ResourceKey) -> bool {
        match &mut self.state {
            EdgeState::Resource { canonical, local } => {
                let mut changed = false;
                for slot in [canonical, local] {
                    if slot.as_ref() == Some(old) {
                        *slot = Some(new.clone());
                        changed = true;
                    }
                }
                changed
            }
            EdgeState::Collection { canonical, local } => {
                let a = canonical.replace_key(old, new);
                let b = local.replace_key(old, new);
                a || b
            }
            EdgeState::Implicit { canonical, local } => {
                let mut changed = false;
                for set in [canonical, local] {
                    if set.remove(old) {
                        set.insert(new.clone());
                        changed = true;
                    }
                }
                changed
            }
        }
    }

    /// Fold the membership of `other` (an edge of a merged-away key) into this edge. Members
    /// already present keep their position.
    pub(crate) fn absorb(&mut self, other: &Edge) {
        let is_resource = matches!(self.state, EdgeState::Resource { .. });
        for layer in [Layer::Canonical, Layer::Local] {
            if is_resource {
                if self.value(layer).as_one().is_none() {
                    if let Some(key) = other.value(layer).as_one() {
                        self.add(layer, key, None);
                    }
                }
            } else {
                for key in other.value(layer).keys() {
                    self.add(layer, &key, None);
                }
            }
        }
        self.flags.has_received_data |= other.flags.has_received_data;
        self.flags.is_stale |= other.flags.is_stale;
        self.recompute_empty();
        if self.links.is_none() {
            self.links = other.links.clone();
        }
        if self.meta.is_none() {
            self.meta = other.meta.clone();
        }
    }

    pub(crate) fn rekey(&mut self, key: ResourceKey) {
        self.key = key;
    }

    pub(crate) fn recompute_empty(&mut self) {
        self.flags.is_empty = self.canonical_state().keys().is_empty();
    }
}

use serde::Serialize;
use std::{
    collections::HashSet,
    fmt::{Display, Formatter},
};

use crate::identifier::ResourceKey;

/// Change notifications emitted by the graph once the owning transaction completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum GraphEvent {
    /// The observable (local) state or the flags of `key.field` changed.
    RelationshipChanged { key: ResourceKey, field: String },
    /// The relationship state of `key` was unloaded or removed.
    ResourceUnloaded { key: ResourceKey },
    /// From key, To key
    IdentifiersMerged { from: ResourceKey, to: ResourceKey },
}

impl GraphEvent {
    pub fn key(&self) -> &ResourceKey {
        match self {
            GraphEvent::RelationshipChanged { key, .. } => key,
            GraphEvent::ResourceUnloaded { key } => key,
            GraphEvent::IdentifiersMerged { to, .. } => to,
        }
    }

    pub fn field(&self) -> Option<&str> {
        match self {
            GraphEvent::RelationshipChanged { field, .. } => Some(field),
            _ => None,
        }
    }
}

impl Display for GraphEvent {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            GraphEvent::RelationshipChanged { key, field } => {
                write!(f, "RelationshipChanged({key}.{field})")
            }
            GraphEvent::ResourceUnloaded { key } => write!(f, "ResourceUnloaded({key})"),
            GraphEvent::IdentifiersMerged { from, to } => {
                write!(f, "IdentifiersMerged({from} -> {to})")
            }
        }
    }
}

/// Notifications collected during one transaction.
///
/// Each `(key, field)` pair is queued at most once and events keep the order in which they were
/// first queued.
#[derive(Debug, Default)]
pub struct NotificationQueue {
    events: Vec<GraphEvent>,
    seen: HashSet<(ResourceKey, Option<String>)>,
}

impl NotificationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `event` unless an equivalent one is already pending. Returns whether it was queued.
    pub fn push(&mut self, event: GraphEvent) -> bool {
        let dedupe = match &event {
            GraphEvent::RelationshipChanged { key, field } => {
                Some((key.clone(), Some(field.clone())))
            }
            GraphEvent::ResourceUnloaded { key } => Some((key.clone(), None)),
            GraphEvent::IdentifiersMerged { .. } => None,
        };
        if let Some(slot) = dedupe {
            if !self.seen.insert(slot) {
                return false;
            }
        }
        self.events.push(event);
        true
    }

    pub fn relationship_changed(&mut self, key: &ResourceKey, field: &str) -> bool {
        self.push(GraphEvent::RelationshipChanged {
            key: key.clone(),
            field: field.to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Take every pending event and reset the queue.
    pub fn drain(&mut self) -> Vec<GraphEvent> {
        self.seen.clear();
        std::mem::take(&mut self.events)
    }
}

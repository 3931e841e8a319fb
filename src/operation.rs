//! The operations vocabulary accepted by [crate::graph::Graph::push].
//!
//! Remote payloads (`updateRelationship`) carry resource descriptors exactly as they arrived
//! over the wire; the graph resolves them to [ResourceKey]s. Local edits carry keys the
//! application already holds. [WireOperation] is the fully serializable form of every
//! operation, resolved against an [IdentifierRegistry] before being pushed.

use serde::{Deserialize, Deserializer, Serialize};

use crate::{
    edge::RelationshipValue,
    identifier::{IdentifierRegistry, ResourceDescriptor, ResourceKey},
    GraphError,
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Links {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related: Option<String>,
    #[serde(rename = "self", default, skip_serializing_if = "Option::is_none")]
    pub self_link: Option<String>,
}

/// Relationship linkage as found in a payload: `null`, one pointer, or a list of pointers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RelationshipData {
    Many(Vec<ResourceDescriptor>),
    One(Option<ResourceDescriptor>),
}

impl From<&RelationshipValue> for RelationshipData {
    fn from(value: &RelationshipValue) -> Self {
        match value {
            RelationshipValue::One(key) => {
                RelationshipData::One(key.as_ref().map(|k| k.descriptor()))
            }
            RelationshipValue::Many(keys) => {
                RelationshipData::Many(keys.iter().map(|k| k.descriptor()).collect())
            }
        }
    }
}

/// Distinguishes an absent `data` member (`None`) from `data: null` (`Some(One(None))`).
fn present<'de, D>(deserializer: D) -> Result<Option<RelationshipData>, D::Error>
where
    D: Deserializer<'de>,
{
    RelationshipData::deserialize(deserializer).map(Some)
}

/// A relationship object from a server payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationshipPayload {
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub data: Option<RelationshipData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub links: Option<Links>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

impl RelationshipPayload {
    pub fn one(data: Option<ResourceDescriptor>) -> Self {
        RelationshipPayload {
            data: Some(RelationshipData::One(data)),
            ..Default::default()
        }
    }

    pub fn many(data: Vec<ResourceDescriptor>) -> Self {
        RelationshipPayload {
            data: Some(RelationshipData::Many(data)),
            ..Default::default()
        }
    }

    pub fn related_link(url: &str) -> Self {
        RelationshipPayload {
            links: Some(Links {
                related: Some(url.to_string()),
                self_link: None,
            }),
            ..Default::default()
        }
    }

    pub fn with_links(mut self, links: Links) -> Self {
        self.links = Some(links);
        self
    }

    pub fn with_meta(mut self, meta: serde_json::Value) -> Self {
        self.meta = Some(meta);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Operation {
    /// Replace canonical state with a server payload.
    UpdateRelationship {
        record: ResourceKey,
        field: String,
        value: RelationshipPayload,
    },
    /// Replace local to-many state wholesale.
    ReplaceRelatedRecords {
        record: ResourceKey,
        field: String,
        value: Vec<ResourceKey>,
    },
    /// Replace local to-one state.
    ReplaceRelatedRecord {
        record: ResourceKey,
        field: String,
        value: Option<ResourceKey>,
    },
    AddToRelatedRecords {
        record: ResourceKey,
        field: String,
        value: Vec<ResourceKey>,
        #[serde(skip_serializing_if = "Option::is_none")]
        index: Option<usize>,
    },
    RemoveFromRelatedRecords {
        record: ResourceKey,
        field: String,
        value: Vec<ResourceKey>,
        #[serde(skip_serializing_if = "Option::is_none")]
        index: Option<usize>,
    },
    /// `record` has been merged into `value`.
    MergeIdentifiers {
        record: ResourceKey,
        value: ResourceKey,
    },
    RemoveIdentifier { record: ResourceKey },
    /// A deletion of `record` was committed (or a new record was discarded).
    DeleteRecord {
        record: ResourceKey,
        #[serde(rename = "isNew")]
        is_new: bool,
    },
}

impl Operation {
    pub fn record(&self) -> &ResourceKey {
        match self {
            Operation::UpdateRelationship { record, .. }
            | Operation::ReplaceRelatedRecords { record, .. }
            | Operation::ReplaceRelatedRecord { record, .. }
            | Operation::AddToRelatedRecords { record, .. }
            | Operation::RemoveFromRelatedRecords { record, .. }
            | Operation::MergeIdentifiers { record, .. }
            | Operation::RemoveIdentifier { record }
            | Operation::DeleteRecord { record, .. } => record,
        }
    }

    pub fn field(&self) -> Option<&str> {
        match self {
            Operation::UpdateRelationship { field, .. }
            | Operation::ReplaceRelatedRecords { field, .. }
            | Operation::ReplaceRelatedRecord { field, .. }
            | Operation::AddToRelatedRecords { field, .. }
            | Operation::RemoveFromRelatedRecords { field, .. } => Some(field),
            _ => None,
        }
    }

    /// Local edits made by the application, as opposed to canonical or identity operations.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            Operation::ReplaceRelatedRecords { .. }
                | Operation::ReplaceRelatedRecord { .. }
                | Operation::AddToRelatedRecords { .. }
                | Operation::RemoveFromRelatedRecords { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operation::UpdateRelationship { .. } => "updateRelationship",
            Operation::ReplaceRelatedRecords { .. } => "replaceRelatedRecords",
            Operation::ReplaceRelatedRecord { .. } => "replaceRelatedRecord",
            Operation::AddToRelatedRecords { .. } => "addToRelatedRecords",
            Operation::RemoveFromRelatedRecords { .. } => "removeFromRelatedRecords",
            Operation::MergeIdentifiers { .. } => "mergeIdentifiers",
            Operation::RemoveIdentifier { .. } => "removeIdentifier",
            Operation::DeleteRecord { .. } => "deleteRecord",
        }
    }
}

/// Serializable form of [Operation] with every key expressed as a descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum WireOperation {
    UpdateRelationship {
        record: ResourceDescriptor,
        field: String,
        value: RelationshipPayload,
    },
    ReplaceRelatedRecords {
        record: ResourceDescriptor,
        field: String,
        value: Vec<ResourceDescriptor>,
    },
    ReplaceRelatedRecord {
        record: ResourceDescriptor,
        field: String,
        value: Option<ResourceDescriptor>,
    },
    AddToRelatedRecords {
        record: ResourceDescriptor,
        field: String,
        value: Vec<ResourceDescriptor>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        index: Option<usize>,
    },
    RemoveFromRelatedRecords {
        record: ResourceDescriptor,
        field: String,
        value: Vec<ResourceDescriptor>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        index: Option<usize>,
    },
    MergeIdentifiers {
        record: ResourceDescriptor,
        value: ResourceDescriptor,
    },
    RemoveIdentifier { record: ResourceDescriptor },
    DeleteRecord {
        record: ResourceDescriptor,
        #[serde(rename = "isNew", default)]
        is_new: bool,
    },
}

impl WireOperation {
    pub fn resolve(self, registry: &IdentifierRegistry) -> Result<Operation, GraphError> {
        let key = |descriptor: &ResourceDescriptor| registry.get_or_create(descriptor);
        let keys = |descriptors: &[ResourceDescriptor]| {
            descriptors.iter().map(key).collect::<Result<Vec<_>, _>>()
        };
        Ok(match self {
            WireOperation::UpdateRelationship {
                record,
                field,
                value,
            } => Operation::UpdateRelationship {
                record: key(&record)?,
                field,
                value,
            },
            WireOperation::ReplaceRelatedRecords {
                record,
                field,
                value,
            } => Operation::ReplaceRelatedRecords {
                record: key(&record)?,
                field,
                value: keys(&value)?,
            },
            WireOperation::ReplaceRelatedRecord {
                record,
                field,
                value,
            } => Operation::ReplaceRelatedRecord {
                record: key(&record)?,
                field,
                value: value.as_ref().map(key).transpose()?,
            },
            WireOperation::AddToRelatedRecords {
                record,
                field,
                value,
                index,
            } => Operation::AddToRelatedRecords {
                record: key(&record)?,
                field,
                value: keys(&value)?,
                index,
            },
            WireOperation::RemoveFromRelatedRecords {
                record,
                field,
                value,
                index,
            } => Operation::RemoveFromRelatedRecords {
                record: key(&record)?,
                field,
                value: keys(&value)?,
                index,
            },
            WireOperation::MergeIdentifiers { record, value } => Operation::MergeIdentifiers {
                record: key(&record)?,
                value: key(&value)?,
            },
            WireOperation::RemoveIdentifier { record } => Operation::RemoveIdentifier {
                record: key(&record)?,
            },
            WireOperation::DeleteRecord { record, is_new } => Operation::DeleteRecord {
                record: key(&record)?,
                is_new,
            },
        })
    }
}

use std::io;

use serde::{Deserialize, Serialize};
use serde_json::Error as JsonError;
use thiserror::Error;

/// Every error the graph engine reports. All of them are contract violations reported
/// synchronously by the call that triggered them; none is retried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum GraphError {
    #[error("No relationship '{field}' is declared for type '{resource_type}'")]
    UnknownField {
        resource_type: String,
        field: String,
    },
    #[error("Schema violation: {0}")]
    SchemaViolation(String),
    #[error("Identity collision: {0}")]
    IdentityCollision(String),
    #[error("Cannot mutate '{field}' on {resource}: its relationship state was removed")]
    StaleMutation { resource: String, field: String },
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
    #[error("Invalid resource descriptor: {0}")]
    InvalidDescriptor(String),
    #[error("Item Not Found: {0}")]
    NotFound(String),
    #[error("(De)Serialization error: {0}")]
    Serialization(String),
    #[error("File System error: {0}")]
    Io(String),
}

impl GraphError {
    pub fn unknown_field(resource_type: &str, field: &str) -> GraphError {
        GraphError::UnknownField {
            resource_type: resource_type.to_string(),
            field: field.to_string(),
        }
    }

    /// True for the errors raised by the relationship engine itself, as opposed to errors
    /// raised while loading configuration or schemas.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            GraphError::UnknownField { .. }
                | GraphError::SchemaViolation(_)
                | GraphError::IdentityCollision(_)
                | GraphError::StaleMutation { .. }
                | GraphError::InvalidOperation(_)
                | GraphError::InvalidDescriptor(_)
        )
    }
}

impl From<toml::de::Error> for GraphError {
    fn from(src: toml::de::Error) -> GraphError {
        GraphError::Serialization(format!("Toml deserialization error: {src}"))
    }
}

impl From<toml::ser::Error> for GraphError {
    fn from(src: toml::ser::Error) -> GraphError {
        GraphError::Serialization(format!("Toml serialization error: {src}"))
    }
}

impl From<JsonError> for GraphError {
    fn from(src: JsonError) -> GraphError {
        GraphError::Serialization(format!("JSON (de)serialization error: {src}"))
    }
}

impl From<io::Error> for GraphError {
    fn from(x: io::Error) -> Self {
        match x.kind() {
            io::ErrorKind::NotFound => GraphError::NotFound(format!("{x}")),
            _ => GraphError::Io(format!("IOError: {}", x.kind())),
        }
    }
}

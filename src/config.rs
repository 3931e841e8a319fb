use crate::GraphError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::{
    fs::{read_to_string, write},
    path::PathBuf,
};

/// Construction time options of a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Enforce polymorphic conformance of every related key added to a relationship.
    pub strict: bool,
    /// Also emit change notifications for implicit inverse edges.
    pub notify_implicit: bool,
}

impl Default for GraphConfig {
    fn default() -> Self {
        GraphConfig {
            strict: cfg!(debug_assertions),
            notify_implicit: false,
        }
    }
}

impl GraphConfig {
    pub fn strict() -> Self {
        GraphConfig {
            strict: true,
            ..Default::default()
        }
    }

    pub fn lenient() -> Self {
        GraphConfig {
            strict: false,
            ..Default::default()
        }
    }
}

pub trait ConfigProvider: Send + Sync {
    fn get_graph_config(&self) -> Result<GraphConfig, GraphError>;
    fn set_graph_config(&self, config: GraphConfig) -> Result<(), GraphError>;
}

/// Reads and writes the `[graph]` table of a TOML file.
#[derive(Debug, Serialize, Deserialize)]
pub struct TomlConfigProvider {
    path: PathBuf,
}

impl TomlConfigProvider {
    pub fn new(path: PathBuf) -> Self {
        TomlConfigProvider { path }
    }
}

impl ConfigProvider for TomlConfigProvider {
    fn get_graph_config(&self) -> Result<GraphConfig, GraphError> {
        tracing::debug!(
            "[TomlConfigProvider::get_graph_config] reading {:?}",
            &self.path
        );
        if !self.path.exists() {
            tracing::debug!("Config file not found, using default graph config.");
            return Ok(GraphConfig::default());
        }
        let content = read_to_string(&self.path)?;
        let mut config: BTreeMap<String, GraphConfig> = toml::from_str(&content)?;
        Ok(config.remove("graph").unwrap_or_default())
    }

    fn set_graph_config(&self, config: GraphConfig) -> Result<(), GraphError> {
        tracing::debug!(
            "[TomlConfigProvider::set_graph_config] writing {:?}",
            &self.path
        );
        let mut tables = BTreeMap::new();
        tables.insert("graph".to_string(), config);
        let toml_string = toml::to_string(&tables)?;
        write(&self.path, toml_string)?;
        Ok(())
    }
}

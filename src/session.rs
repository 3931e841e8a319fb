//! One application instance's worth of state: a single identifier registry, the relationship
//! graph built on it and the cache facade that owns the graph.

use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::{
    cache::Cache,
    config::{ConfigProvider, GraphConfig},
    event::GraphEvent,
    graph::Graph,
    identifier::IdentifierRegistry,
    schema::SchemaQuery,
    GraphError,
};

#[derive(Debug)]
pub struct Session {
    registry: IdentifierRegistry,
    cache: Cache,
}

impl Session {
    pub fn new(schema: Arc<dyn SchemaQuery>, config: GraphConfig) -> Session {
        let registry = IdentifierRegistry::new();
        tracing::debug!("[Session::new] strict: {}", config.strict);
        let graph = Graph::new(registry.clone(), schema, config);
        Session {
            registry,
            cache: Cache::new(graph),
        }
    }

    /// Build a session from the configuration `provider` supplies.
    pub fn from_provider(
        schema: Arc<dyn SchemaQuery>,
        provider: &dyn ConfigProvider,
    ) -> Result<Session, GraphError> {
        Ok(Session::new(schema, provider.get_graph_config()?))
    }

    pub fn registry(&self) -> &IdentifierRegistry {
        &self.registry
    }

    pub fn schema(&self) -> &Arc<dyn SchemaQuery> {
        self.cache.graph().schema()
    }

    pub fn config(&self) -> &GraphConfig {
        self.cache.graph().config()
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut Cache {
        &mut self.cache
    }

    pub fn graph(&self) -> &Graph {
        self.cache.graph()
    }

    pub fn graph_mut(&mut self) -> &mut Graph {
        self.cache.graph_mut()
    }

    /// Receive the change notifications of this session's graph.
    pub fn subscribe(&mut self) -> UnboundedReceiver<GraphEvent> {
        self.cache.graph_mut().subscribe()
    }
}

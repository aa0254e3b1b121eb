//! Immutable runtime context shared by every pipeline.

use std::sync::Arc;
use std::time::Duration;

use node_agent_core::{AgentConfig, ContentStore, Coordinator, Error, Result, Stage};
use node_agent_sandbox::SandboxEngine;

use crate::fetcher::Fetcher;

/// Everything a job pipeline needs, built once at startup and shared
/// read-only behind an `Arc`.
pub struct AgentContext {
    /// Coordinator-assigned id of this node.
    pub node_id: String,
    pub config: AgentConfig,
    pub coordinator: Arc<dyn Coordinator>,
    pub sandbox: Arc<dyn SandboxEngine>,
    pub fetcher: Fetcher,
}

impl AgentContext {
    pub fn builder(config: AgentConfig) -> AgentContextBuilder {
        AgentContextBuilder::new(config)
    }

    pub fn provider_address(&self) -> &str {
        &self.config.node.provider_address
    }

    pub fn stage_timeout(&self, stage: Stage) -> Duration {
        self.config.timeouts.for_stage(stage)
    }
}

/// Builder for constructing an [`AgentContext`].
pub struct AgentContextBuilder {
    config: AgentConfig,
    node_id: Option<String>,
    coordinator: Option<Arc<dyn Coordinator>>,
    sandbox: Option<Arc<dyn SandboxEngine>>,
    http_source: Option<Arc<dyn ContentStore>>,
    content_store: Option<Arc<dyn ContentStore>>,
}

impl AgentContextBuilder {
    /// Create a new builder around the loaded configuration.
    pub fn new(config: AgentConfig) -> Self {
        Self {
            node_id: config.node.id.clone(),
            config,
            coordinator: None,
            sandbox: None,
            http_source: None,
            content_store: None,
        }
    }

    /// Set the node id, overriding `node.id` from configuration.
    pub fn with_node_id(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    /// Set the coordinator client.
    pub fn with_coordinator(mut self, coordinator: Arc<dyn Coordinator>) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    /// Set the sandbox backend.
    pub fn with_sandbox(mut self, sandbox: Arc<dyn SandboxEngine>) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    /// Set the source for `http(s)://` dataset references.
    pub fn with_http_source(mut self, source: Arc<dyn ContentStore>) -> Self {
        self.http_source = Some(source);
        self
    }

    /// Set the store for content-addressed dataset references.
    pub fn with_content_store(mut self, store: Arc<dyn ContentStore>) -> Self {
        self.content_store = Some(store);
        self
    }

    /// Build the context, probing the content store once.
    pub async fn build(self) -> Result<Arc<AgentContext>> {
        let node_id = self
            .node_id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| Error::config("Node id is not set; register the node first"))?;
        let coordinator = self
            .coordinator
            .ok_or_else(|| Error::config("Coordinator client is required"))?;
        let sandbox = self
            .sandbox
            .ok_or_else(|| Error::config("Sandbox backend is required"))?;
        let http_source = self
            .http_source
            .ok_or_else(|| Error::config("HTTP dataset source is required"))?;

        let mut fetcher = Fetcher::new(http_source, &self.config.fetch);
        if let Some(store) = self.content_store {
            fetcher = fetcher.with_content_store(store);
        }
        let fetcher = fetcher.probe().await;

        Ok(Arc::new(AgentContext {
            node_id,
            config: self.config,
            coordinator,
            sandbox,
            fetcher,
        }))
    }
}

//! Node agent - compute provider for a job marketplace.
//!
//! Polls a coordinator for jobs assigned to this node, claims them, runs each
//! job's image in an isolated sandbox against its dataset, and reports a
//! deterministic digest of the output.

mod shutdown;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use node_agent_controller::{reclaim_orphans, Agent, AgentContext};
use node_agent_coordinator::{HttpContentStore, HttpCoordinator, HttpUrlSource};
use node_agent_core::{AgentConfig, ContentStore, Coordinator, NodeRegistration};
use node_agent_sandbox::{DockerSandbox, SandboxEngine};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AgentConfig::load().context("Failed to load configuration")?;

    node_agent_telemetry::configure_tracing(&config.telemetry)?;
    tracing::info!("Starting node-agent v{}", env!("CARGO_PKG_VERSION"));

    config.validate()?;
    if let Some(listen) = &config.telemetry.metrics_listen {
        node_agent_telemetry::setup_metrics_recorder(listen)?;
    }

    let request_timeout = Duration::from_millis(config.coordinator.request_timeout_ms);

    // =========================================================================
    // Coordinator
    // =========================================================================
    let coordinator = Arc::new(HttpCoordinator::new(
        &config.coordinator.base_url,
        request_timeout,
    )?);
    coordinator
        .ping()
        .await
        .with_context(|| format!("Coordinator at {} is unreachable", config.coordinator.base_url))?;
    tracing::info!(url = %config.coordinator.base_url, "Coordinator reachable");

    let node_id = match config.node.id.clone() {
        Some(id) => id,
        None => {
            let registration = NodeRegistration {
                node_id: String::new(),
                gpu_name: config.node.gpu_name.clone(),
                gpu_specs: config.node.gpu_specs.clone(),
                owner: Some(config.node.provider_address.clone()),
                memory_available: config.node.memory_mb,
            };
            coordinator
                .register_node(&registration)
                .await
                .context("Node registration failed")?
        }
    };

    // =========================================================================
    // Sandbox
    // =========================================================================
    let sandbox = Arc::new(DockerSandbox::new(config.sandbox.pull_missing_images)?);
    if !sandbox.is_available().await {
        anyhow::bail!("Docker daemon not reachable; refusing to run jobs without a sandbox");
    }
    tracing::info!(backend = sandbox.name(), "Sandbox available");
    let stale = sandbox
        .reclaim_containers()
        .await
        .context("Cannot sweep leftover sandbox containers")?;
    if !stale.is_empty() {
        tracing::warn!(count = stale.len(), "Removed leftover sandbox containers");
    }

    // =========================================================================
    // Dataset sources
    // =========================================================================
    let fetch_timeout = config.timeouts.for_stage(node_agent_core::Stage::Fetching);
    let http_source = Arc::new(HttpUrlSource::new(fetch_timeout)?);
    let content_store: Option<Arc<dyn ContentStore>> = match &config.fetch.content_gateway {
        Some(gateway) => Some(Arc::new(HttpContentStore::new(gateway, fetch_timeout)?)),
        None => {
            tracing::info!("No content gateway configured; content-addressed datasets disabled");
            None
        }
    };

    // =========================================================================
    // Workspaces left behind by a previous run
    // =========================================================================
    let reclaimed = reclaim_orphans(&config.workspace.root)
        .await
        .with_context(|| format!("Cannot prepare workspace root {}", config.workspace.root.display()))?;
    if !reclaimed.is_empty() {
        tracing::warn!(count = reclaimed.len(), "Reclaimed orphaned workspaces");
    }

    let mut builder = AgentContext::builder(config)
        .with_node_id(node_id)
        .with_coordinator(coordinator)
        .with_sandbox(sandbox)
        .with_http_source(http_source);
    if let Some(store) = content_store {
        builder = builder.with_content_store(store);
    }
    let ctx = builder.build().await?;

    let cancel = shutdown::install_shutdown_handler()?;
    let result = Agent::new(ctx).run(cancel).await;

    node_agent_telemetry::shutdown_tracing();
    result.map_err(Into::into)
}

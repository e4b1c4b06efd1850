//! agentic-tester -- pipeline engine for agent-driven API testing.
//!
//! This crate drives an uploaded backend project through scanning, test
//! generation, execution and healing. It owns the test runner, the result
//! classifier and reward, and the per-tenant state and history stores. The
//! agents that read and write code are reached through the traits in
//! [`agents`].

pub mod agents;
pub mod api;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod runner;
pub mod storage;
pub mod tenant;

use anyhow::Result;

use crate::config::TesterConfig;

/// Start the tester daemon: orchestrator plus HTTP API.
pub async fn serve(config: TesterConfig) -> Result<()> {
    tracing::info!(root = %config.storage.root.display(), "Initializing tenant storage");
    tokio::fs::create_dir_all(&config.storage.root).await?;

    let orchestrator = pipeline::Orchestrator::from_config(&config)?;
    let app = api::router(
        api::state::AppState::new(orchestrator),
        &config.server.allowed_origins,
    );

    let addr: std::net::SocketAddr = config.server.bind.parse()?;
    tracing::info!(%addr, agent_service = %config.agent.base_url, "agentic-tester listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

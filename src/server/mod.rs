//! Server wiring.
//!
//! Startup order: provision topics (fatal on failure), bind the
//! listener (fatal), then start the gateway bridge, the enrichment
//! stage, and finally the edge producers. Shutdown runs the same
//! chain in reverse so nothing downstream drops in-flight work it
//! could still have drained.

pub mod config;
pub mod routes;

pub use config::AppConfig;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::info;

use forgewatch_bus::Broker;
use forgewatch_core::{
    default_fleet, wait_for_shutdown_signal, EdgeNode, EnrichmentEngine, HeuristicScorer,
    ShutdownController,
};

use crate::websocket::{self, ConnectionRegistry};

/// Shared state behind every HTTP handler.
#[derive(Clone)]
pub struct AppState {
    /// Bus handle.
    pub broker: Broker,
    /// Live connection set.
    pub registry: Arc<ConnectionRegistry>,
    /// Effective configuration.
    pub config: Arc<AppConfig>,
    /// For the uptime figure in `/stats`.
    pub started_at: DateTime<Utc>,
}

/// Run the whole pipeline until a shutdown signal arrives.
pub async fn run(config: AppConfig) -> Result<()> {
    let config = Arc::new(config);
    let broker = Broker::with_retention(config.retention);

    broker
        .ensure_topics(
            &[config.machine_topic.as_str(), config.prediction_topic.as_str()],
            config.partitions,
        )
        .await
        .context("Topic provisioning failed")?;

    let registry = Arc::new(ConnectionRegistry::new());
    let state = AppState {
        broker: broker.clone(),
        registry: registry.clone(),
        config: config.clone(),
        started_at: Utc::now(),
    };

    let listener = tokio::net::TcpListener::bind(config.bind_addr())
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr()))?;
    info!(addr = %config.bind_addr(), "Gateway listening");

    let shutdown = ShutdownController::new();

    // Client-facing layer.
    let server_token = shutdown.token();
    let server = tokio::spawn({
        let app = routes::router(state);
        async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { server_token.cancelled().await })
                .await
        }
    });
    let heartbeat_token = shutdown.token();
    let heartbeat = tokio::spawn(websocket::heartbeat_loop(
        registry.clone(),
        Duration::from_secs(config.heartbeat_secs),
        heartbeat_token,
    ));
    let bridge = websocket::start_result_bridge(&broker, &config.prediction_topic, registry.clone());

    // Compute stage.
    let enrichment = EnrichmentEngine::new(
        broker.clone(),
        config.machine_topic.clone(),
        config.prediction_topic.clone(),
        Box::new(HeuristicScorer::new()),
    )
    .start();

    // Producers last.
    let edge_token = shutdown.token();
    let edge_tasks: Vec<_> = default_fleet(Duration::from_millis(config.edge_interval_ms))
        .into_iter()
        .map(|node_config| {
            tokio::spawn(EdgeNode::new(node_config).run(
                broker.clone(),
                config.machine_topic.clone(),
                edge_token.clone(),
            ))
        })
        .collect();
    info!(machines = edge_tasks.len(), "Pipeline running");

    wait_for_shutdown_signal().await;
    info!("Shutting down pipeline");

    // Reverse order: stop producing, drain the compute stage, tell
    // clients goodbye, then stop the HTTP surface.
    shutdown.trigger();
    for task in edge_tasks {
        let _ = task.await;
    }
    enrichment.shutdown().await;
    bridge.shutdown().await;
    registry.close_all(websocket::shutdown_close()).await;
    let _ = heartbeat.await;
    server.await.context("Server task panicked")??;

    info!("Shutdown complete");
    Ok(())
}

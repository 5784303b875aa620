//! HTTP surface: health, readiness, stats, and the WebSocket upgrade.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::server::AppState;
use crate::websocket;

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/stats", get(stats))
        .route("/ws", get(websocket::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Process is up.
async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "forgewatch",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": (chrono::Utc::now() - state.started_at).num_seconds(),
        "timestamp": chrono::Utc::now(),
    }))
}

/// Topics are provisioned and the pipeline can serve clients.
async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    let machine = state.broker.partition_count(&state.config.machine_topic).await;
    let prediction = state.broker.partition_count(&state.config.prediction_topic).await;

    match (machine, prediction) {
        (Some(_), Some(_)) => (StatusCode::OK, Json(json!({ "status": "ready" }))),
        _ => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "provisioning" })),
        ),
    }
}

/// Live gateway stats.
async fn stats(State(state): State<AppState>) -> impl IntoResponse {
    let connections = state.registry.stats().await;
    let total_sent: u64 = connections.iter().map(|c| c.messages_sent).sum();

    let mut topics = serde_json::Map::new();
    for topic in [&state.config.machine_topic, &state.config.prediction_topic] {
        topics.insert(topic.clone(), json!(state.broker.partition_count(topic).await));
    }

    Json(json!({
        "uptime_secs": (chrono::Utc::now() - state.started_at).num_seconds(),
        "connections": connections.len(),
        "messages_sent": total_sent,
        "topics": topics,
        "clients": connections,
    }))
}

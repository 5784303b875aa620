//! WebSocket gateway.
//!
//! Bridges the prediction topic onto every connected client and keeps
//! the connection set honest with a periodic liveness sweep.

pub mod connection;
pub mod registry;

pub use connection::ws_handler;
pub use registry::{ConnectionRegistry, ConnectionStats};

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{close_code, CloseFrame, Message};
use tokio_util::sync::CancellationToken;
use tracing::{info, trace, warn};

use forgewatch_bus::{Broker, SubscriberHandle};
use forgewatch_core::{EnrichedResult, StreamEnvelope};

/// Consumer group the gateway joins on the prediction topic. All
/// gateway instances share it, so each result is fanned out once.
pub const GATEWAY_GROUP: &str = "gateway-consumers";

/// Start the bridge pumping enriched results from the bus to every
/// connected client. Anomalous results go out as `alert` envelopes,
/// the rest as `prediction`.
#[must_use]
pub fn start_result_bridge(
    broker: &Broker,
    topic: &str,
    registry: Arc<ConnectionRegistry>,
) -> SubscriberHandle {
    broker.subscribe(topic, GATEWAY_GROUP, move |record| {
        let registry = registry.clone();
        async move {
            let result: EnrichedResult = serde_json::from_str(&record.payload)?;
            let envelope = StreamEnvelope::for_result(&result)?;
            if result.is_anomalous() {
                warn!(
                    machine = %result.reading.machine_id,
                    failure = ?result.failure_type,
                    score = result.anomaly_score,
                    "Broadcasting alert"
                );
            }
            let reached = registry.broadcast(serde_json::to_string(&envelope)?).await;
            trace!(machine = %result.reading.machine_id, reached, "Result broadcast");
            Ok(())
        }
    })
}

/// Periodic heartbeat and liveness sweep until cancelled.
pub async fn heartbeat_loop(
    registry: Arc<ConnectionRegistry>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    // The immediate first tick would reap nobody and ping everybody;
    // skip it so connections get a full interval before the first sweep.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let reaped = registry.sweep().await;
                if !reaped.is_empty() {
                    info!(reaped = reaped.len(), "Reaped unresponsive connections");
                }
                if let Ok(text) = serde_json::to_string(&StreamEnvelope::heartbeat()) {
                    registry.broadcast(text).await;
                }
            }
        }
    }
}

/// Close frame sent to every client on graceful shutdown.
#[must_use]
pub fn shutdown_close() -> Message {
    Message::Close(Some(CloseFrame {
        code: close_code::AWAY,
        reason: "server shutting down".into(),
    }))
}

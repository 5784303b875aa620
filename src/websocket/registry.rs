//! Connection registry.
//!
//! Tracks every live WebSocket connection by a server-assigned uuid.
//! Outbound frames go through a per-connection unbounded channel; the
//! connection task owns the actual socket. A connection whose channel
//! is closed is pruned on the next broadcast.
//!
//! Liveness uses a mark-and-sweep protocol: each sweep clears every
//! connection's alive flag and sends a ping; a pong sets the flag
//! again. A connection still unmarked at the following sweep missed a
//! full interval and is reaped.

use std::collections::HashMap;

use axum::extract::ws::Message;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;
use tracing::{debug, info, warn};

/// Bookkeeping for one live connection.
struct ConnectionRecord {
    sender: mpsc::UnboundedSender<Message>,
    established_at: DateTime<Utc>,
    alive: bool,
    messages_sent: u64,
}

/// Point-in-time view of one connection, for the stats endpoint.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ConnectionStats {
    /// Server-assigned connection id.
    pub connection_id: Uuid,
    /// When the connection was registered.
    pub established_at: DateTime<Utc>,
    /// Frames queued to this connection so far.
    pub messages_sent: u64,
}

/// Shared registry of live connections.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<Uuid, ConnectionRecord>>,
}

impl ConnectionRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection. Returns its id and the receiving end
    /// of its outbound queue.
    pub async fn register(&self) -> (Uuid, mpsc::UnboundedReceiver<Message>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        self.connections.write().await.insert(
            id,
            ConnectionRecord {
                sender,
                established_at: Utc::now(),
                alive: true,
                messages_sent: 0,
            },
        );
        info!(connection_id = %id, "Connection registered");
        (id, receiver)
    }

    /// Remove a connection. Safe to call twice (the reaper and the
    /// connection task may race).
    pub async fn unregister(&self, id: Uuid) {
        if self.connections.write().await.remove(&id).is_some() {
            info!(connection_id = %id, "Connection unregistered");
        }
    }

    /// Queue a frame to one connection.
    pub async fn send_to(&self, id: Uuid, message: Message) -> bool {
        let mut connections = self.connections.write().await;
        match connections.get_mut(&id) {
            Some(record) if record.sender.send(message).is_ok() => {
                record.messages_sent += 1;
                true
            }
            _ => false,
        }
    }

    /// Queue a text frame to every live connection. Connections whose
    /// queue is closed are pruned. Returns the number reached.
    pub async fn broadcast(&self, text: String) -> usize {
        let mut connections = self.connections.write().await;
        let mut dead = Vec::new();
        let mut reached = 0;

        for (id, record) in connections.iter_mut() {
            if record.sender.send(Message::Text(text.clone())).is_ok() {
                record.messages_sent += 1;
                reached += 1;
            } else {
                dead.push(*id);
            }
        }
        for id in dead {
            debug!(connection_id = %id, "Pruning closed connection");
            connections.remove(&id);
        }
        reached
    }

    /// Record a pong: the connection answered the last ping.
    pub async fn mark_alive(&self, id: Uuid) {
        if let Some(record) = self.connections.write().await.get_mut(&id) {
            record.alive = true;
        }
    }

    /// One liveness sweep. Connections that never answered the
    /// previous sweep's ping are reaped; the rest are pinged and must
    /// answer before the next sweep. Returns reaped ids.
    pub async fn sweep(&self) -> Vec<Uuid> {
        let mut connections = self.connections.write().await;
        let stale: Vec<Uuid> = connections
            .iter()
            .filter(|(_, r)| !r.alive)
            .map(|(id, _)| *id)
            .collect();

        for id in &stale {
            warn!(connection_id = %id, "Connection missed a liveness interval, reaping");
            connections.remove(id);
        }
        for record in connections.values_mut() {
            record.alive = false;
            let _ = record.sender.send(Message::Ping(Vec::new()));
        }
        stale
    }

    /// Ask every connection task to close with the given frame, then
    /// drop the registry entries.
    pub async fn close_all(&self, close: Message) {
        let mut connections = self.connections.write().await;
        for record in connections.values() {
            let _ = record.sender.send(close.clone());
        }
        connections.clear();
    }

    /// Number of live connections.
    pub async fn count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Per-connection stats snapshot.
    pub async fn stats(&self) -> Vec<ConnectionStats> {
        self.connections
            .read()
            .await
            .iter()
            .map(|(id, r)| ConnectionStats {
                connection_id: *id,
                established_at: r.established_at,
                messages_sent: r.messages_sent,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_broadcast_unregister() {
        let registry = ConnectionRegistry::new();
        let (a, mut rx_a) = registry.register().await;
        let (_b, mut rx_b) = registry.register().await;
        assert_eq!(registry.count().await, 2);

        let reached = registry.broadcast("hello".to_string()).await;
        assert_eq!(reached, 2);
        assert!(matches!(rx_a.recv().await, Some(Message::Text(t)) if t == "hello"));
        assert!(matches!(rx_b.recv().await, Some(Message::Text(t)) if t == "hello"));

        registry.unregister(a).await;
        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test]
    async fn test_broadcast_prunes_closed_queues() {
        let registry = ConnectionRegistry::new();
        let (_a, rx_a) = registry.register().await;
        let (_b, _rx_b) = registry.register().await;
        drop(rx_a);

        let reached = registry.broadcast("x".to_string()).await;
        assert_eq!(reached, 1);
        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test]
    async fn test_sweep_reaps_after_two_missed_intervals() {
        let registry = ConnectionRegistry::new();
        let (a, mut rx) = registry.register().await;

        // First sweep: freshly registered connections count as alive,
        // so nothing is reaped; a ping goes out.
        assert!(registry.sweep().await.is_empty());
        assert!(matches!(rx.recv().await, Some(Message::Ping(_))));

        // No pong arrives. Second sweep reaps.
        let reaped = registry.sweep().await;
        assert_eq!(reaped, vec![a]);
        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test]
    async fn test_pong_keeps_connection_alive() {
        let registry = ConnectionRegistry::new();
        let (a, _rx) = registry.register().await;

        registry.sweep().await;
        registry.mark_alive(a).await;
        assert!(registry.sweep().await.is_empty());
        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test]
    async fn test_close_all_delivers_close_frame_to_everyone() {
        use axum::extract::ws::close_code;

        let registry = ConnectionRegistry::new();
        let (_a, mut rx_a) = registry.register().await;
        let (_b, mut rx_b) = registry.register().await;

        registry.close_all(crate::websocket::shutdown_close()).await;
        assert_eq!(registry.count().await, 0);

        for rx in [&mut rx_a, &mut rx_b] {
            match rx.recv().await {
                Some(Message::Close(Some(frame))) => {
                    assert_eq!(frame.code, close_code::AWAY);
                    assert_eq!(frame.reason, "server shutting down");
                }
                other => panic!("expected a close frame, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_send_to_counts_messages() {
        let registry = ConnectionRegistry::new();
        let (a, _rx) = registry.register().await;

        assert!(registry.send_to(a, Message::Text("one".into())).await);
        assert!(registry.send_to(a, Message::Text("two".into())).await);
        let stats = registry.stats().await;
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].messages_sent, 2);
    }
}

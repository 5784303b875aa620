//! WebSocket synchronizer with automatic reconnect.
//!
//! Connects to the gateway, feeds every envelope into the shared
//! [`TelemetryState`], and reconnects with linearly capped backoff when
//! the link drops. Reconnection gives up after a bounded number of
//! consecutive failures; an explicit disconnect cancels any pending
//! retry immediately.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{watch, RwLock};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use forgewatch_core::StreamEnvelope;

use crate::error::{ClientError, Result};
use crate::state::TelemetryState;

/// Backoff stops growing after this many steps.
const BACKOFF_CAP_STEPS: u32 = 5;

/// Connection lifecycle, observable through a watch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Not connected and not trying.
    Disconnected,
    /// A connection attempt is in flight.
    Connecting,
    /// Link is up and envelopes are flowing.
    Connected,
    /// Link dropped; waiting to retry.
    Reconnecting {
        /// Consecutive failed attempts so far.
        attempt: u32,
    },
    /// Every retry exhausted; the synchronizer has stopped.
    Failed,
}

/// Synchronizer tunables.
#[derive(Debug, Clone)]
pub struct SyncClientConfig {
    /// Gateway WebSocket URL.
    pub url: String,
    /// Base reconnect delay; multiplied by the capped attempt number.
    pub base_delay: Duration,
    /// Consecutive failures tolerated before giving up.
    pub max_attempts: u32,
}

impl SyncClientConfig {
    /// Config with the default reconnect policy.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            base_delay: Duration::from_secs(3),
            max_attempts: 20,
        }
    }
}

/// The stream synchronizer. Owns the connection loop; shares its
/// mirror and status with whoever holds clones of the handles.
#[derive(Debug)]
pub struct SyncClient {
    config: SyncClientConfig,
    url: Url,
    state: Arc<RwLock<TelemetryState>>,
    status_tx: watch::Sender<ConnectionStatus>,
    cancel: CancellationToken,
}

impl SyncClient {
    /// Synchronizer over a fresh mirror. Fails fast on a bad URL.
    pub fn new(config: SyncClientConfig) -> Result<Self> {
        let url = Url::parse(&config.url)?;
        let (status_tx, _) = watch::channel(ConnectionStatus::Disconnected);
        Ok(Self {
            config,
            url,
            state: Arc::new(RwLock::new(TelemetryState::new())),
            status_tx,
            cancel: CancellationToken::new(),
        })
    }

    /// Shared handle to the mirror.
    #[must_use]
    pub fn state(&self) -> Arc<RwLock<TelemetryState>> {
        self.state.clone()
    }

    /// Watch the connection status.
    #[must_use]
    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    /// Token that stops the connection loop when cancelled.
    #[must_use]
    pub fn disconnect_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop the loop and cancel any pending retry.
    pub fn disconnect(&self) {
        self.cancel.cancel();
    }

    /// Reconnect delay for the given consecutive-failure count.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.config.base_delay * (attempt + 1).min(BACKOFF_CAP_STEPS)
    }

    /// Run the connection loop until explicitly disconnected or retries
    /// are exhausted.
    pub async fn run(&self) -> Result<()> {
        let mut attempt: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                self.set_status(ConnectionStatus::Disconnected);
                return Ok(());
            }

            self.set_status(ConnectionStatus::Connecting);
            let connect = connect_async(self.url.as_str());
            let stream = tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.set_status(ConnectionStatus::Disconnected);
                    return Ok(());
                }
                connected = connect => connected,
            };

            match stream {
                Ok((ws, _)) => {
                    info!(url = %self.url, "Connected to gateway");
                    self.set_status(ConnectionStatus::Connected);
                    attempt = 0;

                    if self.consume(ws).await {
                        // Explicit disconnect from inside the read loop.
                        self.set_status(ConnectionStatus::Disconnected);
                        return Ok(());
                    }
                    warn!(url = %self.url, "Connection lost");
                }
                Err(e) => {
                    warn!(url = %self.url, error = %e, attempt, "Connection attempt failed");
                }
            }

            attempt += 1;
            if attempt >= self.config.max_attempts {
                self.set_status(ConnectionStatus::Failed);
                return Err(ClientError::RetriesExhausted { attempts: attempt });
            }

            let delay = self.delay_for_attempt(attempt - 1);
            self.set_status(ConnectionStatus::Reconnecting { attempt });
            debug!(delay_ms = delay.as_millis() as u64, attempt, "Waiting before reconnect");
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.set_status(ConnectionStatus::Disconnected);
                    return Ok(());
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Read until the link drops. Returns true when the exit was an
    /// explicit disconnect rather than a transport failure.
    async fn consume<S>(&self, ws: tokio_tungstenite::WebSocketStream<S>) -> bool
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    {
        let (mut write, mut read) = ws.split();

        loop {
            let message = tokio::select! {
                _ = self.cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return true;
                }
                next = read.next() => next,
            };

            match message {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<StreamEnvelope>(&text) {
                    Ok(envelope) => self.state.write().await.apply(&envelope),
                    Err(e) => warn!(error = %e, "Dropping unparseable frame"),
                },
                Some(Ok(Message::Ping(payload))) => {
                    if write.send(Message::Pong(payload)).await.is_err() {
                        return false;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "Server closed the connection");
                    return false;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "Read error");
                    return false;
                }
                None => return false,
            }
        }
    }

    fn set_status(&self, status: ConnectionStatus) {
        if *self.status_tx.borrow() != status {
            debug!(?status, "Connection status changed");
        }
        let _ = self.status_tx.send(status);
    }
}

//! Forgewatch Client - Bounded State Synchronizer
//!
//! Maintains a bounded local mirror of the telemetry stream:
//! - State: per-machine latest reading, bounded history, alert log
//! - Sync: WebSocket consumer with automatic capped-backoff reconnect
//!
//! The synchronizer is deliberately lossy on reconnect: the stream is
//! live telemetry, so after an outage the mirror resumes from the
//! current state of the world rather than replaying history.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod state;
pub mod sync;

pub use error::{ClientError, Result};
pub use state::{AlertEntry, MachineSnapshot, MachineStatus, TelemetryState};
pub use sync::{ConnectionStatus, SyncClient, SyncClientConfig};

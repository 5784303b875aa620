//! Forgewatch Core - Telemetry Domain & Pipeline Stages
//!
//! This crate provides the domain model and the two compute stages of
//! the telemetry pipeline:
//! - Types: machine readings, enriched results, stream envelopes
//! - Catalog: machine id → display name / class lookup
//! - Edge: simulated edge nodes publishing sensor readings
//! - Scoring: pluggable anomaly scoring with a rule-based reference scorer
//! - Enrich: the machine-data → prediction-data consume loop
//! - Shutdown: cancellation-token tree and signal handling

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod catalog;
pub mod edge;
pub mod enrich;
pub mod error;
pub mod scoring;
pub mod shutdown;
pub mod types;

pub use catalog::{machine_class_for, machine_name_for};
pub use edge::{default_fleet, EdgeNode, EdgeNodeConfig, SensorRange, TelemetryBounds};
pub use enrich::EnrichmentEngine;
pub use error::{CoreError, Result};
pub use scoring::{HeuristicScorer, ScoreOutcome, Scorer, ScoringConfig};
pub use shutdown::{wait_for_shutdown_signal, ShutdownController};
pub use types::{
    EnrichedResult, EnvelopeKind, FailureKind, MachineClass, MachineReading, StreamEnvelope,
};

/// Topic carrying raw machine readings, keyed by machine id.
pub const MACHINE_DATA_TOPIC: &str = "machine-data";
/// Topic carrying enriched results, keyed by machine id.
pub const PREDICTION_DATA_TOPIC: &str = "prediction-data";

//! Bounded telemetry mirror.
//!
//! [`TelemetryState`] holds the latest enriched result per machine, a
//! bounded per-machine history, and a bounded newest-first alert log.
//! All collections are capped so the mirror's memory use is flat no
//! matter how long the stream runs.
//!
//! Delivery upstream is at-least-once, so a result may arrive twice
//! after a rebalance; an exact duplicate of a machine's latest result
//! is ignored.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use tracing::{debug, trace, warn};

use forgewatch_core::{machine_name_for, EnrichedResult, EnvelopeKind, StreamEnvelope};

/// Default per-machine history cap.
pub const DEFAULT_HISTORY_CAP: usize = 100;
/// Default alert log cap.
pub const DEFAULT_ALERT_CAP: usize = 50;

/// Anomaly score above which an anomalous machine is critical rather
/// than merely warning.
const CRITICAL_SCORE: f64 = 0.7;

/// Health status derived from the machine's latest result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineStatus {
    /// Latest result was not anomalous.
    Normal,
    /// Anomalous with a moderate score.
    Warning,
    /// Anomalous with a score above the critical threshold.
    Critical,
}

impl MachineStatus {
    fn for_result(result: &EnrichedResult) -> Self {
        if !result.is_anomalous() {
            Self::Normal
        } else if result.anomaly_score > CRITICAL_SCORE {
            Self::Critical
        } else {
            Self::Warning
        }
    }
}

/// Everything the mirror knows about one machine.
#[derive(Debug, Clone)]
pub struct MachineSnapshot {
    /// Display name from the catalog.
    pub name: String,
    /// Most recent enriched result.
    pub latest: EnrichedResult,
    /// Recent results, oldest first, capped.
    pub history: VecDeque<EnrichedResult>,
    /// Health derived from `latest`.
    pub status: MachineStatus,
}

/// One entry in the alert log.
#[derive(Debug, Clone)]
pub struct AlertEntry {
    /// Machine that raised the alert.
    pub machine_id: String,
    /// Display name from the catalog.
    pub machine_name: String,
    /// Classified failure mode.
    pub failure_type: forgewatch_core::FailureKind,
    /// `Critical` above the score threshold, `Warning` otherwise.
    pub severity: MachineStatus,
    /// Anomaly score at the time of the alert.
    pub anomaly_score: f64,
    /// Scorer confidence.
    pub confidence: f64,
    /// Reading timestamp.
    pub timestamp: DateTime<Utc>,
}

/// The bounded local mirror of the telemetry stream.
#[derive(Debug)]
pub struct TelemetryState {
    machines: HashMap<String, MachineSnapshot>,
    /// Newest first.
    alerts: VecDeque<AlertEntry>,
    history_cap: usize,
    alert_cap: usize,
    /// Data/alert envelopes applied (duplicates excluded).
    results_applied: u64,
    last_heartbeat: Option<DateTime<Utc>>,
}

impl TelemetryState {
    /// Mirror with the default caps.
    #[must_use]
    pub fn new() -> Self {
        Self::with_caps(DEFAULT_HISTORY_CAP, DEFAULT_ALERT_CAP)
    }

    /// Mirror with custom history and alert caps.
    #[must_use]
    pub fn with_caps(history_cap: usize, alert_cap: usize) -> Self {
        Self {
            machines: HashMap::new(),
            alerts: VecDeque::new(),
            history_cap: history_cap.max(1),
            alert_cap: alert_cap.max(1),
            results_applied: 0,
            last_heartbeat: None,
        }
    }

    /// Apply one envelope from the stream.
    pub fn apply(&mut self, envelope: &StreamEnvelope) {
        match envelope.kind {
            EnvelopeKind::Data | EnvelopeKind::Alert => match envelope.result() {
                Ok(result) => self.apply_result(result, envelope.kind == EnvelopeKind::Alert),
                Err(e) => warn!(error = %e, "Dropping envelope with malformed payload"),
            },
            EnvelopeKind::Heartbeat => {
                trace!("Heartbeat");
                self.last_heartbeat = Some(envelope.timestamp);
            }
            EnvelopeKind::System => {
                debug!(payload = %envelope.payload, "System envelope");
            }
        }
    }

    fn apply_result(&mut self, result: EnrichedResult, is_alert: bool) {
        let machine_id = result.reading.machine_id.clone();

        if let Some(snapshot) = self.machines.get(&machine_id) {
            // At-least-once redelivery of the same result.
            if snapshot.latest.processed_at == result.processed_at
                && snapshot.latest.reading.timestamp == result.reading.timestamp
            {
                trace!(machine = %machine_id, "Duplicate result ignored");
                return;
            }
        }

        let status = MachineStatus::for_result(&result);
        if is_alert {
            self.alerts.push_front(AlertEntry {
                machine_id: machine_id.clone(),
                machine_name: machine_name_for(&machine_id).to_string(),
                failure_type: result.failure_type,
                severity: status,
                anomaly_score: result.anomaly_score,
                confidence: result.confidence,
                timestamp: result.reading.timestamp,
            });
            self.alerts.truncate(self.alert_cap);
        }

        let entry = self
            .machines
            .entry(machine_id.clone())
            .or_insert_with(|| MachineSnapshot {
                name: machine_name_for(&machine_id).to_string(),
                latest: result.clone(),
                history: VecDeque::new(),
                status,
            });
        entry.latest = result.clone();
        entry.status = status;
        entry.history.push_back(result);
        while entry.history.len() > self.history_cap {
            entry.history.pop_front();
        }

        self.results_applied += 1;
    }

    /// Snapshot for one machine, if any result has arrived for it.
    #[must_use]
    pub fn machine(&self, machine_id: &str) -> Option<&MachineSnapshot> {
        self.machines.get(machine_id)
    }

    /// All machine snapshots, keyed by machine id.
    #[must_use]
    pub fn machines(&self) -> &HashMap<String, MachineSnapshot> {
        &self.machines
    }

    /// Alert log, newest first.
    #[must_use]
    pub fn alerts(&self) -> &VecDeque<AlertEntry> {
        &self.alerts
    }

    /// Count of results applied, duplicates excluded.
    #[must_use]
    pub fn results_applied(&self) -> u64 {
        self.results_applied
    }

    /// Timestamp of the most recent heartbeat, if any.
    #[must_use]
    pub fn last_heartbeat(&self) -> Option<DateTime<Utc>> {
        self.last_heartbeat
    }
}

impl Default for TelemetryState {
    fn default() -> Self {
        Self::new()
    }
}

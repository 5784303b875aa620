//! Wire types shared across the pipeline.
//!
//! Field names follow the topic schemas: raw readings on
//! `machine-data`, enriched results on `prediction-data`, and the
//! envelope crossing the gateway → client boundary. All timestamps
//! serialize as ISO-8601 strings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Machine capacity class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MachineClass {
    /// Low capacity
    L,
    /// Medium capacity
    M,
    /// High capacity
    H,
}

/// One raw sensor reading, produced once per tick per machine.
/// Identified by `(machine_id, timestamp)`; immutable once published.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineReading {
    /// Machine identity; also the partition key downstream.
    pub machine_id: String,
    /// Capacity class (wire name `machine_type`).
    #[serde(rename = "machine_type")]
    pub machine_class: MachineClass,
    /// Ambient air temperature in Kelvin.
    pub air_temperature: f64,
    /// Process temperature in Kelvin.
    pub process_temperature: f64,
    /// Spindle speed in rpm.
    pub rotational_speed: f64,
    /// Torque in Nm.
    pub torque: f64,
    /// Accumulated tool wear in minutes.
    pub tool_wear: f64,
    /// Reading timestamp.
    pub timestamp: DateTime<Utc>,
}

/// Failure classification labels. The wire strings match the training
/// dataset's category names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// No failure signature detected
    #[serde(rename = "No Failure")]
    None,
    /// High tool wear combined with high torque
    #[serde(rename = "Tool Wear Failure")]
    ToolWear,
    /// Excessive process/air temperature differential
    #[serde(rename = "Heat Dissipation Failure")]
    HeatDissipation,
    /// Rotational speed outside the safe envelope
    #[serde(rename = "Power Failure")]
    Power,
    /// Extreme torque under a worn tool
    #[serde(rename = "Overstrain Failure")]
    Overstrain,
    /// Randomly injected failure for edge-case coverage
    #[serde(rename = "Random Failures")]
    Random,
}

/// A reading enriched with the scoring verdict. Derived from exactly
/// one [`MachineReading`], never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedResult {
    /// The originating reading, flattened into the same JSON object.
    #[serde(flatten)]
    pub reading: MachineReading,
    /// Binary anomaly flag: 1 when the score crosses the threshold.
    pub prediction: u8,
    /// Scorer confidence in [0, 1].
    pub confidence: f64,
    /// Clamped rule-weight sum in [0, 1].
    #[serde(rename = "anomalyScore")]
    pub anomaly_score: f64,
    /// Classification of the dominant triggered rule.
    pub failure_type: FailureKind,
    /// Enrichment timestamp.
    pub processed_at: DateTime<Utc>,
}

impl EnrichedResult {
    /// Whether this result predicts a failure.
    #[must_use]
    pub fn is_anomalous(&self) -> bool {
        self.prediction == 1
    }
}

/// Envelope kind. A closed tag set; `Data` serializes as `prediction`
/// to match the dashboard protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeKind {
    /// Non-anomalous enriched result
    #[serde(rename = "prediction")]
    Data,
    /// Anomalous enriched result
    Alert,
    /// Liveness keep-alive
    Heartbeat,
    /// One-time connection metadata
    System,
}

/// Wraps every message crossing the gateway → client boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEnvelope {
    /// Envelope kind (wire name `type`).
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    /// Kind-specific payload.
    pub payload: Value,
    /// Emission timestamp.
    pub timestamp: DateTime<Utc>,
}

impl StreamEnvelope {
    /// Wrap an enriched result: `alert` when anomalous, `prediction`
    /// otherwise.
    pub fn for_result(result: &EnrichedResult) -> serde_json::Result<Self> {
        Ok(Self {
            kind: if result.is_anomalous() {
                EnvelopeKind::Alert
            } else {
                EnvelopeKind::Data
            },
            payload: serde_json::to_value(result)?,
            timestamp: Utc::now(),
        })
    }

    /// One-time system envelope sent on connect.
    #[must_use]
    pub fn system(payload: Value) -> Self {
        Self {
            kind: EnvelopeKind::System,
            payload,
            timestamp: Utc::now(),
        }
    }

    /// Liveness heartbeat envelope.
    #[must_use]
    pub fn heartbeat() -> Self {
        Self {
            kind: EnvelopeKind::Heartbeat,
            payload: Value::Null,
            timestamp: Utc::now(),
        }
    }

    /// Parse the payload back into an [`EnrichedResult`]. Only
    /// meaningful for `Data`/`Alert` envelopes.
    pub fn result(&self) -> serde_json::Result<EnrichedResult> {
        serde_json::from_value(self.payload.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading() -> MachineReading {
        MachineReading {
            machine_id: "MACHINE_001".to_string(),
            machine_class: MachineClass::L,
            air_temperature: 300.0,
            process_temperature: 310.0,
            rotational_speed: 1500.0,
            torque: 40.0,
            tool_wear: 100.0,
            timestamp: Utc::now(),
        }
    }

    fn result(prediction: u8) -> EnrichedResult {
        EnrichedResult {
            reading: reading(),
            prediction,
            confidence: 0.85,
            anomaly_score: if prediction == 1 { 0.6 } else { 0.1 },
            failure_type: if prediction == 1 {
                FailureKind::ToolWear
            } else {
                FailureKind::None
            },
            processed_at: Utc::now(),
        }
    }

    #[test]
    fn test_reading_wire_format() {
        let json = serde_json::to_value(reading()).unwrap();
        assert_eq!(json["machine_type"], "L");
        assert_eq!(json["machine_id"], "MACHINE_001");
        // ISO-8601 timestamp string
        assert!(json["timestamp"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn test_enriched_result_flattens_reading() {
        let json = serde_json::to_value(result(1)).unwrap();
        assert_eq!(json["machine_id"], "MACHINE_001");
        assert_eq!(json["anomalyScore"], 0.6);
        assert_eq!(json["failure_type"], "Tool Wear Failure");
        assert_eq!(json["prediction"], 1);
    }

    #[test]
    fn test_envelope_kind_for_result() {
        let alert = StreamEnvelope::for_result(&result(1)).unwrap();
        assert_eq!(alert.kind, EnvelopeKind::Alert);

        let data = StreamEnvelope::for_result(&result(0)).unwrap();
        assert_eq!(data.kind, EnvelopeKind::Data);
        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["type"], "prediction");
    }

    #[test]
    fn test_envelope_roundtrip() {
        let env = StreamEnvelope::for_result(&result(1)).unwrap();
        let parsed = env.result().unwrap();
        assert_eq!(parsed.reading.machine_id, "MACHINE_001");
        assert_eq!(parsed.failure_type, FailureKind::ToolWear);
    }

    #[test]
    fn test_failure_kind_wire_strings() {
        assert_eq!(
            serde_json::to_string(&FailureKind::HeatDissipation).unwrap(),
            "\"Heat Dissipation Failure\""
        );
        assert_eq!(serde_json::to_string(&FailureKind::None).unwrap(), "\"No Failure\"");
    }
}

//! Anomaly scoring.
//!
//! The scorer is a seam: the pipeline only depends on the [`Scorer`]
//! trait, so the rule-based reference implementation can be swapped for
//! a trained model (or a table-driven fake in tests) without touching
//! the consume loop.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::types::{FailureKind, MachineReading};

/// Tool wear above this, combined with high torque, indicates imminent
/// tool failure (minutes).
const WEAR_WITH_TORQUE_MIN: f64 = 180.0;
/// Torque threshold for the combined tool-wear rule (Nm).
const WEAR_TORQUE_NM: f64 = 60.0;
/// Tool wear that alone indicates failure risk (minutes).
const WEAR_SOLO_MIN: f64 = 200.0;
/// Process/air differential indicating failed heat dissipation (K).
const TEMP_DIFF_CRITICAL_K: f64 = 50.0;
/// Elevated but not yet critical temperature differential (K).
const TEMP_DIFF_ELEVATED_K: f64 = 40.0;
/// Rotational speed beyond the safe envelope (rpm).
const SPEED_CRITICAL_RPM: f64 = 2800.0;
/// Torque threshold for the overstrain rule (Nm).
const OVERSTRAIN_TORQUE_NM: f64 = 70.0;
/// Wear is normalized against this full-life figure (minutes).
const WEAR_FULL_LIFE_MIN: f64 = 250.0;
/// Normalized wear ratio for the overstrain rule.
const OVERSTRAIN_WEAR_RATIO: f64 = 0.6;
/// Power metric (torque × speed) bounds of normal operation.
const POWER_METRIC_HIGH: f64 = 150_000.0;
const POWER_METRIC_LOW: f64 = 15_000.0;
/// Scores above this flip the binary prediction.
const ANOMALY_THRESHOLD: f64 = 0.5;
/// Confidence reported when no labeled rule fires.
const BASE_CONFIDENCE: f64 = 0.85;

/// Verdict for one reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreOutcome {
    /// Clamped rule-weight sum in [0, 1].
    pub anomaly_score: f64,
    /// Label of the dominant triggered rule, `None` if below threshold.
    pub failure_kind: FailureKind,
    /// Confidence in [0, 1].
    pub confidence: f64,
}

impl ScoreOutcome {
    /// Binary prediction: 1 when the score crosses the anomaly
    /// threshold. The threshold lives here so the scorer and the
    /// enrichment stage cannot disagree on it.
    #[must_use]
    pub fn prediction(&self) -> u8 {
        u8::from(self.anomaly_score > ANOMALY_THRESHOLD)
    }
}

/// Scoring seam for the enrichment stage.
pub trait Scorer: Send {
    /// Score one reading. Takes `&mut self` so implementations may
    /// carry an RNG or running state.
    fn score(&mut self, reading: &MachineReading) -> ScoreOutcome;
}

/// Tunables for the reference scorer.
#[derive(Debug, Clone, Copy)]
pub struct ScoringConfig {
    /// Probability of injecting a random failure per reading.
    pub random_failure_probability: f64,
    /// Amplitude of the symmetric confidence perturbation.
    pub confidence_noise: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            random_failure_probability: 0.01,
            confidence_noise: 0.03,
        }
    }
}

impl ScoringConfig {
    /// Fully deterministic variant for tests: no random injection, no
    /// confidence noise.
    #[must_use]
    pub fn deterministic() -> Self {
        Self {
            random_failure_probability: 0.0,
            confidence_noise: 0.0,
        }
    }
}

/// Rule-based reference scorer mimicking the trained model's behavior.
pub struct HeuristicScorer {
    config: ScoringConfig,
    rng: StdRng,
}

impl HeuristicScorer {
    /// Scorer with default tunables and an entropy-seeded RNG.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(ScoringConfig::default())
    }

    /// Scorer with custom tunables.
    #[must_use]
    pub fn with_config(config: ScoringConfig) -> Self {
        Self {
            config,
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic scorer for tests: fixed seed, zeroed noise.
    #[must_use]
    pub fn seeded(seed: u64) -> Self {
        Self {
            config: ScoringConfig::deterministic(),
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for HeuristicScorer {
    fn default() -> Self {
        Self::new()
    }
}

impl Scorer for HeuristicScorer {
    fn score(&mut self, reading: &MachineReading) -> ScoreOutcome {
        let temp_diff = reading.process_temperature - reading.air_temperature;
        let power_metric = reading.torque * reading.rotational_speed;
        let wear_ratio = reading.tool_wear / WEAR_FULL_LIFE_MIN;

        let mut score = 0.0;
        // (weight, kind, confidence) of the dominant labeled rule so far
        let mut dominant: Option<(f64, FailureKind, f64)> = None;
        let mut bump = |score: &mut f64, weight: f64, label: Option<(FailureKind, f64)>| {
            *score += weight;
            if let Some((kind, confidence)) = label {
                if dominant.map_or(true, |(w, _, _)| weight > w) {
                    dominant = Some((weight, kind, confidence));
                }
            }
        };

        if reading.tool_wear > WEAR_WITH_TORQUE_MIN && reading.torque > WEAR_TORQUE_NM {
            bump(&mut score, 0.40, Some((FailureKind::ToolWear, 0.92)));
        } else if reading.tool_wear > WEAR_SOLO_MIN {
            bump(&mut score, 0.25, Some((FailureKind::ToolWear, 0.88)));
        }

        if temp_diff > TEMP_DIFF_CRITICAL_K {
            bump(&mut score, 0.35, Some((FailureKind::HeatDissipation, 0.90)));
        } else if temp_diff > TEMP_DIFF_ELEVATED_K {
            bump(&mut score, 0.15, None);
        }

        if reading.rotational_speed > SPEED_CRITICAL_RPM {
            bump(&mut score, 0.30, Some((FailureKind::Power, 0.87)));
        }

        if reading.torque > OVERSTRAIN_TORQUE_NM && wear_ratio > OVERSTRAIN_WEAR_RATIO {
            bump(&mut score, 0.35, Some((FailureKind::Overstrain, 0.91)));
        }

        if !(POWER_METRIC_LOW..=POWER_METRIC_HIGH).contains(&power_metric) {
            bump(&mut score, 0.20, None);
        }

        // Random failure injection overrides the classification.
        if self.config.random_failure_probability > 0.0
            && self.rng.gen::<f64>() < self.config.random_failure_probability
        {
            score += 0.30;
            dominant = Some((f64::INFINITY, FailureKind::Random, 0.65));
        }

        let anomaly_score = score.min(1.0);
        let anomalous = anomaly_score > ANOMALY_THRESHOLD;

        let (failure_kind, mut confidence) = match dominant {
            Some((_, kind, conf)) if anomalous => (kind, conf),
            Some((_, _, conf)) => (FailureKind::None, conf),
            None => (FailureKind::None, BASE_CONFIDENCE),
        };

        if self.config.confidence_noise > 0.0 {
            let amplitude = self.config.confidence_noise;
            confidence += self.rng.gen_range(-amplitude..=amplitude);
        }

        ScoreOutcome {
            anomaly_score,
            failure_kind,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

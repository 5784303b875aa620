//! Simulated edge nodes.
//!
//! Each edge node is an independent task generating one reading per
//! tick: a mean-reverting Gaussian walk per sensor bounded to a
//! realistic operating envelope, a slow sinusoidal drift modeling
//! equipment aging, a low-probability multiplicative spike, and a
//! monotonically accumulating tool-wear counter that resets when the
//! tool is replaced. Readings publish keyed by machine id, so each
//! machine's stream stays ordered end to end.
//!
//! A publish failure is logged and the node moves on to the next tick;
//! edge nodes never crash on downstream trouble.

use std::f64::consts::PI;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use forgewatch_bus::Broker;

use crate::types::{MachineClass, MachineReading};

/// Chance per tick of a transient anomaly spike on speed and torque.
const SPIKE_PROBABILITY: f64 = 0.02;
/// Variance multiplier applied during a spike tick.
const SPIKE_MULTIPLIER: f64 = 1.5;
/// Drift period in ticks and amplitude in sensor units.
const DRIFT_PERIOD_TICKS: f64 = 200.0;
const DRIFT_AMPLITUDE: f64 = 5.0;
/// Maximum wear accumulated per tick (minutes).
const WEAR_PER_TICK_MAX: f64 = 0.5;

/// Inclusive operating envelope for one sensor.
#[derive(Debug, Clone, Copy)]
pub struct SensorRange {
    /// Lower bound.
    pub min: f64,
    /// Upper bound.
    pub max: f64,
}

impl SensorRange {
    const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    fn midpoint(self) -> f64 {
        (self.min + self.max) / 2.0
    }

    fn span(self) -> f64 {
        self.max - self.min
    }
}

/// Operating envelope for all five sensors.
#[derive(Debug, Clone, Copy)]
pub struct TelemetryBounds {
    /// Ambient air temperature (K).
    pub air_temperature: SensorRange,
    /// Process temperature (K).
    pub process_temperature: SensorRange,
    /// Spindle speed (rpm).
    pub rotational_speed: SensorRange,
    /// Torque (Nm).
    pub torque: SensorRange,
    /// Tool wear (minutes).
    pub tool_wear: SensorRange,
}

impl Default for TelemetryBounds {
    fn default() -> Self {
        Self {
            air_temperature: SensorRange::new(295.0, 305.0),
            process_temperature: SensorRange::new(305.0, 316.0),
            rotational_speed: SensorRange::new(1150.0, 2900.0),
            torque: SensorRange::new(3.0, 77.0),
            tool_wear: SensorRange::new(0.0, 250.0),
        }
    }
}

/// Configuration for one edge node.
#[derive(Debug, Clone)]
pub struct EdgeNodeConfig {
    /// Machine identity; becomes the partition key.
    pub machine_id: String,
    /// Capacity class stamped onto every reading.
    pub machine_class: MachineClass,
    /// Tick interval.
    pub interval: Duration,
    /// Per-machine noise multiplier.
    pub variance_factor: f64,
    /// Operating envelope.
    pub bounds: TelemetryBounds,
}

impl EdgeNodeConfig {
    /// Config with default bounds.
    #[must_use]
    pub fn new(
        machine_id: impl Into<String>,
        machine_class: MachineClass,
        interval: Duration,
        variance_factor: f64,
    ) -> Self {
        Self {
            machine_id: machine_id.into(),
            machine_class,
            interval,
            variance_factor,
            bounds: TelemetryBounds::default(),
        }
    }
}

/// The default five-machine fleet with the reference variance factors.
#[must_use]
pub fn default_fleet(interval: Duration) -> Vec<EdgeNodeConfig> {
    [
        ("MACHINE_001", MachineClass::L, 1.0),
        ("MACHINE_002", MachineClass::M, 1.1),
        ("MACHINE_003", MachineClass::H, 0.9),
        ("MACHINE_004", MachineClass::L, 1.2),
        ("MACHINE_005", MachineClass::M, 0.8),
    ]
    .into_iter()
    .map(|(id, class, vf)| EdgeNodeConfig::new(id, class, interval, vf))
    .collect()
}

/// One simulated machine. Owns its RNG and wear accumulator; no state
/// is shared between edge nodes.
pub struct EdgeNode {
    config: EdgeNodeConfig,
    rng: StdRng,
    tick: u64,
    wear: f64,
}

impl EdgeNode {
    /// Edge node with an entropy-seeded RNG and some initial wear, as
    /// if the machine were already mid-life.
    #[must_use]
    pub fn new(config: EdgeNodeConfig) -> Self {
        let mut rng = StdRng::from_entropy();
        let wear = rng.gen::<f64>() * 50.0;
        Self {
            config,
            rng,
            tick: 0,
            wear,
        }
    }

    /// Deterministic edge node for tests; starts with zero wear.
    #[must_use]
    pub fn seeded(config: EdgeNodeConfig, seed: u64) -> Self {
        Self {
            config,
            rng: StdRng::seed_from_u64(seed),
            tick: 0,
            wear: 0.0,
        }
    }

    /// Current wear accumulator (minutes).
    #[must_use]
    pub fn wear(&self) -> f64 {
        self.wear
    }

    /// Generate the next reading. Advances the tick counter and the
    /// wear accumulator.
    pub fn next_reading(&mut self, now: DateTime<Utc>) -> MachineReading {
        self.tick += 1;
        let bounds = self.config.bounds;

        self.wear += self.rng.gen::<f64>() * WEAR_PER_TICK_MAX;
        if self.wear > bounds.tool_wear.max {
            self.wear = 0.0;
            info!(machine = %self.config.machine_id, tick = self.tick, "Tool replaced, wear reset");
        }

        let drift = (self.tick as f64 / DRIFT_PERIOD_TICKS).sin() * DRIFT_AMPLITUDE;
        let vf = self.config.variance_factor;
        let spike = if self.rng.gen::<f64>() < SPIKE_PROBABILITY {
            SPIKE_MULTIPLIER
        } else {
            1.0
        };

        MachineReading {
            machine_id: self.config.machine_id.clone(),
            machine_class: self.config.machine_class,
            air_temperature: round2(self.sample(bounds.air_temperature, vf, drift)),
            process_temperature: round2(self.sample(bounds.process_temperature, vf, drift * 1.2)),
            rotational_speed: self.sample(bounds.rotational_speed, vf * spike, 0.0).round(),
            torque: round2(self.sample(bounds.torque, vf * spike, 0.0)),
            tool_wear: self.wear.clamp(bounds.tool_wear.min, bounds.tool_wear.max).round(),
            timestamp: now,
        }
    }

    /// Gaussian sample centered on the range midpoint plus drift, with
    /// σ = 15% of the range, clamped to the envelope.
    fn sample(&mut self, range: SensorRange, variance_factor: f64, drift: f64) -> f64 {
        let mean = range.midpoint() + drift;
        let std_dev = range.span() * 0.15 * variance_factor;
        let u1: f64 = self.rng.gen_range(f64::EPSILON..1.0);
        let u2: f64 = self.rng.gen();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos();
        (mean + z * std_dev).clamp(range.min, range.max)
    }

    /// Run the tick loop until cancelled, publishing each reading to
    /// `topic` keyed by machine id.
    pub async fn run(mut self, broker: Broker, topic: String, cancel: CancellationToken) {
        info!(
            machine = %self.config.machine_id,
            class = ?self.config.machine_class,
            interval_ms = self.config.interval.as_millis() as u64,
            "Edge node started"
        );

        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let reading = self.next_reading(Utc::now());
                    match broker.publish(&topic, &reading.machine_id, &reading).await {
                        Ok(_) => debug!(
                            machine = %reading.machine_id,
                            torque = reading.torque,
                            wear = reading.tool_wear,
                            "Reading published"
                        ),
                        Err(e) => warn!(
                            machine = %reading.machine_id,
                            error = %e,
                            "Publish failed, continuing to next tick"
                        ),
                    }
                }
            }
        }

        info!(machine = %self.config.machine_id, ticks = self.tick, "Edge node stopped");
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config() -> EdgeNodeConfig {
        EdgeNodeConfig::new("MACHINE_001", MachineClass::L, Duration::from_millis(10), 1.0)
    }

    #[test]
    fn test_readings_stay_in_bounds() {
        let mut node = EdgeNode::seeded(config(), 1);
        let bounds = TelemetryBounds::default();
        for _ in 0..500 {
            let r = node.next_reading(Utc::now());
            assert!(r.air_temperature >= bounds.air_temperature.min);
            assert!(r.air_temperature <= bounds.air_temperature.max);
            assert!(r.process_temperature >= bounds.process_temperature.min);
            assert!(r.process_temperature <= bounds.process_temperature.max);
            assert!(r.rotational_speed >= bounds.rotational_speed.min);
            assert!(r.rotational_speed <= bounds.rotational_speed.max);
            assert!(r.torque >= bounds.torque.min);
            assert!(r.torque <= bounds.torque.max);
            assert!(r.tool_wear >= 0.0 && r.tool_wear <= bounds.tool_wear.max);
        }
    }

    #[test]
    fn test_wear_accumulates_and_resets() {
        let mut node = EdgeNode::seeded(config(), 2);
        let mut saw_reset = false;
        let mut previous = node.wear();
        // Wear grows ~0.25/tick on average, so it wraps around tick 1000.
        for _ in 0..3000 {
            node.next_reading(Utc::now());
            if node.wear() < previous {
                saw_reset = true;
                break;
            }
            previous = node.wear();
        }
        assert!(saw_reset, "wear accumulator never reset");
        assert!(node.wear() < 1.0);
    }

    #[test]
    fn test_seeded_node_is_deterministic() {
        let now = Utc::now();
        let a = EdgeNode::seeded(config(), 3).next_reading(now);
        let b = EdgeNode::seeded(config(), 3).next_reading(now);
        assert_eq!(a.torque, b.torque);
        assert_eq!(a.rotational_speed, b.rotational_speed);
    }

    #[tokio::test]
    async fn test_run_publishes_and_stops_on_cancel() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let broker = Broker::new();
        broker.ensure_topics(&["machine-data"], 2).await.unwrap();

        let received = Arc::new(AtomicUsize::new(0));
        let counter = received.clone();
        let sub = broker.subscribe("machine-data", "edge-test", move |record| {
            let counter = counter.clone();
            async move {
                serde_json::from_str::<MachineReading>(&record.payload)?;
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        let node = EdgeNode::seeded(config(), 4);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(node.run(broker.clone(), "machine-data".to_string(), cancel.clone()));

        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("edge node did not stop on cancel")
            .unwrap();
        sub.shutdown().await;

        assert!(received.load(Ordering::SeqCst) >= 1, "no readings delivered");
    }
}

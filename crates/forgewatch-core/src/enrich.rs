//! Enrichment stage: machine-data → score → prediction-data.
//!
//! Joins the `ml-consumers` group on the input topic, so multiple
//! enrichment instances split the partitions while each machine's
//! stream stays on one instance. A malformed record is logged and
//! skipped; it never stalls the partition.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use forgewatch_bus::{Broker, HandlerError, SubscriberHandle};

use crate::error::CoreError;
use crate::scoring::Scorer;
use crate::types::{EnrichedResult, MachineReading};

/// Consumer group the enrichment stage joins on the input topic.
pub const ENRICH_GROUP: &str = "ml-consumers";

/// The enrichment stage. Consumes raw readings, scores them, and
/// publishes enriched results keyed by the same machine id so
/// per-machine ordering carries through.
pub struct EnrichmentEngine {
    broker: Broker,
    input_topic: String,
    output_topic: String,
    scorer: Arc<Mutex<Box<dyn Scorer>>>,
}

impl EnrichmentEngine {
    /// Engine over the given topics with the given scorer.
    #[must_use]
    pub fn new(
        broker: Broker,
        input_topic: impl Into<String>,
        output_topic: impl Into<String>,
        scorer: Box<dyn Scorer>,
    ) -> Self {
        Self {
            broker,
            input_topic: input_topic.into(),
            output_topic: output_topic.into(),
            scorer: Arc::new(Mutex::new(scorer)),
        }
    }

    /// Start the consume loop. Returns the subscriber handle; shut it
    /// down to stop the stage.
    #[must_use]
    pub fn start(&self) -> SubscriberHandle {
        info!(
            input = %self.input_topic,
            output = %self.output_topic,
            group = ENRICH_GROUP,
            "Enrichment stage starting"
        );

        let broker = self.broker.clone();
        let output_topic = self.output_topic.clone();
        let scorer = self.scorer.clone();

        self.broker.subscribe(&self.input_topic, ENRICH_GROUP, move |record| {
            let broker = broker.clone();
            let output_topic = output_topic.clone();
            let scorer = scorer.clone();
            async move {
                let reading: MachineReading =
                    serde_json::from_str(&record.payload).map_err(CoreError::Malformed)?;
                let outcome = scorer.lock().await.score(&reading);

                let result = EnrichedResult {
                    prediction: outcome.prediction(),
                    confidence: outcome.confidence,
                    anomaly_score: outcome.anomaly_score,
                    failure_type: outcome.failure_kind,
                    processed_at: Utc::now(),
                    reading,
                };

                debug!(
                    machine = %result.reading.machine_id,
                    score = result.anomaly_score,
                    prediction = result.prediction,
                    "Reading scored"
                );

                broker
                    .publish(&output_topic, &result.reading.machine_id, &result)
                    .await
                    .map_err(CoreError::Bus)?;
                Ok::<(), HandlerError>(())
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::{ScoreOutcome, ScoringConfig};
    use crate::types::{FailureKind, MachineClass};
    use crate::{HeuristicScorer, MACHINE_DATA_TOPIC, PREDICTION_DATA_TOPIC};
    use chrono::Utc;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use tokio::time::{sleep, timeout};

    fn reading(machine_id: &str, torque: f64, wear: f64, speed: f64) -> MachineReading {
        MachineReading {
            machine_id: machine_id.to_string(),
            machine_class: MachineClass::H,
            air_temperature: 300.0,
            process_temperature: 310.0,
            rotational_speed: speed,
            torque,
            tool_wear: wear,
            timestamp: Utc::now(),
        }
    }

    async fn wait_for<F: Fn() -> bool>(cond: F) {
        timeout(Duration::from_secs(5), async {
            while !cond() {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    /// Scorer returning a fixed verdict.
    struct FixedScorer(ScoreOutcome);

    impl Scorer for FixedScorer {
        fn score(&mut self, _reading: &MachineReading) -> ScoreOutcome {
            self.0
        }
    }

    #[tokio::test]
    async fn test_enriches_and_republishes() {
        let broker = Broker::new();
        broker
            .ensure_topics(&[MACHINE_DATA_TOPIC, PREDICTION_DATA_TOPIC], 3)
            .await
            .unwrap();

        let engine = EnrichmentEngine::new(
            broker.clone(),
            MACHINE_DATA_TOPIC,
            PREDICTION_DATA_TOPIC,
            Box::new(FixedScorer(ScoreOutcome {
                anomaly_score: 0.7,
                failure_kind: FailureKind::ToolWear,
                confidence: 0.92,
            })),
        );
        let stage = engine.start();

        let results: Arc<StdMutex<Vec<EnrichedResult>>> = Arc::new(StdMutex::new(Vec::new()));
        let sink = results.clone();
        let tap = broker.subscribe(PREDICTION_DATA_TOPIC, "test-tap", move |record| {
            let sink = sink.clone();
            async move {
                sink.lock().unwrap().push(serde_json::from_str(&record.payload)?);
                Ok(())
            }
        });

        sleep(Duration::from_millis(100)).await;
        broker
            .publish(MACHINE_DATA_TOPIC, "MACHINE_003", &reading("MACHINE_003", 65.0, 210.0, 2400.0))
            .await
            .unwrap();

        wait_for(|| !results.lock().unwrap().is_empty()).await;
        let got = results.lock().unwrap().clone();
        assert_eq!(got[0].reading.machine_id, "MACHINE_003");
        assert_eq!(got[0].prediction, 1);
        assert_eq!(got[0].failure_type, FailureKind::ToolWear);
        assert_eq!(got[0].anomaly_score, 0.7);

        stage.shutdown().await;
        tap.shutdown().await;
    }

    #[tokio::test]
    async fn test_malformed_record_is_skipped() {
        let broker = Broker::new();
        broker
            .ensure_topics(&[MACHINE_DATA_TOPIC, PREDICTION_DATA_TOPIC], 1)
            .await
            .unwrap();

        let engine = EnrichmentEngine::new(
            broker.clone(),
            MACHINE_DATA_TOPIC,
            PREDICTION_DATA_TOPIC,
            Box::new(HeuristicScorer::seeded(1)),
        );
        let stage = engine.start();

        let results: Arc<StdMutex<Vec<EnrichedResult>>> = Arc::new(StdMutex::new(Vec::new()));
        let sink = results.clone();
        let tap = broker.subscribe(PREDICTION_DATA_TOPIC, "test-tap", move |record| {
            let sink = sink.clone();
            async move {
                sink.lock().unwrap().push(serde_json::from_str(&record.payload)?);
                Ok(())
            }
        });

        sleep(Duration::from_millis(100)).await;
        broker
            .publish_raw(MACHINE_DATA_TOPIC, "MACHINE_001", "{not json".to_string())
            .await
            .unwrap();
        broker
            .publish(MACHINE_DATA_TOPIC, "MACHINE_001", &reading("MACHINE_001", 40.0, 50.0, 1500.0))
            .await
            .unwrap();

        // The malformed record is dropped; the valid one still flows.
        wait_for(|| !results.lock().unwrap().is_empty()).await;
        let got = results.lock().unwrap().clone();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].prediction, 0);
        assert_eq!(got[0].failure_type, FailureKind::None);

        stage.shutdown().await;
        tap.shutdown().await;
    }

    #[tokio::test]
    async fn test_default_scorer_flags_worn_tool() {
        let broker = Broker::new();
        broker
            .ensure_topics(&[MACHINE_DATA_TOPIC, PREDICTION_DATA_TOPIC], 2)
            .await
            .unwrap();

        let scorer = HeuristicScorer::with_config(ScoringConfig::deterministic());
        let engine = EnrichmentEngine::new(
            broker.clone(),
            MACHINE_DATA_TOPIC,
            PREDICTION_DATA_TOPIC,
            Box::new(scorer),
        );
        let stage = engine.start();

        let results: Arc<StdMutex<Vec<EnrichedResult>>> = Arc::new(StdMutex::new(Vec::new()));
        let sink = results.clone();
        let tap = broker.subscribe(PREDICTION_DATA_TOPIC, "test-tap", move |record| {
            let sink = sink.clone();
            async move {
                sink.lock().unwrap().push(serde_json::from_str(&record.payload)?);
                Ok(())
            }
        });

        sleep(Duration::from_millis(100)).await;
        // Worn tool at high torque and an out-of-band power metric.
        broker
            .publish(MACHINE_DATA_TOPIC, "MACHINE_003", &reading("MACHINE_003", 65.0, 210.0, 2400.0))
            .await
            .unwrap();

        wait_for(|| !results.lock().unwrap().is_empty()).await;
        let got = results.lock().unwrap().clone();
        assert_eq!(got[0].prediction, 1);
        assert_eq!(got[0].failure_type, FailureKind::ToolWear);
        assert!(got[0].anomaly_score > 0.5);

        stage.shutdown().await;
        tap.shutdown().await;
    }
}

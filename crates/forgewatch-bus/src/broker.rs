//! In-process broker: topics, partitions, append logs.
//!
//! A [`Broker`] owns a set of named topics. Each topic is split into a
//! fixed number of partitions; a record's partition is chosen by a
//! stable hash of its key, so all records for one key land in the same
//! partition and keep their relative order. Partition logs are bounded:
//! once a partition exceeds the retention window the oldest records are
//! trimmed and the base offset advances.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, Notify, RwLock};
use tracing::{debug, info};

use crate::error::{BusError, Result};

/// Default per-partition retention window (records).
pub const DEFAULT_RETENTION: usize = 8192;

/// A single message on the bus.
#[derive(Debug, Clone)]
pub struct Record {
    /// Partition key the record was published with.
    pub key: String,
    /// JSON-serialized payload.
    pub payload: String,
    /// Offset within the partition. Strictly increasing per partition.
    pub offset: u64,
    /// Partition index the record landed in.
    pub partition: usize,
    /// Publish timestamp.
    pub published_at: DateTime<Utc>,
}

pub(crate) struct PartitionLog {
    pub(crate) records: VecDeque<Record>,
    /// Offset of the oldest retained record.
    pub(crate) base_offset: u64,
    /// Offset the next appended record will get.
    pub(crate) next_offset: u64,
}

pub(crate) struct Partition {
    pub(crate) index: usize,
    pub(crate) log: Mutex<PartitionLog>,
}

impl Partition {
    fn new(index: usize) -> Self {
        Self {
            index,
            log: Mutex::new(PartitionLog {
                records: VecDeque::new(),
                base_offset: 0,
                next_offset: 0,
            }),
        }
    }

    async fn append(&self, key: &str, payload: String, retention: usize) -> u64 {
        let mut log = self.log.lock().await;
        let offset = log.next_offset;
        log.records.push_back(Record {
            key: key.to_string(),
            payload,
            offset,
            partition: self.index,
            published_at: Utc::now(),
        });
        log.next_offset += 1;
        while log.records.len() > retention {
            log.records.pop_front();
            log.base_offset += 1;
        }
        offset
    }

    /// Fetch up to `max` records starting at `from`. Returns the
    /// effective start offset, which may be ahead of `from` if the
    /// retention window has trimmed past it.
    pub(crate) async fn fetch(&self, from: u64, max: usize) -> (u64, Vec<Record>) {
        let log = self.log.lock().await;
        let start = from.max(log.base_offset);
        let skip = (start - log.base_offset) as usize;
        let records = log
            .records
            .iter()
            .skip(skip)
            .take(max)
            .cloned()
            .collect();
        (start, records)
    }

    pub(crate) async fn next_offset(&self) -> u64 {
        self.log.lock().await.next_offset
    }
}

/// Per-group state: membership and committed offsets for one topic.
pub(crate) struct GroupInner {
    pub(crate) members: Vec<u64>,
    pub(crate) next_member_id: u64,
    /// Bumped on every membership change; consumers re-read their
    /// partition assignment when it moves.
    pub(crate) generation: u64,
    /// Next offset to read, per partition.
    pub(crate) committed: Vec<u64>,
}

pub(crate) struct Topic {
    pub(crate) name: String,
    pub(crate) partitions: Vec<Arc<Partition>>,
    /// Notified on every publish so idle consumers wake promptly.
    pub(crate) publish_notify: Notify,
    pub(crate) groups: Mutex<HashMap<String, Arc<Mutex<GroupInner>>>>,
}

impl Topic {
    fn new(name: &str, partition_count: usize) -> Self {
        Self {
            name: name.to_string(),
            partitions: (0..partition_count).map(|i| Arc::new(Partition::new(i))).collect(),
            publish_notify: Notify::new(),
            groups: Mutex::new(HashMap::new()),
        }
    }

    /// Get or create the named consumer group. A fresh group starts at
    /// the live tail of every partition: consumers joining late sync
    /// from "now", not from history.
    pub(crate) async fn group(&self, name: &str) -> Arc<Mutex<GroupInner>> {
        let mut groups = self.groups.lock().await;
        if let Some(g) = groups.get(name) {
            return g.clone();
        }
        let mut committed = Vec::with_capacity(self.partitions.len());
        for p in &self.partitions {
            committed.push(p.next_offset().await);
        }
        let group = Arc::new(Mutex::new(GroupInner {
            members: Vec::new(),
            next_member_id: 0,
            generation: 0,
            committed,
        }));
        groups.insert(name.to_string(), group.clone());
        debug!(topic = %self.name, group = %name, "Consumer group created");
        group
    }
}

struct BrokerInner {
    topics: RwLock<HashMap<String, Arc<Topic>>>,
    retention: usize,
}

/// Handle to the in-process broker. Cheap to clone; all clones share
/// the same topics.
#[derive(Clone)]
pub struct Broker {
    inner: Arc<BrokerInner>,
}

impl Broker {
    /// Create a broker with the default retention window.
    #[must_use]
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_RETENTION)
    }

    /// Create a broker with a custom per-partition retention window.
    #[must_use]
    pub fn with_retention(retention: usize) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                topics: RwLock::new(HashMap::new()),
                retention: retention.max(1),
            }),
        }
    }

    /// Idempotently provision topics. Only missing topics are created;
    /// existing topics are left untouched even if their partition count
    /// differs from `partition_count` (first writer wins).
    pub async fn ensure_topics(&self, names: &[&str], partition_count: usize) -> Result<()> {
        if partition_count == 0 {
            return Err(BusError::Provisioning(
                "partition count must be at least 1".to_string(),
            ));
        }
        let mut topics = self.inner.topics.write().await;
        for name in names {
            if topics.contains_key(*name) {
                debug!(topic = %name, "Topic already exists, skipping");
                continue;
            }
            topics.insert((*name).to_string(), Arc::new(Topic::new(name, partition_count)));
            info!(topic = %name, partitions = partition_count, "Topic created");
        }
        Ok(())
    }

    /// Publish a value to a topic, keyed for partition assignment.
    /// Returns the offset the record was assigned within its partition.
    pub async fn publish<T: Serialize>(&self, topic: &str, key: &str, value: &T) -> Result<u64> {
        let payload = serde_json::to_string(value)?;
        self.publish_raw(topic, key, payload).await
    }

    /// Publish a pre-serialized payload.
    pub async fn publish_raw(&self, topic: &str, key: &str, payload: String) -> Result<u64> {
        let t = self
            .topic(topic)
            .await
            .ok_or_else(|| BusError::UnknownTopic(topic.to_string()))?;
        let partition = stable_hash(key) as usize % t.partitions.len();
        let offset = t.partitions[partition]
            .append(key, payload, self.inner.retention)
            .await;
        t.publish_notify.notify_waiters();
        Ok(offset)
    }

    /// Number of partitions for a topic, if it exists.
    pub async fn partition_count(&self, topic: &str) -> Option<usize> {
        self.topic(topic).await.map(|t| t.partitions.len())
    }

    pub(crate) async fn topic(&self, name: &str) -> Option<Arc<Topic>> {
        self.inner.topics.read().await.get(name).cloned()
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

/// FNV-1a. Stable across runs and builds so a key's partition
/// assignment is reproducible.
pub(crate) fn stable_hash(key: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in key.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ensure_topics_idempotent() {
        let broker = Broker::new();
        broker.ensure_topics(&["machine-data"], 5).await.unwrap();
        // Second call with a different partition count is a no-op
        broker.ensure_topics(&["machine-data", "prediction-data"], 3).await.unwrap();

        assert_eq!(broker.partition_count("machine-data").await, Some(5));
        assert_eq!(broker.partition_count("prediction-data").await, Some(3));
    }

    #[tokio::test]
    async fn test_zero_partitions_rejected() {
        let broker = Broker::new();
        let err = broker.ensure_topics(&["t"], 0).await.unwrap_err();
        assert!(matches!(err, BusError::Provisioning(_)));
    }

    #[tokio::test]
    async fn test_publish_unknown_topic() {
        let broker = Broker::new();
        let err = broker.publish("nope", "k", &42u32).await.unwrap_err();
        assert!(matches!(err, BusError::UnknownTopic(_)));
    }

    #[tokio::test]
    async fn test_same_key_same_partition_in_order() {
        let broker = Broker::new();
        broker.ensure_topics(&["t"], 5).await.unwrap();

        for i in 0..10u32 {
            broker.publish("t", "MACHINE_001", &i).await.unwrap();
        }

        let topic = broker.topic("t").await.unwrap();
        let partition = stable_hash("MACHINE_001") as usize % 5;
        let (_, records) = topic.partitions[partition].fetch(0, 100).await;
        assert_eq!(records.len(), 10);
        for (i, r) in records.iter().enumerate() {
            assert_eq!(r.payload, i.to_string());
            assert_eq!(r.offset, i as u64);
            assert_eq!(r.key, "MACHINE_001");
        }
    }

    #[tokio::test]
    async fn test_retention_trims_oldest() {
        let broker = Broker::with_retention(4);
        broker.ensure_topics(&["t"], 1).await.unwrap();

        for i in 0..10u32 {
            broker.publish("t", "k", &i).await.unwrap();
        }

        let topic = broker.topic("t").await.unwrap();
        let (start, records) = topic.partitions[0].fetch(0, 100).await;
        // Offsets 0..6 were trimmed; fetch snaps to the base offset
        assert_eq!(start, 6);
        assert_eq!(records.len(), 4);
        assert_eq!(records[0].payload, "6");
        assert_eq!(records[3].offset, 9);
    }

    #[test]
    fn test_stable_hash_is_deterministic() {
        assert_eq!(stable_hash("MACHINE_003"), stable_hash("MACHINE_003"));
        assert_ne!(stable_hash("MACHINE_003"), stable_hash("MACHINE_004"));
    }
}

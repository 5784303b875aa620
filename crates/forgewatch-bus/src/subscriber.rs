//! Consumer groups and subscription loops.
//!
//! Each subscription joins a named consumer group on one topic. The
//! group's partitions are spread round-robin over its live members, so
//! every record is handled by exactly one member (competing
//! consumption); two different groups each observe the full stream.
//!
//! Offsets commit after the handler returns, giving at-least-once
//! delivery. A handler error is logged and the record is skipped; it
//! never stops the loop.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broker::{Broker, Record};
use crate::error::BusError;
use crate::retry::{retry_with_backoff, RetryConfig};

/// Error type handlers may return. Failures are logged and skipped.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

const FETCH_BATCH: usize = 64;
const IDLE_POLL: Duration = Duration::from_millis(100);

/// Handle to a running subscriber task.
pub struct SubscriberHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SubscriberHandle {
    /// Request cancellation without waiting for the loop to exit.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Cancel and wait for the consumer loop to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }

    /// Whether the consumer loop has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Broker {
    /// Subscribe to a topic as a member of `group`. The handler is
    /// invoked for each record assigned to this member, in partition
    /// order. Returns a handle that cancels the loop when shut down.
    ///
    /// If the topic does not exist yet (subscribe racing provisioning),
    /// the task waits with bounded exponential backoff before giving up.
    pub fn subscribe<F, Fut>(&self, topic: &str, group: &str, handler: F) -> SubscriberHandle
    where
        F: FnMut(Record) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_consumer(
            self.clone(),
            topic.to_string(),
            group.to_string(),
            handler,
            cancel.clone(),
        ));
        SubscriberHandle { cancel, task }
    }
}

async fn run_consumer<F, Fut>(
    broker: Broker,
    topic_name: String,
    group_name: String,
    mut handler: F,
    cancel: CancellationToken,
) where
    F: FnMut(Record) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    // Resolve the topic, riding out a provisioning race.
    let retry = RetryConfig::default();
    let resolve = retry_with_backoff(&retry, || {
        let broker = broker.clone();
        let name = topic_name.clone();
        async move {
            broker
                .topic(&name)
                .await
                .ok_or_else(|| BusError::UnknownTopic(name.clone()))
        }
    });
    let topic = tokio::select! {
        _ = cancel.cancelled() => return,
        resolved = resolve => match resolved {
            Ok(t) => t,
            Err(e) => {
                error!(topic = %topic_name, group = %group_name, error = %e,
                    "Subscriber could not resolve topic, giving up");
                return;
            }
        },
    };

    // Join the group.
    let group = topic.group(&group_name).await;
    let member_id = {
        let mut g = group.lock().await;
        let id = g.next_member_id;
        g.next_member_id += 1;
        g.members.push(id);
        g.generation += 1;
        id
    };
    info!(topic = %topic_name, group = %group_name, member = member_id, "Subscriber joined group");

    'outer: loop {
        if cancel.is_cancelled() {
            break;
        }

        // Snapshot this member's partition assignment for the current
        // generation. Round-robin by member position.
        let (generation, my_partitions) = {
            let g = group.lock().await;
            let Some(idx) = g.members.iter().position(|m| *m == member_id) else {
                break;
            };
            let parts: Vec<usize> = (0..topic.partitions.len())
                .filter(|p| p % g.members.len() == idx)
                .collect();
            (g.generation, parts)
        };

        let mut did_work = false;
        for p in my_partitions {
            let committed = group.lock().await.committed[p];
            let (start, records) = topic.partitions[p].fetch(committed, FETCH_BATCH).await;
            if start > committed {
                warn!(
                    topic = %topic_name,
                    group = %group_name,
                    partition = p,
                    trimmed = start - committed,
                    "Retention trimmed past committed offset, records lost to this group"
                );
            }

            for record in records {
                if cancel.is_cancelled() {
                    break 'outer;
                }
                let offset = record.offset;
                if let Err(e) = handler(record).await {
                    warn!(
                        topic = %topic_name,
                        group = %group_name,
                        partition = p,
                        offset,
                        error = %e,
                        "Handler failed, skipping record"
                    );
                }
                did_work = true;

                // Commit after processing: a consumer that dies before
                // this point sees the record again (at-least-once).
                let mut g = group.lock().await;
                if g.committed[p] < offset + 1 {
                    g.committed[p] = offset + 1;
                }
                if g.generation != generation {
                    // Membership changed; the partition may now belong
                    // to someone else. Re-snapshot before continuing.
                    debug!(topic = %topic_name, group = %group_name, "Rebalance detected");
                    continue 'outer;
                }
            }
        }

        if !did_work {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = topic.publish_notify.notified() => {}
                _ = tokio::time::sleep(IDLE_POLL) => {}
            }
        }
    }

    // Leave the group so partitions rebalance onto remaining members.
    {
        let mut g = group.lock().await;
        g.members.retain(|m| *m != member_id);
        g.generation += 1;
    }
    info!(topic = %topic_name, group = %group_name, member = member_id, "Subscriber left group");
}

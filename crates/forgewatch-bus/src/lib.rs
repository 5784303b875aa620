//! Forgewatch Bus - Partitioned Event Distribution
//!
//! An in-process, partitioned, ordered append log with consumer-group
//! based competing consumption. Mirrors the broker topology the rest of
//! the pipeline is written against (topics, key-partitioning, consumer
//! groups, offsets) without requiring an external cluster:
//! - Messages sharing a partition key are observed by any single
//!   consumer in publish order; different keys may interleave.
//! - Delivery is at-least-once: offsets commit after the handler
//!   returns, so a consumer that dies mid-record sees it again.
//! - Topic provisioning is idempotent.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod broker;
pub mod error;
pub mod retry;
pub mod subscriber;

pub use broker::{Broker, Record, DEFAULT_RETENTION};
pub use error::{BusError, Result};
pub use retry::{retry_with_backoff, RetryConfig};
pub use subscriber::{HandlerError, SubscriberHandle};

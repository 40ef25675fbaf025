use async_trait::async_trait;
use std::time::Duration;

use crate::error::{MqError, MqResult};
use crate::message::ReadResult;

/// Consumer-group primitives of a log-structured broker.
///
/// The consumer engine and the producer only ever talk to the broker through
/// this trait. [`crate::RedisStreamClient`] speaks to Redis Streams;
/// [`crate::MemoryBroker`] keeps everything in process.
#[async_trait]
pub trait StreamBroker: Send + Sync {
    /// Append `key = value` to `topic`, evicting the oldest entries once the
    /// log holds more than `capacity` entries. Returns the new entry id.
    async fn append(&self, topic: &str, capacity: usize, key: &str, value: &str)
        -> MqResult<String>;

    /// Read entries never delivered to any consumer of `group`, waiting up to
    /// `block` for at least one to arrive.
    ///
    /// Delivered entries enter `consumer`'s pending list until acknowledged.
    async fn read_group_new(
        &self,
        group: &str,
        consumer: &str,
        topic: &str,
        block: Duration,
    ) -> MqResult<ReadResult>;

    /// Read entries already delivered to `consumer` but not yet acknowledged.
    /// Never blocks.
    async fn read_group_pending(
        &self,
        group: &str,
        consumer: &str,
        topic: &str,
    ) -> MqResult<ReadResult>;

    /// Acknowledge one entry. Anything other than exactly one acknowledged
    /// entry is an error.
    async fn ack(&self, topic: &str, group: &str, id: &str) -> MqResult<()>;

    /// Create `group` on `topic` reading from the start of the log, creating
    /// the topic if needed. Succeeds if the group already exists.
    async fn ensure_group(&self, topic: &str, group: &str) -> MqResult<()>;
}

/// Reject empty identifiers before any broker round trip.
pub(crate) fn require_non_empty(op: &str, fields: &[(&str, &str)]) -> MqResult<()> {
    let missing: Vec<&str> = fields
        .iter()
        .filter(|(_, value)| value.is_empty())
        .map(|(name, _)| *name)
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(MqError::InvalidArgument(format!(
            "{} {} can't be empty",
            op,
            missing.join(" | ")
        )))
    }
}

//! Dead-letter mailboxes
//!
//! Messages whose handler failed `max_retry_limit` times are handed to a
//! mailbox and then acknowledged. Mailbox errors are logged by the consumer and
//! never stop the acknowledgement.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info};

use crate::broker::StreamBroker;
use crate::error::MqResult;
use crate::handler::DispatchContext;
use crate::message::Message;
use crate::options::DEFAULT_MSG_QUEUE_LEN;

/// Terminal destination for messages that exhausted their retries.
#[async_trait]
pub trait DeadLetterMailbox: Send + Sync {
    async fn deliver(&self, ctx: &DispatchContext, msg: &Message) -> MqResult<()>;
}

/// Default mailbox: records the event in the log and always succeeds.
#[derive(Debug, Default, Clone)]
pub struct DeadLetterLogger;

impl DeadLetterLogger {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DeadLetterMailbox for DeadLetterLogger {
    async fn deliver(&self, ctx: &DispatchContext, msg: &Message) -> MqResult<()> {
        error!(
            msg_id = %msg.id,
            key = %msg.key,
            failures = ctx.previous_failures(),
            "msg fail exceeded retry limit"
        );
        Ok(())
    }
}

/// Re-publishes dead letters to another topic, e.g. `orders.dlq`.
pub struct StreamDeadLetterMailbox {
    broker: Arc<dyn StreamBroker>,
    topic: String,
    capacity: usize,
}

impl StreamDeadLetterMailbox {
    pub fn new(broker: Arc<dyn StreamBroker>, topic: impl Into<String>) -> Self {
        Self {
            broker,
            topic: topic.into(),
            capacity: DEFAULT_MSG_QUEUE_LEN,
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

#[async_trait]
impl DeadLetterMailbox for StreamDeadLetterMailbox {
    async fn deliver(&self, ctx: &DispatchContext, msg: &Message) -> MqResult<()> {
        let dead_letter_id = self
            .broker
            .append(&self.topic, self.capacity, &msg.key, &msg.value)
            .await?;

        info!(
            msg_id = %msg.id,
            dead_letter_topic = %self.topic,
            dead_letter_id = %dead_letter_id,
            failures = ctx.previous_failures(),
            "Message moved to dead letter topic"
        );
        Ok(())
    }
}

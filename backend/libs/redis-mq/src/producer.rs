use std::sync::Arc;
use tracing::debug;

use crate::broker::StreamBroker;
use crate::error::MqResult;
use crate::options::ProducerOptions;

/// Appends messages to topics, evicting the oldest entries once a topic
/// exceeds `msg_queue_len`.
#[derive(Clone)]
pub struct Producer {
    broker: Arc<dyn StreamBroker>,
    options: ProducerOptions,
}

impl Producer {
    pub fn new(broker: Arc<dyn StreamBroker>, mut options: ProducerOptions) -> Self {
        options.repair();
        Self { broker, options }
    }

    /// Append one key/value message and return the id the broker assigned.
    pub async fn send_msg(&self, topic: &str, key: &str, value: &str) -> MqResult<String> {
        let id = self
            .broker
            .append(topic, self.options.msg_queue_len, key, value)
            .await?;
        debug!(topic = %topic, msg_id = %id, "Message appended");
        Ok(id)
    }

    pub fn options(&self) -> &ProducerOptions {
        &self.options
    }
}

//! Consumer engine
//!
//! Each consumer owns one background task that loops over five phases until
//! stopped:
//!
//! 1. read new entries for the group (blocking up to `receive_timeout`)
//! 2. dispatch them to the handler, acking successes
//! 3. dead-letter and ack messages whose failure count reached `max_retry_limit`
//! 4. read this consumer's pending (delivered, unacked) entries
//! 5. dispatch those the same way
//!
//! A failed read abandons the rest of the iteration and the loop starts over
//! at phase 1 right away.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, warn};

use crate::broker::StreamBroker;
use crate::error::{MqError, MqResult};
use crate::handler::{DispatchContext, MessageHandler};
use crate::message::Message;
use crate::metrics::ConsumerMetrics;
use crate::options::ConsumerOptions;
use crate::retry::RetryTracker;

/// Builder for [`Consumer`]. Every field except `options` is required.
#[derive(Default)]
pub struct ConsumerBuilder {
    broker: Option<Arc<dyn StreamBroker>>,
    handler: Option<Arc<dyn MessageHandler>>,
    topic: String,
    group_id: String,
    consumer_id: String,
    options: ConsumerOptions,
}

impl ConsumerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn broker(mut self, broker: Arc<dyn StreamBroker>) -> Self {
        self.broker = Some(broker);
        self
    }

    pub fn handler<H: MessageHandler + 'static>(mut self, handler: H) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Use a handler that is shared with other consumers.
    pub fn shared_handler(mut self, handler: Arc<dyn MessageHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    pub fn group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = group_id.into();
        self
    }

    pub fn consumer_id(mut self, consumer_id: impl Into<String>) -> Self {
        self.consumer_id = consumer_id.into();
        self
    }

    pub fn options(mut self, options: ConsumerOptions) -> Self {
        self.options = options;
        self
    }

    /// Validate and spawn the consumer loop on the current tokio runtime.
    pub fn start(self) -> MqResult<Consumer> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            MqError::Configuration(format!("consumer must start inside a tokio runtime: {}", e))
        })?;
        let engine = self.build_engine()?;
        let topic = engine.topic.clone();
        let group_id = engine.group_id.clone();
        let consumer_id = engine.consumer_id.clone();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = runtime.spawn(engine.run(shutdown_rx));

        Ok(Consumer {
            topic,
            group_id,
            consumer_id,
            shutdown_tx,
            handle: Some(handle),
        })
    }

    pub(crate) fn build_engine(self) -> MqResult<ConsumerEngine> {
        let handler = self.handler.ok_or_else(|| {
            MqError::Configuration("callback function can't be empty".to_string())
        })?;
        let broker = self
            .broker
            .ok_or_else(|| MqError::Configuration("broker client can't be empty".to_string()))?;
        if self.topic.is_empty() || self.group_id.is_empty() || self.consumer_id.is_empty() {
            return Err(MqError::Configuration(
                "topic | group_id | consumer_id can't be empty".to_string(),
            ));
        }

        let mut options = self.options;
        options.repair();

        Ok(ConsumerEngine {
            metrics: ConsumerMetrics::new(&self.topic, &self.group_id, &self.consumer_id),
            broker,
            handler,
            topic: self.topic,
            group_id: self.group_id,
            consumer_id: self.consumer_id,
            options,
            failures: RetryTracker::new(),
        })
    }
}

/// Handle to a running consumer.
///
/// Stopping is one-way. The loop notices the signal at the start of its next
/// iteration; work already in progress (including a blocking read) finishes
/// first. Dropping the handle stops the consumer as well.
pub struct Consumer {
    topic: String,
    group_id: String,
    consumer_id: String,
    shutdown_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl Consumer {
    pub fn builder() -> ConsumerBuilder {
        ConsumerBuilder::new()
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn consumer_id(&self) -> &str {
        &self.consumer_id
    }

    pub fn stop(&self) {
        self.shutdown_tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Stop and wait for the loop to exit.
    pub async fn stop_and_wait(mut self) -> MqResult<()> {
        self.stop();
        if let Some(handle) = self.handle.take() {
            handle
                .await
                .map_err(|e| MqError::Other(anyhow::anyhow!("consumer task failed: {}", e)))?;
        }
        Ok(())
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
    }
}

pub(crate) struct ConsumerEngine {
    broker: Arc<dyn StreamBroker>,
    handler: Arc<dyn MessageHandler>,
    topic: String,
    group_id: String,
    consumer_id: String,
    options: ConsumerOptions,
    failures: RetryTracker,
    metrics: ConsumerMetrics,
}

impl ConsumerEngine {
    async fn run(mut self, shutdown: watch::Receiver<bool>) {
        info!(
            topic = %self.topic,
            group = %self.group_id,
            consumer = %self.consumer_id,
            receive_timeout_ms = self.options.receive_timeout.as_millis() as u64,
            max_retry_limit = self.options.max_retry_limit,
            "Consumer starting"
        );

        if self.options.create_group {
            if let Err(e) = self.broker.ensure_group(&self.topic, &self.group_id).await {
                warn!(topic = %self.topic, group = %self.group_id, error = %e, "Failed to create consumer group");
            }
        }

        loop {
            let stopped = *shutdown.borrow();
            // A dropped sender counts as a stop signal too.
            if stopped || shutdown.has_changed().is_err() {
                break;
            }
            self.run_once().await;
        }

        info!(
            topic = %self.topic,
            group = %self.group_id,
            consumer = %self.consumer_id,
            tracked_failures = self.failures.len(),
            "Consumer stopped"
        );
    }

    /// One pass over all five phases.
    pub(crate) async fn run_once(&mut self) {
        let msgs = match self.receive().await {
            Ok(msgs) => msgs,
            Err(e) => {
                self.metrics.receive_errors.inc();
                error!(topic = %self.topic, consumer = %self.consumer_id, error = %e, "receive msg failed");
                return;
            }
        };
        self.handle_msgs(msgs).await;

        self.deliver_dead_letters().await;

        let pending = match self.receive_pending().await {
            Ok(msgs) => msgs,
            Err(e) => {
                self.metrics.receive_errors.inc();
                error!(topic = %self.topic, consumer = %self.consumer_id, error = %e, "pending msg receive failed");
                return;
            }
        };
        self.handle_msgs(pending).await;
    }

    async fn receive(&self) -> MqResult<Vec<Message>> {
        let reply = self
            .broker
            .read_group_new(
                &self.group_id,
                &self.consumer_id,
                &self.topic,
                self.options.receive_timeout,
            )
            .await?;
        Ok(reply.into_messages())
    }

    async fn receive_pending(&self) -> MqResult<Vec<Message>> {
        let limit = self.options.receive_timeout;
        let read = self
            .broker
            .read_group_pending(&self.group_id, &self.consumer_id, &self.topic);

        match timeout(limit, read).await {
            Ok(reply) => Ok(reply?.into_messages()),
            Err(_) => Err(MqError::Timeout(limit)),
        }
    }

    async fn handle_msgs(&mut self, msgs: Vec<Message>) {
        if msgs.is_empty() {
            return;
        }

        let deadline = Instant::now() + self.options.handle_msgs_timeout;
        debug!(topic = %self.topic, count = msgs.len(), "Dispatching batch");

        for msg in msgs {
            let ctx = DispatchContext::new(deadline)
                .with_previous_failures(self.failures.failures(&msg));

            if let Err(e) = self.handler.handle(ctx, msg.clone()).await {
                let failures = self.failures.record_failure(&msg);
                self.metrics.handler_failures.inc();
                warn!(
                    topic = %self.topic,
                    msg_id = %msg.id,
                    failures,
                    error = ?e,
                    "msg handle failed"
                );
                continue;
            }

            if let Err(e) = self.ack(&msg).await {
                self.metrics.ack_failures.inc();
                error!(topic = %self.topic, msg_id = %msg.id, error = %e, "msg ack failed");
                continue;
            }

            self.failures.clear(&msg);
            self.metrics.acked.inc();
        }

        self.metrics.retry_tracked.set(self.failures.len() as i64);
    }

    async fn deliver_dead_letters(&mut self) {
        let exhausted = self.failures.exhausted(self.options.max_retry_limit);
        if exhausted.is_empty() {
            return;
        }

        let deadline = Instant::now() + self.options.dead_letter_deliver_timeout;

        for (msg, failures) in exhausted {
            let ctx = DispatchContext::new(deadline).with_previous_failures(failures);
            if let Err(e) = self.options.dead_letter_mailbox.deliver(&ctx, &msg).await {
                error!(topic = %self.topic, msg_id = %msg.id, error = %e, "dead letter deliver failed");
            }
            self.metrics.dead_letters.inc();

            // Acked whether or not the mailbox accepted it. If the ack fails the
            // message stays tracked and is delivered again on the next flush.
            if let Err(e) = self.ack(&msg).await {
                self.metrics.ack_failures.inc();
                error!(topic = %self.topic, msg_id = %msg.id, error = %e, "dead letter ack failed");
                continue;
            }

            self.failures.clear(&msg);
        }

        self.metrics.retry_tracked.set(self.failures.len() as i64);
    }

    /// The phase deadline is advisory and never cuts an ack short; the broker
    /// client's own response timeout bounds it.
    async fn ack(&self, msg: &Message) -> MqResult<()> {
        self.broker.ack(&self.topic, &self.group_id, &msg.id).await
    }

    #[cfg(test)]
    pub(crate) fn failures(&self) -> &RetryTracker {
        &self.failures
    }
}

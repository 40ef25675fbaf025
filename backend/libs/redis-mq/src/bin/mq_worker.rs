//! Command-line producer / consumer for a Redis Streams topic.
//!
//! `MQ_MODE=produce` appends one message per stdin line (`key value...`).
//! `MQ_MODE=consume` (the default) logs every message of `MQ_TOPIC` for
//! group `MQ_GROUP` until Ctrl-C.

use anyhow::{bail, Context, Result};
use redis_mq::{
    Consumer, ConsumerOptions, DispatchContext, Message, Producer, ProducerOptions,
    RedisStreamClient, StreamBroker,
};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "redis_mq=info,mq_worker=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();

    let topic = std::env::var("MQ_TOPIC").context("MQ_TOPIC must be set")?;
    let mode = std::env::var("MQ_MODE").unwrap_or_else(|_| "consume".to_string());

    let client = RedisStreamClient::from_env().context("Failed to configure Redis client")?;
    info!(topic = %topic, mode = %mode, pool = ?client.pool().config(), "Starting mq-worker");
    let broker: Arc<dyn StreamBroker> = Arc::new(client);

    match mode.as_str() {
        "produce" => produce(broker, &topic).await,
        "consume" => consume(broker, topic).await,
        other => bail!("unknown MQ_MODE '{}', expected produce or consume", other),
    }
}

async fn produce(broker: Arc<dyn StreamBroker>, topic: &str) -> Result<()> {
    let producer = Producer::new(broker, ProducerOptions::from_env());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut sent = 0usize;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (key, value) = line.split_once(' ').unwrap_or((line, ""));
        let id = producer
            .send_msg(topic, key, value)
            .await
            .with_context(|| format!("Failed to send message with key {}", key))?;
        info!(topic = %topic, msg_id = %id, key = %key, "Message sent");
        sent += 1;
    }

    info!(topic = %topic, sent, "Producer finished");
    Ok(())
}

async fn consume(broker: Arc<dyn StreamBroker>, topic: String) -> Result<()> {
    let group = std::env::var("MQ_GROUP").unwrap_or_else(|_| "mq-worker".to_string());
    let consumer_id = std::env::var("MQ_CONSUMER_ID")
        .unwrap_or_else(|_| format!("instance-{}", uuid::Uuid::new_v4()));

    let consumer = Consumer::builder()
        .broker(broker)
        .topic(topic)
        .group_id(group)
        .consumer_id(consumer_id)
        .options(ConsumerOptions::from_env())
        .handler(|ctx: DispatchContext, msg: Message| async move {
            if ctx.previous_failures() > 0 {
                warn!(msg_id = %msg.id, failures = ctx.previous_failures(), "Redelivered message");
            }
            info!(msg_id = %msg.id, key = %msg.key, value = %msg.value, "Message received");
            Ok::<(), anyhow::Error>(())
        })
        .start()?;

    info!(
        topic = %consumer.topic(),
        group = %consumer.group_id(),
        consumer = %consumer.consumer_id(),
        "Consumer running, press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    consumer.stop_and_wait().await?;
    Ok(())
}

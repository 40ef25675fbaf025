//! Integration tests against a real Redis server
//!
//! These tests verify:
//! 1. XADD / XREADGROUP round trip through the connection pool
//! 2. Pending entries survive until XACK and a second XACK is rejected
//! 3. Stream capacity trimming
//! 4. The full consumer flow including dead-lettering
//!
//! Prerequisites:
//! - Redis 6+ running locally or via Docker
//! - Environment variable: REDIS_URL
//!
//! Run tests:
//! ```bash
//! export REDIS_URL="redis://127.0.0.1:6379"
//! cargo test --package redis-mq --test redis_integration_test -- --ignored --nocapture
//! ```
//!
//! Start test server:
//! ```bash
//! docker run --name redis-test -p 6379:6379 -d redis:7
//! ```

use redis_mq::{
    Consumer, ConsumerOptions, DispatchContext, Message, MqError, PoolConfig, Producer,
    ProducerOptions, RedisStreamClient, StreamBroker, StreamDeadLetterMailbox,
};
use std::env;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

fn get_redis_url() -> String {
    env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

fn create_client() -> Arc<RedisStreamClient> {
    Arc::new(
        RedisStreamClient::new(PoolConfig::new(get_redis_url()))
            .expect("Failed to create Redis client"),
    )
}

/// Unique topic per test run so leftovers from earlier runs don't interfere.
fn test_topic(name: &str) -> String {
    format!("test-mq-{}-{}", name, uuid::Uuid::new_v4())
}

async fn cleanup_topic(topic: &str) {
    let client = redis::Client::open(get_redis_url()).expect("valid redis url");
    let mut conn = client
        .get_multiplexed_async_connection()
        .await
        .expect("Failed to connect to Redis");
    let _: i64 = redis::cmd("DEL")
        .arg(topic)
        .query_async(&mut conn)
        .await
        .expect("Failed to delete test stream");
}

#[ignore = "Requires Redis"]
#[tokio::test]
async fn test_append_read_ack_round_trip() {
    let client = create_client();
    let topic = test_topic("round-trip");
    client.ensure_group(&topic, "g1").await.unwrap();
    // second call hits BUSYGROUP and still succeeds
    client.ensure_group(&topic, "g1").await.unwrap();

    let id = client.append(&topic, 100, "order", "42").await.unwrap();

    let msgs = client
        .read_group_new("g1", "c1", &topic, Duration::from_millis(500))
        .await
        .unwrap()
        .into_messages();
    assert_eq!(msgs, vec![Message::new(id.clone(), "order", "42")]);

    // delivered but unacked
    let pending = client
        .read_group_pending("g1", "c1", &topic)
        .await
        .unwrap()
        .into_messages();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, id);

    client.ack(&topic, "g1", &id).await.unwrap();
    let err = client.ack(&topic, "g1", &id).await.unwrap_err();
    assert!(matches!(err, MqError::UnexpectedAckCount(0)));

    assert!(client
        .read_group_pending("g1", "c1", &topic)
        .await
        .unwrap()
        .is_empty());

    cleanup_topic(&topic).await;
}

#[ignore = "Requires Redis"]
#[tokio::test]
async fn test_read_new_times_out_with_no_message() {
    let client = create_client();
    let topic = test_topic("idle");
    client.ensure_group(&topic, "g1").await.unwrap();

    let started = std::time::Instant::now();
    let reply = client
        .read_group_new("g1", "c1", &topic, Duration::from_millis(200))
        .await
        .unwrap();
    assert!(reply.is_empty());
    assert!(started.elapsed() >= Duration::from_millis(150));

    cleanup_topic(&topic).await;
}

#[ignore = "Requires Redis"]
#[tokio::test]
async fn test_producer_trims_to_capacity() {
    let client = create_client();
    let topic = test_topic("trim");
    let producer = Producer::new(client.clone(), ProducerOptions::default().with_msg_queue_len(3));

    for i in 0..10 {
        producer.send_msg(&topic, "k", &i.to_string()).await.unwrap();
    }

    let client_conn = redis::Client::open(get_redis_url()).unwrap();
    let mut conn = client_conn.get_multiplexed_async_connection().await.unwrap();
    let len: i64 = redis::cmd("XLEN")
        .arg(&topic)
        .query_async(&mut conn)
        .await
        .unwrap();
    // MAXLEN without ~ trims exactly
    assert_eq!(len, 3);

    cleanup_topic(&topic).await;
}

#[ignore = "Requires Redis"]
#[tokio::test]
async fn test_consumer_flow_with_dead_letter_topic() {
    let client = create_client();
    let topic = test_topic("flow");
    let dlq = format!("{}.dlq", topic);
    let handled = Arc::new(Mutex::new(Vec::new()));

    let recorder = handled.clone();
    let consumer = Consumer::builder()
        .broker(client.clone())
        .topic(topic.clone())
        .group_id("billing")
        .consumer_id("billing-1")
        .options(
            ConsumerOptions::default()
                .with_receive_timeout(Duration::from_millis(100))
                .with_max_retry_limit(2)
                .with_dead_letter_mailbox(Arc::new(StreamDeadLetterMailbox::new(
                    client.clone(),
                    dlq.clone(),
                ))),
        )
        .handler(move |_ctx: DispatchContext, msg: Message| {
            let recorder = recorder.clone();
            async move {
                if msg.value == "poison" {
                    anyhow::bail!("cannot process {}", msg.id);
                }
                recorder.lock().unwrap().push(msg.value);
                Ok(())
            }
        })
        .start()
        .unwrap();

    let producer = Producer::new(client.clone(), ProducerOptions::default());
    producer.send_msg(&topic, "k", "ok-1").await.unwrap();
    producer.send_msg(&topic, "k", "poison").await.unwrap();
    producer.send_msg(&topic, "k", "ok-2").await.unwrap();

    // poll for the dead letter
    client.ensure_group(&dlq, "ops").await.unwrap();
    let mut dead = Vec::new();
    for _ in 0..50 {
        dead = client
            .read_group_new("ops", "inspector", &dlq, Duration::from_millis(100))
            .await
            .unwrap()
            .into_messages();
        if !dead.is_empty() {
            break;
        }
    }
    sleep(Duration::from_millis(300)).await;
    consumer.stop_and_wait().await.unwrap();

    assert_eq!(*handled.lock().unwrap(), vec!["ok-1", "ok-2"]);
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].value, "poison");
    assert!(client
        .read_group_pending("billing", "billing-1", &topic)
        .await
        .unwrap()
        .is_empty());

    cleanup_topic(&topic).await;
    cleanup_topic(&dlq).await;
}

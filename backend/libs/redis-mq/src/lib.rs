//! # Redis Streams Message Queue
//!
//! At-least-once messaging on top of Redis Streams consumer groups, with
//! bounded retries and a dead-letter mailbox for messages that keep failing.
//!
//! ## Delivery Model
//!
//! - A [`Producer`] appends key/value messages to a topic (one stream per
//!   topic), trimming the stream to a fixed capacity.
//! - A [`Consumer`] belongs to a group. Each new entry goes to exactly one
//!   consumer of the group and stays *pending* for that consumer until it is
//!   acknowledged.
//! - A message is acknowledged only after the handler returns `Ok`. Failed
//!   messages stay pending and are re-dispatched from the pending list.
//! - Once a message has failed `max_retry_limit` times it is handed to the
//!   [`DeadLetterMailbox`] and acknowledged, whether or not the mailbox
//!   accepted it.
//!
//! Retry counts live in the consumer's memory. A restarted consumer redelivers
//! its pending entries with a fresh count.
//!
//! ## Architecture
//!
//! ```text
//!  Producer ──XADD──▶ ┌──────────────┐ ◀──XREADGROUP── Consumer loop
//!                     │ StreamBroker │ ◀──XACK─────────   │
//!                     └──────────────┘                    ├─▶ MessageHandler
//!                    (Redis / Memory)                     ├─▶ RetryTracker
//!                                                         └─▶ DeadLetterMailbox
//! ```
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use redis_mq::{
//!     Consumer, ConsumerOptions, DispatchContext, Message, PoolConfig, Producer,
//!     ProducerOptions, RedisStreamClient, StreamBroker,
//! };
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let broker: Arc<dyn StreamBroker> =
//!         Arc::new(RedisStreamClient::new(PoolConfig::new("redis://127.0.0.1:6379"))?);
//!
//!     let producer = Producer::new(broker.clone(), ProducerOptions::default());
//!     producer.send_msg("orders", "order_id", "42").await?;
//!
//!     let consumer = Consumer::builder()
//!         .broker(broker)
//!         .topic("orders")
//!         .group_id("billing")
//!         .consumer_id("billing-1")
//!         .options(
//!             ConsumerOptions::default()
//!                 .with_receive_timeout(Duration::from_secs(2))
//!                 .with_max_retry_limit(3),
//!         )
//!         .handler(|_ctx: DispatchContext, msg: Message| async move {
//!             println!("{} {}={}", msg.id, msg.key, msg.value);
//!             Ok::<(), anyhow::Error>(())
//!         })
//!         .start()?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     consumer.stop_and_wait().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Testing Without Redis
//!
//! [`MemoryBroker`] implements the same consumer-group semantics in process:
//!
//! ```rust,no_run
//! use redis_mq::{MemoryBroker, Producer, ProducerOptions};
//! use std::sync::Arc;
//!
//! # async fn demo() -> redis_mq::MqResult<()> {
//! let broker = Arc::new(MemoryBroker::new());
//! let producer = Producer::new(broker.clone(), ProducerOptions::default());
//! producer.send_msg("orders", "k", "v").await?;
//! assert_eq!(broker.len("orders"), 1);
//! # Ok(())
//! # }
//! ```

mod env;
mod reply;

pub mod broker;
pub mod client;
pub mod consumer;
pub mod dead_letter;
pub mod error;
pub mod handler;
pub mod memory;
pub mod message;
pub mod metrics;
pub mod options;
pub mod pool;
pub mod producer;
pub mod retry;

pub use broker::StreamBroker;
pub use client::RedisStreamClient;
pub use consumer::{Consumer, ConsumerBuilder};
pub use dead_letter::{DeadLetterLogger, DeadLetterMailbox, StreamDeadLetterMailbox};
pub use error::{MqError, MqResult};
pub use handler::{DispatchContext, MessageHandler};
pub use memory::MemoryBroker;
pub use message::{Message, ReadResult};
pub use metrics::ConsumerMetrics;
pub use options::{ConsumerOptions, ProducerOptions};
pub use pool::{ConnectionPool, PoolConfig, PooledConnection};
pub use producer::Producer;
pub use retry::RetryTracker;

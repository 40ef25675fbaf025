use async_trait::async_trait;
use redis::{Cmd, FromRedisValue, Value};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::broker::{require_non_empty, StreamBroker};
use crate::error::{MqError, MqResult};
use crate::message::ReadResult;
use crate::pool::{ConnectionPool, PoolConfig};
use crate::reply::parse_read_group_reply;

/// Redis Streams implementation of [`StreamBroker`].
///
/// Every operation checks a connection out of the pool, runs one command
/// under the response timeout and hands the connection back.
pub struct RedisStreamClient {
    pool: ConnectionPool,
}

impl RedisStreamClient {
    pub fn new(config: PoolConfig) -> MqResult<Self> {
        Ok(Self {
            pool: ConnectionPool::new(config)?,
        })
    }

    /// Build a client from `REDIS_*` environment variables.
    pub fn from_env() -> MqResult<Self> {
        Self::new(PoolConfig::from_env())
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    async fn execute<T: FromRedisValue>(&self, cmd: &Cmd, limit: Duration) -> MqResult<T> {
        let mut conn = self.pool.get().await?;

        match timeout(limit, cmd.query_async::<_, T>(&mut *conn)).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(err)) => {
                if err.kind() == redis::ErrorKind::IoError || err.is_connection_dropped() {
                    conn.mark_broken();
                }
                Err(err.into())
            }
            Err(_) => {
                // The reply may still arrive on this connection; don't reuse it.
                conn.mark_broken();
                Err(MqError::Timeout(limit))
            }
        }
    }
}

#[async_trait]
impl StreamBroker for RedisStreamClient {
    async fn append(
        &self,
        topic: &str,
        capacity: usize,
        key: &str,
        value: &str,
    ) -> MqResult<String> {
        require_non_empty("XADD", &[("topic", topic)])?;

        let mut cmd = redis::cmd("XADD");
        cmd.arg(topic).arg("MAXLEN").arg(capacity).arg("*").arg(key).arg(value);

        let id: String = self.execute(&cmd, self.pool.config().response_timeout).await?;
        debug!(topic = %topic, msg_id = %id, "Appended stream entry");
        Ok(id)
    }

    async fn read_group_new(
        &self,
        group: &str,
        consumer: &str,
        topic: &str,
        block: Duration,
    ) -> MqResult<ReadResult> {
        require_non_empty(
            "XREADGROUP",
            &[("group_id", group), ("consumer_id", consumer), ("topic", topic)],
        )?;

        let block_ms = u64::try_from(block.as_millis()).unwrap_or(u64::MAX);
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(group)
            .arg(consumer)
            .arg("BLOCK")
            .arg(block_ms)
            .arg("STREAMS")
            .arg(topic)
            .arg(">");

        let limit = self.pool.config().response_timeout + block;
        let reply: Value = self.execute(&cmd, limit).await?;
        parse_read_group_reply(reply)
    }

    async fn read_group_pending(
        &self,
        group: &str,
        consumer: &str,
        topic: &str,
    ) -> MqResult<ReadResult> {
        require_non_empty(
            "XREADGROUP",
            &[("group_id", group), ("consumer_id", consumer), ("topic", topic)],
        )?;

        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(group)
            .arg(consumer)
            .arg("STREAMS")
            .arg(topic)
            .arg("0-0");

        let reply: Value = self
            .execute(&cmd, self.pool.config().response_timeout)
            .await?;
        parse_read_group_reply(reply)
    }

    async fn ack(&self, topic: &str, group: &str, id: &str) -> MqResult<()> {
        require_non_empty("XACK", &[("topic", topic), ("group_id", group), ("msg_id", id)])?;

        let mut cmd = redis::cmd("XACK");
        cmd.arg(topic).arg(group).arg(id);

        let acked: i64 = self.execute(&cmd, self.pool.config().response_timeout).await?;
        if acked != 1 {
            return Err(MqError::UnexpectedAckCount(acked));
        }
        Ok(())
    }

    async fn ensure_group(&self, topic: &str, group: &str) -> MqResult<()> {
        require_non_empty("XGROUP", &[("topic", topic), ("group_id", group)])?;

        let mut cmd = redis::cmd("XGROUP");
        cmd.arg("CREATE").arg(topic).arg(group).arg("0").arg("MKSTREAM");

        match self
            .execute::<()>(&cmd, self.pool.config().response_timeout)
            .await
        {
            Ok(()) => {
                info!(topic = %topic, group = %group, "Created consumer group");
                Ok(())
            }
            Err(MqError::Redis(err)) if err.code() == Some("BUSYGROUP") => Ok(()),
            Err(err) => Err(err),
        }
    }
}

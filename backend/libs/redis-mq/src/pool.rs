//! Redis connection pool
//!
//! Connections are acquired per broker operation and handed back on drop.
//! Blocking stream reads hold their connection for the whole block window,
//! so connections are never shared between in-flight commands.

use redis::aio::MultiplexedConnection;
use redis::Client;
use std::collections::VecDeque;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{Semaphore, SemaphorePermit};
use tokio::time::{timeout, Instant};
use tracing::debug;

use crate::env::{duration_ms_from_env, parse_env_with_default};
use crate::error::{MqError, MqResult};

/// Default number of idle connections kept around
pub const DEFAULT_MAX_IDLE: usize = 20;
/// Default lifetime of an idle connection
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10);
/// Default cap on concurrently checked-out connections
pub const DEFAULT_MAX_ACTIVE: usize = 100;

/// Redis connection pool configuration
#[derive(Clone)]
pub struct PoolConfig {
    /// Redis URL, e.g. `redis://:password@127.0.0.1:6379/0`
    pub url: String,
    /// Idle connections retained for reuse
    pub max_idle: usize,
    /// Idle connections older than this are discarded (zero = never)
    pub idle_timeout: Duration,
    /// Connections checked out at once (zero = unbounded)
    pub max_active: usize,
    /// Wait for a free slot instead of failing with `PoolExhausted`
    pub wait: bool,
    /// PING idle connections before handing them out
    pub test_on_borrow: bool,
    /// Dial timeout for new connections
    pub connect_timeout: Duration,
    /// Per-command response timeout (blocking reads add their block window)
    pub response_timeout: Duration,
}

impl fmt::Debug for PoolConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolConfig")
            .field("url", &"[REDACTED]")
            .field("max_idle", &self.max_idle)
            .field("idle_timeout", &self.idle_timeout)
            .field("max_active", &self.max_active)
            .field("wait", &self.wait)
            .field("test_on_borrow", &self.test_on_borrow)
            .field("connect_timeout", &self.connect_timeout)
            .field("response_timeout", &self.response_timeout)
            .finish()
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            max_idle: DEFAULT_MAX_IDLE,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            max_active: DEFAULT_MAX_ACTIVE,
            wait: false,
            test_on_borrow: true,
            connect_timeout: Duration::from_secs(3),
            response_timeout: Duration::from_secs(3),
        }
    }
}

impl PoolConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Load configuration from `REDIS_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            url: std::env::var("REDIS_URL").unwrap_or(defaults.url),
            max_idle: parse_env_with_default("REDIS_MAX_IDLE", defaults.max_idle),
            idle_timeout: Duration::from_secs(parse_env_with_default(
                "REDIS_IDLE_TIMEOUT_SECS",
                defaults.idle_timeout.as_secs(),
            )),
            max_active: parse_env_with_default("REDIS_MAX_ACTIVE", defaults.max_active),
            wait: parse_env_with_default("REDIS_POOL_WAIT", defaults.wait),
            test_on_borrow: parse_env_with_default(
                "REDIS_TEST_ON_BORROW",
                defaults.test_on_borrow,
            ),
            connect_timeout: duration_ms_from_env(
                "REDIS_CONNECT_TIMEOUT_MS",
                defaults.connect_timeout,
            ),
            response_timeout: duration_ms_from_env(
                "REDIS_RESPONSE_TIMEOUT_MS",
                defaults.response_timeout,
            ),
        }
    }

    pub fn with_max_idle(mut self, max_idle: usize) -> Self {
        self.max_idle = max_idle;
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_max_active(mut self, max_active: usize) -> Self {
        self.max_active = max_active;
        self
    }

    pub fn with_wait_mode(mut self) -> Self {
        self.wait = true;
        self
    }

    pub fn with_response_timeout(mut self, response_timeout: Duration) -> Self {
        self.response_timeout = response_timeout;
        self
    }
}

struct IdleConnection {
    conn: MultiplexedConnection,
    idle_since: Instant,
}

/// Bounded pool of Redis connections.
pub struct ConnectionPool {
    client: Client,
    config: PoolConfig,
    idle: Mutex<VecDeque<IdleConnection>>,
    active: Option<Semaphore>,
}

impl ConnectionPool {
    /// Parse the URL and set up the pool. No connection is dialed until the
    /// first [`ConnectionPool::get`].
    pub fn new(config: PoolConfig) -> MqResult<Self> {
        let client = Client::open(config.url.as_str())?;
        let active = (config.max_active > 0).then(|| Semaphore::new(config.max_active));

        Ok(Self {
            client,
            config,
            idle: Mutex::new(VecDeque::new()),
            active,
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Number of connections currently parked in the idle list.
    pub fn idle_count(&self) -> usize {
        self.idle_list().len()
    }

    /// Check out a connection, reusing an idle one when possible.
    pub async fn get(&self) -> MqResult<PooledConnection<'_>> {
        let permit = match &self.active {
            None => None,
            Some(slots) if self.config.wait => {
                Some(slots.acquire().await.map_err(|_| MqError::PoolExhausted)?)
            }
            Some(slots) => Some(slots.try_acquire().map_err(|_| MqError::PoolExhausted)?),
        };

        while let Some(mut idle) = self.take_idle() {
            if self.config.test_on_borrow {
                let ping = timeout(
                    self.config.response_timeout,
                    redis::cmd("PING").query_async::<_, String>(&mut idle.conn),
                )
                .await;
                if !matches!(ping, Ok(Ok(_))) {
                    debug!("Discarding idle Redis connection that failed PING");
                    continue;
                }
            }

            return Ok(PooledConnection {
                pool: self,
                conn: idle.conn,
                broken: false,
                _permit: permit,
            });
        }

        let conn = self.dial().await?;
        Ok(PooledConnection {
            pool: self,
            conn,
            broken: false,
            _permit: permit,
        })
    }

    async fn dial(&self) -> MqResult<MultiplexedConnection> {
        match timeout(
            self.config.connect_timeout,
            self.client.get_multiplexed_async_connection(),
        )
        .await
        {
            Ok(conn) => Ok(conn?),
            Err(_) => Err(MqError::Timeout(self.config.connect_timeout)),
        }
    }

    /// Most recently returned connection first; expired ones are dropped.
    fn take_idle(&self) -> Option<IdleConnection> {
        let mut idle = self.idle_list();
        if !self.config.idle_timeout.is_zero() {
            let idle_timeout = self.config.idle_timeout;
            idle.retain(|c| c.idle_since.elapsed() <= idle_timeout);
        }
        idle.pop_back()
    }

    fn give_back(&self, conn: MultiplexedConnection) {
        let mut idle = self.idle_list();
        if idle.len() < self.config.max_idle {
            idle.push_back(IdleConnection {
                conn,
                idle_since: Instant::now(),
            });
        }
    }

    fn idle_list(&self) -> MutexGuard<'_, VecDeque<IdleConnection>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A checked-out connection. Returned to the idle list on drop unless it was
/// marked broken.
pub struct PooledConnection<'a> {
    pool: &'a ConnectionPool,
    conn: MultiplexedConnection,
    broken: bool,
    _permit: Option<SemaphorePermit<'a>>,
}

impl PooledConnection<'_> {
    /// Keep this connection out of the idle list (I/O error, abandoned reply).
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }
}

impl Deref for PooledConnection<'_> {
    type Target = MultiplexedConnection;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl DerefMut for PooledConnection<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if !self.broken {
            self.pool.give_back(self.conn.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_debug_redacts_url() {
        let config = PoolConfig::new("redis://:hunter2@cache:6379");
        let rendered = format!("{:?}", config);
        assert!(rendered.contains("[REDACTED]"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    #[serial]
    fn test_from_env() {
        std::env::set_var("REDIS_URL", "redis://cache:6380");
        std::env::set_var("REDIS_MAX_ACTIVE", "7");
        std::env::set_var("REDIS_POOL_WAIT", "true");
        std::env::set_var("REDIS_RESPONSE_TIMEOUT_MS", "-1");

        let config = PoolConfig::from_env();
        assert_eq!(config.url, "redis://cache:6380");
        assert_eq!(config.max_active, 7);
        assert!(config.wait);
        assert_eq!(config.max_idle, DEFAULT_MAX_IDLE);
        assert_eq!(config.response_timeout, Duration::from_secs(3));

        for key in [
            "REDIS_URL",
            "REDIS_MAX_ACTIVE",
            "REDIS_POOL_WAIT",
            "REDIS_RESPONSE_TIMEOUT_MS",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn test_invalid_url_rejected() {
        let result = ConnectionPool::new(PoolConfig::new("not a redis url"));
        assert!(matches!(result, Err(MqError::Redis(_))));
    }

    #[tokio::test]
    async fn test_dial_failure_is_transport_error() {
        // Port 1 on localhost refuses connections
        let config = PoolConfig::new("redis://127.0.0.1:1").with_max_active(1);
        let pool = ConnectionPool::new(config).unwrap();

        let err = pool.get().await.err().unwrap();
        assert!(err.is_transport());
        assert_eq!(pool.idle_count(), 0);
    }
}

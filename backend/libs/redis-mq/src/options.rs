//! Consumer and producer options.
//!
//! Options start from defaults, are adjusted with `with_*` setters or loaded
//! from `MQ_*` environment variables, and are repaired once more when a
//! consumer or producer is built so that unset or out-of-range values fall
//! back to their defaults.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::dead_letter::{DeadLetterLogger, DeadLetterMailbox};
use crate::env::{duration_ms_from_env, parse_env_optional};

/// Poll-new block window
pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_secs(2);
/// Failures after which a message is dead-lettered
pub const DEFAULT_MAX_RETRY_LIMIT: u32 = 3;
pub const DEFAULT_DEAD_LETTER_DELIVER_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_HANDLE_MSGS_TIMEOUT: Duration = Duration::from_secs(1);
/// Producer append capacity
pub const DEFAULT_MSG_QUEUE_LEN: usize = 500;

#[derive(Clone)]
pub struct ConsumerOptions {
    /// How long each poll for new entries blocks on the broker
    pub receive_timeout: Duration,
    /// Handler failures before a message goes to the dead-letter mailbox
    pub max_retry_limit: u32,
    /// Where exhausted messages are delivered
    pub dead_letter_mailbox: Arc<dyn DeadLetterMailbox>,
    /// Deadline for one dead-letter flush
    pub dead_letter_deliver_timeout: Duration,
    /// Deadline for dispatching one batch
    pub handle_msgs_timeout: Duration,
    /// Create the consumer group (from the start of the topic) when the
    /// consumer starts
    pub create_group: bool,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
            max_retry_limit: DEFAULT_MAX_RETRY_LIMIT,
            dead_letter_mailbox: Arc::new(DeadLetterLogger::new()),
            dead_letter_deliver_timeout: DEFAULT_DEAD_LETTER_DELIVER_TIMEOUT,
            handle_msgs_timeout: DEFAULT_HANDLE_MSGS_TIMEOUT,
            create_group: true,
        }
    }
}

impl fmt::Debug for ConsumerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerOptions")
            .field("receive_timeout", &self.receive_timeout)
            .field("max_retry_limit", &self.max_retry_limit)
            .field("dead_letter_mailbox", &"<dyn DeadLetterMailbox>")
            .field("dead_letter_deliver_timeout", &self.dead_letter_deliver_timeout)
            .field("handle_msgs_timeout", &self.handle_msgs_timeout)
            .field("create_group", &self.create_group)
            .finish()
    }
}

impl ConsumerOptions {
    /// Load options from `MQ_*` environment variables.
    ///
    /// Negative values are rejected and replaced by the defaults; the
    /// dead-letter mailbox is always the logging one.
    pub fn from_env() -> Self {
        let max_retry_limit = match parse_env_optional::<i64>("MQ_MAX_RETRY_LIMIT") {
            Some(limit) if limit >= 0 => u32::try_from(limit).unwrap_or(u32::MAX),
            Some(limit) => {
                warn!(value = limit, "MQ_MAX_RETRY_LIMIT is negative, using default");
                DEFAULT_MAX_RETRY_LIMIT
            }
            None => DEFAULT_MAX_RETRY_LIMIT,
        };

        Self {
            receive_timeout: duration_ms_from_env("MQ_RECEIVE_TIMEOUT_MS", DEFAULT_RECEIVE_TIMEOUT),
            max_retry_limit,
            dead_letter_deliver_timeout: duration_ms_from_env(
                "MQ_DEAD_LETTER_DELIVER_TIMEOUT_MS",
                DEFAULT_DEAD_LETTER_DELIVER_TIMEOUT,
            ),
            handle_msgs_timeout: duration_ms_from_env(
                "MQ_HANDLE_MSGS_TIMEOUT_MS",
                DEFAULT_HANDLE_MSGS_TIMEOUT,
            ),
            create_group: parse_env_optional("MQ_CREATE_GROUP").unwrap_or(true),
            ..Self::default()
        }
    }

    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    pub fn with_max_retry_limit(mut self, limit: u32) -> Self {
        self.max_retry_limit = limit;
        self
    }

    pub fn with_dead_letter_mailbox(mut self, mailbox: Arc<dyn DeadLetterMailbox>) -> Self {
        self.dead_letter_mailbox = mailbox;
        self
    }

    pub fn with_dead_letter_deliver_timeout(mut self, timeout: Duration) -> Self {
        self.dead_letter_deliver_timeout = timeout;
        self
    }

    pub fn with_handle_msgs_timeout(mut self, timeout: Duration) -> Self {
        self.handle_msgs_timeout = timeout;
        self
    }

    pub fn with_create_group(mut self, create_group: bool) -> Self {
        self.create_group = create_group;
        self
    }

    /// Zero durations mean "unset". A zero receive timeout would turn into
    /// `BLOCK 0`, which never returns on an idle topic.
    pub(crate) fn repair(&mut self) {
        if self.receive_timeout.is_zero() {
            self.receive_timeout = DEFAULT_RECEIVE_TIMEOUT;
        }
        if self.dead_letter_deliver_timeout.is_zero() {
            self.dead_letter_deliver_timeout = DEFAULT_DEAD_LETTER_DELIVER_TIMEOUT;
        }
        if self.handle_msgs_timeout.is_zero() {
            self.handle_msgs_timeout = DEFAULT_HANDLE_MSGS_TIMEOUT;
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProducerOptions {
    /// Capacity of the topic log; older entries are evicted beyond it
    pub msg_queue_len: usize,
}

impl Default for ProducerOptions {
    fn default() -> Self {
        Self {
            msg_queue_len: DEFAULT_MSG_QUEUE_LEN,
        }
    }
}

impl ProducerOptions {
    pub fn from_env() -> Self {
        let msg_queue_len = match parse_env_optional::<i64>("MQ_MSG_QUEUE_LEN") {
            Some(len) if len > 0 => usize::try_from(len).unwrap_or(DEFAULT_MSG_QUEUE_LEN),
            _ => DEFAULT_MSG_QUEUE_LEN,
        };
        Self { msg_queue_len }
    }

    pub fn with_msg_queue_len(mut self, len: usize) -> Self {
        self.msg_queue_len = len;
        self
    }

    pub(crate) fn repair(&mut self) {
        if self.msg_queue_len == 0 {
            self.msg_queue_len = DEFAULT_MSG_QUEUE_LEN;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_consumer_defaults() {
        let opts = ConsumerOptions::default();
        assert_eq!(opts.receive_timeout, Duration::from_secs(2));
        assert_eq!(opts.max_retry_limit, 3);
        assert_eq!(opts.dead_letter_deliver_timeout, Duration::from_secs(1));
        assert_eq!(opts.handle_msgs_timeout, Duration::from_secs(1));
        assert!(opts.create_group);
    }

    #[test]
    fn test_repair_resets_zero_durations_but_keeps_zero_retry_limit() {
        let mut opts = ConsumerOptions::default()
            .with_receive_timeout(Duration::ZERO)
            .with_handle_msgs_timeout(Duration::ZERO)
            .with_dead_letter_deliver_timeout(Duration::ZERO)
            .with_max_retry_limit(0);
        opts.repair();

        assert_eq!(opts.receive_timeout, DEFAULT_RECEIVE_TIMEOUT);
        assert_eq!(opts.handle_msgs_timeout, DEFAULT_HANDLE_MSGS_TIMEOUT);
        assert_eq!(
            opts.dead_letter_deliver_timeout,
            DEFAULT_DEAD_LETTER_DELIVER_TIMEOUT
        );
        assert_eq!(opts.max_retry_limit, 0);
    }

    #[test]
    fn test_producer_repair() {
        let mut opts = ProducerOptions::default().with_msg_queue_len(0);
        opts.repair();
        assert_eq!(opts.msg_queue_len, 500);
    }

    #[test]
    #[serial]
    fn test_consumer_from_env_rejects_negatives() {
        std::env::set_var("MQ_RECEIVE_TIMEOUT_MS", "-100");
        std::env::set_var("MQ_MAX_RETRY_LIMIT", "-1");
        std::env::set_var("MQ_HANDLE_MSGS_TIMEOUT_MS", "250");

        let opts = ConsumerOptions::from_env();
        assert_eq!(opts.receive_timeout, DEFAULT_RECEIVE_TIMEOUT);
        assert_eq!(opts.max_retry_limit, DEFAULT_MAX_RETRY_LIMIT);
        assert_eq!(opts.handle_msgs_timeout, Duration::from_millis(250));

        std::env::set_var("MQ_MAX_RETRY_LIMIT", "0");
        assert_eq!(ConsumerOptions::from_env().max_retry_limit, 0);

        for key in [
            "MQ_RECEIVE_TIMEOUT_MS",
            "MQ_MAX_RETRY_LIMIT",
            "MQ_HANDLE_MSGS_TIMEOUT_MS",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_producer_from_env() {
        std::env::set_var("MQ_MSG_QUEUE_LEN", "-3");
        assert_eq!(ProducerOptions::from_env().msg_queue_len, 500);

        std::env::set_var("MQ_MSG_QUEUE_LEN", "10");
        assert_eq!(ProducerOptions::from_env().msg_queue_len, 10);
        std::env::remove_var("MQ_MSG_QUEUE_LEN");
    }
}

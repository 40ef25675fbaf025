use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

use crate::message::Message;

/// Per-call context handed to message handlers and dead-letter mailboxes.
///
/// The deadline is advisory: the consumer never cancels a handler or mailbox
/// that runs past it, and a late success is still acknowledged.
#[derive(Debug, Clone)]
pub struct DispatchContext {
    deadline: Instant,
    previous_failures: u32,
}

impl DispatchContext {
    pub fn new(deadline: Instant) -> Self {
        Self {
            deadline,
            previous_failures: 0,
        }
    }

    pub(crate) fn with_previous_failures(mut self, previous_failures: u32) -> Self {
        self.previous_failures = previous_failures;
        self
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left before the deadline, zero once it has passed.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Consecutive failures recorded for this message by the current process.
    pub fn previous_failures(&self) -> u32 {
        self.previous_failures
    }
}

/// User callback invoked once per delivered message.
///
/// `Ok` acknowledges the message; `Err` counts as a failure towards the
/// dead-letter threshold and leaves the message pending.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, ctx: DispatchContext, msg: Message) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> MessageHandler for F
where
    F: Fn(DispatchContext, Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, ctx: DispatchContext, msg: Message) -> anyhow::Result<()> {
        (self)(ctx, msg).await
    }
}

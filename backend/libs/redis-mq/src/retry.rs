use std::collections::HashMap;

use crate::message::Message;

/// Consecutive handler failures per message.
///
/// Owned by a single consumer task, so it is a plain map. A message is
/// present only between its first failure and its acknowledgement.
#[derive(Debug, Default)]
pub struct RetryTracker {
    failures: HashMap<Message, u32>,
}

impl RetryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one more failure, returning the new total.
    pub fn record_failure(&mut self, msg: &Message) -> u32 {
        let count = self.failures.entry(msg.clone()).or_insert(0);
        *count += 1;
        *count
    }

    /// Failures recorded for `msg`, zero if untracked.
    pub fn failures(&self, msg: &Message) -> u32 {
        self.failures.get(msg).copied().unwrap_or(0)
    }

    /// Forget `msg`. Returns whether it was tracked.
    pub fn clear(&mut self, msg: &Message) -> bool {
        self.failures.remove(msg).is_some()
    }

    pub fn contains(&self, msg: &Message) -> bool {
        self.failures.contains_key(msg)
    }

    /// Messages whose failure count reached `limit`, with their counts.
    pub fn exhausted(&self, limit: u32) -> Vec<(Message, u32)> {
        self.failures
            .iter()
            .filter(|(_, count)| **count >= limit)
            .map(|(msg, count)| (msg.clone(), *count))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }
}

//! In-process [`StreamBroker`] with Redis Streams semantics.
//!
//! Ids are `<ms>-<seq>` and strictly increasing per topic, `capacity` trims the
//! oldest entries, each group keeps a delivery cursor plus a pending entry list
//! per consumer, and blocked `read_group_new` calls wake up on append.
//! Nothing is persisted.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{timeout_at, Instant};
use tracing::debug;

use crate::broker::{require_non_empty, StreamBroker};
use crate::error::{MqError, MqResult};
use crate::message::{Message, ReadResult};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct EntryId {
    ms: u64,
    seq: u64,
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

impl FromStr for EntryId {
    type Err = MqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || MqError::Broker(format!("Invalid stream ID specified: {}", s));
        let (ms, seq) = s.split_once('-').unwrap_or((s, "0"));
        Ok(Self {
            ms: ms.parse().map_err(|_| invalid())?,
            seq: seq.parse().map_err(|_| invalid())?,
        })
    }
}

#[derive(Debug, Default)]
struct PendingEntry {
    consumer: String,
    deliveries: u64,
}

#[derive(Debug, Default)]
struct GroupState {
    last_delivered: EntryId,
    pending: BTreeMap<EntryId, PendingEntry>,
}

#[derive(Debug, Default)]
struct TopicLog {
    entries: VecDeque<(EntryId, Message)>,
    last_id: EntryId,
    groups: HashMap<String, GroupState>,
}

impl TopicLog {
    fn next_id(&self) -> EntryId {
        let now_ms = u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0);
        if now_ms > self.last_id.ms {
            EntryId { ms: now_ms, seq: 0 }
        } else {
            EntryId {
                ms: self.last_id.ms,
                seq: self.last_id.seq + 1,
            }
        }
    }

    fn entry(&self, id: EntryId) -> Option<&Message> {
        self.entries
            .binary_search_by_key(&id, |(entry_id, _)| *entry_id)
            .ok()
            .map(|idx| &self.entries[idx].1)
    }
}

#[derive(Debug, Default)]
struct BrokerState {
    topics: HashMap<String, TopicLog>,
}

impl BrokerState {
    /// The group's state alongside the topic's retained entries.
    fn group_mut(
        &mut self,
        topic: &str,
        group: &str,
    ) -> MqResult<(&mut GroupState, &VecDeque<(EntryId, Message)>)> {
        let log = self
            .topics
            .get_mut(topic)
            .ok_or_else(|| no_group(topic, group))?;
        let TopicLog {
            entries, groups, ..
        } = log;
        let state = groups
            .get_mut(group)
            .ok_or_else(|| no_group(topic, group))?;
        Ok((state, &*entries))
    }
}

fn no_group(topic: &str, group: &str) -> MqError {
    MqError::Broker(format!(
        "NOGROUP No such key '{}' or consumer group '{}'",
        topic, group
    ))
}

/// Stream broker living entirely in this process.
#[derive(Debug, Default)]
pub struct MemoryBroker {
    state: Mutex<BrokerState>,
    appended: Notify,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries currently retained in `topic`.
    pub fn len(&self, topic: &str) -> usize {
        self.lock()
            .topics
            .get(topic)
            .map_or(0, |log| log.entries.len())
    }

    pub fn is_empty(&self, topic: &str) -> bool {
        self.len(topic) == 0
    }

    /// Look up a retained entry by id.
    pub fn get(&self, topic: &str, id: &str) -> Option<Message> {
        let id = id.parse::<EntryId>().ok()?;
        self.lock().topics.get(topic)?.entry(id).cloned()
    }

    /// Ids delivered to `consumer` in `group` and not yet acknowledged.
    pub fn pending_ids(&self, topic: &str, group: &str, consumer: &str) -> Vec<String> {
        let state = self.lock();
        state
            .topics
            .get(topic)
            .and_then(|log| log.groups.get(group))
            .map(|g| {
                g.pending
                    .iter()
                    .filter(|(_, p)| p.consumer == consumer)
                    .map(|(id, _)| id.to_string())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// How many times `id` has been handed out by group reads.
    pub fn delivery_count(&self, topic: &str, group: &str, id: &str) -> u64 {
        let Ok(id) = id.parse::<EntryId>() else {
            return 0;
        };
        let state = self.lock();
        state
            .topics
            .get(topic)
            .and_then(|log| log.groups.get(group))
            .and_then(|g| g.pending.get(&id))
            .map_or(0, |p| p.deliveries)
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_new(&self, group: &str, consumer: &str, topic: &str) -> MqResult<Vec<Message>> {
        let mut state = self.lock();
        let (group_state, entries) = state.group_mut(topic, group)?;

        let start = entries.partition_point(|(id, _)| *id <= group_state.last_delivered);
        let mut msgs = Vec::new();
        for (id, msg) in entries.iter().skip(start) {
            group_state.last_delivered = *id;
            group_state.pending.insert(
                *id,
                PendingEntry {
                    consumer: consumer.to_string(),
                    deliveries: 1,
                },
            );
            msgs.push(msg.clone());
        }
        Ok(msgs)
    }
}

#[async_trait]
impl StreamBroker for MemoryBroker {
    async fn append(
        &self,
        topic: &str,
        capacity: usize,
        key: &str,
        value: &str,
    ) -> MqResult<String> {
        require_non_empty("XADD", &[("topic", topic)])?;

        let id = {
            let mut state = self.lock();
            let log = state.topics.entry(topic.to_string()).or_default();
            let id = log.next_id();
            log.last_id = id;
            log.entries
                .push_back((id, Message::new(id.to_string(), key, value)));
            while log.entries.len() > capacity {
                log.entries.pop_front();
            }
            id
        };

        self.appended.notify_waiters();
        debug!(topic = %topic, msg_id = %id, "Appended stream entry");
        Ok(id.to_string())
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

        let deadline = Instant::now() + block;
        loop {
            // Register before checking so an append in between is not missed.
            let notified = self.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let msgs = self.take_new(group, consumer, topic)?;
            if !msgs.is_empty() {
                return Ok(ReadResult::Messages(msgs));
            }

            if block.is_zero() {
                // BLOCK 0 waits indefinitely
                notified.await;
            } else if timeout_at(deadline, notified).await.is_err() {
                return Ok(ReadResult::NoMessage);
            }
        }
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

        let mut state = self.lock();
        let (group_state, entries) = state.group_mut(topic, group)?;

        let mut msgs = Vec::new();
        for (id, pending) in group_state.pending.iter_mut() {
            if pending.consumer != consumer {
                continue;
            }
            let found = entries
                .binary_search_by_key(id, |(entry_id, _)| *entry_id)
                .ok()
                .map(|idx| entries[idx].1.clone());
            // Trimmed while pending: nothing left to hand out.
            if let Some(msg) = found {
                pending.deliveries += 1;
                msgs.push(msg);
            }
        }

        Ok(ReadResult::from_batch(msgs))
    }

    async fn ack(&self, topic: &str, group: &str, id: &str) -> MqResult<()> {
        require_non_empty("XACK", &[("topic", topic), ("group_id", group), ("msg_id", id)])?;
        let entry_id: EntryId = id.parse()?;

        let mut state = self.lock();
        let removed = state
            .topics
            .get_mut(topic)
            .and_then(|log| log.groups.get_mut(group))
            .and_then(|g| g.pending.remove(&entry_id))
            .is_some();

        if removed {
            Ok(())
        } else {
            Err(MqError::UnexpectedAckCount(0))
        }
    }

    async fn ensure_group(&self, topic: &str, group: &str) -> MqResult<()> {
        require_non_empty("XGROUP", &[("topic", topic), ("group_id", group)])?;

        let mut state = self.lock();
        state
            .topics
            .entry(topic.to_string())
            .or_default()
            .groups
            .entry(group.to_string())
            .or_default();
        Ok(())
    }
}

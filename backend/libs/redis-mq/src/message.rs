use serde::{Deserialize, Serialize};

/// A single stream entry as handed to consumers.
///
/// `id` is assigned by the broker (`<ms>-<seq>`) and is unique within a topic,
/// so equality over the whole triple is the same as equality by id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Message {
    /// Broker-assigned entry id
    pub id: String,
    /// Field name the producer stored the payload under
    pub key: String,
    /// Payload
    pub value: String,
}

impl Message {
    pub fn new(id: impl Into<String>, key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Outcome of a group read.
///
/// `NoMessage` is the normal "nothing arrived" signal (block window elapsed,
/// nil reply, empty pending list) and is kept apart from every error in
/// [`crate::MqError`]. Brokers never return an empty `Messages` batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadResult {
    Messages(Vec<Message>),
    NoMessage,
}

impl ReadResult {
    /// Wrap a decoded batch; an empty one becomes `NoMessage`.
    pub fn from_batch(msgs: Vec<Message>) -> Self {
        if msgs.is_empty() {
            ReadResult::NoMessage
        } else {
            ReadResult::Messages(msgs)
        }
    }

    /// Flatten into a batch, treating `NoMessage` as empty.
    pub fn into_messages(self) -> Vec<Message> {
        match self {
            ReadResult::Messages(msgs) => msgs,
            ReadResult::NoMessage => Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            ReadResult::Messages(msgs) => msgs.is_empty(),
            ReadResult::NoMessage => true,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ReadResult::Messages(msgs) => msgs.len(),
            ReadResult::NoMessage => 0,
        }
    }
}

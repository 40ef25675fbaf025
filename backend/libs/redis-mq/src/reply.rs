//! Decoding of raw `XREADGROUP` replies.
//!
//! Expected shape for a single-stream read:
//!
//! ```text
//! [[topic, [[id, [key, value]], [id, [key, value]], ...]]]
//! ```
//!
//! A nil or empty reply, or one whose entries were all trimmed, means nothing
//! was delivered. Any other
//! deviation fails the whole batch; no partial results are returned.

use redis::Value;

use crate::error::{MqError, MqResult};
use crate::message::{Message, ReadResult};

pub(crate) fn parse_read_group_reply(reply: Value) -> MqResult<ReadResult> {
    let streams = match reply {
        Value::Nil => return Ok(ReadResult::NoMessage),
        Value::Bulk(streams) => streams,
        other => return Err(malformed("reply", &other)),
    };

    let Some(stream) = streams.into_iter().next() else {
        return Ok(ReadResult::NoMessage);
    };

    let mut stream = match stream {
        Value::Bulk(parts) if parts.len() == 2 => parts,
        other => return Err(malformed("stream element", &other)),
    };

    let entries = match stream.pop() {
        Some(Value::Bulk(entries)) => entries,
        Some(Value::Nil) | None => Vec::new(),
        Some(other) => return Err(malformed("entry list", &other)),
    };

    let mut msgs = Vec::with_capacity(entries.len());
    for entry in entries {
        if let Some(msg) = parse_entry(entry)? {
            msgs.push(msg);
        }
    }

    Ok(ReadResult::from_batch(msgs))
}

/// `None` for entries whose body is nil: they were trimmed from the log while
/// still pending, so there is nothing left to deliver.
fn parse_entry(entry: Value) -> MqResult<Option<Message>> {
    let mut parts = match entry {
        Value::Bulk(parts) if parts.len() == 2 => parts.into_iter(),
        other => return Err(malformed("entry", &other)),
    };

    let (Some(id), Some(body)) = (parts.next(), parts.next()) else {
        return Err(MqError::MalformedReply("entry".to_string()));
    };
    let id = scalar(id, "entry id")?;

    let mut fields = match body {
        Value::Nil => return Ok(None),
        Value::Bulk(fields) if fields.len() == 2 => fields.into_iter(),
        other => return Err(malformed("entry body", &other)),
    };

    let (Some(key), Some(value)) = (fields.next(), fields.next()) else {
        return Err(MqError::MalformedReply("entry body".to_string()));
    };

    Ok(Some(Message {
        id,
        key: scalar(key, "entry key")?,
        value: scalar(value, "entry value")?,
    }))
}

fn scalar(value: Value, what: &str) -> MqResult<String> {
    match value {
        Value::Data(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        Value::Status(s) => Ok(s),
        Value::Int(i) => Ok(i.to_string()),
        Value::Okay => Ok("OK".to_string()),
        other => Err(malformed(what, &other)),
    }
}

fn malformed(what: &str, got: &Value) -> MqError {
    MqError::MalformedReply(format!("unexpected {}: {:?}", what, got))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(s: &str) -> Value {
        Value::Data(s.as_bytes().to_vec())
    }

    fn entry(id: &str, key: &str, value: &str) -> Value {
        Value::Bulk(vec![data(id), Value::Bulk(vec![data(key), data(value)])])
    }

    fn stream_reply(entries: Vec<Value>) -> Value {
        Value::Bulk(vec![Value::Bulk(vec![data("orders"), Value::Bulk(entries)])])
    }

    #[test]
    fn test_nil_and_empty_are_no_message() {
        assert_eq!(parse_read_group_reply(Value::Nil).unwrap(), ReadResult::NoMessage);
        assert_eq!(
            parse_read_group_reply(Value::Bulk(vec![])).unwrap(),
            ReadResult::NoMessage
        );
    }

    #[test]
    fn test_parse_entries_in_order() {
        let reply = stream_reply(vec![entry("1-0", "k1", "v1"), entry("1-1", "k2", "v2")]);

        let msgs = parse_read_group_reply(reply).unwrap().into_messages();
        assert_eq!(
            msgs,
            vec![Message::new("1-0", "k1", "v1"), Message::new("1-1", "k2", "v2")]
        );
    }

    #[test]
    fn test_empty_pending_list_is_no_message() {
        let reply = stream_reply(vec![]);
        assert_eq!(parse_read_group_reply(reply).unwrap(), ReadResult::NoMessage);

        let nil_entries = Value::Bulk(vec![Value::Bulk(vec![data("orders"), Value::Nil])]);
        assert_eq!(
            parse_read_group_reply(nil_entries).unwrap(),
            ReadResult::NoMessage
        );

        let only_trimmed = stream_reply(vec![Value::Bulk(vec![data("1-0"), Value::Nil])]);
        assert_eq!(
            parse_read_group_reply(only_trimmed).unwrap(),
            ReadResult::NoMessage
        );
    }

    #[test]
    fn test_trimmed_pending_entry_is_skipped() {
        let trimmed = Value::Bulk(vec![data("1-0"), Value::Nil]);
        let reply = stream_reply(vec![trimmed, entry("1-1", "k", "v")]);

        let msgs = parse_read_group_reply(reply).unwrap().into_messages();
        assert_eq!(msgs, vec![Message::new("1-1", "k", "v")]);
    }

    #[test]
    fn test_malformed_entry_fails_whole_batch() {
        let bad_body = Value::Bulk(vec![
            data("1-1"),
            Value::Bulk(vec![data("k"), data("v"), data("extra"), data("x")]),
        ]);
        let reply = stream_reply(vec![entry("1-0", "k", "v"), bad_body]);

        let err = parse_read_group_reply(reply).unwrap_err();
        assert!(matches!(err, MqError::MalformedReply(_)));
    }

    #[test]
    fn test_malformed_stream_element() {
        let reply = Value::Bulk(vec![Value::Bulk(vec![data("orders")])]);
        assert!(matches!(
            parse_read_group_reply(reply),
            Err(MqError::MalformedReply(_))
        ));

        assert!(matches!(
            parse_read_group_reply(Value::Int(3)),
            Err(MqError::MalformedReply(_))
        ));
    }
}

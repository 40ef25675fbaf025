//! Error types for the stream message queue.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for queue operations.
pub type MqResult<T> = Result<T, MqError>;

/// Errors that can occur while producing or consuming stream messages.
///
/// An empty read is reported as [`crate::ReadResult::NoMessage`], never as an
/// error.
#[derive(Error, Debug)]
pub enum MqError {
    /// Redis connection or command error
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// All active connection slots are taken and the pool is not in wait mode
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// Dialing or waiting on the broker exceeded the allotted time
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Broker reply did not have the expected shape
    #[error("Invalid msg format: {0}")]
    MalformedReply(String),

    /// XACK reported something other than exactly one acknowledged entry
    #[error("Invalid ack reply: {0}")]
    UnexpectedAckCount(i64),

    /// Request rejected before reaching the broker (empty topic, group, ...)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Broker refused the request (unknown group, bad entry id, ...)
    #[error("Broker error: {0}")]
    Broker(String),

    /// Consumer or client could not be constructed
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Generic error with context, e.g. from a custom dead-letter mailbox
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl MqError {
    /// Check if the error came from the transport rather than the data.
    ///
    /// The consumer loop treats these the same as any other read failure
    /// (log and re-poll), but callers of the client may want to retry them.
    pub fn is_transport(&self) -> bool {
        match self {
            MqError::Redis(err) => {
                err.kind() == redis::ErrorKind::IoError || err.is_connection_dropped()
            }
            MqError::PoolExhausted | MqError::Timeout(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MqError::MalformedReply("entry body".to_string());
        assert_eq!(err.to_string(), "Invalid msg format: entry body");

        let err = MqError::UnexpectedAckCount(0);
        assert_eq!(err.to_string(), "Invalid ack reply: 0");
    }

    #[test]
    fn test_transport_classification() {
        assert!(MqError::PoolExhausted.is_transport());
        assert!(MqError::Timeout(Duration::from_millis(5)).is_transport());

        let io = MqError::from(redis::RedisError::from(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        )));
        assert!(io.is_transport());

        assert!(!MqError::MalformedReply("x".into()).is_transport());
        assert!(!MqError::UnexpectedAckCount(2).is_transport());
    }

    #[test]
    fn test_error_from_anyhow() {
        let err: MqError = anyhow::anyhow!("sink unavailable").into();
        assert!(matches!(err, MqError::Other(_)));
        assert_eq!(err.to_string(), "sink unavailable");
    }
}

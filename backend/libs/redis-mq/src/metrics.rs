//! Prometheus metrics for stream consumers
//!
//! Tracks acknowledgements, handler and ack failures, dead letters and read
//! errors per (topic, group, consumer).

use prometheus::{
    register_int_counter_vec, register_int_gauge_vec, IntCounter, IntCounterVec, IntGauge,
    IntGaugeVec,
};

lazy_static::lazy_static! {
    static ref MESSAGES_ACKED: IntCounterVec = register_int_counter_vec!(
        "mq_messages_acked_total",
        "Messages acknowledged after successful handling",
        &["topic", "group", "consumer"]
    ).expect("Prometheus metrics registration should succeed at startup");

    static ref HANDLER_FAILURES: IntCounterVec = register_int_counter_vec!(
        "mq_handler_failures_total",
        "Message handler invocations that returned an error",
        &["topic", "group", "consumer"]
    ).expect("Prometheus metrics registration should succeed at startup");

    static ref ACK_FAILURES: IntCounterVec = register_int_counter_vec!(
        "mq_ack_failures_total",
        "XACK calls that failed or acknowledged nothing",
        &["topic", "group", "consumer"]
    ).expect("Prometheus metrics registration should succeed at startup");

    static ref DEAD_LETTERS: IntCounterVec = register_int_counter_vec!(
        "mq_dead_letters_total",
        "Messages handed to the dead-letter mailbox",
        &["topic", "group", "consumer"]
    ).expect("Prometheus metrics registration should succeed at startup");

    static ref RECEIVE_ERRORS: IntCounterVec = register_int_counter_vec!(
        "mq_receive_errors_total",
        "Failed reads of new or pending entries",
        &["topic", "group", "consumer"]
    ).expect("Prometheus metrics registration should succeed at startup");

    static ref RETRY_TRACKED: IntGaugeVec = register_int_gauge_vec!(
        "mq_retry_tracked_messages",
        "Messages with at least one recorded handler failure",
        &["topic", "group", "consumer"]
    ).expect("Prometheus metrics registration should succeed at startup");
}

/// Metric handles bound to one consumer's labels.
#[derive(Clone)]
pub struct ConsumerMetrics {
    pub acked: IntCounter,
    pub handler_failures: IntCounter,
    pub ack_failures: IntCounter,
    pub dead_letters: IntCounter,
    pub receive_errors: IntCounter,
    pub retry_tracked: IntGauge,
}

impl ConsumerMetrics {
    pub fn new(topic: &str, group: &str, consumer: &str) -> Self {
        let labels = [topic, group, consumer];
        Self {
            acked: MESSAGES_ACKED.with_label_values(&labels),
            handler_failures: HANDLER_FAILURES.with_label_values(&labels),
            ack_failures: ACK_FAILURES.with_label_values(&labels),
            dead_letters: DEAD_LETTERS.with_label_values(&labels),
            receive_errors: RECEIVE_ERRORS.with_label_values(&labels),
            retry_tracked: RETRY_TRACKED.with_label_values(&labels),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_share_label_series() {
        let a = ConsumerMetrics::new("metrics-topic", "g", "c1");
        let b = ConsumerMetrics::new("metrics-topic", "g", "c1");
        let other = ConsumerMetrics::new("metrics-topic", "g", "c2");

        a.acked.inc();
        b.acked.inc();
        assert_eq!(a.acked.get(), 2);
        assert_eq!(other.acked.get(), 0);

        a.retry_tracked.set(4);
        assert_eq!(b.retry_tracked.get(), 4);
    }
}

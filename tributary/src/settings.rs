//! Publish and receive configuration, validated before any stream is
//! opened.

use std::{collections::HashSet, time::Duration};

use crate::{
    constants::{MAX_PUBLISH_REQUEST_BYTES, MAX_PUBLISH_REQUEST_COUNT},
    error::{WireError, WireResult},
};

/// Controls batching, buffering and reconnection of publishers.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishSettings {
    /// Publish a non-empty batch after this delay has passed.
    pub delay_threshold: Duration,
    /// Publish a batch when it has this many messages.
    pub count_threshold: usize,
    /// Publish a batch when its size in bytes reaches this value.
    pub byte_threshold: usize,
    /// How long streams may retry before the publisher gives up.
    pub timeout: Duration,
    /// The maximum bytes of messages buffered per partition before publishes
    /// fail with [WireError::Overflow].
    pub buffered_byte_limit: usize,
    /// How often the topic's partition count is polled.
    pub config_poll_period: Duration,
}

impl Default for PublishSettings {
    fn default() -> Self {
        Self {
            delay_threshold: Duration::from_millis(10),
            count_threshold: 100,
            byte_threshold: 1_000_000,
            timeout: Duration::from_secs(7 * 24 * 60 * 60),
            buffered_byte_limit: 10_000_000_000,
            config_poll_period: Duration::from_secs(10 * 60),
        }
    }
}

impl PublishSettings {
    pub fn validate(&self) -> WireResult<()> {
        if self.delay_threshold.is_zero() {
            return invalid("delay threshold must be > 0");
        }
        if self.count_threshold == 0 {
            return invalid("count threshold must be > 0");
        }
        if self.count_threshold > MAX_PUBLISH_REQUEST_COUNT {
            return invalid(format!(
                "count threshold must be <= {MAX_PUBLISH_REQUEST_COUNT}"
            ));
        }
        if self.byte_threshold == 0 {
            return invalid("byte threshold must be > 0");
        }
        if self.byte_threshold > MAX_PUBLISH_REQUEST_BYTES {
            return invalid(format!(
                "byte threshold must be <= {MAX_PUBLISH_REQUEST_BYTES}"
            ));
        }
        if self.timeout.is_zero() {
            return invalid("timeout must be > 0");
        }
        if self.buffered_byte_limit == 0 {
            return invalid("buffered byte limit must be > 0");
        }
        if self.buffered_byte_limit < self.byte_threshold {
            return invalid("buffered byte limit must be >= byte threshold");
        }
        if self.config_poll_period.is_zero() {
            return invalid("config poll period must be > 0");
        }
        Ok(())
    }
}

/// Controls flow control and partition selection of subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceiveSettings {
    /// The maximum number of unacknowledged messages per partition.
    pub max_outstanding_messages: i64,
    /// The maximum size of unacknowledged messages per partition.
    pub max_outstanding_bytes: i64,
    /// How long streams may retry before the subscriber gives up.
    pub timeout: Duration,
    /// Partitions to receive from. When empty, partitions are assigned by
    /// the server.
    pub partitions: Vec<i64>,
}

impl Default for ReceiveSettings {
    fn default() -> Self {
        Self {
            max_outstanding_messages: 1000,
            max_outstanding_bytes: 1_000_000_000,
            timeout: Duration::from_secs(7 * 24 * 60 * 60),
            partitions: vec![],
        }
    }
}

impl ReceiveSettings {
    pub fn validate(&self) -> WireResult<()> {
        if self.max_outstanding_messages <= 0 {
            return invalid("max outstanding messages must be > 0");
        }
        if self.max_outstanding_bytes <= 0 {
            return invalid("max outstanding bytes must be > 0");
        }
        if self.timeout.is_zero() {
            return invalid("timeout must be > 0");
        }
        let mut seen = HashSet::new();
        for partition in &self.partitions {
            if *partition < 0 {
                return invalid(format!(
                    "invalid partition number {partition}, partitions are zero-indexed"
                ));
            }
            if !seen.insert(*partition) {
                return invalid(format!("duplicate partition number {partition}"));
            }
        }
        Ok(())
    }
}

fn invalid(reason: impl Into<String>) -> WireResult<()> {
    Err(WireError::InvalidSettings(reason.into()))
}

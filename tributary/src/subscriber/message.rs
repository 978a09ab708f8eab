use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};

use crate::{
    acks::AckConsumer,
    proto::tributary::SequencedMessage,
    resources::MessageMetadata,
};

/// A message delivered to a subscriber's receiver, which must eventually
/// call [ReceivedMessage::ack].
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    /// according to our process (in nano-seconds)
    pub recv_ts: i64,
    pub partition: i64,
    pub message: SequencedMessage,
    ack: Arc<AckConsumer>,
}

impl ReceivedMessage {
    pub fn new(message: SequencedMessage, partition: i64, ack: Arc<AckConsumer>) -> Self {
        ReceivedMessage {
            recv_ts: Utc::now().timestamp_nanos_opt().unwrap_or_default(),
            partition,
            message,
            ack,
        }
    }

    pub fn offset(&self) -> i64 {
        self.message.offset()
    }

    pub fn metadata(&self) -> MessageMetadata {
        MessageMetadata {
            partition: self.partition,
            offset: self.offset(),
        }
    }

    pub fn key(&self) -> &[u8] {
        self.message
            .message
            .as_ref()
            .map(|m| m.key.as_slice())
            .unwrap_or_default()
    }

    pub fn data(&self) -> &[u8] {
        self.message
            .message
            .as_ref()
            .map(|m| m.data.as_slice())
            .unwrap_or_default()
    }

    /// When the server sequenced the message.
    pub fn publish_time(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_micros(self.message.publish_time_micros).single()
    }

    /// Acknowledge the message, allowing its offset to be committed. Only
    /// the first call has any effect.
    pub fn ack(&self) {
        self.ack.ack();
    }

    pub(crate) fn ack_consumer(&self) -> &Arc<AckConsumer> {
        &self.ack
    }
}

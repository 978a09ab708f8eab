//! Subscriber-side accounting of flow control tokens and delivered offsets.
//! Nothing here performs I/O.

use crate::{
    constants::EXPEDITE_BATCH_REQUEST_RATIO,
    error::{WireError, WireResult},
    proto::tributary::{FlowControlRequest, SeekRequest, SequencedMessage},
};

/// Permission for the server to deliver this many bytes and messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlowControlTokens {
    pub bytes: i64,
    pub messages: i64,
}

/// A pair of non-negative token counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenCounter {
    bytes: i64,
    messages: i64,
}

impl TokenCounter {
    pub fn bytes(&self) -> i64 {
        self.bytes
    }

    pub fn messages(&self) -> i64 {
        self.messages
    }

    /// Add tokens, saturating at [i64::MAX].
    pub fn add(&mut self, delta: FlowControlTokens) -> WireResult<()> {
        if delta.bytes < 0 || delta.messages < 0 {
            return Err(WireError::NegativeFlowControlTokens);
        }
        self.bytes = self.bytes.saturating_add(delta.bytes);
        self.messages = self.messages.saturating_add(delta.messages);
        Ok(())
    }

    /// Remove tokens. Fails without modifying the counter if either count
    /// would become negative.
    pub fn sub(&mut self, delta: FlowControlTokens) -> WireResult<()> {
        if delta.messages > self.messages {
            return Err(WireError::TokenCounterMessagesNegative);
        }
        if delta.bytes > self.bytes {
            return Err(WireError::TokenCounterBytesNegative);
        }
        self.bytes -= delta.bytes;
        self.messages -= delta.messages;
        Ok(())
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// A request for the current tokens, or `None` if there are none.
    pub fn to_flow_control_request(&self) -> Option<FlowControlRequest> {
        if self.bytes == 0 && self.messages == 0 {
            return None;
        }
        Some(FlowControlRequest {
            allowed_bytes: self.bytes,
            allowed_messages: self.messages,
        })
    }
}

fn exceeds_expedite_ratio(pending: i64, granted: i64) -> bool {
    granted > 0 && (pending as f64 / granted as f64) >= EXPEDITE_BATCH_REQUEST_RATIO
}

/// Batches tokens released by the client so they can be sent to the server
/// periodically rather than on every ack.
#[derive(Debug, Default)]
pub struct FlowControlBatcher {
    /// Tokens the server may currently use.
    client_tokens: TokenCounter,
    /// Tokens not yet sent to the server.
    pending_tokens: TokenCounter,
}

impl FlowControlBatcher {
    pub fn on_client_flow(&mut self, tokens: FlowControlTokens) -> WireResult<()> {
        self.client_tokens.add(tokens)?;
        self.pending_tokens.add(tokens)
    }

    /// Account for messages delivered by the server.
    pub fn on_messages(&mut self, messages: &[SequencedMessage]) -> WireResult<()> {
        let bytes = messages.iter().map(|m| m.size_bytes).sum();
        self.client_tokens.sub(FlowControlTokens {
            bytes,
            messages: messages.len() as i64,
        })
    }

    /// All tokens the server may use, for a newly connected stream whose
    /// server-side state starts empty.
    pub fn request_for_restart(&mut self) -> Option<FlowControlRequest> {
        self.pending_tokens.reset();
        self.client_tokens.to_flow_control_request()
    }

    /// Drain the pending tokens into a request.
    pub fn release_pending_request(&mut self) -> Option<FlowControlRequest> {
        let request = self.pending_tokens.to_flow_control_request();
        self.pending_tokens.reset();
        request
    }

    /// Start over with `tokens`, discarding the accounting of a previous
    /// stream.
    pub fn reset(&mut self, tokens: FlowControlTokens) -> WireResult<()> {
        self.client_tokens.reset();
        self.pending_tokens.reset();
        self.client_tokens.add(tokens)
    }

    /// Whether pending tokens are large enough to send right away.
    pub fn should_expedite_batch_request(&self) -> bool {
        exceeds_expedite_ratio(self.pending_tokens.bytes, self.client_tokens.bytes)
            || exceeds_expedite_ratio(self.pending_tokens.messages, self.client_tokens.messages)
    }
}

/// Tracks the offsets delivered by the server so a reconnected stream can
/// resume after the last delivered message.
#[derive(Debug, Default)]
pub struct SubscriberOffsetTracker {
    min_next_offset: i64,
}

impl SubscriberOffsetTracker {
    /// Where a new stream should start, or `None` if nothing was delivered.
    pub fn request_for_restart(&self) -> Option<SeekRequest> {
        (self.min_next_offset > 0).then(|| SeekRequest::to_offset(self.min_next_offset))
    }

    /// Forget delivered offsets, so the next stream starts at the committed
    /// cursor.
    pub fn reset(&mut self) {
        self.min_next_offset = 0;
    }

    /// Validate that a batch of messages continues the delivered sequence.
    pub fn on_messages(&mut self, messages: &[SequencedMessage]) -> WireResult<()> {
        let mut next_offset = self.min_next_offset;
        for (i, message) in messages.iter().enumerate() {
            let offset = message.offset();
            if offset < next_offset {
                if i == 0 {
                    return Err(WireError::StartOffsetTooLow {
                        offset,
                        expected: self.min_next_offset,
                    });
                }
                return Err(WireError::OutOfOrderMessages);
            }
            next_offset = offset + 1;
        }
        self.min_next_offset = next_offset;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::tributary::Cursor;

    fn message(offset: i64, size_bytes: i64) -> SequencedMessage {
        SequencedMessage {
            cursor: Some(Cursor { offset }),
            size_bytes,
            ..Default::default()
        }
    }

    fn tokens(bytes: i64, messages: i64) -> FlowControlTokens {
        FlowControlTokens { bytes, messages }
    }

    #[test]
    fn test_token_counter_saturates() {
        let mut counter = TokenCounter::default();
        counter.add(tokens(i64::MAX - 10, 5)).unwrap();
        counter.add(tokens(100, i64::MAX)).unwrap();
        assert_eq!(counter.bytes(), i64::MAX);
        assert_eq!(counter.messages(), i64::MAX);
        assert_eq!(
            counter.add(tokens(-1, 0)),
            Err(WireError::NegativeFlowControlTokens)
        );
    }

    #[test]
    fn test_token_counter_sub_below_zero() {
        let mut counter = TokenCounter::default();
        counter.add(tokens(100, 10)).unwrap();
        counter.sub(tokens(40, 4)).unwrap();
        assert_eq!((counter.bytes(), counter.messages()), (60, 6));

        assert_eq!(
            counter.sub(tokens(61, 1)),
            Err(WireError::TokenCounterBytesNegative)
        );
        assert_eq!(
            counter.sub(tokens(1, 7)),
            Err(WireError::TokenCounterMessagesNegative)
        );
        // failed subtractions leave the counter unchanged
        assert_eq!((counter.bytes(), counter.messages()), (60, 6));
        assert_eq!(
            counter.to_flow_control_request(),
            Some(FlowControlRequest {
                allowed_bytes: 60,
                allowed_messages: 6
            })
        );
        counter.reset();
        assert_eq!(counter.to_flow_control_request(), None);
    }

    #[test]
    fn test_batcher_restart_and_release() {
        let mut batcher = FlowControlBatcher::default();
        batcher.on_client_flow(tokens(1000, 10)).unwrap();
        assert_eq!(
            batcher.release_pending_request(),
            Some(FlowControlRequest {
                allowed_bytes: 1000,
                allowed_messages: 10
            })
        );
        assert_eq!(batcher.release_pending_request(), None);

        batcher.on_messages(&[message(0, 100), message(1, 200)]).unwrap();
        batcher.on_client_flow(tokens(100, 1)).unwrap();
        // a restarted stream is granted everything the client allows
        assert_eq!(
            batcher.request_for_restart(),
            Some(FlowControlRequest {
                allowed_bytes: 800,
                allowed_messages: 9
            })
        );
        assert_eq!(batcher.release_pending_request(), None);

        assert_eq!(
            batcher.on_messages(&[message(2, 900)]),
            Err(WireError::TokenCounterBytesNegative)
        );

        batcher.on_client_flow(tokens(50, 1)).unwrap();
        batcher.reset(tokens(1000, 10)).unwrap();
        assert_eq!(batcher.release_pending_request(), None);
        assert_eq!(
            batcher.request_for_restart(),
            Some(FlowControlRequest {
                allowed_bytes: 1000,
                allowed_messages: 10
            })
        );
    }

    #[test]
    fn test_expedite_boundary() {
        let mut batcher = FlowControlBatcher::default();
        batcher.on_client_flow(tokens(10, 10)).unwrap();
        batcher.release_pending_request();
        batcher.on_client_flow(tokens(10, 0)).unwrap();
        // pending bytes 10 of 20 granted
        assert!(batcher.should_expedite_batch_request());

        let mut batcher = FlowControlBatcher::default();
        batcher.on_client_flow(tokens(100, 10)).unwrap();
        batcher.release_pending_request();
        batcher.on_client_flow(tokens(0, 9)).unwrap();
        // pending messages 9 of 19 granted
        assert!(!batcher.should_expedite_batch_request());
        batcher.on_client_flow(tokens(0, 1)).unwrap();
        // pending messages 10 of 20 granted
        assert!(batcher.should_expedite_batch_request());
    }

    #[test]
    fn test_offset_tracker() {
        let mut tracker = SubscriberOffsetTracker::default();
        assert_eq!(tracker.request_for_restart(), None);

        tracker
            .on_messages(&[message(5, 1), message(6, 1), message(7, 1)])
            .unwrap();
        assert_eq!(tracker.request_for_restart(), Some(SeekRequest::to_offset(8)));

        // gaps are allowed
        tracker.on_messages(&[message(10, 1)]).unwrap();
        assert_eq!(
            tracker.request_for_restart(),
            Some(SeekRequest::to_offset(11))
        );

        assert_eq!(
            tracker.on_messages(&[message(9, 1)]),
            Err(WireError::StartOffsetTooLow {
                offset: 9,
                expected: 11
            })
        );
        assert_eq!(
            tracker.on_messages(&[message(12, 1), message(12, 1)]),
            Err(WireError::OutOfOrderMessages)
        );
        // failed batches are not recorded
        assert_eq!(
            tracker.request_for_restart(),
            Some(SeekRequest::to_offset(11))
        );

        tracker.reset();
        assert_eq!(tracker.request_for_restart(), None);
        tracker.on_messages(&[message(3, 1)]).unwrap();
        assert_eq!(tracker.request_for_restart(), Some(SeekRequest::to_offset(4)));
    }
}

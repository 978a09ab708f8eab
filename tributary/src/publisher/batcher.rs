//! Per-partition batching of outgoing messages.

use std::{collections::VecDeque, mem};

use prost::Message;

use crate::{
    constants::{MAX_PUBLISH_REQUEST_BYTES, MAX_PUBLISH_REQUEST_COUNT},
    error::{WireError, WireResult},
    proto::tributary::PubSubMessage,
    resources::MessageMetadata,
    settings::PublishSettings,
};

/// Receives the outcome of a single publish.
pub type PublishResultFn = Box<dyn FnOnce(WireResult<MessageMetadata>) + Send>;

/// Result callbacks to run once the publisher's lock is released.
#[must_use]
pub(crate) struct PublishResults(Vec<(PublishResultFn, WireResult<MessageMetadata>)>);

impl PublishResults {
    pub fn none() -> Self {
        Self(vec![])
    }

    pub fn push(&mut self, on_result: PublishResultFn, result: WireResult<MessageMetadata>) {
        self.0.push((on_result, result));
    }

    pub fn extend(&mut self, other: PublishResults) {
        self.0.extend(other.0);
    }

    pub fn notify(self) {
        for (on_result, result) in self.0 {
            on_result(result);
        }
    }
}

pub(crate) struct MessageHolder {
    pub message: PubSubMessage,
    pub size: usize,
    on_result: PublishResultFn,
}

/// Messages sent, or to be sent, in a single publish request.
#[derive(Default)]
pub(crate) struct PublishBatch {
    pub holders: Vec<MessageHolder>,
    pub total_bytes: usize,
}

impl PublishBatch {
    fn push(&mut self, holder: MessageHolder) {
        self.total_bytes += holder.size;
        self.holders.push(holder);
    }

    /// Whether `other` can be appended without exceeding the request limits.
    fn can_merge(&self, other: &PublishBatch) -> bool {
        self.total_bytes + other.total_bytes <= MAX_PUBLISH_REQUEST_BYTES
            && self.holders.len() + other.holders.len() <= MAX_PUBLISH_REQUEST_COUNT
    }

    pub fn messages(&self) -> Vec<PubSubMessage> {
        self.holders.iter().map(|h| h.message.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.holders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.holders.is_empty()
    }
}

/// The outcome of adding a message.
pub(crate) struct Added {
    /// Batches which reached a threshold and should be published.
    pub ready: Vec<PublishBatch>,
    /// Set when the message started a new bundle, which must be flushed once
    /// the delay threshold expires.
    pub new_bundle: Option<u64>,
}

/// Groups messages into batches by count, size and delay, and holds the
/// batches sent to the server until it confirms their offsets.
pub(crate) struct PublishMessageBatcher {
    partition: i64,
    count_threshold: usize,
    byte_threshold: usize,
    available_buffer_bytes: usize,
    /// The bundle being filled.
    bundle: PublishBatch,
    bundle_id: u64,
    /// Batches awaiting a publish response, in send order.
    in_flight: VecDeque<PublishBatch>,
    min_expected_next_offset: i64,
}

impl PublishMessageBatcher {
    pub fn new(settings: &PublishSettings, partition: i64) -> Self {
        Self {
            partition,
            count_threshold: settings.count_threshold,
            byte_threshold: settings.byte_threshold,
            available_buffer_bytes: settings.buffered_byte_limit,
            bundle: PublishBatch::default(),
            bundle_id: 0,
            in_flight: VecDeque::new(),
            min_expected_next_offset: 0,
        }
    }

    /// Buffer a message. On error the message was not accepted and
    /// `on_result` is handed back to the caller.
    pub fn add_message(
        &mut self,
        message: PubSubMessage,
        on_result: PublishResultFn,
    ) -> Result<Added, (WireError, PublishResultFn)> {
        let size = message.encoded_len();
        if size > MAX_PUBLISH_REQUEST_BYTES {
            return Err((WireError::OversizedMessage { size }, on_result));
        }
        if size > self.available_buffer_bytes {
            return Err((WireError::Overflow, on_result));
        }
        self.available_buffer_bytes -= size;

        let mut ready = vec![];
        if !self.bundle.is_empty()
            && (self.bundle.total_bytes + size > MAX_PUBLISH_REQUEST_BYTES
                || self.bundle.len() + 1 > MAX_PUBLISH_REQUEST_COUNT)
        {
            ready.extend(self.cut_bundle());
        }
        let new_bundle = self.bundle.is_empty().then_some(self.bundle_id);
        self.bundle.push(MessageHolder {
            message,
            size,
            on_result,
        });
        if self.bundle.len() >= self.count_threshold || self.bundle.total_bytes >= self.byte_threshold
        {
            ready.extend(self.cut_bundle());
        }
        Ok(Added { ready, new_bundle })
    }

    /// The current bundle, if it is still bundle `id` and non-empty.
    pub fn flush_bundle(&mut self, id: u64) -> Option<PublishBatch> {
        if id != self.bundle_id {
            return None;
        }
        self.cut_bundle()
    }

    /// The current bundle regardless of thresholds.
    pub fn flush(&mut self) -> Option<PublishBatch> {
        self.cut_bundle()
    }

    fn cut_bundle(&mut self) -> Option<PublishBatch> {
        if self.bundle.is_empty() {
            return None;
        }
        self.bundle_id += 1;
        Some(mem::take(&mut self.bundle))
    }

    /// Track a batch that is about to be sent.
    pub fn add_batch(&mut self, batch: PublishBatch) {
        self.in_flight.push_back(batch);
    }

    /// Assign offsets to the oldest in-flight batch.
    pub fn on_publish_response(&mut self, first_offset: i64) -> WireResult<PublishResults> {
        if first_offset < self.min_expected_next_offset {
            return Err(WireError::PublishOffsetRegression {
                offset: first_offset,
                expected: self.min_expected_next_offset,
            });
        }
        let batch = self
            .in_flight
            .pop_front()
            .ok_or(WireError::PublishQueueEmpty)?;
        self.available_buffer_bytes += batch.total_bytes;
        self.min_expected_next_offset = first_offset + batch.len() as i64;

        let partition = self.partition;
        Ok(PublishResults(
            batch
                .holders
                .into_iter()
                .zip(first_offset..)
                .map(|(holder, offset)| (holder.on_result, Ok(MessageMetadata { partition, offset })))
                .collect(),
        ))
    }

    /// Merge adjacent in-flight batches where the request limits allow, and
    /// return their messages in order for resending on a new stream.
    pub fn merge_in_flight(&mut self) -> Vec<Vec<PubSubMessage>> {
        let mut merged: VecDeque<PublishBatch> = VecDeque::with_capacity(self.in_flight.len());
        for batch in self.in_flight.drain(..) {
            match merged.back_mut() {
                Some(last) if last.can_merge(&batch) => {
                    for holder in batch.holders {
                        last.push(holder);
                    }
                }
                _ => merged.push_back(batch),
            }
        }
        self.in_flight = merged;
        self.in_flight.iter().map(PublishBatch::messages).collect()
    }

    /// Fail every buffered and in-flight message with `err`.
    pub fn on_permanent_error(&mut self, err: WireError) -> PublishResults {
        let bundle = self.cut_bundle();
        PublishResults(
            self.in_flight
                .drain(..)
                .chain(bundle)
                .flat_map(|batch| batch.holders)
                .map(|holder| (holder.on_result, Err(err.clone())))
                .collect(),
        )
    }

    /// Whether no messages are buffered or awaiting a response.
    pub fn is_empty(&self) -> bool {
        self.bundle.is_empty() && self.in_flight.is_empty()
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }
}

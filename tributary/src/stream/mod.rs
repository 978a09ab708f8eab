//! A generic reconnecting wrapper around one bidirectional stream.
//!
//! Each kind of stream (publish, subscribe, commit, assignment) plugs its
//! protocol into [RetryableStream] through a [StreamHandler].

mod retryable;

use async_trait::async_trait;
pub use retryable::RetryableStream;

use crate::{error::WireResult, transport::BidiStream};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    Uninitialized,
    Reconnecting,
    Connected,
    Terminated,
}

#[async_trait]
pub trait StreamHandler: Send + Sync + 'static {
    type Request: Send + 'static;
    type Response: Send + 'static;

    /// Open a new transport stream.
    async fn new_stream(&self) -> WireResult<BidiStream<Self::Request, Self::Response>>;

    /// The first request of each stream, and whether the server answers it
    /// with an initial response.
    fn initial_request(&self) -> (Self::Request, bool);

    fn validate_initial_response(&self, response: &Self::Response) -> WireResult<()>;

    /// Called without the stream's lock held, in the order the changes
    /// happen. `Terminated` is always the last notification and may be
    /// delivered from a separate task.
    fn on_stream_status_change(&self, status: StreamStatus);

    /// Called when the server asks the stream to reset its state, after
    /// `Reconnecting` has been notified. The stream reconnects once this
    /// returns.
    async fn on_reset(&self) {}

    /// Called for each response of the current stream, in order. The next
    /// response is not read until this returns.
    async fn on_response(&self, response: Self::Response);
}

//! An in-memory [Connector] for tests. Each stream the client opens is
//! queued as a [ServerStream] which the test accepts and drives by hand.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::{sync::mpsc, time::timeout};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tonic::{Code, Status};

use super::{BidiStream, Connector};
use crate::{
    error::{stream_reset_status, WireResult},
    proto::tributary::{
        PartitionAssignment, PartitionAssignmentRequest, PublishRequest, PublishResponse,
        StreamingCommitCursorRequest, StreamingCommitCursorResponse, SubscribeRequest,
        SubscribeResponse,
    },
    resources::{SubscriptionPartition, SubscriptionPath, TopicPartition, TopicPath},
};

/// How long the helpers below wait before giving up.
pub const MOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// The server half of a stream opened by the client.
pub struct ServerStream<Req, Resp> {
    /// The resource the stream was opened for.
    pub target: String,
    requests: mpsc::UnboundedReceiver<Req>,
    responses: mpsc::UnboundedSender<Result<Resp, Status>>,
}

impl<Req, Resp> ServerStream<Req, Resp> {
    /// The next request sent by the client, or `None` if the client closed
    /// the stream or nothing arrived in time.
    pub async fn recv(&mut self) -> Option<Req> {
        timeout(MOCK_TIMEOUT, self.requests.recv())
            .await
            .ok()
            .flatten()
    }

    /// A request the client has already sent, without waiting.
    pub fn try_recv(&mut self) -> Option<Req> {
        self.requests.try_recv().ok()
    }

    pub fn respond(&self, response: Resp) {
        let _ = self.responses.send(Ok(response));
    }

    /// Fail the stream with `status`.
    pub fn fail(&self, status: Status) {
        let _ = self.responses.send(Err(status));
    }

    /// Fail the stream with the server's reset signal.
    pub fn reset(&self) {
        self.fail(stream_reset_status(Code::Aborted, "stream reset"));
    }

    /// Wait for the client to close its side of the stream, discarding any
    /// requests still in flight. Returns false on timeout.
    pub async fn closed(&mut self) -> bool {
        timeout(MOCK_TIMEOUT, async {
            while self.requests.recv().await.is_some() {}
        })
        .await
        .is_ok()
    }
}

/// Queues the streams of one RPC for the test to accept.
pub struct MockListener<Req, Resp> {
    incoming_tx: mpsc::UnboundedSender<ServerStream<Req, Resp>>,
    incoming_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<ServerStream<Req, Resp>>>,
    open_errors: Mutex<VecDeque<Status>>,
    opened: AtomicUsize,
}

impl<Req: Send + 'static, Resp: Send + 'static> MockListener<Req, Resp> {
    fn new() -> Self {
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        Self {
            incoming_tx,
            incoming_rx: tokio::sync::Mutex::new(incoming_rx),
            open_errors: Mutex::new(VecDeque::new()),
            opened: AtomicUsize::new(0),
        }
    }

    /// Make the next attempt to open a stream fail with `status`.
    pub fn fail_next_open(&self, status: Status) {
        self.open_errors.lock().push_back(status);
    }

    /// The next stream opened by the client.
    pub async fn accept(&self) -> Option<ServerStream<Req, Resp>> {
        let mut incoming = self.incoming_rx.lock().await;
        timeout(MOCK_TIMEOUT, incoming.recv()).await.ok().flatten()
    }

    /// How many streams the client has successfully opened.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    fn open(&self, target: String) -> WireResult<BidiStream<Req, Resp>> {
        if let Some(status) = self.open_errors.lock().pop_front() {
            return Err(status.into());
        }
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (response_tx, response_rx) = mpsc::unbounded_channel();
        self.opened.fetch_add(1, Ordering::SeqCst);
        let _ = self.incoming_tx.send(ServerStream {
            target,
            requests: request_rx,
            responses: response_tx,
        });
        Ok(BidiStream {
            requests: request_tx,
            responses: Box::pin(UnboundedReceiverStream::new(response_rx)),
        })
    }
}

struct PartitionCounts {
    scripted: VecDeque<Result<i64, Status>>,
    current: i64,
}

pub struct MockConnector {
    pub publish: MockListener<PublishRequest, PublishResponse>,
    pub subscribe: MockListener<SubscribeRequest, SubscribeResponse>,
    pub commit: MockListener<StreamingCommitCursorRequest, StreamingCommitCursorResponse>,
    pub assignment: MockListener<PartitionAssignmentRequest, PartitionAssignment>,
    partition_counts: Mutex<PartitionCounts>,
    partition_count_calls: AtomicUsize,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            publish: MockListener::new(),
            subscribe: MockListener::new(),
            commit: MockListener::new(),
            assignment: MockListener::new(),
            partition_counts: Mutex::new(PartitionCounts {
                scripted: VecDeque::new(),
                current: 1,
            }),
            partition_count_calls: AtomicUsize::new(0),
        })
    }

    /// The partition count returned once scripted results run out.
    pub fn set_partition_count(&self, count: i64) {
        self.partition_counts.lock().current = count;
    }

    /// Queue a one-off result for the next partition count request.
    pub fn push_partition_count(&self, result: Result<i64, Status>) {
        self.partition_counts.lock().scripted.push_back(result);
    }

    pub fn partition_count_calls(&self) -> usize {
        self.partition_count_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn publish(
        &self,
        topic: &TopicPartition,
    ) -> WireResult<BidiStream<PublishRequest, PublishResponse>> {
        self.publish.open(topic.to_string())
    }

    async fn subscribe(
        &self,
        subscription: &SubscriptionPartition,
    ) -> WireResult<BidiStream<SubscribeRequest, SubscribeResponse>> {
        self.subscribe.open(subscription.to_string())
    }

    async fn commit_cursor(
        &self,
        subscription: &SubscriptionPartition,
    ) -> WireResult<BidiStream<StreamingCommitCursorRequest, StreamingCommitCursorResponse>> {
        self.commit.open(subscription.to_string())
    }

    async fn assign_partitions(
        &self,
        subscription: &SubscriptionPath,
    ) -> WireResult<BidiStream<PartitionAssignmentRequest, PartitionAssignment>> {
        self.assignment.open(subscription.to_string())
    }

    async fn partition_count(&self, _topic: &TopicPath) -> WireResult<i64> {
        self.partition_count_calls.fetch_add(1, Ordering::SeqCst);
        let mut counts = self.partition_counts.lock();
        match counts.scripted.pop_front() {
            Some(result) => result.map_err(Into::into),
            None => Ok(counts.current),
        }
    }
}

//! The RPC surface the runtime depends on.
//!
//! Every stream is opened through a [Connector], which hands back a
//! [BidiStream]: a sender for requests and a stream of responses. The
//! tonic-backed [GrpcConnector] talks to a real service, while the `mocks`
//! feature provides an in-memory connector for tests.

mod grpc;
#[cfg(any(test, feature = "mocks"))]
pub mod mock;

use std::pin::Pin;

use async_trait::async_trait;
pub use grpc::GrpcConnector;
use tokio::sync::mpsc;
use tokio_stream::Stream;
use tonic::Status;

use crate::{
    error::WireResult,
    proto::tributary::{
        PartitionAssignment, PartitionAssignmentRequest, PublishRequest, PublishResponse,
        StreamingCommitCursorRequest, StreamingCommitCursorResponse, SubscribeRequest,
        SubscribeResponse,
    },
    resources::{SubscriptionPartition, SubscriptionPath, TopicPartition, TopicPath},
};

pub type MessageStream<T> = Pin<Box<dyn Stream<Item = Result<T, Status>> + Send>>;

/// One open bidirectional stream. Dropping `requests` half-closes it.
pub struct BidiStream<Req, Resp> {
    pub requests: mpsc::UnboundedSender<Req>,
    pub responses: MessageStream<Resp>,
}

/// Opens streams against the service.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn publish(
        &self,
        topic: &TopicPartition,
    ) -> WireResult<BidiStream<PublishRequest, PublishResponse>>;

    async fn subscribe(
        &self,
        subscription: &SubscriptionPartition,
    ) -> WireResult<BidiStream<SubscribeRequest, SubscribeResponse>>;

    async fn commit_cursor(
        &self,
        subscription: &SubscriptionPartition,
    ) -> WireResult<BidiStream<StreamingCommitCursorRequest, StreamingCommitCursorResponse>>;

    async fn assign_partitions(
        &self,
        subscription: &SubscriptionPath,
    ) -> WireResult<BidiStream<PartitionAssignmentRequest, PartitionAssignment>>;

    /// The current number of partitions of a topic.
    async fn partition_count(&self, topic: &TopicPath) -> WireResult<i64>;
}

use std::future::Future;

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tonic::{
    codec::Streaming,
    transport::{Channel, Endpoint},
    Request, Response, Status,
};
use tracing::debug;

use super::{BidiStream, Connector};
use crate::{
    constants::{CLIENT_INFO_HEADER, ROUTING_METADATA_HEADER},
    error::{WireError, WireResult},
    proto::tributary::{
        admin_service_client::AdminServiceClient, cursor_service_client::CursorServiceClient,
        partition_assignment_service_client::PartitionAssignmentServiceClient,
        publisher_service_client::PublisherServiceClient,
        subscriber_service_client::SubscriberServiceClient, GetTopicPartitionsRequest,
        PartitionAssignment, PartitionAssignmentRequest, PublishRequest, PublishResponse,
        StreamingCommitCursorRequest, StreamingCommitCursorResponse, SubscribeRequest,
        SubscribeResponse,
    },
    resources::{SubscriptionPartition, SubscriptionPath, TopicPartition, TopicPath},
};

/// Opens streams over a shared tonic [Channel].
#[derive(Debug, Clone)]
pub struct GrpcConnector {
    channel: Channel,
}

impl GrpcConnector {
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }

    /// Create a connector whose channel connects on first use.
    pub fn lazy(endpoint: impl Into<String>) -> WireResult<Self> {
        let endpoint = Endpoint::from_shared(endpoint.into())
            .map_err(|e| WireError::InvalidSettings(format!("invalid endpoint: {e}")))?;
        Ok(Self::new(endpoint.connect_lazy()))
    }
}

/// Attach routing and client metadata to a request.
fn with_metadata<T>(message: T, params: &str) -> Request<T> {
    let mut request = Request::new(message);
    let metadata = request.metadata_mut();
    if let Ok(value) = params.parse() {
        metadata.insert(ROUTING_METADATA_HEADER, value);
    }
    if let Ok(value) = concat!("tributary/", env!("CARGO_PKG_VERSION")).parse() {
        metadata.insert(CLIENT_INFO_HEADER, value);
    }
    request
}

/// Start a bidirectional call. The call itself is driven by the returned
/// response stream, so requests can be queued before the server responds.
fn bidi<Req, Resp, F, Fut>(call: F) -> BidiStream<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
    F: FnOnce(UnboundedReceiverStream<Req>) -> Fut,
    Fut: Future<Output = Result<Response<Streaming<Resp>>, Status>> + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let call = call(UnboundedReceiverStream::new(rx));
    let responses = stream! {
        match call.await {
            Ok(response) => {
                let mut inner = response.into_inner();
                while let Some(item) = inner.next().await {
                    yield item;
                }
            }
            Err(status) => yield Err(status),
        }
    };
    BidiStream {
        requests: tx,
        responses: Box::pin(responses),
    }
}

fn topic_params(topic: &TopicPartition) -> String {
    format!("partition={}&topic={}", topic.partition, topic.path)
}

fn subscription_params(subscription: &SubscriptionPartition) -> String {
    format!(
        "partition={}&subscription={}",
        subscription.partition, subscription.path
    )
}

#[async_trait]
impl Connector for GrpcConnector {
    async fn publish(
        &self,
        topic: &TopicPartition,
    ) -> WireResult<BidiStream<PublishRequest, PublishResponse>> {
        debug!("Opening publish stream for {}", topic);
        let mut client = PublisherServiceClient::new(self.channel.clone());
        let params = topic_params(topic);
        Ok(bidi(move |requests| async move {
            client.publish(with_metadata(requests, &params)).await
        }))
    }

    async fn subscribe(
        &self,
        subscription: &SubscriptionPartition,
    ) -> WireResult<BidiStream<SubscribeRequest, SubscribeResponse>> {
        debug!("Opening subscribe stream for {}", subscription);
        let mut client = SubscriberServiceClient::new(self.channel.clone());
        let params = subscription_params(subscription);
        Ok(bidi(move |requests| async move {
            client.subscribe(with_metadata(requests, &params)).await
        }))
    }

    async fn commit_cursor(
        &self,
        subscription: &SubscriptionPartition,
    ) -> WireResult<BidiStream<StreamingCommitCursorRequest, StreamingCommitCursorResponse>> {
        debug!("Opening commit stream for {}", subscription);
        let mut client = CursorServiceClient::new(self.channel.clone());
        let params = subscription_params(subscription);
        Ok(bidi(move |requests| async move {
            client
                .streaming_commit_cursor(with_metadata(requests, &params))
                .await
        }))
    }

    async fn assign_partitions(
        &self,
        subscription: &SubscriptionPath,
    ) -> WireResult<BidiStream<PartitionAssignmentRequest, PartitionAssignment>> {
        debug!("Opening assignment stream for {}", subscription);
        let mut client = PartitionAssignmentServiceClient::new(self.channel.clone());
        let params = format!("subscription={subscription}");
        Ok(bidi(move |requests| async move {
            client
                .assign_partitions(with_metadata(requests, &params))
                .await
        }))
    }

    async fn partition_count(&self, topic: &TopicPath) -> WireResult<i64> {
        let mut client = AdminServiceClient::new(self.channel.clone());
        let request = with_metadata(
            GetTopicPartitionsRequest {
                name: topic.to_string(),
            },
            &format!("name={topic}"),
        );
        let response = client.get_topic_partitions(request).await?;
        Ok(response.into_inner().partition_count)
    }
}

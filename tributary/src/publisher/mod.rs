//! A [Publisher] sends messages to the partitions of a topic.
//!
//! Each partition gets its own [SinglePartitionPublisher], which batches
//! messages and keeps a single publish stream connected. Messages are
//! assigned a partition by a [MessageRouter]: messages with an ordering key
//! always land on the same partition, keyless messages are spread
//! round-robin.
//!
//! Example usage:
//!
//! ``` no_run
//! # use std::sync::Arc;
//! # use tributary::{GrpcConnector, Publisher, PublishSettings, WireResult};
//! # use tributary::proto::tributary::PubSubMessage;
//! #
//! # async fn inner() -> WireResult<()> {
//! let connector = Arc::new(GrpcConnector::lazy("http://localhost:8080")?);
//! let topic = "projects/my-project/locations/us-east1-b/topics/my-topic".parse()?;
//! let publisher = Publisher::new(connector, topic, PublishSettings::default())?;
//! publisher.start();
//! publisher.wait_started().await?;
//!
//! // resolves once the server has sequenced the message
//! let metadata = publisher
//!     .publish_async(PubSubMessage {
//!         key: b"order-1234".to_vec(),
//!         data: b"shipped".to_vec(),
//!     })
//!     .await?;
//! println!("published at {}", metadata);
//!
//! // flush outstanding messages
//! publisher.stop();
//! publisher.wait_stopped().await
//! # }
//! ```

mod batcher;
mod partition_count;
mod result;
mod router;
mod routing;
mod single;

pub use batcher::PublishResultFn;
pub use partition_count::{PartitionCountReceiver, PartitionCountWatcher};
pub use result::PublishResult;
pub use router::{
    DefaultRouter, DefaultRouterFactory, HashingRouter, MessageRouter, MessageRouterFactory,
    RoundRobinRouter,
};
pub use routing::RoutingPublisher;
pub use single::SinglePartitionPublisher;

/// The publisher for a whole topic.
pub type Publisher = RoutingPublisher;

#[cfg(test)]
pub(crate) mod test_utils {
    use crate::{
        proto::tributary::{
            publish_response::ResponseType, Cursor, InitialPublishResponse,
            MessagePublishResponse, PubSubMessage, PublishResponse,
        },
        resources::TopicPath,
    };

    pub fn topic() -> TopicPath {
        "projects/p/locations/l/topics/t".parse().unwrap()
    }

    pub fn message(data: &str) -> PubSubMessage {
        PubSubMessage {
            key: vec![],
            data: data.as_bytes().to_vec(),
        }
    }

    pub fn initial_response() -> PublishResponse {
        PublishResponse {
            response_type: Some(ResponseType::InitialResponse(InitialPublishResponse {})),
        }
    }

    pub fn message_response(start_offset: i64) -> PublishResponse {
        PublishResponse {
            response_type: Some(ResponseType::MessageResponse(MessagePublishResponse {
                start_cursor: Some(Cursor {
                    offset: start_offset,
                }),
            })),
        }
    }
}

//! # Tributary
//!
//! Tributary is the client-side transport of a partitioned, ordered pub/sub
//! service. It keeps one bidirectional stream per partition connected,
//! reconnecting with backoff when the connection drops, and takes care of
//! everything needed to keep delivery ordered and exactly-once-committed
//! across those reconnects.
//!
//! ## Publishing
//!
//! A [Publisher] batches messages per partition and resends every
//! unconfirmed batch, in order, after a reconnect. Messages with the same
//! ordering key always land on the same partition. See [publisher].
//!
//! ## Subscribing
//!
//! A [Subscriber] delivers messages in offset order and commits the offsets
//! acked by the application. Delivery is gated by flow control: the server
//! may only send as many messages and bytes as the client has granted, and
//! acking a message grants its tokens back. See [subscriber].
//!
//! ## Lifecycle
//!
//! Publishers and subscribers are [Service]s: `start()` them, wait for them
//! to become active, and `stop()` them to flush outstanding work. The first
//! fatal error is kept and returned when waiting for them to stop.
//!
//! ## Crate feature flags
//!
//! - `mocks`: An in-memory [transport::Connector] for testing code which
//! uses this crate.

pub(crate) mod acks;
pub(crate) mod committer;
pub mod constants;
pub mod error;
pub(crate) mod flow_control;
pub(crate) mod periodic_task;
pub mod proto;
pub mod publisher;
pub mod resources;
pub(crate) mod retry;
pub mod service;
pub mod settings;
pub(crate) mod stream;
pub mod subscriber;
pub mod transport;

pub use error::{WireError, WireResult};
pub use publisher::{PublishResult, Publisher};
pub use resources::{
    MessageMetadata, SubscriptionPartition, SubscriptionPath, TopicPartition, TopicPath,
};
pub use service::{Service, ServiceStatus};
pub use settings::{PublishSettings, ReceiveSettings};
pub use subscriber::{new_subscriber, ReceivedMessage, Subscriber};
pub use transport::{Connector, GrpcConnector};

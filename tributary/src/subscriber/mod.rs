//! A [Subscriber] receives the messages of a subscription.
//!
//! Each partition is received by a [SinglePartitionSubscriber], which keeps
//! a subscribe stream and a commit stream connected. Messages are handed to
//! the [MessageReceiver] in offset order, and the offsets acked by the
//! receiver are committed in order: an offset is only committed once every
//! message before it has been acked.
//!
//! Partitions are either listed explicitly in [ReceiveSettings::partitions],
//! or assigned by the server when the list is empty.
//!
//! Example usage:
//!
//! ``` no_run
//! # use std::sync::Arc;
//! # use tributary::{
//! #     new_subscriber, GrpcConnector, ReceiveSettings, ReceivedMessage, Service, Subscriber,
//! #     WireResult,
//! # };
//! #
//! # async fn inner() -> WireResult<()> {
//! let connector = Arc::new(GrpcConnector::lazy("http://localhost:8080")?);
//! let subscription = "projects/my-project/locations/us-east1-b/subscriptions/my-sub".parse()?;
//! let subscriber = new_subscriber(
//!     connector,
//!     subscription,
//!     ReceiveSettings::default(),
//!     Arc::new(|message: ReceivedMessage| {
//!         println!("received {}", message.metadata());
//!         message.ack();
//!     }),
//!     None,
//! )?;
//! subscriber.start();
//! subscriber.wait_started().await?;
//!
//! // commit what has been acked, then close the streams
//! subscriber.stop();
//! subscriber.wait_stopped().await
//! # }
//! ```

mod assigner;
mod assigning;
mod delivery;
mod message;
mod multi;
mod single;
mod stream;

use std::sync::Arc;

pub use assigner::PartitionSet;
pub use assigning::AssigningSubscriber;
use async_trait::async_trait;
pub use delivery::MessageReceiver;
pub use message::ReceivedMessage;
pub use multi::MultiPartitionSubscriber;
pub use single::SinglePartitionSubscriber;

use crate::{
    error::WireResult,
    resources::SubscriptionPath,
    service::Service,
    settings::ReceiveSettings,
    transport::Connector,
};

/// Called with the partitions held before and after each assignment. An
/// error stops the subscriber.
pub type ReassignmentHandler =
    Arc<dyn Fn(&PartitionSet, &PartitionSet) -> WireResult<()> + Send + Sync>;

#[async_trait]
pub trait Subscriber: Service {
    /// Wait until every partition is connected. Returns the error if the
    /// subscriber stopped first.
    async fn wait_started(&self) -> WireResult<()>;

    /// Wait until the subscriber has stopped, returning the first error.
    async fn wait_stopped(&self) -> WireResult<()>;

    /// Stop without waiting for outstanding messages to be acked. Offsets
    /// acked so far are still committed.
    fn terminate(&self);

    /// Whether messages of `partition` are currently being received.
    fn partition_active(&self, partition: i64) -> bool;
}

/// Create a subscriber for the partitions listed in `settings`, or for
/// those assigned by the server if none are listed.
pub fn new_subscriber(
    connector: Arc<dyn Connector>,
    subscription: SubscriptionPath,
    settings: ReceiveSettings,
    receiver: MessageReceiver,
    reassignment: Option<ReassignmentHandler>,
) -> WireResult<Arc<dyn Subscriber>> {
    settings.validate()?;
    let subscriber: Arc<dyn Subscriber> = if settings.partitions.is_empty() {
        AssigningSubscriber::new(connector, subscription, settings, receiver, reassignment)?
    } else {
        MultiPartitionSubscriber::new(connector, subscription, &settings, receiver)?
    };
    Ok(subscriber)
}


#[cfg(test)]
mod tests {
    use std::{collections::HashMap, time::Duration};

    use parking_lot::Mutex;
    use tokio::sync::mpsc;

    use super::{test_utils::*, *};
    use crate::{
        error::WireError,
        proto::tributary::{
            streaming_commit_cursor_response, PartitionAssignment, PartitionAssignmentRequest,
            SequencedCommitCursorResponse, StreamingCommitCursorRequest,
            StreamingCommitCursorResponse, SubscribeRequest, SubscribeResponse,
        },
        resources::SubscriptionPartition,
        service::ServiceStatus,
        transport::mock::{MockConnector, ServerStream},
    };

    type SubscribeServer = ServerStream<SubscribeRequest, SubscribeResponse>;
    type CommitServer = ServerStream<StreamingCommitCursorRequest, StreamingCommitCursorResponse>;

    fn target(partition: i64) -> String {
        SubscriptionPartition {
            path: subscription_path(),
            partition,
        }
        .to_string()
    }

    /// Accept `count` subscribe and commit streams, answering their initial
    /// requests. Keyed by target.
    async fn connect_partitions(
        connector: &MockConnector,
        count: usize,
    ) -> (HashMap<String, SubscribeServer>, HashMap<String, CommitServer>) {
        let mut subscribe = HashMap::new();
        let mut commit = HashMap::new();
        for _ in 0..count {
            let mut server = connector.subscribe.accept().await.unwrap();
            server.recv().await.unwrap();
            server.respond(initial_response());
            subscribe.insert(server.target.clone(), server);

            let mut server = connector.commit.accept().await.unwrap();
            server.recv().await.unwrap();
            server.respond(commit_initial_response());
            commit.insert(server.target.clone(), server);
        }
        (subscribe, commit)
    }

    fn collect_messages() -> (MessageReceiver, mpsc::UnboundedReceiver<ReceivedMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(move |message: ReceivedMessage| {
                let _ = tx.send(message);
            }),
            rx,
        )
    }

    #[tokio::test]
    async fn test_invalid_settings() {
        let (receiver, _) = collect_messages();
        let result = new_subscriber(
            MockConnector::new(),
            subscription_path(),
            ReceiveSettings {
                partitions: vec![1, 1],
                ..Default::default()
            },
            receiver,
            None,
        );
        assert!(matches!(result, Err(WireError::InvalidSettings(_))));
    }

    #[tokio::test]
    async fn test_fixed_partitions() {
        let connector = MockConnector::new();
        let (receiver, mut messages) = collect_messages();
        let subscriber = new_subscriber(
            connector.clone(),
            subscription_path(),
            ReceiveSettings {
                partitions: vec![0, 1],
                ..Default::default()
            },
            receiver,
            None,
        )
        .unwrap();
        subscriber.start();
        let (subscribe, mut commit) = connect_partitions(&connector, 2).await;
        subscriber.wait_started().await.unwrap();
        assert!(subscriber.partition_active(0));
        assert!(subscriber.partition_active(1));
        assert!(!subscriber.partition_active(2));

        subscribe[&target(1)].respond(messages_response(&[(40, 10)]));
        let message = messages.recv().await.unwrap();
        assert_eq!(message.partition, 1);
        assert_eq!(message.offset(), 40);
        message.ack();

        let server = commit.get_mut(&target(1)).unwrap();
        assert_eq!(
            server.recv().await.unwrap(),
            StreamingCommitCursorRequest::commit(41)
        );
        subscriber.stop();
        server.respond(StreamingCommitCursorResponse {
            request: Some(streaming_commit_cursor_response::Request::Commit(
                SequencedCommitCursorResponse {
                    acknowledged_commits: 1,
                },
            )),
        });
        subscriber.wait_stopped().await.unwrap();
        assert_eq!(subscriber.status(), ServiceStatus::Terminated);
    }

    #[tokio::test]
    async fn test_partition_failure_stops_all() {
        let connector = MockConnector::new();
        let (receiver, _messages) = collect_messages();
        let subscriber = new_subscriber(
            connector.clone(),
            subscription_path(),
            ReceiveSettings {
                partitions: vec![0, 1],
                ..Default::default()
            },
            receiver,
            None,
        )
        .unwrap();
        subscriber.start();
        let (mut subscribe, _commit) = connect_partitions(&connector, 2).await;
        subscriber.wait_started().await.unwrap();

        subscribe[&target(0)].respond(messages_response(&[]));
        assert_eq!(
            subscriber.wait_stopped().await,
            Err(WireError::ServerNoMessages)
        );
        let sibling = subscribe.get_mut(&target(1)).unwrap();
        assert!(sibling.closed().await);
    }

    #[tokio::test]
    async fn test_assignment_changes() {
        let connector = MockConnector::new();
        let (receiver, _messages) = collect_messages();
        let reassignments = Arc::new(Mutex::new(vec![]));
        let recorded = Arc::clone(&reassignments);
        let subscriber = new_subscriber(
            connector.clone(),
            subscription_path(),
            ReceiveSettings::default(),
            receiver,
            Some(Arc::new(
                move |before: &PartitionSet, after: &PartitionSet| -> WireResult<()> {
                    recorded.lock().push((before.clone(), after.clone()));
                    Ok(())
                },
            )),
        )
        .unwrap();
        subscriber.start();

        let mut assignment = connector.assignment.accept().await.unwrap();
        assignment.recv().await.unwrap();
        subscriber.wait_started().await.unwrap();
        assert!(!subscriber.partition_active(1));

        assignment.respond(PartitionAssignment {
            partitions: vec![1, 2],
        });
        let (mut subscribe, _commit) = connect_partitions(&connector, 2).await;
        assert_eq!(
            assignment.recv().await.unwrap(),
            PartitionAssignmentRequest::ack()
        );
        assert!(subscriber.partition_active(1));
        assert!(subscriber.partition_active(2));

        // partition 1 is unassigned: its streams close before the ack
        assignment.respond(PartitionAssignment {
            partitions: vec![2],
        });
        assert!(subscribe.get_mut(&target(1)).unwrap().closed().await);
        assert_eq!(
            assignment.recv().await.unwrap(),
            PartitionAssignmentRequest::ack()
        );
        assert!(!subscriber.partition_active(1));
        assert!(subscriber.partition_active(2));
        assert_eq!(subscriber.status(), ServiceStatus::Active);
        assert_eq!(
            *reassignments.lock(),
            vec![
                (PartitionSet::default(), [1, 2].into_iter().collect()),
                ([1, 2].into_iter().collect(), [2].into_iter().collect()),
            ]
        );

        subscriber.stop();
        subscriber.wait_stopped().await.unwrap();
    }

    #[tokio::test]
    async fn test_reassignment_handler_error() {
        let connector = MockConnector::new();
        let (receiver, _messages) = collect_messages();
        let subscriber = new_subscriber(
            connector.clone(),
            subscription_path(),
            ReceiveSettings::default(),
            receiver,
            Some(Arc::new(
                |_: &PartitionSet, _: &PartitionSet| -> WireResult<()> {
                    Err(WireError::Reassignment("not now".to_string()))
                },
            )),
        )
        .unwrap();
        subscriber.start();
        let mut assignment = connector.assignment.accept().await.unwrap();
        assignment.recv().await.unwrap();
        assignment.respond(PartitionAssignment { partitions: vec![] });
        assert_eq!(
            subscriber.wait_stopped().await,
            Err(WireError::Reassignment("not now".to_string()))
        );
        assert!(tokio::time::timeout(Duration::from_millis(50), assignment.recv())
            .await
            .map_or(true, |r| r.is_none()));
    }
}

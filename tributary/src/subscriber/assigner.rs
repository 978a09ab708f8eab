use std::{
    collections::BTreeSet,
    sync::{Arc, Weak},
    time::Duration,
};

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    error::{WireError, WireResult},
    proto::tributary::{PartitionAssignment, PartitionAssignmentRequest},
    resources::SubscriptionPath,
    service::{AbstractService, Service, ServiceHandle, ServiceStatus, StatusChangeReceiver},
    stream::{RetryableStream, StreamHandler, StreamStatus},
    transport::{BidiStream, Connector},
};

/// A set of partition numbers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionSet(BTreeSet<i64>);

impl PartitionSet {
    pub fn contains(&self, partition: i64) -> bool {
        self.0.contains(&partition)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Partitions in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = i64> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<i64> for PartitionSet {
    fn from_iter<I: IntoIterator<Item = i64>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl From<&PartitionAssignment> for PartitionSet {
    fn from(assignment: &PartitionAssignment) -> Self {
        assignment.partitions.iter().copied().collect()
    }
}

/// Applies a new assignment. The assignment is acked to the server once the
/// returned future completes successfully.
pub type AssignmentReceiver =
    Arc<dyn Fn(PartitionSet) -> BoxFuture<'static, WireResult<()>> + Send + Sync>;

/// Receives the partitions assigned to this client from the server.
pub(crate) struct Assigner {
    connector: Arc<dyn Connector>,
    subscription: SubscriptionPath,
    client_id: Uuid,
    receiver: AssignmentReceiver,
    stream: Arc<RetryableStream<Self>>,
    state: Mutex<AbstractService>,
}

impl Assigner {
    pub fn new(
        connector: Arc<dyn Connector>,
        subscription: SubscriptionPath,
        timeout: Duration,
        receiver: AssignmentReceiver,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| Self {
            connector,
            subscription,
            client_id: Uuid::new_v4(),
            receiver,
            stream: RetryableStream::new(weak.clone(), timeout),
            state: Mutex::new(AbstractService::new()),
        })
    }

    fn shutdown(&self, err: Option<WireError>) {
        let mut service = self.state.lock();
        if let Some(err) = &err {
            warn!("Partition assigner for {} failed: {}", self.subscription, err);
        }
        if service.update_status(ServiceStatus::Terminated, err) {
            self.stream.stop();
        }
    }
}

#[async_trait]
impl StreamHandler for Assigner {
    type Request = PartitionAssignmentRequest;
    type Response = PartitionAssignment;

    async fn new_stream(&self) -> WireResult<BidiStream<Self::Request, Self::Response>> {
        self.connector.assign_partitions(&self.subscription).await
    }

    fn initial_request(&self) -> (Self::Request, bool) {
        (
            PartitionAssignmentRequest::initial(
                self.subscription.to_string(),
                self.client_id.as_bytes().to_vec(),
            ),
            false,
        )
    }

    fn validate_initial_response(&self, _response: &Self::Response) -> WireResult<()> {
        // no initial response is expected
        Ok(())
    }

    fn on_stream_status_change(&self, status: StreamStatus) {
        match status {
            StreamStatus::Connected => {
                self.state
                    .lock()
                    .update_status(ServiceStatus::Active, None);
            }
            StreamStatus::Terminated => self.shutdown(self.stream.error()),
            StreamStatus::Uninitialized | StreamStatus::Reconnecting => {}
        }
    }

    async fn on_response(&self, assignment: Self::Response) {
        if self.state.lock().status() >= ServiceStatus::Terminating {
            return;
        }
        let partitions = PartitionSet::from(&assignment);
        debug!(
            "Assigned partitions {:?} of {}",
            assignment.partitions, self.subscription
        );
        match (self.receiver)(partitions).await {
            Ok(()) => {
                self.stream.send(PartitionAssignmentRequest::ack());
            }
            Err(err) => self.shutdown(Some(err)),
        }
    }
}

impl Service for Assigner {
    fn start(&self) {
        if self.state.lock().update_status(ServiceStatus::Starting, None) {
            self.stream.start();
        }
    }

    fn stop(&self) {
        self.shutdown(None);
    }

    fn status(&self) -> ServiceStatus {
        self.state.lock().status()
    }

    fn error(&self) -> Option<WireError> {
        self.state.lock().error()
    }

    fn handle(&self) -> ServiceHandle {
        self.state.lock().handle()
    }

    fn add_status_change_receiver(&self, handle: ServiceHandle, receiver: StatusChangeReceiver) {
        self.state.lock().add_receiver(handle, receiver)
    }

    fn remove_status_change_receiver(&self, handle: ServiceHandle) {
        self.state.lock().remove_receiver(handle)
    }
}

use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;

use super::{stream::SubscribeStream, MessageReceiver};
use crate::{
    acks::AckTracker,
    committer::Committer,
    error::{WireError, WireResult},
    flow_control::FlowControlTokens,
    resources::SubscriptionPartition,
    service::{CompositeService, Service, ServiceHandle, ServiceStatus, StatusChangeReceiver},
    settings::ReceiveSettings,
    transport::Connector,
};

/// Receives one partition and commits the offsets acked by the receiver.
pub struct SinglePartitionSubscriber {
    subscription: SubscriptionPartition,
    committer: Arc<Committer>,
    composite: Arc<CompositeService>,
}

impl SinglePartitionSubscriber {
    pub fn new(
        connector: Arc<dyn Connector>,
        subscription: SubscriptionPartition,
        settings: &ReceiveSettings,
        receiver: MessageReceiver,
    ) -> WireResult<Arc<Self>> {
        let acks = Arc::new(Mutex::new(AckTracker::default()));
        let committer = Committer::new(
            Arc::clone(&connector),
            subscription.clone(),
            Arc::clone(&acks),
            settings.timeout,
        );
        let reset_committer = Arc::clone(&committer);
        let stream = SubscribeStream::new(
            connector,
            subscription.clone(),
            FlowControlTokens {
                bytes: settings.max_outstanding_bytes,
                messages: settings.max_outstanding_messages,
            },
            settings.timeout,
            acks,
            receiver,
            Arc::new(move || {
                let committer = Arc::clone(&reset_committer);
                async move { committer.blocking_reset().await }.boxed()
            }),
        )?;
        let composite = CompositeService::new();
        composite.add_services(vec![stream as Arc<dyn Service>, committer.clone()])?;
        Ok(Arc::new(Self {
            subscription,
            committer,
            composite,
        }))
    }

    pub fn partition(&self) -> i64 {
        self.subscription.partition
    }

    /// Stop without waiting for outstanding acks. Offsets acked so far are
    /// still committed.
    pub fn terminate(&self) {
        self.committer.terminate();
        self.composite.initiate_shutdown(ServiceStatus::Terminating, None);
    }

    pub async fn wait_started(&self) -> WireResult<()> {
        self.composite.wait_started().await
    }

    pub async fn wait_stopped(&self) -> WireResult<()> {
        self.composite.wait_stopped().await
    }
}

impl Service for SinglePartitionSubscriber {
    fn start(&self) {
        self.composite.start()
    }

    /// Stop receiving, then commit the acked offset.
    fn stop(&self) {
        self.composite.stop()
    }

    fn status(&self) -> ServiceStatus {
        self.composite.status()
    }

    fn error(&self) -> Option<WireError> {
        self.composite.error()
    }

    fn handle(&self) -> ServiceHandle {
        self.composite.handle()
    }

    fn add_status_change_receiver(&self, handle: ServiceHandle, receiver: StatusChangeReceiver) {
        self.composite.add_status_change_receiver(handle, receiver)
    }

    fn remove_status_change_receiver(&self, handle: ServiceHandle) {
        self.composite.remove_status_change_receiver(handle)
    }
}

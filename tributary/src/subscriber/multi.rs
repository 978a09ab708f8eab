use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;

use super::{single::SinglePartitionSubscriber, MessageReceiver, Subscriber};
use crate::{
    error::{WireError, WireResult},
    resources::{SubscriptionPartition, SubscriptionPath},
    service::{CompositeService, Service, ServiceHandle, ServiceStatus, StatusChangeReceiver},
    settings::ReceiveSettings,
    transport::Connector,
};

/// Receives a fixed set of partitions. If any partition fails, they all
/// stop.
pub struct MultiPartitionSubscriber {
    subscribers: HashMap<i64, Arc<SinglePartitionSubscriber>>,
    composite: Arc<CompositeService>,
}

impl MultiPartitionSubscriber {
    pub fn new(
        connector: Arc<dyn Connector>,
        subscription: SubscriptionPath,
        settings: &ReceiveSettings,
        receiver: MessageReceiver,
    ) -> WireResult<Arc<Self>> {
        let composite = CompositeService::new();
        let mut subscribers = HashMap::with_capacity(settings.partitions.len());
        for &partition in &settings.partitions {
            let subscriber = SinglePartitionSubscriber::new(
                Arc::clone(&connector),
                SubscriptionPartition {
                    path: subscription.clone(),
                    partition,
                },
                settings,
                Arc::clone(&receiver),
            )?;
            composite.add_services(vec![subscriber.clone() as Arc<dyn Service>])?;
            subscribers.insert(partition, subscriber);
        }
        Ok(Arc::new(Self {
            subscribers,
            composite,
        }))
    }
}

#[async_trait]
impl Subscriber for MultiPartitionSubscriber {
    async fn wait_started(&self) -> WireResult<()> {
        self.composite.wait_started().await
    }

    async fn wait_stopped(&self) -> WireResult<()> {
        self.composite.wait_stopped().await
    }

    fn terminate(&self) {
        for subscriber in self.subscribers.values() {
            subscriber.terminate();
        }
        self.composite.initiate_shutdown(ServiceStatus::Terminating, None);
    }

    fn partition_active(&self, partition: i64) -> bool {
        self.subscribers.contains_key(&partition)
    }
}

impl Service for MultiPartitionSubscriber {
    fn start(&self) {
        self.composite.start()
    }

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

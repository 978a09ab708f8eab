use std::{
    collections::HashMap,
    sync::{Arc, Weak},
};

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use tracing::{info, warn};

use super::{
    assigner::{Assigner, PartitionSet},
    single::SinglePartitionSubscriber,
    MessageReceiver, ReassignmentHandler, Subscriber,
};
use crate::{
    error::{WireError, WireResult},
    resources::{SubscriptionPartition, SubscriptionPath},
    service::{CompositeService, Service, ServiceHandle, ServiceStatus, StatusChangeReceiver},
    settings::ReceiveSettings,
    transport::Connector,
};

/// Receives whichever partitions the server assigns to this client.
///
/// Each assignment starts subscribers for newly assigned partitions and
/// terminates those for partitions taken away. The assignment is only acked
/// once the removed partitions have committed and stopped, so another
/// client never receives a partition this one is still committing.
pub struct AssigningSubscriber {
    connector: Arc<dyn Connector>,
    subscription: SubscriptionPath,
    settings: ReceiveSettings,
    receiver: MessageReceiver,
    reassignment: Option<ReassignmentHandler>,
    composite: Arc<CompositeService>,
    subscribers: Mutex<HashMap<i64, Arc<SinglePartitionSubscriber>>>,
}

impl AssigningSubscriber {
    pub fn new(
        connector: Arc<dyn Connector>,
        subscription: SubscriptionPath,
        settings: ReceiveSettings,
        receiver: MessageReceiver,
        reassignment: Option<ReassignmentHandler>,
    ) -> WireResult<Arc<Self>> {
        let mut assigner = None;
        let subscriber = Arc::new_cyclic(|weak: &Weak<Self>| {
            let weak = weak.clone();
            assigner = Some(Assigner::new(
                Arc::clone(&connector),
                subscription.clone(),
                settings.timeout,
                Arc::new(move |partitions: PartitionSet| {
                    let weak = weak.clone();
                    async move {
                        match weak.upgrade() {
                            Some(subscriber) => subscriber.handle_assignment(partitions).await,
                            None => Err(WireError::ServiceStopped),
                        }
                    }
                    .boxed()
                }),
            ));
            Self {
                connector,
                subscription,
                settings,
                receiver,
                reassignment,
                composite: CompositeService::new(),
                subscribers: Mutex::new(HashMap::new()),
            }
        });
        if let Some(assigner) = assigner {
            subscriber
                .composite
                .add_services(vec![assigner as Arc<dyn Service>])?;
        }
        Ok(subscriber)
    }

    async fn handle_assignment(&self, after: PartitionSet) -> WireResult<()> {
        if self.composite.status() >= ServiceStatus::Terminating {
            return Ok(());
        }
        let before: PartitionSet = self.subscribers.lock().keys().copied().collect();
        let mut added = vec![];
        for partition in after.iter().filter(|p| !before.contains(*p)) {
            added.push(SinglePartitionSubscriber::new(
                Arc::clone(&self.connector),
                SubscriptionPartition {
                    path: self.subscription.clone(),
                    partition,
                },
                &self.settings,
                Arc::clone(&self.receiver),
            )?);
        }
        let services = added
            .iter()
            .map(|subscriber| Arc::clone(subscriber) as Arc<dyn Service>)
            .collect();
        if let Err(err) = self.composite.add_services(services) {
            // the assignment raced with shutdown
            if self.composite.status() >= ServiceStatus::Terminating {
                return Ok(());
            }
            return Err(err);
        }
        info!(
            "Subscriber for {} assigned partitions {:?}",
            self.subscription,
            after.iter().collect::<Vec<_>>()
        );

        let removed: Vec<_> = {
            let mut subscribers = self.subscribers.lock();
            for subscriber in added {
                subscribers.insert(subscriber.partition(), subscriber);
            }
            before
                .iter()
                .filter(|p| !after.contains(*p))
                .filter_map(|p| subscribers.remove(&p))
                .collect()
        };
        for subscriber in &removed {
            // untrack first, so its shutdown does not stop the siblings
            self.composite.remove_service(subscriber.handle());
            subscriber.terminate();
        }
        for subscriber in removed {
            if let Err(err) = subscriber.wait_stopped().await {
                warn!(
                    "Subscriber for unassigned partition {} of {} failed: {}",
                    subscriber.partition(),
                    self.subscription,
                    err
                );
            }
        }

        if let Some(handler) = &self.reassignment {
            handler(&before, &after)?;
        }
        Ok(())
    }
}

#[async_trait]
impl Subscriber for AssigningSubscriber {
    async fn wait_started(&self) -> WireResult<()> {
        self.composite.wait_started().await
    }

    async fn wait_stopped(&self) -> WireResult<()> {
        self.composite.wait_stopped().await
    }

    fn terminate(&self) {
        for subscriber in self.subscribers.lock().values() {
            subscriber.terminate();
        }
        self.composite.initiate_shutdown(ServiceStatus::Terminating, None);
    }

    fn partition_active(&self, partition: i64) -> bool {
        self.subscribers.lock().contains_key(&partition)
    }
}

impl Service for AssigningSubscriber {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        subscriber::{test_utils::subscription_path, ReceivedMessage},
        transport::mock::MockConnector,
    };

    #[tokio::test]
    async fn test_assignment_after_stop_is_ignored() {
        let connector = MockConnector::new();
        let subscriber = AssigningSubscriber::new(
            connector.clone(),
            subscription_path(),
            ReceiveSettings::default(),
            Arc::new(|_: ReceivedMessage| {}),
            None,
        )
        .unwrap();
        subscriber.start();
        let mut assignment = connector.assignment.accept().await.unwrap();
        assignment.recv().await.unwrap();
        subscriber.wait_started().await.unwrap();

        subscriber.stop();
        subscriber.wait_stopped().await.unwrap();
        assert_eq!(
            subscriber
                .handle_assignment([1, 2].into_iter().collect())
                .await,
            Ok(())
        );
        assert!(!subscriber.partition_active(1));
        assert!(!subscriber.partition_active(2));
        assert_eq!(connector.subscribe.opened(), 0);
        assert_eq!(subscriber.status(), ServiceStatus::Terminated);
    }
}

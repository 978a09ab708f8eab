use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{info, warn};

use super::{
    batcher::PublishResultFn,
    partition_count::PartitionCountWatcher,
    router::{DefaultRouterFactory, MessageRouter, MessageRouterFactory},
    single::SinglePartitionPublisher,
    PublishResult,
};
use crate::{
    error::{WireError, WireResult},
    proto::tributary::PubSubMessage,
    resources::{TopicPartition, TopicPath},
    service::{CompositeService, Service, ServiceHandle, ServiceStatus, StatusChangeReceiver},
    settings::PublishSettings,
    transport::Connector,
};

#[derive(Default)]
struct RoutingState {
    /// Indexed by partition.
    publishers: Vec<Arc<SinglePartitionPublisher>>,
    router: Option<Box<dyn MessageRouter>>,
}

/// Publishes to every partition of a topic, choosing a partition per
/// message with a [MessageRouter].
///
/// Partition publishers are added as the topic's partition count grows.
/// The count is expected to only increase, so decreases are ignored.
pub struct RoutingPublisher {
    connector: Arc<dyn Connector>,
    topic: TopicPath,
    settings: PublishSettings,
    router_factory: Box<dyn MessageRouterFactory>,
    composite: Arc<CompositeService>,
    routing: Mutex<RoutingState>,
}

impl RoutingPublisher {
    pub fn new(
        connector: Arc<dyn Connector>,
        topic: TopicPath,
        settings: PublishSettings,
    ) -> WireResult<Arc<Self>> {
        Self::with_router_factory(connector, topic, settings, Box::new(DefaultRouterFactory))
    }

    pub fn with_router_factory(
        connector: Arc<dyn Connector>,
        topic: TopicPath,
        settings: PublishSettings,
        router_factory: Box<dyn MessageRouterFactory>,
    ) -> WireResult<Arc<Self>> {
        settings.validate()?;
        let publisher = Arc::new(Self {
            connector: Arc::clone(&connector),
            topic: topic.clone(),
            settings: settings.clone(),
            router_factory,
            composite: CompositeService::new(),
            routing: Mutex::new(RoutingState::default()),
        });
        let weak = Arc::downgrade(&publisher);
        let watcher = PartitionCountWatcher::new(
            connector,
            topic,
            settings.timeout,
            settings.config_poll_period,
            Arc::new(move |count| {
                if let Some(publisher) = weak.upgrade() {
                    publisher.on_partition_count_changed(count);
                }
            }),
        );
        publisher
            .composite
            .add_services(vec![watcher as Arc<dyn Service>])?;
        Ok(publisher)
    }

    fn on_partition_count_changed(&self, count: i64) {
        let mut routing = self.routing.lock();
        let previous = routing.publishers.len() as i64;
        if count == previous {
            return;
        }
        if count < previous {
            warn!(
                "Ignoring decrease of partition count of {} from {} to {}",
                self.topic, previous, count
            );
            return;
        }

        let added = (previous..count)
            .map(|partition| {
                SinglePartitionPublisher::new(
                    Arc::clone(&self.connector),
                    TopicPartition {
                        path: self.topic.clone(),
                        partition,
                    },
                    &self.settings,
                )
            })
            .collect::<Vec<_>>();
        let services = added
            .iter()
            .map(|p| Arc::clone(p) as Arc<dyn Service>)
            .collect();
        if let Err(err) = self.composite.add_services(services) {
            // stopping, so there is nothing left to route to
            warn!("Not adding publishers to {}: {}", self.topic, err);
            return;
        }
        info!("Publishing to {} partitions of {}", count, self.topic);
        routing.publishers.extend(added);
        routing.router = Some(self.router_factory.new_router(count as usize));
    }

    fn route(&self, message: &PubSubMessage) -> WireResult<Arc<SinglePartitionPublisher>> {
        self.composite.check_status()?;
        let mut routing = self.routing.lock();
        let RoutingState { publishers, router } = &mut *routing;
        let router = router.as_mut().ok_or(WireError::ServiceStarting)?;
        let partition = router.route(&message.key);
        publishers
            .get(partition)
            .cloned()
            .ok_or(WireError::InvalidPartitionCount(partition as i64))
    }

    /// Publish a message to the partition chosen by the router.
    /// `on_result` receives its metadata or the publish error.
    pub fn publish(&self, message: PubSubMessage, on_result: PublishResultFn) {
        match self.route(&message) {
            Ok(publisher) => publisher.publish(message, on_result),
            Err(err) => on_result(Err(err)),
        }
    }

    pub fn publish_async(&self, message: PubSubMessage) -> PublishResult {
        let (result, on_result) = PublishResult::new();
        self.publish(message, on_result);
        result
    }

    /// The number of partitions currently published to.
    pub fn partition_count(&self) -> usize {
        self.routing.lock().publishers.len()
    }

    pub fn start(&self) {
        Service::start(self.composite.as_ref());
    }

    /// Flush every partition publisher, then stop.
    pub fn stop(&self) {
        Service::stop(self.composite.as_ref());
    }

    pub async fn wait_started(&self) -> WireResult<()> {
        self.composite.wait_started().await
    }

    pub async fn wait_stopped(&self) -> WireResult<()> {
        self.composite.wait_stopped().await
    }

    pub fn status(&self) -> ServiceStatus {
        self.composite.status()
    }

    pub fn error(&self) -> Option<WireError> {
        self.composite.error()
    }

    pub fn watch(&self) -> watch::Receiver<ServiceStatus> {
        self.composite.watch()
    }

    pub fn handle(&self) -> ServiceHandle {
        self.composite.handle()
    }

    pub fn add_status_change_receiver(&self, handle: ServiceHandle, receiver: StatusChangeReceiver) {
        self.composite.add_status_change_receiver(handle, receiver)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        proto::tributary::PublishRequest,
        publisher::test_utils::{initial_response, message, message_response, topic},
        resources::MessageMetadata,
        transport::mock::MockConnector,
    };

    /// Routes every message to the partition in its key.
    struct KeyRouter;

    impl MessageRouter for KeyRouter {
        fn route(&mut self, key: &[u8]) -> usize {
            key.first().copied().unwrap_or(0) as usize
        }
    }

    struct KeyRouterFactory;

    impl MessageRouterFactory for KeyRouterFactory {
        fn new_router(&self, _partition_count: usize) -> Box<dyn MessageRouter> {
            Box::new(KeyRouter)
        }
    }

    fn settings() -> PublishSettings {
        PublishSettings {
            count_threshold: 1,
            timeout: Duration::from_secs(60),
            config_poll_period: Duration::from_secs(1),
            ..Default::default()
        }
    }

    fn keyed(partition: u8, data: &str) -> PubSubMessage {
        PubSubMessage {
            key: vec![partition],
            ..message(data)
        }
    }

    fn new_publisher(connector: &Arc<MockConnector>) -> Arc<RoutingPublisher> {
        RoutingPublisher::with_router_factory(
            connector.clone(),
            topic(),
            settings(),
            Box::new(KeyRouterFactory),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_invalid_settings() {
        let connector = MockConnector::new();
        let result = RoutingPublisher::new(
            connector,
            topic(),
            PublishSettings {
                count_threshold: 0,
                ..Default::default()
            },
        );
        assert!(matches!(result, Err(WireError::InvalidSettings(_))));
    }

    #[tokio::test]
    async fn test_routes_to_partitions() {
        let connector = MockConnector::new();
        connector.set_partition_count(2);
        let publisher = new_publisher(&connector);
        publisher.start();

        let mut servers = vec![];
        for _ in 0..2 {
            let mut server = connector.publish.accept().await.unwrap();
            server.recv().await.unwrap();
            server.respond(initial_response());
            servers.push(server);
        }
        servers.sort_by(|a, b| a.target.cmp(&b.target));
        publisher.wait_started().await.unwrap();
        assert_eq!(publisher.partition_count(), 2);

        let result = publisher.publish_async(keyed(1, "x"));
        assert_eq!(
            servers[1].recv().await.unwrap(),
            PublishRequest::messages(vec![keyed(1, "x")])
        );
        servers[1].respond(message_response(7));
        assert_eq!(
            result.await,
            Ok(MessageMetadata {
                partition: 1,
                offset: 7
            })
        );

        publisher.stop();
        publisher.wait_stopped().await.unwrap();
        assert_eq!(
            publisher.publish_async(keyed(0, "y")).await,
            Err(WireError::ServiceStopped)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_partition_count_only_grows() {
        let connector = MockConnector::new();
        connector.set_partition_count(2);
        let publisher = new_publisher(&connector);
        publisher.start();
        let mut servers = vec![];
        for _ in 0..2 {
            let mut server = connector.publish.accept().await.unwrap();
            server.recv().await.unwrap();
            server.respond(initial_response());
            servers.push(server);
        }
        publisher.wait_started().await.unwrap();

        connector.set_partition_count(1);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(publisher.partition_count(), 2);
        assert_eq!(connector.publish.opened(), 2);

        connector.set_partition_count(3);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(publisher.partition_count(), 3);
        let server = connector.publish.accept().await.unwrap();
        assert_eq!(server.target, format!("{}/partitions/2", topic()));
        assert_eq!(publisher.status(), ServiceStatus::Active);
        publisher.stop();
    }

    #[tokio::test]
    async fn test_publish_before_partitions_known() {
        let connector = MockConnector::new();
        let publisher = new_publisher(&connector);
        assert_eq!(
            publisher.publish_async(message("a")).await,
            Err(WireError::ServiceUninitialized)
        );
    }
}

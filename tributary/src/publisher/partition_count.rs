use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::{
    error::{WireError, WireResult},
    periodic_task::PeriodicTask,
    resources::TopicPath,
    retry::retry_unary,
    service::{AbstractService, Service, ServiceHandle, ServiceStatus, StatusChangeReceiver},
    transport::Connector,
};

/// Called with the new partition count whenever it changes.
pub type PartitionCountReceiver = Arc<dyn Fn(i64) + Send + Sync>;

struct WatcherState {
    service: AbstractService,
    partition_count: i64,
}

/// Fetches the partition count of a topic, then polls it for changes.
///
/// The watcher becomes active once the first count has been fetched and
/// handed to the receiver. Failures of later polls are logged and ignored.
pub struct PartitionCountWatcher {
    weak: Weak<Self>,
    connector: Arc<dyn Connector>,
    topic: TopicPath,
    timeout: Duration,
    receiver: PartitionCountReceiver,
    poll_update: PeriodicTask,
    /// Held for the whole of each update so the receiver sees counts in
    /// order.
    update_lock: tokio::sync::Mutex<()>,
    state: Mutex<WatcherState>,
}

impl PartitionCountWatcher {
    pub fn new(
        connector: Arc<dyn Connector>,
        topic: TopicPath,
        timeout: Duration,
        poll_period: Duration,
        receiver: PartitionCountReceiver,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let poll = weak.clone();
            Self {
                weak: weak.clone(),
                connector,
                topic,
                timeout,
                receiver,
                poll_update: PeriodicTask::new(
                    poll_period,
                    Arc::new(move || {
                        if let Some(watcher) = poll.upgrade() {
                            tokio::spawn(watcher.update_partition_count());
                        }
                    }),
                ),
                update_lock: tokio::sync::Mutex::new(()),
                state: Mutex::new(WatcherState {
                    service: AbstractService::new(),
                    partition_count: 0,
                }),
            }
        })
    }

    pub fn partition_count(&self) -> i64 {
        self.state.lock().partition_count
    }

    async fn fetch(&self, initial: bool) -> WireResult<i64> {
        let count = if initial {
            retry_unary(self.timeout, || self.connector.partition_count(&self.topic)).await?
        } else {
            self.connector.partition_count(&self.topic).await?
        };
        if count <= 0 {
            return Err(WireError::InvalidPartitionCount(count));
        }
        Ok(count)
    }

    async fn update_partition_count(self: Arc<Self>) {
        let _serial = self.update_lock.lock().await;
        let initial = self.status() == ServiceStatus::Starting;
        let result = self.fetch(initial).await;

        let changed = {
            let mut state = self.state.lock();
            if state.service.status() >= ServiceStatus::Terminating {
                return;
            }
            match result {
                Ok(count) if count == state.partition_count => None,
                Ok(count) => {
                    state.partition_count = count;
                    Some(count)
                }
                Err(err) if initial => {
                    error!("Failed to fetch partition count of {}: {}", self.topic, err);
                    state
                        .service
                        .update_status(ServiceStatus::Terminated, Some(err));
                    return;
                }
                Err(err) => {
                    warn!("Failed to poll partition count of {}: {}", self.topic, err);
                    return;
                }
            }
        };
        if let Some(count) = changed {
            info!("Topic {} has {} partitions", self.topic, count);
            (self.receiver)(count);
        }
        if initial
            && self
                .state
                .lock()
                .service
                .update_status(ServiceStatus::Active, None)
        {
            self.poll_update.start();
        }
    }
}

impl Service for PartitionCountWatcher {
    fn start(&self) {
        if !self
            .state
            .lock()
            .service
            .update_status(ServiceStatus::Starting, None)
        {
            return;
        }
        if let Some(watcher) = self.weak.upgrade() {
            tokio::spawn(watcher.update_partition_count());
        }
    }

    fn stop(&self) {
        self.poll_update.stop();
        self.state
            .lock()
            .service
            .update_status(ServiceStatus::Terminated, None);
    }

    fn status(&self) -> ServiceStatus {
        self.state.lock().service.status()
    }

    fn error(&self) -> Option<WireError> {
        self.state.lock().service.error()
    }

    fn handle(&self) -> ServiceHandle {
        self.state.lock().service.handle()
    }

    fn add_status_change_receiver(&self, handle: ServiceHandle, receiver: StatusChangeReceiver) {
        self.state.lock().service.add_receiver(handle, receiver)
    }

    fn remove_status_change_receiver(&self, handle: ServiceHandle) {
        self.state.lock().service.remove_receiver(handle)
    }
}

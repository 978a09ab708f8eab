use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, error, info};

use super::batcher::{PublishBatch, PublishMessageBatcher, PublishResultFn, PublishResults};
use crate::{
    error::{WireError, WireResult},
    proto::tributary::{
        publish_response::ResponseType, MessagePublishResponse, PubSubMessage, PublishRequest,
        PublishResponse,
    },
    resources::TopicPartition,
    service::{AbstractService, Service, ServiceHandle, ServiceStatus, StatusChangeReceiver},
    settings::PublishSettings,
    stream::{RetryableStream, StreamHandler, StreamStatus},
    transport::{BidiStream, Connector},
};

struct PublisherState {
    service: AbstractService,
    batcher: PublishMessageBatcher,
    /// Cleared while the stream reconnects. Batches created meanwhile are
    /// only queued, and sent with the rest of the in-flight queue once the
    /// new stream connects.
    enable_send_to_stream: bool,
}

/// Publishes to one partition of a topic over a single publish stream.
///
/// Messages are batched by the thresholds in [PublishSettings]. Every batch
/// stays queued until the server confirms it, and the whole queue is resent
/// in order whenever the stream reconnects.
pub struct SinglePartitionPublisher {
    weak: Weak<Self>,
    connector: Arc<dyn Connector>,
    topic: TopicPartition,
    delay_threshold: Duration,
    stream: Arc<RetryableStream<Self>>,
    state: Mutex<PublisherState>,
}

impl SinglePartitionPublisher {
    pub fn new(
        connector: Arc<dyn Connector>,
        topic: TopicPartition,
        settings: &PublishSettings,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            weak: weak.clone(),
            connector,
            delay_threshold: settings.delay_threshold,
            stream: RetryableStream::with_idle_timeout(weak.clone(), settings.timeout),
            state: Mutex::new(PublisherState {
                service: AbstractService::new(),
                batcher: PublishMessageBatcher::new(settings, topic.partition),
                enable_send_to_stream: false,
            }),
            topic,
        })
    }

    pub fn partition(&self) -> i64 {
        self.topic.partition
    }

    /// Buffer a message for publishing. `on_result` receives its offset, or
    /// the error that prevented it from being published. Messages are
    /// accepted while the publisher is still starting.
    pub fn publish(&self, message: PubSubMessage, on_result: PublishResultFn) {
        let results = {
            let mut state = self.state.lock();
            match state.service.check_status() {
                Ok(()) | Err(WireError::ServiceStarting) => {
                    self.add_message_locked(&mut state, message, on_result)
                }
                Err(err) => {
                    let mut results = PublishResults::none();
                    results.push(on_result, Err(err));
                    results
                }
            }
        };
        results.notify();
    }

    fn add_message_locked(
        &self,
        state: &mut PublisherState,
        message: PubSubMessage,
        on_result: PublishResultFn,
    ) -> PublishResults {
        match state.batcher.add_message(message, on_result) {
            Ok(added) => {
                for batch in added.ready {
                    self.send_batch_locked(state, batch);
                }
                if let Some(bundle_id) = added.new_bundle {
                    self.schedule_flush(bundle_id);
                }
                PublishResults::none()
            }
            Err((err, on_result)) => {
                error!("Publisher for {} rejected a message: {}", self.topic, err);
                let mut results = PublishResults::none();
                results.push(on_result, Err(err.clone()));
                // Dropping one message would break ordering.
                results.extend(self.shutdown_locked(state, ServiceStatus::Terminating, Some(err)));
                results
            }
        }
    }

    fn schedule_flush(&self, bundle_id: u64) {
        let weak = self.weak.clone();
        let delay = self.delay_threshold;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(publisher) = weak.upgrade() {
                publisher.flush_bundle(bundle_id);
            }
        });
    }

    fn flush_bundle(&self, bundle_id: u64) {
        let mut state = self.state.lock();
        if let Some(batch) = state.batcher.flush_bundle(bundle_id) {
            self.send_batch_locked(&mut state, batch);
        }
    }

    fn send_batch_locked(&self, state: &mut PublisherState, batch: PublishBatch) {
        let messages = state.enable_send_to_stream.then(|| batch.messages());
        state.batcher.add_batch(batch);
        if let Some(messages) = messages {
            debug!("Publishing {} messages to {}", messages.len(), self.topic);
            self.stream.send(PublishRequest::messages(messages));
        }
    }

    /// Finish a graceful shutdown once every message is confirmed.
    fn check_done_locked(&self, state: &mut PublisherState) -> PublishResults {
        if state.service.status() == ServiceStatus::Terminating && state.batcher.is_empty() {
            return self.shutdown_locked(state, ServiceStatus::Terminated, None);
        }
        PublishResults::none()
    }

    fn shutdown_locked(
        &self,
        state: &mut PublisherState,
        target: ServiceStatus,
        err: Option<WireError>,
    ) -> PublishResults {
        if !state.service.update_status(target, err) {
            return PublishResults::none();
        }
        match target {
            ServiceStatus::Terminating => {
                info!("Publisher for {} is stopping", self.topic);
                if let Some(batch) = state.batcher.flush() {
                    self.send_batch_locked(state, batch);
                }
                self.check_done_locked(state)
            }
            ServiceStatus::Terminated => {
                self.stream.stop();
                let err = state.service.error();
                match &err {
                    Some(err) => error!("Publisher for {} terminated: {}", self.topic, err),
                    None => info!("Publisher for {} stopped", self.topic),
                }
                state
                    .batcher
                    .on_permanent_error(err.unwrap_or(WireError::ServiceStopped))
            }
            _ => PublishResults::none(),
        }
    }

    fn fail(&self, err: WireError) {
        let results = {
            let mut state = self.state.lock();
            self.shutdown_locked(&mut state, ServiceStatus::Terminated, Some(err))
        };
        results.notify();
    }

    fn fail_with_stream_error(&self) {
        let results = {
            let mut state = self.state.lock();
            let err = self.stream.error();
            self.shutdown_locked(&mut state, ServiceStatus::Terminated, err)
        };
        results.notify();
    }
}

#[async_trait]
impl StreamHandler for SinglePartitionPublisher {
    type Request = PublishRequest;
    type Response = PublishResponse;

    async fn new_stream(&self) -> WireResult<BidiStream<Self::Request, Self::Response>> {
        self.connector.publish(&self.topic).await
    }

    fn initial_request(&self) -> (Self::Request, bool) {
        (
            PublishRequest::initial(self.topic.path.to_string(), self.topic.partition),
            true,
        )
    }

    fn validate_initial_response(&self, response: &Self::Response) -> WireResult<()> {
        match response.response_type {
            Some(ResponseType::InitialResponse(_)) => Ok(()),
            _ => Err(WireError::InvalidInitialResponse("publish")),
        }
    }

    fn on_stream_status_change(&self, status: StreamStatus) {
        match status {
            StreamStatus::Reconnecting => {
                self.state.lock().enable_send_to_stream = false;
            }
            StreamStatus::Connected => {
                let mut state = self.state.lock();
                state.service.update_status(ServiceStatus::Active, None);
                for messages in state.batcher.merge_in_flight() {
                    self.stream.send(PublishRequest::messages(messages));
                }
                state.enable_send_to_stream = true;
            }
            StreamStatus::Terminated => self.fail_with_stream_error(),
            StreamStatus::Uninitialized => {}
        }
    }

    async fn on_response(&self, response: Self::Response) {
        let first_offset = match response.response_type {
            Some(ResponseType::MessageResponse(MessagePublishResponse {
                start_cursor: Some(cursor),
            })) => cursor.offset,
            _ => return self.fail(WireError::InvalidResponse("publish")),
        };
        let results = {
            let mut state = self.state.lock();
            match state.batcher.on_publish_response(first_offset) {
                Ok(mut results) => {
                    results.extend(self.check_done_locked(&mut state));
                    results
                }
                Err(err) => self.shutdown_locked(&mut state, ServiceStatus::Terminated, Some(err)),
            }
        };
        results.notify();
    }
}

impl Service for SinglePartitionPublisher {
    fn start(&self) {
        if self
            .state
            .lock()
            .service
            .update_status(ServiceStatus::Starting, None)
        {
            self.stream.start();
        }
    }

    /// Flush buffered messages and stop once all are confirmed.
    fn stop(&self) {
        let results = {
            let mut state = self.state.lock();
            self.shutdown_locked(&mut state, ServiceStatus::Terminating, None)
        };
        results.notify();
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

use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::{debug, warn};

use super::{delivery::MessageDeliveryQueue, MessageReceiver, ReceivedMessage};
use crate::{
    acks::{AckConsumer, AckHandler, AckTracker},
    constants::BATCH_FLOW_CONTROL_PERIOD,
    error::{WireError, WireResult},
    flow_control::{FlowControlBatcher, FlowControlTokens, SubscriberOffsetTracker},
    periodic_task::PeriodicTask,
    proto::tributary::{
        subscribe_response::Response, FlowControlRequest, SeekRequest, SequencedMessage,
        SubscribeRequest, SubscribeResponse,
    },
    resources::SubscriptionPartition,
    service::{AbstractService, Service, ServiceHandle, ServiceStatus, StatusChangeReceiver},
    stream::{RetryableStream, StreamHandler, StreamStatus},
    transport::{BidiStream, Connector},
};

/// Resets state outside the subscribe stream when the server resets it,
/// e.g. waits for the committer to flush.
pub(crate) type ResetHandler = Arc<dyn Fn() -> BoxFuture<'static, WireResult<()>> + Send + Sync>;

struct SubscribeState {
    service: AbstractService,
    flow_control: FlowControlBatcher,
    offset_tracker: SubscriberOffsetTracker,
    /// Batched flow control is only sent on a connected stream, after the
    /// restart request.
    enable_batching: bool,
    /// Incremented on every reset. Acks of messages delivered before a
    /// reset return no tokens.
    epoch: u64,
}

/// Receives the messages of one partition, gated by flow control.
///
/// Every delivered message holds back flow control tokens until it is
/// acked. Returned tokens are batched and sent periodically, or right away
/// once enough have accumulated. A reconnected stream resumes after the
/// last delivered message. When the server resets the stream, delivery
/// pauses until the reset handler is done and the stream then restarts
/// from the committed cursor.
pub(crate) struct SubscribeStream {
    weak: Weak<Self>,
    connector: Arc<dyn Connector>,
    subscription: SubscriptionPartition,
    initial_flow: FlowControlTokens,
    delivery: MessageDeliveryQueue,
    on_reset: ResetHandler,
    stream: Arc<RetryableStream<Self>>,
    poll_flow_control: PeriodicTask,
    state: Mutex<SubscribeState>,
}

impl SubscribeStream {
    pub fn new(
        connector: Arc<dyn Connector>,
        subscription: SubscriptionPartition,
        initial_flow: FlowControlTokens,
        timeout: Duration,
        acks: Arc<Mutex<AckTracker>>,
        receiver: MessageReceiver,
        on_reset: ResetHandler,
    ) -> WireResult<Arc<Self>> {
        let mut flow_control = FlowControlBatcher::default();
        flow_control.on_client_flow(initial_flow)?;
        Ok(Arc::new_cyclic(|weak: &Weak<Self>| {
            let poll = weak.clone();
            Self {
                weak: weak.clone(),
                connector,
                subscription,
                initial_flow,
                delivery: MessageDeliveryQueue::new(acks, receiver),
                on_reset,
                stream: RetryableStream::with_idle_timeout(weak.clone(), timeout),
                poll_flow_control: PeriodicTask::new(
                    BATCH_FLOW_CONTROL_PERIOD,
                    Arc::new(move || {
                        if let Some(stream) = poll.upgrade() {
                            let mut state = stream.state.lock();
                            stream.send_batch_flow_control_locked(&mut state);
                        }
                    }),
                ),
                state: Mutex::new(SubscribeState {
                    service: AbstractService::new(),
                    flow_control,
                    offset_tracker: SubscriberOffsetTracker::default(),
                    enable_batching: false,
                    epoch: 0,
                }),
            }
        }))
    }

    fn send_flow_control(&self, request: Option<FlowControlRequest>) {
        if let Some(request) = request {
            self.stream.send(SubscribeRequest::flow_control(request));
        }
    }

    fn send_batch_flow_control_locked(&self, state: &mut SubscribeState) {
        if state.enable_batching {
            self.send_flow_control(state.flow_control.release_pending_request());
        }
    }

    /// Return the tokens of an acked message.
    fn on_ack(&self, size_bytes: i64, epoch: u64) {
        let mut state = self.state.lock();
        if state.service.status() >= ServiceStatus::Terminating || state.epoch != epoch {
            return;
        }
        let tokens = FlowControlTokens {
            bytes: size_bytes,
            messages: 1,
        };
        if let Err(err) = state.flow_control.on_client_flow(tokens) {
            self.shutdown_locked(&mut state, Some(err));
            return;
        }
        if state.flow_control.should_expedite_batch_request() {
            self.send_batch_flow_control_locked(&mut state);
        }
    }

    fn ack_handler(&self, runtime: &Handle, epoch: u64) -> AckHandler {
        let weak = self.weak.clone();
        let runtime = runtime.clone();
        Box::new(move |ack| {
            let size_bytes = ack.size_bytes();
            runtime.spawn(async move {
                if let Some(stream) = weak.upgrade() {
                    stream.on_ack(size_bytes, epoch);
                }
            });
        })
    }

    fn on_messages(&self, messages: Vec<SequencedMessage>) -> WireResult<()> {
        let mut state = self.state.lock();
        if state.service.status() >= ServiceStatus::Terminating {
            return Ok(());
        }
        if messages.is_empty() {
            return Err(WireError::ServerNoMessages);
        }
        state.offset_tracker.on_messages(&messages)?;
        state.flow_control.on_messages(&messages)?;

        let runtime = Handle::current();
        for message in messages {
            let ack = AckConsumer::new(
                message.offset(),
                message.size_bytes,
                Some(self.ack_handler(&runtime, state.epoch)),
            );
            self.delivery.add(ReceivedMessage::new(
                message,
                self.subscription.partition,
                ack,
            ));
        }
        Ok(())
    }

    /// Pause delivery and run the reset handler, then start over from the
    /// committed cursor with the initial flow control tokens.
    async fn reset(&self) {
        self.delivery.stop();
        self.delivery.wait().await;
        let result = (self.on_reset)().await;

        let mut state = self.state.lock();
        if state.service.status() >= ServiceStatus::Terminating {
            return;
        }
        if let Err(err) = result {
            debug!("Stopping {} after a failed reset: {}", self.subscription, err);
            self.shutdown_locked(&mut state, None);
            return;
        }
        state.epoch += 1;
        state.offset_tracker.reset();
        if let Err(err) = state.flow_control.reset(self.initial_flow) {
            self.shutdown_locked(&mut state, Some(err));
            return;
        }
        self.delivery.start();
        debug!("Reset subscribe stream for {}", self.subscription);
    }

    /// Subscribe streams stop immediately. Undelivered messages are
    /// discarded and redelivered to the next subscriber of the partition.
    fn shutdown_locked(&self, state: &mut SubscribeState, err: Option<WireError>) {
        if let Some(err) = &err {
            warn!("Subscribe stream for {} failed: {}", self.subscription, err);
        }
        if state.service.update_status(ServiceStatus::Terminated, err) {
            self.poll_flow_control.stop();
            self.delivery.stop();
            self.stream.stop();
        }
    }
}

#[async_trait]
impl StreamHandler for SubscribeStream {
    type Request = SubscribeRequest;
    type Response = SubscribeResponse;

    async fn new_stream(&self) -> WireResult<BidiStream<Self::Request, Self::Response>> {
        self.connector.subscribe(&self.subscription).await
    }

    fn initial_request(&self) -> (Self::Request, bool) {
        let location = self
            .state
            .lock()
            .offset_tracker
            .request_for_restart()
            .unwrap_or_else(SeekRequest::committed_cursor);
        (
            SubscribeRequest::initial(
                self.subscription.path.to_string(),
                self.subscription.partition,
                location,
            ),
            true,
        )
    }

    fn validate_initial_response(&self, response: &Self::Response) -> WireResult<()> {
        match response.response {
            Some(Response::Initial(_)) => Ok(()),
            _ => Err(WireError::InvalidInitialResponse("subscribe")),
        }
    }

    fn on_stream_status_change(&self, status: StreamStatus) {
        let mut state = self.state.lock();
        match status {
            StreamStatus::Connected => {
                state.service.update_status(ServiceStatus::Active, None);
                // the server's tokens are reset for each stream
                self.send_flow_control(state.flow_control.request_for_restart());
                state.enable_batching = true;
                self.poll_flow_control.start();
                debug!("Subscribe stream for {} connected", self.subscription);
            }
            StreamStatus::Reconnecting => {
                state.enable_batching = false;
                self.poll_flow_control.stop();
            }
            StreamStatus::Terminated => {
                let err = self.stream.error();
                self.shutdown_locked(&mut state, err);
            }
            StreamStatus::Uninitialized => {}
        }
    }

    async fn on_reset(&self) {
        self.reset().await;
    }

    async fn on_response(&self, response: Self::Response) {
        let result = match response.response {
            Some(Response::Messages(response)) => self.on_messages(response.messages),
            _ => Err(WireError::InvalidResponse("subscribe")),
        };
        if let Err(err) = result {
            let mut state = self.state.lock();
            self.shutdown_locked(&mut state, Some(err));
        }
    }
}

impl Service for SubscribeStream {
    fn start(&self) {
        if self
            .state
            .lock()
            .service
            .update_status(ServiceStatus::Starting, None)
        {
            self.delivery.start();
            self.stream.start();
        }
    }

    fn stop(&self) {
        let mut state = self.state.lock();
        self.shutdown_locked(&mut state, None);
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

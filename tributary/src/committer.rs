//! Commits the acknowledged offset of one partition over a streaming
//! cursor RPC.

use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::{
    acks::{AckTracker, CommitCursorTracker},
    constants::COMMIT_CURSOR_PERIOD,
    error::{WireError, WireResult},
    periodic_task::PeriodicTask,
    proto::tributary::{
        streaming_commit_cursor_response, StreamingCommitCursorRequest,
        StreamingCommitCursorResponse,
    },
    resources::SubscriptionPartition,
    service::{AbstractService, Service, ServiceHandle, ServiceStatus, StatusChangeReceiver},
    stream::{RetryableStream, StreamHandler, StreamStatus},
    transport::{BidiStream, Connector},
};

struct CommitterState {
    service: AbstractService,
    cursor_tracker: CommitCursorTracker,
}

/// Periodically commits the offset after the acked prefix of a partition.
/// A graceful [Service::stop] waits for every delivered message to be acked
/// and for the final commit to be confirmed before terminating.
pub struct Committer {
    connector: Arc<dyn Connector>,
    subscription: SubscriptionPartition,
    acks: Arc<Mutex<AckTracker>>,
    stream: Arc<RetryableStream<Committer>>,
    poll_commits: PeriodicTask,
    /// Woken when commits are confirmed or the committer stops.
    flushed: Notify,
    state: Mutex<CommitterState>,
}

impl Committer {
    pub fn new(
        connector: Arc<dyn Connector>,
        subscription: SubscriptionPartition,
        acks: Arc<Mutex<AckTracker>>,
        timeout: Duration,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let poll = weak.clone();
            Self {
                connector,
                subscription,
                acks,
                stream: RetryableStream::new(weak.clone(), timeout),
                poll_commits: PeriodicTask::new(
                    COMMIT_CURSOR_PERIOD,
                    Arc::new(move || {
                        if let Some(committer) = poll.upgrade() {
                            committer.commit_offset_to_stream();
                        }
                    }),
                ),
                flushed: Notify::new(),
                state: Mutex::new(CommitterState {
                    service: AbstractService::new(),
                    cursor_tracker: CommitCursorTracker::default(),
                }),
            }
        })
    }

    /// Discard outstanding acks, then commit the offset acked so far and
    /// stop. Acks of discarded messages are ignored.
    pub fn terminate(&self) {
        let mut state = self.state.lock();
        self.acks.lock().release();
        self.shutdown_locked(&mut state, ServiceStatus::Terminating, None);
    }

    /// Commit the acked prefix and wait for the server to confirm it, then
    /// discard all ack and cursor state. Messages still outstanding are
    /// never committed. Used when the subscribe stream is reset to the
    /// committed cursor.
    pub async fn blocking_reset(&self) -> WireResult<()> {
        self.acks.lock().release();
        loop {
            let flushed = self.flushed.notified();
            {
                let mut state = self.state.lock();
                if state.service.status() >= ServiceStatus::Terminating {
                    return Err(WireError::ServiceStopped);
                }
                let acked = self.acks.lock().commit_offset();
                if state.cursor_tracker.up_to_date(acked) {
                    self.acks.lock().reset();
                    state.cursor_tracker.reset();
                    debug!("Reset committer for {}", self.subscription);
                    return Ok(());
                }
                self.commit_locked(&mut state);
            }
            flushed.await;
        }
    }

    fn commit_offset_to_stream(&self) {
        let mut state = self.state.lock();
        if matches!(
            state.service.status(),
            ServiceStatus::Active | ServiceStatus::Terminating
        ) {
            self.commit_locked(&mut state);
            self.check_done_locked(&mut state);
        }
    }

    fn commit_locked(&self, state: &mut CommitterState) {
        let acked = self.acks.lock().commit_offset();
        let Some(offset) = state.cursor_tracker.next_offset(acked) else {
            return;
        };
        if self.stream.send(StreamingCommitCursorRequest::commit(offset)) {
            debug!("Committing offset {} for {}", offset, self.subscription);
            state.cursor_tracker.add_pending(offset);
        }
    }

    /// Finish a graceful shutdown once every delivered message is acked and
    /// the resulting offset is confirmed.
    fn check_done_locked(&self, state: &mut CommitterState) {
        if state.service.status() == ServiceStatus::Terminating {
            let mut acks = self.acks.lock();
            let acked = acks.commit_offset();
            let done = state.cursor_tracker.up_to_date(acked) && acks.is_empty();
            drop(acks);
            if done {
                self.shutdown_locked(state, ServiceStatus::Terminated, None);
            }
        }
    }

    fn shutdown_locked(
        &self,
        state: &mut CommitterState,
        target: ServiceStatus,
        err: Option<WireError>,
    ) {
        match target {
            ServiceStatus::Terminating => {
                if !state.service.update_status(ServiceStatus::Terminating, err) {
                    return;
                }
                self.commit_locked(state);
                self.check_done_locked(state);
            }
            ServiceStatus::Terminated => {
                // acks after this point are never committed
                self.acks.lock().release();
                self.poll_commits.stop();
                self.stream.stop();
                state.service.update_status(ServiceStatus::Terminated, err);
                self.flushed.notify_waiters();
            }
            _ => {}
        }
    }

    fn fail(&self, err: WireError) {
        warn!("Committer for {} failed: {}", self.subscription, err);
        let mut state = self.state.lock();
        self.shutdown_locked(&mut state, ServiceStatus::Terminated, Some(err));
    }
}

#[async_trait]
impl StreamHandler for Committer {
    type Request = StreamingCommitCursorRequest;
    type Response = StreamingCommitCursorResponse;

    async fn new_stream(&self) -> WireResult<BidiStream<Self::Request, Self::Response>> {
        self.connector.commit_cursor(&self.subscription).await
    }

    fn initial_request(&self) -> (Self::Request, bool) {
        (
            StreamingCommitCursorRequest::initial(
                self.subscription.path.to_string(),
                self.subscription.partition,
            ),
            true,
        )
    }

    fn validate_initial_response(&self, response: &Self::Response) -> WireResult<()> {
        match response.request {
            Some(streaming_commit_cursor_response::Request::Initial(_)) => Ok(()),
            _ => Err(WireError::InvalidInitialResponse("committer")),
        }
    }

    fn on_stream_status_change(&self, status: StreamStatus) {
        match status {
            StreamStatus::Connected => {
                let mut state = self.state.lock();
                state.service.update_status(ServiceStatus::Active, None);
                // commits sent on the previous stream are never confirmed
                state.cursor_tracker.clear_pending();
                self.commit_locked(&mut state);
                self.poll_commits.start();
            }
            StreamStatus::Reconnecting => self.poll_commits.stop(),
            StreamStatus::Terminated => {
                let err = self.stream.error();
                let mut state = self.state.lock();
                self.shutdown_locked(&mut state, ServiceStatus::Terminated, err);
            }
            StreamStatus::Uninitialized => {}
        }
    }

    async fn on_response(&self, response: Self::Response) {
        let acknowledged = match response.request {
            Some(streaming_commit_cursor_response::Request::Commit(commit)) => {
                commit.acknowledged_commits
            }
            _ => return self.fail(WireError::InvalidResponse("committer")),
        };
        if acknowledged <= 0 {
            return self.fail(WireError::InvalidCommitCount(acknowledged));
        }
        let mut state = self.state.lock();
        if let Err(err) = state.cursor_tracker.confirm_offsets(acknowledged) {
            drop(state);
            return self.fail(err);
        }
        self.check_done_locked(&mut state);
        self.flushed.notify_waiters();
    }
}

impl Service for Committer {
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

    /// Flush the acked offset, then stop once the server confirms it.
    fn stop(&self) {
        let mut state = self.state.lock();
        self.shutdown_locked(&mut state, ServiceStatus::Terminating, None);
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

use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use futures::{future::BoxFuture, StreamExt};
use parking_lot::Mutex;
use tokio::{runtime::Handle, sync::mpsc, time::sleep};
use tokio_util::sync::CancellationToken;
use tonic::Code;
use tracing::{debug, warn};

use super::{StreamHandler, StreamStatus};
use crate::{
    error::{WireError, WireResult},
    retry::{is_retryable_recv, is_stream_reset, stream_attempt_timeout, StreamRetryer},
    transport::{BidiStream, MessageStream},
};

struct StreamState<Req> {
    status: StreamStatus,
    error: Option<WireError>,
    /// Incremented for every new connection, so receive loops of superseded
    /// streams can tell they are stale.
    generation: u64,
    requests: Option<mpsc::UnboundedSender<Req>>,
    /// Cancels the current connection attempt or receive loop.
    cancel: CancellationToken,
}

/// How a single connection attempt failed.
enum AttemptError {
    Send(WireError),
    Recv(WireError),
    Fatal(WireError),
}

/// Keeps one stream connected, reconnecting with backoff on retryable
/// errors until `timeout` elapses without a successful connection.
pub struct RetryableStream<H: StreamHandler> {
    handler: Weak<H>,
    timeout: Duration,
    idle_timeout: Option<Duration>,
    state: Mutex<StreamState<H::Request>>,
    /// Held while the handler is notified, so notifications never
    /// interleave.
    notify: Arc<Mutex<()>>,
}

impl<H: StreamHandler> RetryableStream<H> {
    pub fn new(handler: Weak<H>, timeout: Duration) -> Arc<Self> {
        Self::build(handler, timeout, None)
    }

    /// Like [RetryableStream::new], but the stream is also reconnected when
    /// no response arrives for half the timeout (capped at two minutes).
    pub fn with_idle_timeout(handler: Weak<H>, timeout: Duration) -> Arc<Self> {
        Self::build(handler, timeout, Some(stream_attempt_timeout(timeout)))
    }

    fn build(handler: Weak<H>, timeout: Duration, idle_timeout: Option<Duration>) -> Arc<Self> {
        Arc::new(Self {
            handler,
            timeout,
            idle_timeout,
            state: Mutex::new(StreamState {
                status: StreamStatus::Uninitialized,
                error: None,
                generation: 0,
                requests: None,
                cancel: CancellationToken::new(),
            }),
            notify: Arc::new(Mutex::new(())),
        })
    }

    pub fn start(self: &Arc<Self>) {
        if self.state.lock().status == StreamStatus::Uninitialized {
            tokio::spawn(Arc::clone(self).connect(false));
        }
    }

    /// Close the stream without an error.
    pub fn stop(&self) {
        self.terminate(None);
    }

    pub fn status(&self) -> StreamStatus {
        self.state.lock().status
    }

    pub fn error(&self) -> Option<WireError> {
        self.state.lock().error.clone()
    }

    /// Send a request on the current stream. Returns false if no stream is
    /// connected, in which case the request must be resent by the handler
    /// once the stream reconnects.
    pub fn send(&self, request: H::Request) -> bool {
        match &self.state.lock().requests {
            // A closed stream surfaces its real error on the receive side.
            Some(requests) => requests.send(request).is_ok(),
            None => false,
        }
    }

    fn terminate(&self, err: Option<WireError>) {
        {
            let mut state = self.state.lock();
            if state.status == StreamStatus::Terminated {
                return;
            }
            state.status = StreamStatus::Terminated;
            state.error = err;
            state.requests = None;
            state.cancel.cancel();
        }
        // The caller may hold its own lock, which the handler takes.
        let handler = self.handler.clone();
        let notify = Arc::clone(&self.notify);
        let deliver = move || {
            let _guard = notify.lock();
            if let Some(handler) = handler.upgrade() {
                handler.on_stream_status_change(StreamStatus::Terminated);
            }
        };
        match Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move { deliver() });
            }
            Err(_) => deliver(),
        }
    }

    /// Notify the handler unless the stream terminated in the meantime.
    fn notify_unless_terminated(&self, handler: &H, status: StreamStatus) -> bool {
        let _guard = self.notify.lock();
        if self.status() == StreamStatus::Terminated {
            return false;
        }
        handler.on_stream_status_change(status);
        true
    }

    /// Replace the current stream with a new connection. Only one
    /// reconnect runs at a time. With `reset`, the handler resets its state
    /// before the new stream is opened.
    fn connect(self: Arc<Self>, reset: bool) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let cancel = {
                let mut state = self.state.lock();
                if matches!(
                    state.status,
                    StreamStatus::Reconnecting | StreamStatus::Terminated
                ) {
                    return;
                }
                state.status = StreamStatus::Reconnecting;
                state.requests = None;
                state.cancel.cancel();
                state.cancel = CancellationToken::new();
                state.generation += 1;
                state.cancel.clone()
            };
            let Some(handler) = self.handler.upgrade() else {
                return;
            };
            if !self.notify_unless_terminated(&handler, StreamStatus::Reconnecting) {
                return;
            }
            if reset {
                debug!("Resetting stream state");
                handler.on_reset().await;
                if cancel.is_cancelled() {
                    return;
                }
            }

            let (requests, responses) = match self.init_new_stream(&handler, &cancel).await {
                Ok(Some(stream)) => stream,
                // stopped while connecting
                Ok(None) => return,
                Err(err) => {
                    warn!("Stream failed to connect: {}", err);
                    self.terminate(Some(err));
                    return;
                }
            };

            let generation = {
                let mut state = self.state.lock();
                if state.status == StreamStatus::Terminated {
                    return;
                }
                state.requests = Some(requests);
                state.status = StreamStatus::Connected;
                state.generation
            };
            debug!("Stream connected");
            if !self.notify_unless_terminated(&handler, StreamStatus::Connected) {
                return;
            }
            drop(handler);
            tokio::spawn(self.listen(responses, generation, cancel));
        })
    }

    async fn init_new_stream(
        &self,
        handler: &H,
        cancel: &CancellationToken,
    ) -> WireResult<Option<(mpsc::UnboundedSender<H::Request>, MessageStream<H::Response>)>> {
        let mut retryer = StreamRetryer::new(self.timeout);
        let attempt_timeout = stream_attempt_timeout(self.timeout);
        loop {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Ok(None),
                outcome = tokio::time::timeout(attempt_timeout, self.attempt(handler)) => {
                    outcome.unwrap_or_else(|_| {
                        Err(AttemptError::Recv(WireError::transport(
                            Code::DeadlineExceeded,
                            "stream initialization timed out",
                        )))
                    })
                }
            };
            let (err, backoff) = match outcome {
                Ok(stream) => return Ok(Some(stream)),
                Err(AttemptError::Recv(err)) => {
                    if is_stream_reset(&err) {
                        handler.on_reset().await;
                    }
                    let backoff = retryer.retry_recv(&err);
                    (err, backoff)
                }
                Err(AttemptError::Send(err)) => {
                    let backoff = retryer.retry_send(&err);
                    (err, backoff)
                }
                Err(AttemptError::Fatal(err)) => return Err(err),
            };
            let Some(backoff) = backoff else {
                return Err(err);
            };
            if retryer.exceeded_deadline() {
                return Err(WireError::BackendUnavailable(Box::new(err)));
            }
            debug!("Retrying stream connection in {:?} after: {}", backoff, err);
            tokio::select! {
                _ = cancel.cancelled() => return Ok(None),
                _ = sleep(backoff) => {}
            }
        }
    }

    async fn attempt(
        &self,
        handler: &H,
    ) -> Result<(mpsc::UnboundedSender<H::Request>, MessageStream<H::Response>), AttemptError> {
        let BidiStream {
            requests,
            mut responses,
        } = handler.new_stream().await.map_err(AttemptError::Recv)?;
        let (initial, needs_response) = handler.initial_request();
        if requests.send(initial).is_err() {
            return Err(AttemptError::Send(WireError::transport(
                Code::Unavailable,
                "stream closed before the initial request was sent",
            )));
        }
        if needs_response {
            match responses.next().await {
                Some(Ok(response)) => handler
                    .validate_initial_response(&response)
                    .map_err(AttemptError::Fatal)?,
                Some(Err(status)) => return Err(AttemptError::Recv(status.into())),
                None => return Err(AttemptError::Recv(WireError::StreamClosed)),
            }
        }
        Ok((requests, responses))
    }

    async fn next_response(
        &self,
        responses: &mut MessageStream<H::Response>,
    ) -> WireResult<H::Response> {
        let next = match self.idle_timeout {
            Some(idle) => match tokio::time::timeout(idle, responses.next()).await {
                Ok(next) => next,
                Err(_) => {
                    return Err(WireError::transport(
                        Code::DeadlineExceeded,
                        "stream idle timeout",
                    ))
                }
            },
            None => responses.next().await,
        };
        match next {
            Some(Ok(response)) => Ok(response),
            Some(Err(status)) => Err(status.into()),
            None => Err(WireError::StreamClosed),
        }
    }

    async fn listen(
        self: Arc<Self>,
        mut responses: MessageStream<H::Response>,
        generation: u64,
        cancel: CancellationToken,
    ) {
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return,
                next = self.next_response(&mut responses) => next,
            };
            let current = self.state.lock().generation;
            if current != generation {
                return;
            }
            match next {
                Ok(response) => {
                    let Some(handler) = self.handler.upgrade() else {
                        return;
                    };
                    handler.on_response(response).await;
                }
                Err(err) if is_retryable_recv(&err) => {
                    debug!("Reconnecting stream after: {}", err);
                    tokio::spawn(Arc::clone(&self).connect(is_stream_reset(&err)));
                    return;
                }
                Err(err) => {
                    warn!("Stream terminated: {}", err);
                    self.terminate(Some(err));
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
    use tonic::Status;

    use super::*;
    use crate::{
        proto::tributary::{
            streaming_commit_cursor_response, InitialCommitCursorResponse,
            SequencedCommitCursorResponse, StreamingCommitCursorRequest,
            StreamingCommitCursorResponse,
        },
        resources::SubscriptionPartition,
        transport::{mock::MockConnector, Connector},
    };

    struct TestHandler {
        connector: Arc<MockConnector>,
        subscription: SubscriptionPartition,
        stream: Arc<RetryableStream<TestHandler>>,
        statuses: UnboundedSender<StreamStatus>,
        responses: UnboundedSender<StreamingCommitCursorResponse>,
        resets: AtomicUsize,
        stop_on: Option<StreamStatus>,
    }

    #[async_trait::async_trait]
    impl StreamHandler for TestHandler {
        type Request = StreamingCommitCursorRequest;
        type Response = StreamingCommitCursorResponse;

        async fn new_stream(&self) -> WireResult<BidiStream<Self::Request, Self::Response>> {
            self.connector.commit_cursor(&self.subscription).await
        }

        fn initial_request(&self) -> (Self::Request, bool) {
            (
                StreamingCommitCursorRequest::initial(self.subscription.path.to_string(), 0),
                true,
            )
        }

        fn validate_initial_response(&self, response: &Self::Response) -> WireResult<()> {
            match response.request {
                Some(streaming_commit_cursor_response::Request::Initial(_)) => Ok(()),
                _ => Err(WireError::InvalidInitialResponse("test")),
            }
        }

        fn on_stream_status_change(&self, status: StreamStatus) {
            let _ = self.statuses.send(status);
            if self.stop_on == Some(status) {
                self.stream.stop();
            }
        }

        async fn on_reset(&self) {
            assert_eq!(self.stream.status(), StreamStatus::Reconnecting);
            self.resets.fetch_add(1, Ordering::SeqCst);
        }

        async fn on_response(&self, response: Self::Response) {
            let _ = self.responses.send(response);
        }
    }

    struct Harness {
        connector: Arc<MockConnector>,
        handler: Arc<TestHandler>,
        statuses: UnboundedReceiver<StreamStatus>,
        responses: UnboundedReceiver<StreamingCommitCursorResponse>,
    }

    impl Harness {
        fn new(timeout: Duration) -> Self {
            Self::build(timeout, None)
        }

        fn build(timeout: Duration, stop_on: Option<StreamStatus>) -> Self {
            let connector = MockConnector::new();
            let (status_tx, statuses) = unbounded_channel();
            let (response_tx, responses) = unbounded_channel();
            let handler = Arc::new_cyclic(|weak| TestHandler {
                connector: Arc::clone(&connector),
                subscription: SubscriptionPartition {
                    path: "projects/p/locations/l/subscriptions/s".parse().unwrap(),
                    partition: 0,
                },
                stream: RetryableStream::new(weak.clone(), timeout),
                statuses: status_tx,
                responses: response_tx,
                resets: AtomicUsize::new(0),
                stop_on,
            });
            Self {
                connector,
                handler,
                statuses,
                responses,
            }
        }

        async fn next_status(&mut self) -> StreamStatus {
            tokio::time::timeout(Duration::from_secs(5), self.statuses.recv())
                .await
                .unwrap()
                .unwrap()
        }
    }

    fn initial_response() -> StreamingCommitCursorResponse {
        StreamingCommitCursorResponse {
            request: Some(streaming_commit_cursor_response::Request::Initial(
                InitialCommitCursorResponse {},
            )),
        }
    }

    fn commit_response(n: i64) -> StreamingCommitCursorResponse {
        StreamingCommitCursorResponse {
            request: Some(streaming_commit_cursor_response::Request::Commit(
                SequencedCommitCursorResponse {
                    acknowledged_commits: n,
                },
            )),
        }
    }

    #[tokio::test]
    async fn test_connect_send_receive() {
        let mut harness = Harness::new(Duration::from_secs(60));
        let stream = Arc::clone(&harness.handler.stream);
        assert!(!stream.send(StreamingCommitCursorRequest::commit(1)));

        stream.start();
        assert_eq!(harness.next_status().await, StreamStatus::Reconnecting);
        let mut server = harness.connector.commit.accept().await.unwrap();
        assert_eq!(
            server.recv().await.unwrap(),
            StreamingCommitCursorRequest::initial(
                "projects/p/locations/l/subscriptions/s".to_string(),
                0
            )
        );
        server.respond(initial_response());
        assert_eq!(harness.next_status().await, StreamStatus::Connected);
        assert_eq!(stream.status(), StreamStatus::Connected);

        assert!(stream.send(StreamingCommitCursorRequest::commit(5)));
        assert_eq!(
            server.recv().await.unwrap(),
            StreamingCommitCursorRequest::commit(5)
        );
        server.respond(commit_response(1));
        assert_eq!(harness.responses.recv().await.unwrap(), commit_response(1));

        stream.stop();
        assert_eq!(harness.next_status().await, StreamStatus::Terminated);
        assert_eq!(stream.error(), None);
        assert!(server.closed().await);
        assert!(!stream.send(StreamingCommitCursorRequest::commit(6)));
    }

    #[tokio::test]
    async fn test_reconnect_on_retryable_error() {
        let mut harness = Harness::new(Duration::from_secs(60));
        let stream = Arc::clone(&harness.handler.stream);
        stream.start();
        let mut first = harness.connector.commit.accept().await.unwrap();
        first.recv().await.unwrap();
        first.respond(initial_response());
        assert_eq!(harness.next_status().await, StreamStatus::Reconnecting);
        assert_eq!(harness.next_status().await, StreamStatus::Connected);

        first.fail(Status::unavailable("server restarting"));
        assert_eq!(harness.next_status().await, StreamStatus::Reconnecting);
        let mut second = harness.connector.commit.accept().await.unwrap();
        second.recv().await.unwrap();
        second.respond(initial_response());
        assert_eq!(harness.next_status().await, StreamStatus::Connected);

        // responses from the superseded stream are discarded
        first.respond(commit_response(7));
        second.respond(commit_response(2));
        assert_eq!(harness.responses.recv().await.unwrap(), commit_response(2));
        assert!(harness.responses.try_recv().is_err());
        assert_eq!(harness.connector.commit.opened(), 2);
        stream.stop();
    }

    #[tokio::test]
    async fn test_terminate_on_permanent_error() {
        let mut harness = Harness::new(Duration::from_secs(60));
        let stream = Arc::clone(&harness.handler.stream);
        stream.start();
        let mut server = harness.connector.commit.accept().await.unwrap();
        server.recv().await.unwrap();
        server.respond(initial_response());
        assert_eq!(harness.next_status().await, StreamStatus::Reconnecting);
        assert_eq!(harness.next_status().await, StreamStatus::Connected);

        server.fail(Status::permission_denied("no access"));
        assert_eq!(harness.next_status().await, StreamStatus::Terminated);
        assert_eq!(
            stream.error(),
            Some(WireError::transport(tonic::Code::PermissionDenied, "no access"))
        );
    }

    #[tokio::test]
    async fn test_invalid_initial_response() {
        let mut harness = Harness::new(Duration::from_secs(60));
        let stream = Arc::clone(&harness.handler.stream);
        stream.start();
        let mut server = harness.connector.commit.accept().await.unwrap();
        server.recv().await.unwrap();
        server.respond(commit_response(1));
        assert_eq!(harness.next_status().await, StreamStatus::Reconnecting);
        assert_eq!(harness.next_status().await, StreamStatus::Terminated);
        assert_eq!(
            stream.error(),
            Some(WireError::InvalidInitialResponse("test"))
        );
    }

    #[tokio::test]
    async fn test_retries_failed_opens() {
        let mut harness = Harness::new(Duration::from_secs(60));
        harness
            .connector
            .commit
            .fail_next_open(Status::unavailable("down"));
        harness
            .connector
            .commit
            .fail_next_open(Status::resource_exhausted("busy"));
        let stream = Arc::clone(&harness.handler.stream);
        stream.start();
        let mut server = harness.connector.commit.accept().await.unwrap();
        server.recv().await.unwrap();
        server.respond(initial_response());
        assert_eq!(harness.next_status().await, StreamStatus::Reconnecting);
        assert_eq!(harness.next_status().await, StreamStatus::Connected);
        stream.stop();
    }

    #[tokio::test]
    async fn test_backend_unavailable_after_timeout() {
        let mut harness = Harness::new(Duration::from_millis(50));
        for _ in 0..100 {
            harness
                .connector
                .commit
                .fail_next_open(Status::unavailable("down"));
        }
        let stream = Arc::clone(&harness.handler.stream);
        stream.start();
        assert_eq!(harness.next_status().await, StreamStatus::Reconnecting);
        assert_eq!(harness.next_status().await, StreamStatus::Terminated);
        assert_eq!(
            stream.error(),
            Some(WireError::BackendUnavailable(Box::new(WireError::transport(
                tonic::Code::Unavailable,
                "down"
            ))))
        );
    }

    #[tokio::test]
    async fn test_terminated_follows_connected() {
        let mut harness = Harness::build(Duration::from_secs(60), Some(StreamStatus::Connected));
        let stream = Arc::clone(&harness.handler.stream);
        stream.start();
        let mut server = harness.connector.commit.accept().await.unwrap();
        server.recv().await.unwrap();
        server.respond(initial_response());

        // the handler stops the stream from its Connected notification
        assert_eq!(harness.next_status().await, StreamStatus::Reconnecting);
        assert_eq!(harness.next_status().await, StreamStatus::Connected);
        assert_eq!(harness.next_status().await, StreamStatus::Terminated);
        assert!(server.closed().await);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(harness.statuses.try_recv().is_err());
    }

    #[test]
    fn test_stop_without_runtime() {
        let mut harness = Harness::new(Duration::from_secs(60));
        let stream = Arc::clone(&harness.handler.stream);
        stream.stop();
        stream.stop();
        assert_eq!(stream.status(), StreamStatus::Terminated);
        assert_eq!(harness.statuses.try_recv().ok(), Some(StreamStatus::Terminated));
        assert!(harness.statuses.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_reset_signal_notifies_handler() {
        let mut harness = Harness::new(Duration::from_secs(60));
        let stream = Arc::clone(&harness.handler.stream);
        stream.start();
        let mut first = harness.connector.commit.accept().await.unwrap();
        first.recv().await.unwrap();
        first.respond(initial_response());
        assert_eq!(harness.next_status().await, StreamStatus::Reconnecting);
        assert_eq!(harness.next_status().await, StreamStatus::Connected);

        first.fail(Status::unavailable("restarting"));
        assert_eq!(harness.next_status().await, StreamStatus::Reconnecting);
        let mut second = harness.connector.commit.accept().await.unwrap();
        second.recv().await.unwrap();
        second.respond(initial_response());
        assert_eq!(harness.next_status().await, StreamStatus::Connected);
        assert_eq!(harness.handler.resets.load(Ordering::SeqCst), 0);

        second.reset();
        assert_eq!(harness.next_status().await, StreamStatus::Reconnecting);
        // a reset while connecting is handled too
        let third = harness.connector.commit.accept().await.unwrap();
        third.reset();
        let mut fourth = harness.connector.commit.accept().await.unwrap();
        fourth.recv().await.unwrap();
        fourth.respond(initial_response());
        assert_eq!(harness.next_status().await, StreamStatus::Connected);
        assert_eq!(harness.handler.resets.load(Ordering::SeqCst), 2);
        assert_eq!(harness.connector.commit.opened(), 4);
        stream.stop();
    }
}

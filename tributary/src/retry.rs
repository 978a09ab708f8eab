//! Backoff and error classification for reconnecting streams and unary
//! calls.

use std::{future::Future, time::Duration};

use rand::Rng;
use tokio::time::{sleep, Instant};
use tonic::Code;
use tracing::warn;

use crate::{
    constants::MAX_STREAM_ATTEMPT_TIMEOUT,
    error::{WireError, WireResult},
};

/// Exponential backoff with full jitter.
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
    max: Duration,
    multiplier: f64,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration, multiplier: f64) -> Self {
        Self {
            current: initial,
            max,
            multiplier,
        }
    }

    /// The next pause, chosen uniformly from `(0, current]`.
    pub fn pause(&mut self) -> Duration {
        let cap = self.current.as_nanos().clamp(1, u64::MAX as u128) as u64;
        let pause = Duration::from_nanos(rand::thread_rng().gen_range(1..=cap));
        self.current = self.current.mul_f64(self.multiplier).min(self.max);
        pause
    }
}

/// Whether a stream should be reconnected after receiving this error.
pub fn is_retryable_recv(err: &WireError) -> bool {
    match err {
        WireError::StreamClosed => true,
        _ => matches!(
            err.code(),
            Some(
                Code::Aborted
                    | Code::DeadlineExceeded
                    | Code::Internal
                    | Code::ResourceExhausted
                    | Code::Unavailable
                    | Code::Unknown
            )
        ),
    }
}

/// Whether the server asked the stream to reset its state before it
/// reconnects.
pub fn is_stream_reset(err: &WireError) -> bool {
    matches!(err, WireError::StreamReset { .. }) && is_retryable_recv(err)
}

/// Whether a stream should be reconnected after failing to send.
pub fn is_retryable_send(err: &WireError) -> bool {
    matches!(
        err.code(),
        Some(Code::DeadlineExceeded | Code::Unavailable)
    )
}

/// The bound on a single connection attempt, derived from the overall
/// retry budget.
pub fn stream_attempt_timeout(timeout: Duration) -> Duration {
    (timeout / 2).min(MAX_STREAM_ATTEMPT_TIMEOUT)
}

/// Tracks the backoff and overall deadline of one reconnect loop.
#[derive(Debug)]
pub struct StreamRetryer {
    backoff: Backoff,
    deadline: Instant,
}

impl StreamRetryer {
    pub fn new(timeout: Duration) -> Self {
        Self {
            backoff: Backoff::new(Duration::from_millis(10), Duration::from_secs(10), 2.0),
            deadline: Instant::now() + timeout,
        }
    }

    pub fn retry_recv(&mut self, err: &WireError) -> Option<Duration> {
        is_retryable_recv(err).then(|| self.backoff.pause())
    }

    pub fn retry_send(&mut self, err: &WireError) -> Option<Duration> {
        is_retryable_send(err).then(|| self.backoff.pause())
    }

    pub fn exceeded_deadline(&self) -> bool {
        Instant::now() > self.deadline
    }
}

/// Retries a unary call on retryable codes until `timeout` has elapsed.
pub async fn retry_unary<T, F, Fut>(timeout: Duration, mut call: F) -> WireResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = WireResult<T>>,
{
    let deadline = Instant::now() + timeout;
    let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(60), 1.3);
    let mut exhausted = Backoff::new(Duration::from_secs(1), Duration::from_secs(60), 3.0);
    loop {
        let err = match call().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };
        let pause = match err.code() {
            Some(Code::ResourceExhausted) => exhausted.pause(),
            _ if is_retryable_recv(&err) => backoff.pause(),
            _ => return Err(err),
        };
        if Instant::now() + pause > deadline {
            return Err(err);
        }
        warn!("Retrying call in {:?} after error: {}", pause, err);
        sleep(pause).await;
    }
}

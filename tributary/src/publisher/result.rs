use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use pin_project::pin_project;
use tokio::sync::oneshot;

use super::batcher::PublishResultFn;
use crate::{
    error::{WireError, WireResult},
    resources::MessageMetadata,
};

/// Resolves to the partition and offset of a published message once the
/// server has accepted it.
#[pin_project]
pub struct PublishResult {
    #[pin]
    rx: oneshot::Receiver<WireResult<MessageMetadata>>,
}

impl PublishResult {
    /// A result future and the callback that resolves it.
    pub(crate) fn new() -> (Self, PublishResultFn) {
        let (tx, rx) = oneshot::channel();
        let on_result: PublishResultFn = Box::new(move |result| {
            let _ = tx.send(result);
        });
        (Self { rx }, on_result)
    }
}

impl Future for PublishResult {
    type Output = WireResult<MessageMetadata>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // a dropped callback means the publisher went away without answering
        self.project()
            .rx
            .poll(cx)
            .map(|result| result.unwrap_or(Err(WireError::ServiceStopped)))
    }
}

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::ReceivedMessage;
use crate::acks::AckTracker;

/// Handles each message delivered by a subscriber.
pub type MessageReceiver = Arc<dyn Fn(ReceivedMessage) + Send + Sync>;

struct DeliveryState {
    messages: Option<mpsc::UnboundedSender<ReceivedMessage>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

/// Delivers the messages of one partition to the receiver in order, from a
/// dedicated task. A message's ack is tracked once it is handed to the
/// receiver, so discarded messages never hold up commits.
pub(crate) struct MessageDeliveryQueue {
    acks: Arc<Mutex<AckTracker>>,
    receiver: MessageReceiver,
    state: Mutex<DeliveryState>,
}

impl MessageDeliveryQueue {
    pub fn new(acks: Arc<Mutex<AckTracker>>, receiver: MessageReceiver) -> Self {
        Self {
            acks,
            receiver,
            state: Mutex::new(DeliveryState {
                messages: None,
                cancel: CancellationToken::new(),
                task: None,
            }),
        }
    }

    /// Start delivering, with an empty queue. A stopped queue may be
    /// started again.
    pub fn start(&self) {
        let mut state = self.state.lock();
        if state.messages.is_some() {
            return;
        }
        let (tx, mut rx) = mpsc::unbounded_channel::<ReceivedMessage>();
        state.messages = Some(tx);
        state.cancel = CancellationToken::new();

        let cancel = state.cancel.clone();
        let acks = Arc::clone(&self.acks);
        let receiver = Arc::clone(&self.receiver);
        state.task = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    message = rx.recv() => match message {
                        Some(message) => {
                            let ack = Arc::clone(message.ack_consumer());
                            if let Err(err) = acks.lock().push(ack) {
                                warn!("Delivering untracked message {}: {}", message.offset(), err);
                            }
                            receiver(message);
                        }
                        None => break,
                    },
                }
            }
        }));
    }

    /// Stop delivering. Messages not yet handed to the receiver are
    /// discarded.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        state.messages = None;
        state.cancel.cancel();
    }

    /// Wait for the delivery task to exit, including a receiver call in
    /// progress. Returns immediately if the queue was never started.
    pub async fn wait(&self) {
        let task = self.state.lock().task.take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    /// Queue a message. Ignored unless the queue is running.
    pub fn add(&self, message: ReceivedMessage) {
        if let Some(messages) = &self.state.lock().messages {
            let _ = messages.send(message);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicBool, Ordering},
        time::Duration,
    };

    use super::*;
    use crate::{
        acks::AckConsumer,
        proto::tributary::{Cursor, SequencedMessage},
    };

    fn received(offset: i64) -> ReceivedMessage {
        ReceivedMessage::new(
            SequencedMessage {
                cursor: Some(Cursor { offset }),
                ..Default::default()
            },
            0,
            AckConsumer::new(offset, 0, None),
        )
    }

    #[tokio::test]
    async fn test_delivers_in_order() {
        let acks = Arc::new(Mutex::new(AckTracker::default()));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let queue = MessageDeliveryQueue::new(
            Arc::clone(&acks),
            Arc::new(move |message: ReceivedMessage| {
                let _ = tx.send(message.offset());
            }),
        );
        queue.add(received(0));
        queue.start();
        for offset in 1..=3 {
            queue.add(received(offset));
        }
        for offset in 1..=3 {
            assert_eq!(rx.recv().await, Some(offset));
        }

        queue.stop();
        queue.add(received(4));
        queue.wait().await;
        assert!(rx.try_recv().is_err());

        // a restarted queue delivers new messages only
        queue.start();
        queue.add(received(5));
        assert_eq!(rx.recv().await, Some(5));
        queue.stop();
        queue.wait().await;
    }

    #[tokio::test]
    async fn test_tracks_acks_on_delivery() {
        let acks = Arc::new(Mutex::new(AckTracker::default()));
        let tracked = Arc::clone(&acks);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let queue = MessageDeliveryQueue::new(
            Arc::clone(&acks),
            Arc::new(move |message: ReceivedMessage| {
                // the ack is tracked before the receiver sees the message
                assert!(!tracked.lock().is_empty());
                let _ = tx.send(message);
            }),
        );
        assert!(acks.lock().is_empty());
        queue.start();
        queue.add(received(7));
        let message = rx.recv().await.unwrap();
        message.ack();
        assert_eq!(acks.lock().commit_offset(), 8);
        assert!(acks.lock().is_empty());

        // undelivered messages are never tracked
        queue.stop();
        queue.add(received(8));
        queue.wait().await;
        assert!(acks.lock().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_wait_for_receiver() {
        let acks = Arc::new(Mutex::new(AckTracker::default()));
        let finished = Arc::new(AtomicBool::new(false));
        let receiver_finished = Arc::clone(&finished);
        let (started_tx, mut started) = mpsc::unbounded_channel();
        let queue = MessageDeliveryQueue::new(
            acks,
            Arc::new(move |_: ReceivedMessage| {
                let _ = started_tx.send(());
                std::thread::sleep(Duration::from_millis(50));
                receiver_finished.store(true, Ordering::SeqCst);
            }),
        );
        queue.start();
        queue.add(received(0));
        started.recv().await.unwrap();
        queue.stop();
        queue.wait().await;
        assert!(finished.load(Ordering::SeqCst));
    }
}

//! Acknowledgement bookkeeping for one subscribed partition.
//!
//! Every delivered message gets an [AckConsumer]. The [AckTracker] turns
//! acks that arrive in any order into the highest offset that is safe to
//! commit, and the [CommitCursorTracker] follows commits sent to the server
//! until they are confirmed.

use std::{collections::VecDeque, fmt, sync::Arc};

use parking_lot::Mutex;

use crate::error::{WireError, WireResult};

/// An offset that has not been set.
const NIL_OFFSET: i64 = -1;

pub type AckHandler = Box<dyn FnOnce(&AckConsumer) + Send>;

struct AckState {
    acked: bool,
    on_ack: Option<AckHandler>,
}

/// The ack handle of one delivered message. Only the first call to
/// [AckConsumer::ack] has any effect.
pub struct AckConsumer {
    offset: i64,
    size_bytes: i64,
    state: Mutex<AckState>,
}

impl fmt::Debug for AckConsumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AckConsumer")
            .field("offset", &self.offset)
            .field("size_bytes", &self.size_bytes)
            .field("acked", &self.is_acked())
            .finish()
    }
}

impl AckConsumer {
    pub fn new(offset: i64, size_bytes: i64, on_ack: Option<AckHandler>) -> Arc<Self> {
        Arc::new(Self {
            offset,
            size_bytes,
            state: Mutex::new(AckState {
                acked: false,
                on_ack,
            }),
        })
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn size_bytes(&self) -> i64 {
        self.size_bytes
    }

    pub fn is_acked(&self) -> bool {
        self.state.lock().acked
    }

    /// Mark the message processed, releasing its flow control tokens.
    pub fn ack(&self) {
        let on_ack = {
            let mut state = self.state.lock();
            if state.acked {
                return;
            }
            state.acked = true;
            state.on_ack.take()
        };
        if let Some(on_ack) = on_ack {
            on_ack(self);
        }
    }

    /// Detach the ack handler, e.g. once the partition is unassigned.
    fn clear(&self) {
        self.state.lock().on_ack = None;
    }
}

/// Outstanding acks of one partition, in delivery order.
#[derive(Debug)]
pub struct AckTracker {
    /// The offset after the last acked prefix, which is what gets
    /// committed.
    desired_commit_offset: i64,
    outstanding: VecDeque<Arc<AckConsumer>>,
    released: bool,
}

impl Default for AckTracker {
    fn default() -> Self {
        Self {
            desired_commit_offset: NIL_OFFSET,
            outstanding: VecDeque::new(),
            released: false,
        }
    }
}

impl AckTracker {
    /// Track a newly delivered message. Offsets must strictly increase.
    pub fn push(&mut self, ack: Arc<AckConsumer>) -> WireResult<()> {
        if self.released {
            // acks are meaningless once the partition is unassigned
            ack.clear();
            return Ok(());
        }
        if ack.offset() < self.desired_commit_offset {
            return Err(WireError::OutOfOrderMessages);
        }
        if let Some(back) = self.outstanding.back() {
            if ack.offset() <= back.offset() {
                return Err(WireError::OutOfOrderMessages);
            }
        }
        self.outstanding.push_back(ack);
        Ok(())
    }

    /// The offset to commit: one past the last message of the acked prefix,
    /// or -1 if nothing has been acked.
    pub fn commit_offset(&mut self) -> i64 {
        while let Some(front) = self.outstanding.front() {
            if !front.is_acked() {
                break;
            }
            self.desired_commit_offset = front.offset() + 1;
            self.outstanding.pop_front();
        }
        self.desired_commit_offset
    }

    /// Stop tracking. Acks received so far still count towards the commit
    /// offset, later ones are ignored.
    pub fn release(&mut self) {
        self.commit_offset();
        self.released = true;
        for ack in self.outstanding.drain(..) {
            ack.clear();
        }
    }

    /// Whether every tracked message has been acked and popped by
    /// [AckTracker::commit_offset].
    pub fn is_empty(&self) -> bool {
        self.outstanding.is_empty()
    }

    /// Discard all state, including the commit offset, so that tracking
    /// can start over from any offset.
    pub fn reset(&mut self) {
        self.release();
        *self = Self::default();
    }
}

/// Commits sent to the server and not yet confirmed.
#[derive(Debug)]
pub struct CommitCursorTracker {
    last_confirmed: i64,
    pending: VecDeque<i64>,
}

impl Default for CommitCursorTracker {
    fn default() -> Self {
        Self {
            last_confirmed: NIL_OFFSET,
            pending: VecDeque::new(),
        }
    }
}

impl CommitCursorTracker {
    /// The next offset to commit, if `acked` is ahead of both the confirmed
    /// and the pending commits.
    pub fn next_offset(&self, acked: i64) -> Option<i64> {
        if acked <= self.last_confirmed {
            return None;
        }
        match self.pending.back() {
            Some(&last) if acked <= last => None,
            _ => Some(acked),
        }
    }

    pub fn add_pending(&mut self, offset: i64) {
        self.pending.push_back(offset);
    }

    /// Forget pending commits, which a new stream will not confirm.
    pub fn clear_pending(&mut self) {
        self.pending.clear();
    }

    /// Record that the server confirmed the oldest `num` pending commits.
    pub fn confirm_offsets(&mut self, num: i64) -> WireResult<()> {
        if num < 0 || num as usize > self.pending.len() {
            return Err(WireError::ExcessCommitConfirmations {
                confirmed: num,
                pending: self.pending.len(),
            });
        }
        for _ in 0..num {
            if let Some(offset) = self.pending.pop_front() {
                self.last_confirmed = offset;
            }
        }
        Ok(())
    }

    /// Whether `acked` has been committed and confirmed.
    pub fn up_to_date(&self, acked: i64) -> bool {
        acked <= self.last_confirmed && self.pending.is_empty()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

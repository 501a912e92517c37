//! In-process queue over a crossbeam channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use super::{Delivery, QueueError, TaskQueue};

/// Unbounded in-memory queue. Nothing survives a restart; meant for a single
/// process running both submission and workers, and for tests.
pub struct ChannelQueue {
    sender: Sender<(String, u32)>,
    receiver: Receiver<(String, u32)>,
    closed: AtomicBool,
}

impl ChannelQueue {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self {
            sender,
            receiver,
            closed: AtomicBool::new(false),
        }
    }

    /// Rejects further enqueues. Pending items are still handed out; once
    /// drained, `dequeue` reports `Closed`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    fn push(&self, edit_id: String, attempt: u32) -> Result<(), QueueError> {
        self.sender
            .send((edit_id, attempt))
            .map_err(|_| QueueError::Closed)
    }
}

impl Default for ChannelQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskQueue for ChannelQueue {
    fn enqueue(&self, edit_id: &str) -> Result<(), QueueError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueueError::Closed);
        }
        self.push(edit_id.to_string(), 1)
    }

    fn dequeue(&self, timeout: Duration) -> Result<Option<Delivery>, QueueError> {
        if self.closed.load(Ordering::SeqCst) && self.receiver.is_empty() {
            return Err(QueueError::Closed);
        }
        match self.receiver.recv_timeout(timeout) {
            Ok((edit_id, attempt)) => Ok(Some(Delivery {
                edit_id,
                attempt,
                token: 0,
            })),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(QueueError::Closed),
        }
    }

    fn ack(&self, _delivery: &Delivery) -> Result<(), QueueError> {
        Ok(())
    }

    fn nack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        // Redeliveries bypass the closed check so in-flight work is not lost.
        self.push(delivery.edit_id.clone(), delivery.attempt + 1)
    }
}

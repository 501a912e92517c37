//! At-least-once delivery of edit ids from the submission path to workers.

use std::time::Duration;

use thiserror::Error;

use crate::db::DatabaseError;

pub mod channel;
pub mod durable;

pub use channel::ChannelQueue;
pub use durable::SqliteTaskQueue;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue is closed")]
    Closed,

    #[error("Queue storage error: {0}")]
    Database(#[from] DatabaseError),
}

/// One hand-out of a queued edit id. Must be acked or nacked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub edit_id: String,
    /// 1 on first delivery, incremented on every redelivery.
    pub attempt: u32,
    pub(crate) token: i64,
}

/// A queue of edit ids with explicit acknowledgement.
///
/// There is no ordering guarantee across ids, and an id may be delivered more
/// than once; consumers must be idempotent.
pub trait TaskQueue: Send + Sync {
    fn enqueue(&self, edit_id: &str) -> Result<(), QueueError>;

    /// Waits up to `timeout` for a delivery. `Ok(None)` when nothing arrived.
    fn dequeue(&self, timeout: Duration) -> Result<Option<Delivery>, QueueError>;

    /// Marks the delivery as done; it will not be handed out again.
    fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Returns the delivery to the queue for another attempt.
    fn nack(&self, delivery: &Delivery) -> Result<(), QueueError>;
}

//! Durable queue backed by the `task_queue` table.

use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;

use crate::db::{queue_repo, Database};

use super::{Delivery, QueueError, TaskQueue};

/// SQLite lease queue. A claimed task stays invisible for `lease`; if the
/// worker neither acks nor nacks in time it is handed out again.
#[derive(Clone)]
pub struct SqliteTaskQueue {
    db: Database,
    lease: Duration,
    poll_interval: Duration,
}

impl SqliteTaskQueue {
    pub fn new(db: Database, lease: Duration, poll_interval: Duration) -> Self {
        Self {
            db,
            lease,
            poll_interval,
        }
    }

    /// Tasks not yet acknowledged.
    pub fn len(&self) -> Result<u64, QueueError> {
        Ok(self.db.with_conn(queue_repo::count)?)
    }

    pub fn is_empty(&self) -> Result<bool, QueueError> {
        Ok(self.len()? == 0)
    }

    fn try_claim(&self) -> Result<Option<Delivery>, QueueError> {
        let now_ms = Utc::now().timestamp_millis();
        let lease_ms = i64::try_from(self.lease.as_millis()).unwrap_or(i64::MAX / 2);
        let task = self
            .db
            .transaction(|tx| queue_repo::claim_next(tx, now_ms, lease_ms))?;

        Ok(task.map(|task| {
            if task.deliveries > 1 {
                log::info!(
                    "Redelivering edit {} (delivery {})",
                    task.edit_id,
                    task.deliveries
                );
            }
            Delivery {
                edit_id: task.edit_id,
                attempt: task.deliveries,
                token: task.seq,
            }
        }))
    }
}

impl TaskQueue for SqliteTaskQueue {
    fn enqueue(&self, edit_id: &str) -> Result<(), QueueError> {
        let now = Utc::now();
        let seq = self.db.with_conn(|conn| {
            queue_repo::push(conn, edit_id, &now.to_rfc3339(), now.timestamp_millis())
        })?;
        log::debug!("Enqueued edit {} as task {}", edit_id, seq);
        Ok(())
    }

    fn dequeue(&self, timeout: Duration) -> Result<Option<Delivery>, QueueError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(delivery) = self.try_claim()? {
                return Ok(Some(delivery));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            thread::sleep(self.poll_interval.min(deadline - now));
        }
    }

    fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.db
            .with_conn(|conn| queue_repo::delete(conn, delivery.token))?;
        Ok(())
    }

    fn nack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let now_ms = Utc::now().timestamp_millis();
        self.db
            .with_conn(|conn| queue_repo::release(conn, delivery.token, now_ms))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WAIT: Duration = Duration::from_millis(50);

    fn queue(lease: Duration) -> SqliteTaskQueue {
        let db = Database::open_in_memory().unwrap();
        SqliteTaskQueue::new(db, lease, Duration::from_millis(5))
    }

    #[test]
    fn test_ack_removes_task() {
        let queue = queue(Duration::from_secs(60));
        queue.enqueue("a").unwrap();
        let delivery = queue.dequeue(WAIT).unwrap().unwrap();
        assert_eq!(delivery.edit_id, "a");
        assert_eq!(delivery.attempt, 1);

        queue.ack(&delivery).unwrap();
        assert!(queue.is_empty().unwrap());
        assert!(queue.dequeue(WAIT).unwrap().is_none());
    }

    #[test]
    fn test_leased_task_is_invisible() {
        let queue = queue(Duration::from_secs(60));
        queue.enqueue("a").unwrap();
        queue.dequeue(WAIT).unwrap().unwrap();
        assert!(queue.dequeue(WAIT).unwrap().is_none());
        assert_eq!(queue.len().unwrap(), 1);
    }

    #[test]
    fn test_expired_lease_is_redelivered() {
        let queue = queue(Duration::from_millis(20));
        queue.enqueue("a").unwrap();
        let first = queue.dequeue(WAIT).unwrap().unwrap();

        // Worker "dies": no ack, no nack.
        let second = queue.dequeue(Duration::from_millis(500)).unwrap().unwrap();
        assert_eq!(second.edit_id, first.edit_id);
        assert_eq!(second.attempt, 2);
    }

    #[test]
    fn test_nack_makes_task_visible_now() {
        let queue = queue(Duration::from_secs(60));
        queue.enqueue("a").unwrap();
        let first = queue.dequeue(WAIT).unwrap().unwrap();
        queue.nack(&first).unwrap();

        let second = queue.dequeue(WAIT).unwrap().unwrap();
        assert_eq!(second.attempt, 2);
    }

    #[test]
    fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.db");
        {
            let db = Database::open(&path).unwrap();
            let queue = SqliteTaskQueue::new(db, Duration::from_secs(60), Duration::from_millis(5));
            queue.enqueue("persisted").unwrap();
        }
        let db = Database::open(&path).unwrap();
        let queue = SqliteTaskQueue::new(db, Duration::from_secs(60), Duration::from_millis(5));
        let delivery = queue.dequeue(WAIT).unwrap().unwrap();
        assert_eq!(delivery.edit_id, "persisted");
    }
}

//! Task queue repository — leased rows in `task_queue`.
//!
//! A task is visible once `visible_at` (unix millis) has passed. Claiming it
//! pushes `visible_at` forward by the lease, so a worker that dies without
//! acknowledging simply lets the lease run out and the task reappears.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::DatabaseError;

/// A raw task row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRow {
    pub seq: i64,
    pub edit_id: String,
    pub enqueued_at: String,
    pub visible_at: i64,
    pub deliveries: u32,
}

impl TaskRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            seq: row.get("seq")?,
            edit_id: row.get("edit_id")?,
            enqueued_at: row.get("enqueued_at")?,
            visible_at: row.get("visible_at")?,
            deliveries: row.get("deliveries")?,
        })
    }
}

/// Appends a task that is visible immediately. Returns its sequence number.
pub fn push(
    conn: &Connection,
    edit_id: &str,
    enqueued_at: &str,
    now_ms: i64,
) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO task_queue (edit_id, enqueued_at, visible_at) VALUES (?1, ?2, ?3)",
        params![edit_id, enqueued_at, now_ms],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Leases the oldest visible task until `now_ms + lease_ms`.
///
/// Must run inside a transaction so two claimers never get the same row.
pub fn claim_next(
    conn: &Connection,
    now_ms: i64,
    lease_ms: i64,
) -> Result<Option<TaskRow>, DatabaseError> {
    let task = conn
        .query_row(
            "SELECT * FROM task_queue WHERE visible_at <= ?1 ORDER BY seq LIMIT 1",
            params![now_ms],
            TaskRow::from_row,
        )
        .optional()?;

    let Some(mut task) = task else {
        return Ok(None);
    };

    task.visible_at = now_ms + lease_ms;
    task.deliveries += 1;
    conn.execute(
        "UPDATE task_queue SET visible_at = ?2, deliveries = ?3 WHERE seq = ?1",
        params![task.seq, task.visible_at, task.deliveries],
    )?;
    Ok(Some(task))
}

/// Removes an acknowledged task.
pub fn delete(conn: &Connection, seq: i64) -> Result<(), DatabaseError> {
    conn.execute("DELETE FROM task_queue WHERE seq = ?1", params![seq])?;
    Ok(())
}

/// Makes a leased task visible again at `visible_at`.
pub fn release(conn: &Connection, seq: i64, visible_at: i64) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE task_queue SET visible_at = ?2 WHERE seq = ?1",
        params![seq, visible_at],
    )?;
    Ok(())
}

/// Number of tasks not yet acknowledged, leased or not.
pub fn count(conn: &Connection) -> Result<u64, DatabaseError> {
    let count: u64 = conn.query_row("SELECT COUNT(*) FROM task_queue", [], |r| r.get(0))?;
    Ok(count)
}

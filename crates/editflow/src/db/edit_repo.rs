//! Edit repository — row-level access to the `edits` table.
//!
//! Functions take a `&Connection` so callers can compose them inside
//! [`Database::transaction`](super::Database::transaction).

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::DatabaseError;

/// A raw edit row from the database.
#[derive(Debug, Clone, PartialEq)]
pub struct EditRow {
    pub id: String,
    pub prompt: String,
    pub enhanced_prompt: Option<String>,
    pub original_image_ref: String,
    pub result_image_ref: Option<String>,
    pub status: String,
    pub processing_stage: String,
    pub parent_id: Option<String>,
    pub chain_position: u32,
    pub failed_stage: Option<String>,
    pub failure_kind: Option<String>,
    pub failure_message: Option<String>,
    pub message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl EditRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            prompt: row.get("prompt")?,
            enhanced_prompt: row.get("enhanced_prompt")?,
            original_image_ref: row.get("original_image_ref")?,
            result_image_ref: row.get("result_image_ref")?,
            status: row.get("status")?,
            processing_stage: row.get("processing_stage")?,
            parent_id: row.get("parent_id")?,
            chain_position: row.get("chain_position")?,
            failed_stage: row.get("failed_stage")?,
            failure_kind: row.get("failure_kind")?,
            failure_message: row.get("failure_message")?,
            message: row.get("message")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Inserts a new edit row.
pub fn insert(conn: &Connection, edit: &EditRow) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO edits (id, prompt, enhanced_prompt, original_image_ref, result_image_ref,
         status, processing_stage, parent_id, chain_position, failed_stage, failure_kind,
         failure_message, message, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        params![
            edit.id,
            edit.prompt,
            edit.enhanced_prompt,
            edit.original_image_ref,
            edit.result_image_ref,
            edit.status,
            edit.processing_stage,
            edit.parent_id,
            edit.chain_position,
            edit.failed_stage,
            edit.failure_kind,
            edit.failure_message,
            edit.message,
            edit.created_at,
            edit.updated_at,
        ],
    )?;
    Ok(())
}

/// Overwrites the mutable columns of an edit. `id`, `prompt`, the original
/// image, the chain columns and `created_at` never change after insert.
pub fn update(conn: &Connection, edit: &EditRow) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE edits SET enhanced_prompt=?2, result_image_ref=?3, status=?4,
         processing_stage=?5, failed_stage=?6, failure_kind=?7, failure_message=?8,
         message=?9, updated_at=?10
         WHERE id=?1",
        params![
            edit.id,
            edit.enhanced_prompt,
            edit.result_image_ref,
            edit.status,
            edit.processing_stage,
            edit.failed_stage,
            edit.failure_kind,
            edit.failure_message,
            edit.message,
            edit.updated_at,
        ],
    )?;
    Ok(())
}

/// Finds an edit by its ID.
pub fn find_by_id(conn: &Connection, id: &str) -> Result<Option<EditRow>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM edits WHERE id = ?1",
            params![id],
            EditRow::from_row,
        )
        .optional()?;
    Ok(row)
}

/// Counts edits with the given status.
pub fn count_by_status(conn: &Connection, status: &str) -> Result<u64, DatabaseError> {
    let count: u64 = conn.query_row(
        "SELECT COUNT(*) FROM edits WHERE status = ?1",
        params![status],
        |r| r.get(0),
    )?;
    Ok(count)
}

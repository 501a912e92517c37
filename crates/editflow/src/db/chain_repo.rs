//! Chain link repository — parent/child rows in `edit_chains`.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::DatabaseError;

/// A raw chain link row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainLinkRow {
    pub edit_id: String,
    pub parent_id: String,
    pub chain_position: u32,
    pub created_at: String,
}

impl ChainLinkRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            edit_id: row.get("edit_id")?,
            parent_id: row.get("parent_id")?,
            chain_position: row.get("chain_position")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// Inserts the link for a child edit. The child row must already exist.
pub fn insert(conn: &Connection, link: &ChainLinkRow) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO edit_chains (edit_id, parent_id, chain_position, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            link.edit_id,
            link.parent_id,
            link.chain_position,
            link.created_at
        ],
    )?;
    Ok(())
}

/// Finds the link pointing from `edit_id` to its parent.
pub fn find_by_edit_id(
    conn: &Connection,
    edit_id: &str,
) -> Result<Option<ChainLinkRow>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM edit_chains WHERE edit_id = ?1",
            params![edit_id],
            ChainLinkRow::from_row,
        )
        .optional()?;
    Ok(row)
}

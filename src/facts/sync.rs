//! Bookkeeping for the second phase of a dual-write (`graph_writes`).

use rusqlite::{params, Connection, OptionalExtension};

use super::store::{now, queue_graph_write, write_log};
use super::types::GraphWriteStatus;
use crate::error::{CortexError, Result};

pub fn mark_done(conn: &Connection, owner_id: &str, fact_id: &str) -> Result<()> {
    conn.execute(
        "UPDATE graph_writes SET status = 'done', attempts = attempts + 1, last_error = NULL, updated_at = ?1 \
         WHERE fact_id = ?2 AND owner_id = ?3",
        params![now(), fact_id, owner_id],
    )?;
    write_log(
        conn,
        "graph_sync",
        Some(fact_id),
        owner_id,
        Some(&serde_json::json!({ "status": "done" })),
    )?;
    Ok(())
}

pub fn mark_failed(conn: &Connection, owner_id: &str, fact_id: &str, error: &str) -> Result<()> {
    conn.execute(
        "UPDATE graph_writes SET status = 'failed', attempts = attempts + 1, last_error = ?1, updated_at = ?2 \
         WHERE fact_id = ?3 AND owner_id = ?4",
        params![error, now(), fact_id, owner_id],
    )?;
    write_log(
        conn,
        "graph_sync",
        Some(fact_id),
        owner_id,
        Some(&serde_json::json!({ "status": "failed", "error": error })),
    )?;
    Ok(())
}

/// Put an active fact's graph write back to `pending`, whatever its previous state.
/// Used by repair once the auditor has found the fact missing from the graph.
pub fn requeue(conn: &Connection, owner_id: &str, fact_id: &str) -> Result<()> {
    let active: Option<String> = conn
        .query_row(
            "SELECT fact_id FROM facts WHERE fact_id = ?1 AND owner_id = ?2 AND superseded_by IS NULL",
            params![fact_id, owner_id],
            |row| row.get(0),
        )
        .optional()?;
    if active.is_none() {
        return Err(CortexError::NotFound(format!("fact {fact_id}")));
    }
    if !queue_graph_write(conn, fact_id, owner_id)? {
        conn.execute(
            "UPDATE graph_writes SET status = 'pending', updated_at = ?1 WHERE fact_id = ?2",
            params![now(), fact_id],
        )?;
    }
    Ok(())
}

pub fn status(conn: &Connection, fact_id: &str) -> Result<Option<GraphWriteStatus>> {
    let status: Option<String> = conn
        .query_row(
            "SELECT status FROM graph_writes WHERE fact_id = ?1",
            params![fact_id],
            |row| row.get(0),
        )
        .optional()?;
    status
        .map(|s| s.parse().map_err(CortexError::StoreUnavailable))
        .transpose()
}

/// Ids of active facts whose graph write is still pending, oldest first.
pub fn pending(conn: &Connection, owner_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT g.fact_id FROM graph_writes g JOIN facts f ON f.fact_id = g.fact_id \
         WHERE g.owner_id = ?1 AND g.status = 'pending' AND f.superseded_by IS NULL \
         ORDER BY g.updated_at ASC",
    )?;
    let rows = stmt.query_map(params![owner_id], |row| row.get(0))?;
    let ids = rows.collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(ids)
}

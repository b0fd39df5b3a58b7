//! Destructive operations: single delete, topic bulk delete, and clear.
//!
//! Every path removes the `facts` row, its vector, and (by cascade) its topics and
//! queued graph write, then records the operation in `fact_log`.

use rusqlite::{params, Connection, Transaction};
use std::collections::BTreeSet;

use super::store::write_log;
use crate::error::{CortexError, Result};

/// Delete one fact, active or superseded. Unknown ids are [`CortexError::NotFound`].
pub fn delete_fact(conn: &mut Connection, owner_id: &str, fact_id: &str) -> Result<()> {
    let tx = conn.transaction()?;
    if remove_rows(&tx, owner_id, &[fact_id.to_string()])? == 0 {
        return Err(CortexError::NotFound(format!("fact {fact_id}")));
    }
    write_log(&tx, "delete", Some(fact_id), owner_id, None)?;
    tx.commit()?;
    tracing::info!(fact_id = %fact_id, owner = %owner_id, "fact deleted");
    Ok(())
}

/// Delete every fact carrying at least one of `topics`. Facts tagged only with
/// other topics are untouched. Returns the number of facts removed.
pub fn delete_by_topics(
    conn: &mut Connection,
    owner_id: &str,
    topics: &BTreeSet<String>,
) -> Result<usize> {
    if topics.is_empty() {
        return Ok(0);
    }
    let tx = conn.transaction()?;

    let ids: Vec<String> = {
        let mut stmt = tx.prepare(
            "SELECT DISTINCT f.fact_id FROM facts f JOIN fact_topics t ON t.fact_id = f.fact_id \
             WHERE f.owner_id = ?1 AND t.topic = ?2",
        )?;
        let mut ids = BTreeSet::new();
        for topic in topics {
            let rows = stmt.query_map(params![owner_id, topic], |row| row.get::<_, String>(0))?;
            for id in rows {
                ids.insert(id?);
            }
        }
        ids.into_iter().collect()
    };

    let removed = remove_rows(&tx, owner_id, &ids)?;
    write_log(
        &tx,
        "delete",
        None,
        owner_id,
        Some(&serde_json::json!({ "topics": topics, "removed": removed })),
    )?;
    tx.commit()?;
    tracing::info!(owner = %owner_id, removed, "facts deleted by topic");
    Ok(removed)
}

/// Delete all facts of `owner_id`. Returns the number removed.
pub fn clear(conn: &mut Connection, owner_id: &str) -> Result<usize> {
    let tx = conn.transaction()?;
    let ids: Vec<String> = {
        let mut stmt = tx.prepare("SELECT fact_id FROM facts WHERE owner_id = ?1")?;
        let rows = stmt.query_map(params![owner_id], |row| row.get(0))?;
        let ids = rows.collect::<std::result::Result<_, _>>()?;
        ids
    };
    let removed = remove_rows(&tx, owner_id, &ids)?;
    write_log(
        &tx,
        "clear",
        None,
        owner_id,
        Some(&serde_json::json!({ "removed": removed })),
    )?;
    tx.commit()?;
    tracing::warn!(owner = %owner_id, removed, "fact store cleared");
    Ok(removed)
}

fn remove_rows(tx: &Transaction, owner_id: &str, ids: &[String]) -> Result<usize> {
    let mut removed = 0;
    for id in ids {
        let n = tx.execute(
            "DELETE FROM facts WHERE fact_id = ?1 AND owner_id = ?2",
            params![id, owner_id],
        )?;
        if n > 0 {
            // vec0 tables do not take part in foreign-key cascades.
            tx.execute("DELETE FROM facts_vec WHERE fact_id = ?1", params![id])?;
            removed += n;
        }
    }
    Ok(removed)
}

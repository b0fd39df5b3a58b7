//! Write path: dedup, insert, supersede, and the fact log.
//!
//! [`store_fact`] and [`update_fact`] each run inside a single transaction. A
//! dual-sourced write also records a `pending` row in `graph_writes` in the same
//! transaction, so the second phase of a dual-write is never lost.

use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::collections::BTreeSet;

use super::embedding_to_bytes;
use super::types::{normalize_text, text_similarity, FactSource, StoreOutcome};
use crate::error::{CortexError, Result};

/// How close a new fact must be to an existing one to count as a duplicate.
#[derive(Debug, Clone, Copy)]
pub struct DedupPolicy {
    /// Minimum cosine similarity of the embeddings.
    pub cosine_threshold: f64,
    /// Minimum token-set Jaccard similarity of the normalized text.
    pub text_threshold: f64,
}

impl Default for DedupPolicy {
    fn default() -> Self {
        Self {
            cosine_threshold: 0.8,
            text_threshold: 0.75,
        }
    }
}

impl From<&crate::config::RetrievalConfig> for DedupPolicy {
    fn from(config: &crate::config::RetrievalConfig) -> Self {
        Self {
            cosine_threshold: config.dedup_threshold,
            text_threshold: config.text_similarity_threshold,
        }
    }
}

/// Store a fact for `owner_id`, or return the id of an existing duplicate.
///
/// A duplicate inserts no row. When the duplicate was local-only and the new write
/// is dual-sourced, the existing fact is upgraded to `both` and its graph write is
/// queued; a previously failed graph write is re-queued the same way.
pub fn store_fact(
    conn: &mut Connection,
    owner_id: &str,
    content: &str,
    topics: &BTreeSet<String>,
    source: FactSource,
    embedding: &[f32],
    policy: DedupPolicy,
) -> Result<StoreOutcome> {
    let normalized = normalize_text(content);
    let tx = conn.transaction()?;

    if let Some((existing_id, existing_source)) =
        find_duplicate(&tx, owner_id, &normalized, embedding, policy)?
    {
        let mut queued = false;
        if source == FactSource::Both {
            if existing_source != FactSource::Both {
                tx.execute(
                    "UPDATE facts SET source = 'both', updated_at = ?1 WHERE fact_id = ?2",
                    params![now(), existing_id],
                )?;
            }
            queued = queue_graph_write(&tx, &existing_id, owner_id)?;
        }
        write_log(
            &tx,
            "dedup",
            Some(&existing_id),
            owner_id,
            Some(&serde_json::json!({ "graph_write_queued": queued })),
        )?;
        tx.commit()?;
        tracing::debug!(fact_id = %existing_id, owner = %owner_id, "duplicate fact, reusing id");
        return Ok(StoreOutcome {
            fact_id: existing_id,
            deduplicated: true,
            graph_write_queued: queued,
        });
    }

    let fact_id = uuid::Uuid::now_v7().to_string();
    insert_fact(&tx, &fact_id, owner_id, content, &normalized, topics, source, embedding)?;
    let queued = source == FactSource::Both && queue_graph_write(&tx, &fact_id, owner_id)?;
    write_log(&tx, "create", Some(&fact_id), owner_id, None)?;
    tx.commit()?;

    tracing::info!(fact_id = %fact_id, owner = %owner_id, source = %source, "fact stored");
    Ok(StoreOutcome {
        fact_id,
        deduplicated: false,
        graph_write_queued: queued,
    })
}

/// Replace an active fact with new content under a fresh id.
///
/// The old row keeps its history with `superseded_by` set; its vector is removed
/// so queries can no longer return it. Dedup is not applied to the replacement.
pub fn update_fact(
    conn: &mut Connection,
    owner_id: &str,
    fact_id: &str,
    content: &str,
    topics: &BTreeSet<String>,
    embedding: &[f32],
) -> Result<StoreOutcome> {
    let tx = conn.transaction()?;

    let source: FactSource = tx
        .query_row(
            "SELECT source FROM facts WHERE fact_id = ?1 AND owner_id = ?2 AND superseded_by IS NULL",
            params![fact_id, owner_id],
            |row| row.get::<_, String>(0),
        )
        .optional()?
        .ok_or_else(|| CortexError::NotFound(format!("fact {fact_id}")))?
        .parse()
        .map_err(CortexError::StoreUnavailable)?;

    let new_id = uuid::Uuid::now_v7().to_string();
    let normalized = normalize_text(content);
    insert_fact(&tx, &new_id, owner_id, content, &normalized, topics, source, embedding)?;

    tx.execute(
        "UPDATE facts SET superseded_by = ?1, updated_at = ?2 WHERE fact_id = ?3",
        params![new_id, now(), fact_id],
    )?;
    tx.execute("DELETE FROM facts_vec WHERE fact_id = ?1", params![fact_id])?;
    tx.execute(
        "DELETE FROM graph_writes WHERE fact_id = ?1 AND status != 'done'",
        params![fact_id],
    )?;

    let queued = source == FactSource::Both && queue_graph_write(&tx, &new_id, owner_id)?;
    write_log(
        &tx,
        "supersede",
        Some(fact_id),
        owner_id,
        Some(&serde_json::json!({ "superseded_by": &new_id })),
    )?;
    write_log(&tx, "create", Some(&new_id), owner_id, None)?;
    tx.commit()?;

    tracing::info!(old = %fact_id, new = %new_id, owner = %owner_id, "fact superseded");
    Ok(StoreOutcome {
        fact_id: new_id,
        deduplicated: false,
        graph_write_queued: queued,
    })
}

/// Nearest active fact of the same owner that passes both similarity gates.
fn find_duplicate(
    tx: &Transaction,
    owner_id: &str,
    normalized: &str,
    embedding: &[f32],
    policy: DedupPolicy,
) -> Result<Option<(String, FactSource)>> {
    // Cosine metric: distance = 1 - similarity.
    let max_distance = 1.0 - policy.cosine_threshold;

    let mut stmt = tx.prepare(
        "SELECT fact_id, distance FROM facts_vec WHERE embedding MATCH ?1 ORDER BY distance LIMIT 20",
    )?;
    let candidates: Vec<(String, f64)> = stmt
        .query_map(params![embedding_to_bytes(embedding)], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    for (candidate_id, distance) in candidates {
        if distance > max_distance {
            break;
        }

        let row: Option<(String, String)> = tx
            .query_row(
                "SELECT normalized, source FROM facts \
                 WHERE fact_id = ?1 AND owner_id = ?2 AND superseded_by IS NULL",
                params![candidate_id, owner_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        if let Some((candidate_text, source)) = row {
            if text_similarity(normalized, &candidate_text) >= policy.text_threshold {
                let source = source.parse().map_err(CortexError::StoreUnavailable)?;
                return Ok(Some((candidate_id, source)));
            }
        }
    }

    Ok(None)
}

#[allow(clippy::too_many_arguments)]
fn insert_fact(
    tx: &Transaction,
    fact_id: &str,
    owner_id: &str,
    content: &str,
    normalized: &str,
    topics: &BTreeSet<String>,
    source: FactSource,
    embedding: &[f32],
) -> Result<()> {
    let now = now();
    tx.execute(
        "INSERT INTO facts (fact_id, owner_id, content, normalized, topics, source, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
        params![
            fact_id,
            owner_id,
            content,
            normalized,
            serde_json::to_string(topics)?,
            source.as_str(),
            now,
        ],
    )?;
    for topic in topics {
        tx.execute(
            "INSERT INTO fact_topics (fact_id, topic) VALUES (?1, ?2)",
            params![fact_id, topic],
        )?;
    }
    tx.execute(
        "INSERT INTO facts_vec (fact_id, embedding) VALUES (?1, ?2)",
        params![fact_id, embedding_to_bytes(embedding)],
    )?;
    Ok(())
}

/// Mark `fact_id` as needing a graph write. Returns `true` if the row is newly
/// pending; a write that is already pending or done is left alone.
pub(crate) fn queue_graph_write(conn: &Connection, fact_id: &str, owner_id: &str) -> Result<bool> {
    let changed = conn.execute(
        "INSERT INTO graph_writes (fact_id, owner_id, status, attempts, updated_at) \
         VALUES (?1, ?2, 'pending', 0, ?3) \
         ON CONFLICT(fact_id) DO UPDATE SET status = 'pending', last_error = NULL, updated_at = excluded.updated_at \
         WHERE graph_writes.status = 'failed'",
        params![fact_id, owner_id, now()],
    )?;
    Ok(changed > 0)
}

/// Append an entry to the `fact_log` audit table.
pub(crate) fn write_log(
    conn: &Connection,
    operation: &str,
    fact_id: Option<&str>,
    owner_id: &str,
    details: Option<&serde_json::Value>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO fact_log (operation, fact_id, owner_id, details, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![operation, fact_id, owner_id, details.map(|d| d.to_string()), now()],
    )?;
    Ok(())
}

/// Fixed-width RFC 3339 so timestamps order lexically.
pub(crate) fn now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

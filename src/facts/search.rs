//! Read path: similarity query, point lookup, and listings.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::types::{DualFact, Fact, ScoredFact};
use super::{bytes_to_embedding, embedding_to_bytes};
use crate::error::{CortexError, Result};

const FACT_COLUMNS: &str =
    "f.fact_id, f.owner_id, f.content, f.topics, f.source, f.created_at, f.updated_at, f.superseded_by";

/// Active facts of `owner_id` ranked by cosine similarity to `embedding`.
///
/// Ties are broken by recency, newest first. `limit = None` returns every match.
pub fn query_facts(
    conn: &Connection,
    owner_id: &str,
    embedding: &[f32],
    limit: Option<usize>,
) -> Result<Vec<ScoredFact>> {
    // vec0 KNN caps `k`, so rank with a full scan instead.
    let sql = format!(
        "SELECT {FACT_COLUMNS}, vec_distance_cosine(v.embedding, ?1) AS distance \
         FROM facts_vec v JOIN facts f ON f.fact_id = v.fact_id \
         WHERE f.owner_id = ?2 AND f.superseded_by IS NULL \
         ORDER BY distance ASC, f.created_at DESC, f.rowid DESC \
         LIMIT ?3"
    );
    let limit = limit.map(|l| l as i64).unwrap_or(-1);

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params![embedding_to_bytes(embedding), owner_id, limit],
        |row| {
            let fact = row_to_fact(row)?;
            let distance: f64 = row.get(8)?;
            Ok((fact, distance))
        },
    )?;

    let mut hits = Vec::new();
    for row in rows {
        let (fact, distance) = row?;
        hits.push(ScoredFact {
            fact: fact?,
            score: 1.0 - distance,
        });
    }
    Ok(hits)
}

/// Look up one fact, active or superseded. The embedding is loaded when present.
pub fn get_fact(conn: &Connection, owner_id: &str, fact_id: &str) -> Result<Fact> {
    let sql = format!("SELECT {FACT_COLUMNS} FROM facts f WHERE f.fact_id = ?1 AND f.owner_id = ?2");
    let mut fact = conn
        .query_row(&sql, params![fact_id, owner_id], row_to_fact)
        .optional()?
        .ok_or_else(|| CortexError::NotFound(format!("fact {fact_id}")))??;

    let blob: Option<Vec<u8>> = conn
        .query_row(
            "SELECT embedding FROM facts_vec WHERE fact_id = ?1",
            params![fact_id],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(blob) = blob {
        fact.embedding = bytes_to_embedding(&blob);
    }
    Ok(fact)
}

/// All active facts of `owner_id`, oldest first.
pub fn list_active(conn: &Connection, owner_id: &str) -> Result<Vec<Fact>> {
    let sql = format!(
        "SELECT {FACT_COLUMNS} FROM facts f \
         WHERE f.owner_id = ?1 AND f.superseded_by IS NULL \
         ORDER BY f.created_at ASC, f.rowid ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![owner_id], row_to_fact)?;
    let mut facts = Vec::new();
    for row in rows {
        facts.push(row??);
    }
    Ok(facts)
}

/// Active `source = both` facts with the state of their graph write.
pub fn list_both_sourced(conn: &Connection, owner_id: &str) -> Result<Vec<DualFact>> {
    let sql = format!(
        "SELECT {FACT_COLUMNS}, g.status FROM facts f \
         LEFT JOIN graph_writes g ON g.fact_id = f.fact_id \
         WHERE f.owner_id = ?1 AND f.superseded_by IS NULL AND f.source = 'both' \
         ORDER BY f.created_at ASC, f.rowid ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![owner_id], |row| {
        Ok((row_to_fact(row)?, row.get::<_, Option<String>>(8)?))
    })?;

    let mut facts = Vec::new();
    for row in rows {
        let (fact, status) = row?;
        let graph_status = status
            .map(|s| s.parse())
            .transpose()
            .map_err(CortexError::StoreUnavailable)?;
        facts.push(DualFact {
            fact: fact?,
            graph_status,
        });
    }
    Ok(facts)
}

/// Map the first eight columns to a [`Fact`]. Decoding errors of our own columns
/// are returned in the inner result so rusqlite errors stay separate.
fn row_to_fact(row: &Row) -> rusqlite::Result<Result<Fact>> {
    let topics_json: String = row.get(3)?;
    let source: String = row.get(4)?;

    let topics = match serde_json::from_str(&topics_json) {
        Ok(t) => t,
        Err(e) => return Ok(Err(e.into())),
    };
    let source = match source.parse() {
        Ok(s) => s,
        Err(e) => return Ok(Err(CortexError::StoreUnavailable(e))),
    };

    Ok(Ok(Fact {
        fact_id: row.get(0)?,
        owner_id: row.get(1)?,
        content: row.get(2)?,
        topics,
        embedding: Vec::new(),
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
        source,
        superseded_by: row.get(7)?,
    }))
}

use rusqlite::{params, Connection};

use super::types::FactStats;
use crate::error::Result;

/// Counts over the active facts of `owner_id`. `recent_count` covers facts created
/// within `recent_window` of now.
pub fn fact_stats(
    conn: &Connection,
    owner_id: &str,
    recent_window: chrono::Duration,
) -> Result<FactStats> {
    let count_where = |sql: &str, p: &[&dyn rusqlite::ToSql]| -> Result<usize> {
        let n: i64 = conn.query_row(sql, p, |row| row.get(0))?;
        Ok(n as usize)
    };

    let cutoff = (chrono::Utc::now() - recent_window)
        .to_rfc3339_opts(chrono::SecondsFormat::Micros, true);

    let mut stats = FactStats {
        count: count_where(
            "SELECT COUNT(*) FROM facts WHERE owner_id = ?1 AND superseded_by IS NULL",
            &[&owner_id],
        )?,
        recent_count: count_where(
            "SELECT COUNT(*) FROM facts WHERE owner_id = ?1 AND superseded_by IS NULL AND created_at >= ?2",
            &[&owner_id, &cutoff],
        )?,
        superseded_count: count_where(
            "SELECT COUNT(*) FROM facts WHERE owner_id = ?1 AND superseded_by IS NOT NULL",
            &[&owner_id],
        )?,
        pending_graph_writes: count_where(
            "SELECT COUNT(*) FROM graph_writes WHERE owner_id = ?1 AND status = 'pending'",
            &[&owner_id],
        )?,
        ..Default::default()
    };

    let mut stmt = conn.prepare(
        "SELECT t.topic, COUNT(*) FROM fact_topics t JOIN facts f ON f.fact_id = t.fact_id \
         WHERE f.owner_id = ?1 AND f.superseded_by IS NULL GROUP BY t.topic",
    )?;
    let rows = stmt.query_map(params![owner_id], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;
    for row in rows {
        let (topic, n) = row?;
        stats.topic_histogram.insert(topic, n as usize);
    }

    Ok(stats)
}

//! SQL DDL for the per-identity fact database.
//!
//! Defines `facts`, `fact_topics`, `facts_vec` (vec0, cosine metric),
//! `graph_writes` (second phase of the dual-write), `fact_log` and `schema_meta`.
//! All DDL uses `IF NOT EXISTS` for idempotent initialization.

use rusqlite::Connection;

use crate::embedding::EMBEDDING_DIM;

const SCHEMA_SQL: &str = r#"
-- Atomic facts. Superseded rows are kept for history; their vectors are not.
CREATE TABLE IF NOT EXISTS facts (
    fact_id TEXT PRIMARY KEY,
    owner_id TEXT NOT NULL,
    content TEXT NOT NULL,
    normalized TEXT NOT NULL,
    topics TEXT NOT NULL DEFAULT '[]',
    source TEXT NOT NULL DEFAULT 'local' CHECK(source IN ('local','graph','both')),
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    superseded_by TEXT
);

CREATE INDEX IF NOT EXISTS idx_facts_owner ON facts(owner_id);
CREATE INDEX IF NOT EXISTS idx_facts_source ON facts(source);
CREATE INDEX IF NOT EXISTS idx_facts_superseded ON facts(superseded_by);
CREATE INDEX IF NOT EXISTS idx_facts_created ON facts(created_at);

CREATE TABLE IF NOT EXISTS fact_topics (
    fact_id TEXT NOT NULL REFERENCES facts(fact_id) ON DELETE CASCADE,
    topic TEXT NOT NULL,
    PRIMARY KEY (fact_id, topic)
);

CREATE INDEX IF NOT EXISTS idx_fact_topics_topic ON fact_topics(topic);

-- Graph-write queue: one row per fact that must reach the graph store.
CREATE TABLE IF NOT EXISTS graph_writes (
    fact_id TEXT PRIMARY KEY REFERENCES facts(fact_id) ON DELETE CASCADE,
    owner_id TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending' CHECK(status IN ('pending','done','failed')),
    attempts INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    updated_at TEXT NOT NULL
);

-- Audit trail
CREATE TABLE IF NOT EXISTS fact_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    operation TEXT NOT NULL CHECK(operation IN ('create','dedup','supersede','delete','clear','graph_sync')),
    fact_id TEXT,
    owner_id TEXT NOT NULL,
    details TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// vec0 virtual table must be created separately (sqlite-vec syntax).
fn vec_table_sql() -> String {
    format!(
        "CREATE VIRTUAL TABLE IF NOT EXISTS facts_vec USING vec0(\
         fact_id TEXT PRIMARY KEY, \
         embedding FLOAT[{EMBEDDING_DIM}] distance_metric=cosine);"
    )
}

/// Initialize all schema tables. Idempotent (uses IF NOT EXISTS).
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute_batch(&vec_table_sql())?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', '1')",
        [],
    )?;

    Ok(())
}

pub mod migrations;
pub mod schema;

use rusqlite::Connection;
use sqlite_vec::sqlite3_vec_init;
use std::path::Path;
use std::sync::Once;

use crate::error::{CortexError, Result};

static SQLITE_VEC_INIT: Once = Once::new();

/// Register the sqlite-vec extension globally. Safe to call multiple times.
pub fn load_sqlite_vec() {
    SQLITE_VEC_INIT.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite3_vec_init as *const (),
        )));
    });
}

/// Open (or create) a fact database at the given path, with extensions loaded,
/// schema initialized and migrations applied.
///
/// Any failure is reported as [`CortexError::StoreUnavailable`].
pub fn open_database(path: impl AsRef<Path>) -> Result<Connection> {
    let path = path.as_ref();
    let unavailable = |what: &str, e: &dyn std::fmt::Display| {
        CortexError::StoreUnavailable(format!("{what} {}: {e}", path.display()))
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| unavailable("failed to create directory for", &e))?;
    }

    load_sqlite_vec();

    let mut conn = Connection::open(path).map_err(|e| unavailable("failed to open", &e))?;
    configure(&conn).map_err(|e| unavailable("failed to configure", &e))?;
    schema::init_schema(&conn).map_err(|e| unavailable("failed to initialize schema of", &e))?;
    migrations::run_migrations(&mut conn).map_err(|e| unavailable("failed to migrate", &e))?;

    tracing::debug!(path = %path.display(), "fact database opened");
    Ok(conn)
}

fn configure(conn: &Connection) -> rusqlite::Result<()> {
    // WAL gives one writer plus concurrent readers.
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.busy_timeout(std::time::Duration::from_millis(5000))?;
    Ok(())
}

/// Open an in-memory database for testing.
#[cfg(test)]
pub fn open_memory_database() -> Result<Connection> {
    load_sqlite_vec();
    let mut conn = Connection::open_in_memory()?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    schema::init_schema(&conn)?;
    migrations::run_migrations(&mut conn)?;
    Ok(conn)
}

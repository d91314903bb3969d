// Database layer: one SQLite store per dataset.
//
// We use rusqlite with the "bundled" feature so there's no system SQLite
// dependency, and so window functions (PERCENT_RANK) are always available.
// Store files live in the workspace directory (TOKENSIEVE_WORKSPACE).

pub mod models;
pub mod queries;
pub mod schema;
pub mod store;

use std::path::Path;

use rusqlite::Connection;

use crate::error::{EngineError, Result};

pub use store::DatasetStore;

/// Open (or create) a store file and run migrations.
pub fn initialize(db_path: &Path) -> Result<Connection> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let conn = Connection::open(db_path)?;
    // WAL so status reads of the file don't block behind a running recompute
    conn.pragma_update(None, "journal_mode", "WAL")?;
    configure(&conn)?;
    schema::create_tables(&conn)?;
    Ok(conn)
}

/// Open an existing store (fails if it doesn't exist yet).
pub fn open(db_path: &Path) -> Result<Connection> {
    if !db_path.exists() {
        return Err(EngineError::NotFound(format!(
            "dataset store at {}",
            db_path.display()
        )));
    }

    let conn = Connection::open(db_path)?;
    // WAL so status reads of the file don't block behind a running recompute
    conn.pragma_update(None, "journal_mode", "WAL")?;
    configure(&conn)?;
    schema::create_tables(&conn)?;
    Ok(conn)
}

/// In-memory store, used by tests and throwaway pipelines.
pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    configure(&conn)?;
    schema::create_tables(&conn)?;
    Ok(conn)
}

fn configure(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(())
}

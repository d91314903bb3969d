// Database schema: table creation and migrations.
//
// One SQLite file holds exactly one dataset. A `schema_version` table tracks
// which migrations have run, and each migration is a function that executes
// SQL statements.

use rusqlite::Connection;

use crate::error::Result;

/// Create all tables if they don't exist yet.
///
/// Idempotent, safe to call on every open.
pub fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- The dataset this store holds
        CREATE TABLE IF NOT EXISTS dataset (
            id INTEGER PRIMARY KEY CHECK (id = 1),  -- singleton row
            name TEXT NOT NULL,
            token_type TEXT NOT NULL,              -- raw / stem / lemma
            applied_rules INTEGER NOT NULL DEFAULT 0,
            needs_full INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            statistics_at TEXT
        );

        CREATE TABLE IF NOT EXISTS fields (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            field_key TEXT NOT NULL UNIQUE,
            position INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS documents (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            document_key TEXT NOT NULL UNIQUE
        );

        CREATE TABLE IF NOT EXISTS string_tokens (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            field_id INTEGER NOT NULL REFERENCES fields(id),
            document_id INTEGER NOT NULL REFERENCES documents(id),
            position INTEGER NOT NULL,
            text TEXT NOT NULL,
            stem TEXT NOT NULL,
            lemma TEXT NOT NULL,
            pos TEXT NOT NULL,
            is_stopword INTEGER NOT NULL DEFAULT 0,
            included INTEGER NOT NULL DEFAULT 1,
            text_tf INTEGER NOT NULL DEFAULT 0,
            text_idf REAL NOT NULL DEFAULT 0,
            text_tfidf REAL NOT NULL DEFAULT 0,
            stem_tf INTEGER NOT NULL DEFAULT 0,
            stem_idf REAL NOT NULL DEFAULT 0,
            stem_tfidf REAL NOT NULL DEFAULT 0,
            lemma_tf INTEGER NOT NULL DEFAULT 0,
            lemma_idf REAL NOT NULL DEFAULT 0,
            lemma_tfidf REAL NOT NULL DEFAULT 0,
            UNIQUE (document_id, field_id, position)
        );

        -- Ordered rule pipeline; rule_order is dense from 0
        CREATE TABLE IF NOT EXISTS filter_rules (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            rule_order INTEGER NOT NULL UNIQUE,
            rule_json TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Lookups by each lexical variant (rule matching, statistics)
        CREATE INDEX IF NOT EXISTS idx_tokens_text ON string_tokens(text, pos);
        CREATE INDEX IF NOT EXISTS idx_tokens_stem ON string_tokens(stem, pos);
        CREATE INDEX IF NOT EXISTS idx_tokens_lemma ON string_tokens(lemma, pos);

        CREATE INDEX IF NOT EXISTS idx_tokens_field ON string_tokens(field_id);
        ",
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [1],
    )?;

    // Migration v2: index for the included/removed word lists.
    run_migration(conn, 2, |c| {
        c.execute_batch("CREATE INDEX IF NOT EXISTS idx_tokens_included ON string_tokens(included);")
    })?;

    Ok(())
}

/// Run a migration if it hasn't been applied yet.
fn run_migration<F>(conn: &Connection, version: i64, migrate: F) -> Result<()>
where
    F: FnOnce(&Connection) -> rusqlite::Result<()>,
{
    let already_applied: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM schema_version WHERE version = ?1",
        [version],
        |row| row.get(0),
    )?;

    if !already_applied {
        migrate(conn)?;
        conn.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            [version],
        )?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_tables_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        create_tables(&conn).unwrap();
    }

    #[test]
    fn test_table_count() {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        // schema_version, dataset, fields, documents, string_tokens, filter_rules
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 6);
    }

    #[test]
    fn test_migrations_recorded_once() {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        create_tables(&conn).unwrap();

        let versions: Vec<i64> = conn
            .prepare("SELECT version FROM schema_version ORDER BY version")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(versions, vec![1, 2]);
    }

    #[test]
    fn test_token_row_is_unique_per_position() {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        conn.execute_batch(
            "INSERT INTO fields (field_key, position) VALUES ('body', 0);
             INSERT INTO documents (document_key) VALUES ('d1');
             INSERT INTO string_tokens (field_id, document_id, position, text, stem, lemma, pos)
                 VALUES (1, 1, 0, 'a', 'a', 'a', 'X');",
        )
        .unwrap();
        let dup = conn.execute(
            "INSERT INTO string_tokens (field_id, document_id, position, text, stem, lemma, pos)
                 VALUES (1, 1, 0, 'b', 'b', 'b', 'X')",
            [],
        );
        assert!(dup.is_err());
    }
}

// Database queries: CRUD operations for the token store.
//
// Every insert and bookkeeping update goes through this module. Rule
// application and view projection live in their own modules but share the
// helpers here for dataset metadata.

use std::collections::{BTreeMap, HashSet};

use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info, warn};

use super::models::{
    Dataset, Document, Field, StringToken, TokenInput, TokenType, VariantStats,
};
use crate::error::{is_unique_violation, EngineError, Result};
use crate::rules::FilterRule;

// --- Dataset ---

/// Create the singleton dataset row. Fails if the store already has one.
pub fn create_dataset(conn: &Connection, name: &str, token_type: TokenType) -> Result<()> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO dataset (id, name, token_type) VALUES (1, ?1, ?2)",
        params![name, token_type.as_str()],
    )?;
    if inserted == 0 {
        return Err(EngineError::DuplicateKey {
            table: "dataset",
            key: name.to_string(),
        });
    }
    info!(dataset = name, token_type = %token_type, "Created dataset");
    Ok(())
}

pub fn get_dataset(conn: &Connection) -> Result<Dataset> {
    let row = conn
        .query_row(
            "SELECT name, token_type, applied_rules, needs_full, created_at, statistics_at
             FROM dataset WHERE id = 1",
            [],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, bool>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, Option<String>>(5)?,
                ))
            },
        )
        .optional()?;

    let (name, token_type, applied_rules, needs_full, created_at, statistics_at) =
        row.ok_or_else(|| EngineError::NotFound("dataset".to_string()))?;

    Ok(Dataset {
        name,
        token_type: TokenType::parse(&token_type)?,
        applied_rules: applied_rules.max(0) as usize,
        needs_full,
        created_at,
        statistics_at,
    })
}

pub fn token_type(conn: &Connection) -> Result<TokenType> {
    Ok(get_dataset(conn)?.token_type)
}

/// Switch the active variant. Statistics stay as they are; the included
/// flags must be replayed, so the applied prefix is invalidated.
pub fn set_token_type(conn: &Connection, token_type: TokenType) -> Result<bool> {
    let current = get_dataset(conn)?.token_type;
    if current == token_type {
        return Ok(false);
    }
    conn.execute(
        "UPDATE dataset SET token_type = ?1, needs_full = 1 WHERE id = 1",
        params![token_type.as_str()],
    )?;
    info!(from = %current, to = %token_type, "Changed active token type");
    Ok(true)
}

pub fn set_applied_rules(conn: &Connection, applied: usize) -> Result<()> {
    conn.execute(
        "UPDATE dataset SET applied_rules = ?1 WHERE id = 1",
        params![applied as i64],
    )?;
    Ok(())
}

/// The next recompute must replay every rule from a reset state.
pub fn mark_needs_full(conn: &Connection) -> Result<()> {
    conn.execute("UPDATE dataset SET needs_full = 1 WHERE id = 1", [])?;
    Ok(())
}

/// Reset every included flag and clear the applied prefix.
pub fn reset_included(conn: &Connection) -> Result<usize> {
    let rows = conn.execute("UPDATE string_tokens SET included = 1", [])?;
    conn.execute(
        "UPDATE dataset SET applied_rules = 0, needs_full = 0 WHERE id = 1",
        [],
    )?;
    Ok(rows)
}

pub fn mark_statistics_computed(conn: &Connection) -> Result<()> {
    conn.execute(
        "UPDATE dataset SET statistics_at = datetime('now') WHERE id = 1",
        [],
    )?;
    Ok(())
}

// --- Fields ---

/// Insert a field; positions follow insertion order.
pub fn insert_field(conn: &Connection, field_key: &str) -> Result<i64> {
    let result = conn.execute(
        "INSERT INTO fields (field_key, position)
         VALUES (?1, (SELECT COALESCE(MAX(position) + 1, 0) FROM fields))",
        params![field_key],
    );
    match result {
        Ok(_) => Ok(conn.last_insert_rowid()),
        Err(e) if is_unique_violation(&e) => Err(EngineError::DuplicateKey {
            table: "fields",
            key: field_key.to_string(),
        }),
        Err(e) => Err(e.into()),
    }
}

pub fn get_field(conn: &Connection, field_key: &str) -> Result<Option<Field>> {
    let mut stmt =
        conn.prepare("SELECT id, field_key, position FROM fields WHERE field_key = ?1")?;
    let field = stmt
        .query_row(params![field_key], |row| {
            Ok(Field {
                id: row.get(0)?,
                field_key: row.get(1)?,
                position: row.get(2)?,
            })
        })
        .optional()?;
    Ok(field)
}

/// Insert the field unless it already exists; returns its id.
pub fn ensure_field(conn: &Connection, field_key: &str) -> Result<i64> {
    match get_field(conn, field_key)? {
        Some(field) => Ok(field.id),
        None => insert_field(conn, field_key),
    }
}

// --- Documents ---

/// Keys from `keys` that are not yet stored, in input order and deduplicated.
pub fn missing_document_keys(conn: &Connection, keys: &[String]) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT 1 FROM documents WHERE document_key = ?1")?;
    let mut seen = HashSet::new();
    let mut missing = Vec::new();
    for key in keys {
        if !seen.insert(key.as_str()) {
            continue;
        }
        if !stmt.exists(params![key])? {
            missing.push(key.clone());
        }
    }
    Ok(missing)
}

/// Insert documents atomically. Any pre-existing (or repeated) key fails the
/// whole batch with `DuplicateKey` and nothing is inserted.
pub fn insert_documents(conn: &Connection, keys: &[String]) -> Result<Vec<i64>> {
    let tx = conn.unchecked_transaction()?;
    let mut ids = Vec::with_capacity(keys.len());
    {
        let mut stmt = tx.prepare("INSERT INTO documents (document_key) VALUES (?1)")?;
        for key in keys {
            match stmt.execute(params![key]) {
                Ok(_) => ids.push(tx.last_insert_rowid()),
                Err(e) if is_unique_violation(&e) => {
                    return Err(EngineError::DuplicateKey {
                        table: "documents",
                        key: key.clone(),
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
    tx.commit()?;
    debug!(count = ids.len(), "Inserted documents");
    Ok(ids)
}

/// Check-then-insert; returns how many keys were new.
pub fn ensure_documents(conn: &Connection, keys: &[String]) -> Result<usize> {
    let missing = missing_document_keys(conn, keys)?;
    insert_documents(conn, &missing)?;
    Ok(missing.len())
}

pub fn get_document(conn: &Connection, document_key: &str) -> Result<Option<Document>> {
    let mut stmt = conn.prepare("SELECT id, document_key FROM documents WHERE document_key = ?1")?;
    let doc = stmt
        .query_row(params![document_key], |row| {
            Ok(Document {
                id: row.get(0)?,
                document_key: row.get(1)?,
            })
        })
        .optional()?;
    Ok(doc)
}

// --- Tokens ---

/// Append one field's tokens for a tokenization pass.
///
/// Runs in a single transaction. An unknown field or document key aborts the
/// batch; a repeated `(document, field, position)` is logged and skipped.
/// Returns the number of rows inserted.
pub fn insert_tokens(
    conn: &Connection,
    field_key: &str,
    tokens: &BTreeMap<String, Vec<TokenInput>>,
) -> Result<usize> {
    let field = get_field(conn, field_key)?
        .ok_or_else(|| EngineError::NotFound(format!("field '{field_key}'")))?;

    let tx = conn.unchecked_transaction()?;
    let mut inserted = 0usize;
    let mut skipped = 0usize;
    {
        let mut doc_stmt = tx.prepare("SELECT id FROM documents WHERE document_key = ?1")?;
        let mut insert = tx.prepare(
            "INSERT INTO string_tokens
                (field_id, document_id, position, text, stem, lemma, pos, is_stopword, included)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1)",
        )?;

        for (document_key, doc_tokens) in tokens {
            let document_id: i64 = doc_stmt
                .query_row(params![document_key], |row| row.get(0))
                .optional()?
                .ok_or_else(|| {
                    EngineError::ConstraintViolation(format!(
                        "tokens reference unknown document '{document_key}'"
                    ))
                })?;

            for TokenInput(position, text, stem, lemma, pos, stop) in doc_tokens {
                match insert.execute(params![
                    field.id,
                    document_id,
                    position,
                    text,
                    stem,
                    lemma,
                    pos,
                    stop
                ]) {
                    Ok(_) => inserted += 1,
                    Err(e) if is_unique_violation(&e) => {
                        warn!(
                            document = %document_key,
                            field = field_key,
                            position,
                            "Duplicate token position, skipping"
                        );
                        skipped += 1;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }
    }
    if inserted > 0 {
        // New rows start included; any rules already applied must be replayed
        tx.execute(
            "UPDATE dataset SET needs_full = 1 WHERE id = 1 AND applied_rules > 0",
            [],
        )?;
    }
    tx.commit()?;

    info!(field = field_key, inserted, skipped, "Inserted tokens");
    Ok(inserted)
}

/// Drop every token row ahead of a re-tokenization pass.
///
/// Statistics and included flags go with them; the rule list is kept but
/// must be replayed in full.
pub fn delete_tokens(conn: &Connection) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let rows = tx.execute("DELETE FROM string_tokens", [])?;
    tx.execute(
        "UPDATE dataset SET applied_rules = 0, needs_full = 1, statistics_at = NULL WHERE id = 1",
        [],
    )?;
    tx.commit()?;
    info!(rows, "Deleted tokens for re-tokenization");
    Ok(rows)
}

fn token_from_row(row: &Row<'_>) -> rusqlite::Result<StringToken> {
    Ok(StringToken {
        id: row.get(0)?,
        field_id: row.get(1)?,
        document_id: row.get(2)?,
        position: row.get(3)?,
        text: row.get(4)?,
        stem: row.get(5)?,
        lemma: row.get(6)?,
        pos: row.get(7)?,
        is_stopword: row.get(8)?,
        included: row.get(9)?,
        text_stats: VariantStats {
            tf: row.get(10)?,
            idf: row.get(11)?,
            tfidf: row.get(12)?,
        },
        stem_stats: VariantStats {
            tf: row.get(13)?,
            idf: row.get(14)?,
            tfidf: row.get(15)?,
        },
        lemma_stats: VariantStats {
            tf: row.get(16)?,
            idf: row.get(17)?,
            tfidf: row.get(18)?,
        },
    })
}

/// All token rows in natural order `(document_id, field_id, position)`.
pub fn get_tokens(conn: &Connection) -> Result<Vec<StringToken>> {
    let mut stmt = conn.prepare(
        "SELECT id, field_id, document_id, position, text, stem, lemma, pos, is_stopword, included,
                text_tf, text_idf, text_tfidf, stem_tf, stem_idf, stem_tfidf,
                lemma_tf, lemma_idf, lemma_tfidf
         FROM string_tokens
         ORDER BY document_id, field_id, position",
    )?;
    let rows = stmt.query_map([], token_from_row)?;
    let mut tokens = Vec::new();
    for row in rows {
        tokens.push(row?);
    }
    Ok(tokens)
}

/// Included flags keyed by token id, for comparing recompute outcomes.
pub fn included_flags(conn: &Connection) -> Result<Vec<(i64, bool)>> {
    let mut stmt = conn.prepare("SELECT id, included FROM string_tokens ORDER BY id")?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    let mut flags = Vec::new();
    for row in rows {
        flags.push(row?);
    }
    Ok(flags)
}

pub fn count_rows(conn: &Connection, table: Table) -> Result<i64> {
    let sql = format!("SELECT COUNT(*) FROM {}", table.name());
    Ok(conn.query_row(&sql, [], |row| row.get(0))?)
}

pub fn count_included(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM string_tokens WHERE included = 1",
        [],
        |row| row.get(0),
    )?)
}

/// Documents that have at least one token row.
pub fn count_token_documents(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(DISTINCT document_id) FROM string_tokens",
        [],
        |row| row.get(0),
    )?)
}

/// Tables whose sizes are reported by `count_rows`.
#[derive(Debug, Clone, Copy)]
pub enum Table {
    Fields,
    Documents,
    Tokens,
}

impl Table {
    fn name(&self) -> &'static str {
        match self {
            Table::Fields => "fields",
            Table::Documents => "documents",
            Table::Tokens => "string_tokens",
        }
    }
}

// --- Filter rules ---

/// Load the rule pipeline in order. A stored rule that no longer decodes is
/// a `RuleApplicationFault`, never skipped.
pub fn get_rules(conn: &Connection) -> Result<Vec<FilterRule>> {
    let mut stmt = conn.prepare("SELECT rule_order, rule_json FROM filter_rules ORDER BY rule_order")?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?;
    let mut rules = Vec::new();
    for row in rows {
        let (order, json) = row?;
        let rule: FilterRule = serde_json::from_str(&json).map_err(|e| {
            EngineError::RuleApplicationFault(format!("stored rule #{order} is malformed: {e}"))
        })?;
        rule.validate()?;
        rules.push(rule);
    }
    Ok(rules)
}

/// Append rules after the existing pipeline. The applied prefix stays valid.
pub fn append_rules(conn: &Connection, rules: &[FilterRule]) -> Result<usize> {
    for rule in rules {
        rule.validate()?;
    }
    let tx = conn.unchecked_transaction()?;
    let next: i64 = tx.query_row(
        "SELECT COALESCE(MAX(rule_order) + 1, 0) FROM filter_rules",
        [],
        |row| row.get(0),
    )?;
    {
        let mut stmt =
            tx.prepare("INSERT INTO filter_rules (rule_order, rule_json) VALUES (?1, ?2)")?;
        for (offset, rule) in rules.iter().enumerate() {
            let json = serde_json::to_string(rule)?;
            stmt.execute(params![next + offset as i64, json])?;
        }
    }
    tx.commit()?;
    Ok((next as usize) + rules.len())
}

/// Replace the whole pipeline. Used for removal, reordering and import, all
/// of which invalidate the applied prefix.
pub fn replace_rules(conn: &Connection, rules: &[FilterRule]) -> Result<()> {
    for rule in rules {
        rule.validate()?;
    }
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM filter_rules", [])?;
    {
        let mut stmt =
            tx.prepare("INSERT INTO filter_rules (rule_order, rule_json) VALUES (?1, ?2)")?;
        for (order, rule) in rules.iter().enumerate() {
            let json = serde_json::to_string(rule)?;
            stmt.execute(params![order as i64, json])?;
        }
    }
    mark_needs_full(&tx)?;
    tx.commit()?;
    Ok(())
}

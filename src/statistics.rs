// Statistics engine: per-variant tf, idf and tf-idf for every token row.
//
// Computed once after ingestion and stored on the rows for all three lexical
// variants, so switching the active token type never needs a recompute.
//
// tf is corpus-wide: the number of rows in the dataset sharing the row's
// value, not the count within one document. idf has no smoothing:
// ln(documents / documents containing the value).

use rusqlite::{params, Connection};
use serde::Serialize;
use tracing::info;

use crate::db::models::TokenType;
use crate::db::queries;
use crate::error::Result;

/// Aggregate statistics of one distinct value of one variant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValueStatistics {
    pub value: String,
    pub tf: i64,
    pub df: i64,
    pub idf: f64,
    pub tfidf: f64,
}

/// `ln(total_docs / df)`. A value always occurs somewhere, so `df >= 1`.
pub fn idf(total_docs: i64, df: i64) -> f64 {
    debug_assert!(df >= 1, "document frequency of a stored value is at least 1");
    (total_docs as f64 / df as f64).ln()
}

/// Group one variant's rows by value and derive their statistics.
pub fn variant_statistics(conn: &Connection, token_type: TokenType) -> Result<Vec<ValueStatistics>> {
    let total_docs = queries::count_token_documents(conn)?;
    let col = token_type.column();
    let mut stmt = conn.prepare(&format!(
        "SELECT {col}, COUNT(*), COUNT(DISTINCT document_id)
         FROM string_tokens
         GROUP BY {col}
         ORDER BY {col}"
    ))?;

    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, i64>(2)?,
        ))
    })?;

    let mut stats = Vec::new();
    for row in rows {
        let (value, tf, df) = row?;
        let value_idf = idf(total_docs, df);
        stats.push(ValueStatistics {
            value,
            tf,
            df,
            idf: value_idf,
            tfidf: tf as f64 * value_idf,
        });
    }
    Ok(stats)
}

/// Compute and store tf/idf/tfidf for text, stem and lemma on every row.
///
/// Runs in one transaction; returns the number of distinct values written
/// across the three variants. Rules already applied were ranked against the
/// old values, so a dataset with an applied prefix is marked for full replay.
pub fn compute(conn: &Connection) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let mut written = 0;

    for token_type in TokenType::ALL {
        let stats = variant_statistics(&tx, token_type)?;
        let col = token_type.column();
        let mut update = tx.prepare(&format!(
            "UPDATE string_tokens SET {col}_tf = ?1, {col}_idf = ?2, {col}_tfidf = ?3
             WHERE {col} = ?4"
        ))?;
        for stat in &stats {
            update.execute(params![stat.tf, stat.idf, stat.tfidf, stat.value])?;
        }
        written += stats.len();
        info!(variant = col, distinct = stats.len(), "Computed token statistics");
    }

    queries::mark_statistics_computed(&tx)?;
    if queries::get_dataset(&tx)?.applied_rules > 0 {
        queries::mark_needs_full(&tx)?;
    }
    tx.commit()?;
    Ok(written)
}

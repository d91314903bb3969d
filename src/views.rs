// View projector: read-only aggregates over the filtered corpus.
//
// The word summaries back the included/removed list panels; the document
// sequence is exactly what topic-model training consumes.

use std::collections::BTreeMap;

use rusqlite::{params, Connection, OptionalExtension};

use crate::db::models::{TokenType, WordCounts, WordSummary};
use crate::db::queries;
use crate::error::Result;

/// Which side of the filter a summary describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordList {
    Included,
    Removed,
}

impl WordList {
    fn flag(&self) -> bool {
        matches!(self, WordList::Included)
    }
}

/// Group rows on one side of the filter by `(value, pos, is_stopword)`,
/// most frequent first.
pub fn word_summary(conn: &Connection, list: WordList) -> Result<Vec<WordSummary>> {
    let col = queries::token_type(conn)?.column();
    let mut stmt = conn.prepare(&format!(
        "SELECT {col}, pos, COUNT(*), COUNT(DISTINCT document_id), is_stopword,
                MIN({col}_tfidf), MAX({col}_tfidf)
         FROM string_tokens
         WHERE included = ?1
         GROUP BY {col}, pos, is_stopword
         ORDER BY COUNT(*) DESC, {col}, pos"
    ))?;

    let rows = stmt.query_map(params![list.flag()], |row| {
        Ok(WordSummary {
            value: row.get(0)?,
            pos: row.get(1)?,
            word_count: row.get(2)?,
            doc_count: row.get(3)?,
            is_stopword: row.get(4)?,
            tfidf_min: row.get(5)?,
            tfidf_max: row.get(6)?,
        })
    })?;

    let mut summary = Vec::new();
    for row in rows {
        summary.push(row?);
    }
    Ok(summary)
}

pub fn included_word_summary(conn: &Connection) -> Result<Vec<WordSummary>> {
    word_summary(conn, WordList::Included)
}

pub fn removed_word_summary(conn: &Connection) -> Result<Vec<WordSummary>> {
    word_summary(conn, WordList::Removed)
}

/// Occurrence and distinct-value totals for one list.
pub fn word_counts(conn: &Connection, list: WordList) -> Result<WordCounts> {
    let col = queries::token_type(conn)?.column();
    let counts = conn.query_row(
        &format!(
            "SELECT COUNT(*), COUNT(DISTINCT {col}) FROM string_tokens WHERE included = ?1"
        ),
        params![list.flag()],
        |row| {
            Ok(WordCounts {
                occurrences: row.get(0)?,
                distinct_values: row.get(1)?,
            })
        },
    )?;
    Ok(counts)
}

/// Lazy per-document view of the included tokens.
///
/// Each call to `iter` starts from the first document again; each step
/// fetches one document's tokens.
pub struct DocumentSequence<'conn> {
    conn: &'conn Connection,
    token_type: TokenType,
}

impl<'conn> DocumentSequence<'conn> {
    pub fn new(conn: &'conn Connection) -> Result<Self> {
        Ok(Self {
            conn,
            token_type: queries::token_type(conn)?,
        })
    }

    pub fn iter(&self) -> DocumentTokens<'conn> {
        DocumentTokens {
            conn: self.conn,
            token_type: self.token_type,
            last_id: i64::MIN,
            done: false,
        }
    }
}

impl<'conn> IntoIterator for &DocumentSequence<'conn> {
    type Item = Result<(String, Vec<String>)>;
    type IntoIter = DocumentTokens<'conn>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over `(document_key, included tokens)` in document id order.
pub struct DocumentTokens<'conn> {
    conn: &'conn Connection,
    token_type: TokenType,
    last_id: i64,
    done: bool,
}

impl DocumentTokens<'_> {
    fn fetch_next(&mut self) -> Result<Option<(String, Vec<String>)>> {
        let next: Option<(i64, String)> = self
            .conn
            .query_row(
                "SELECT id, document_key FROM documents WHERE id > ?1 ORDER BY id LIMIT 1",
                params![self.last_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((id, key)) = next else {
            return Ok(None);
        };
        self.last_id = id;

        let tokens = included_tokens_of(self.conn, self.token_type, id)?;
        Ok(Some((key, tokens)))
    }
}

/// Active-variant values of one document's included rows, ordered by
/// `(field position, field id, token position)`.
fn included_tokens_of(conn: &Connection, token_type: TokenType, document_id: i64) -> Result<Vec<String>> {
    let col = token_type.column();
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT st.{col}
         FROM string_tokens st
         JOIN fields f ON f.id = st.field_id
         WHERE st.document_id = ?1 AND st.included = 1
         ORDER BY f.position, f.id, st.position"
    ))?;
    let rows = stmt.query_map(params![document_id], |row| row.get::<_, String>(0))?;
    let mut tokens = Vec::new();
    for row in rows {
        tokens.push(row?);
    }
    Ok(tokens)
}

impl Iterator for DocumentTokens<'_> {
    type Item = Result<(String, Vec<String>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.fetch_next() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                // A storage fault ends the sequence after reporting it once
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// `{document_key: [word, ...]}` of included tokens, for topic modeling.
pub fn documents_tokens(conn: &Connection) -> Result<BTreeMap<String, Vec<String>>> {
    let sequence = DocumentSequence::new(conn)?;
    let mut out = BTreeMap::new();
    for item in &sequence {
        let (key, tokens) = item?;
        out.insert(key, tokens);
    }
    Ok(out)
}

/// Included tokens of a single document, or None for an unknown key.
pub fn document_tokens(conn: &Connection, document_key: &str) -> Result<Option<Vec<String>>> {
    let Some(doc) = queries::get_document(conn, document_key)? else {
        return Ok(None);
    };
    let token_type = queries::token_type(conn)?;
    Ok(Some(included_tokens_of(conn, token_type, doc.id)?))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::db::models::TokenInput;
    use crate::db::open_in_memory;
    use crate::statistics;

    /// Body tokens go in before title tokens, so field position (not row id)
    /// has to decide the sequence order.
    fn two_fields() -> Connection {
        let conn = open_in_memory().unwrap();
        queries::create_dataset(&conn, "posts", TokenType::Lemma).unwrap();
        queries::insert_field(&conn, "title").unwrap();
        queries::insert_field(&conn, "body").unwrap();
        queries::insert_documents(&conn, &["p1".to_string(), "p2".to_string()]).unwrap();

        let mut body = BTreeMap::new();
        body.insert(
            "p1".to_string(),
            vec![
                TokenInput::new(1, "ran", "ran", "run", "VERB", false),
                TokenInput::new(0, "The", "the", "the", "DET", true),
            ],
        );
        queries::insert_tokens(&conn, "body", &body).unwrap();

        let mut title = BTreeMap::new();
        title.insert(
            "p1".to_string(),
            vec![TokenInput::new(0, "Running", "run", "run", "VERB", false)],
        );
        queries::insert_tokens(&conn, "title", &title).unwrap();
        statistics::compute(&conn).unwrap();
        conn
    }

    #[test]
    fn test_sequence_orders_by_field_position_then_token_position() {
        let conn = two_fields();
        let docs = documents_tokens(&conn).unwrap();
        assert_eq!(docs["p1"], vec!["run", "the", "run"]);
        // Documents without tokens are still part of the sequence
        assert_eq!(docs["p2"], Vec::<String>::new());
    }

    #[test]
    fn test_sequence_is_restartable() {
        let conn = two_fields();
        let sequence = DocumentSequence::new(&conn).unwrap();
        let first: Vec<_> = sequence.iter().map(|r| r.unwrap()).collect();
        let second: Vec<_> = sequence.iter().map(|r| r.unwrap()).collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].0, "p1");
    }

    #[test]
    fn test_summary_groups_by_active_variant() {
        let conn = two_fields();
        let included = included_word_summary(&conn).unwrap();
        assert_eq!(included[0].value, "run");
        assert_eq!(included[0].word_count, 2);
        assert_eq!(included[0].doc_count, 1);
        assert!(removed_word_summary(&conn).unwrap().is_empty());

        let counts = word_counts(&conn, WordList::Included).unwrap();
        assert_eq!(counts.occurrences, 3);
        assert_eq!(counts.distinct_values, 2);
    }

    #[test]
    fn test_removed_rows_leave_sequence() {
        let conn = two_fields();
        conn.execute("UPDATE string_tokens SET included = 0 WHERE is_stopword = 1", [])
            .unwrap();
        assert_eq!(
            document_tokens(&conn, "p1").unwrap().unwrap(),
            vec!["run", "run"]
        );
        assert!(document_tokens(&conn, "nope").unwrap().is_none());

        let removed = removed_word_summary(&conn).unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].value, "the");
        assert!(removed[0].is_stopword);
    }
}

// Data models: Rust structs that map to dataset store rows.
//
// These are the types that flow through the engine. They're separate from
// the queries so the rule engine and views can share them without
// depending on SQL shapes.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Which lexical variant drives rule matching and statistics lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Raw,
    Stem,
    Lemma,
}

impl TokenType {
    pub const ALL: [TokenType; 3] = [TokenType::Raw, TokenType::Stem, TokenType::Lemma];

    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Raw => "raw",
            TokenType::Stem => "stem",
            TokenType::Lemma => "lemma",
        }
    }

    /// Column in `string_tokens` holding this variant's value.
    ///
    /// Also the prefix of the `<column>_tf`, `<column>_idf` and
    /// `<column>_tfidf` statistics columns.
    pub fn column(&self) -> &'static str {
        match self {
            TokenType::Raw => "text",
            TokenType::Stem => "stem",
            TokenType::Lemma => "lemma",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "raw" | "text" => Ok(TokenType::Raw),
            "stem" => Ok(TokenType::Stem),
            "lemma" => Ok(TokenType::Lemma),
            other => Err(EngineError::ConstraintViolation(format!(
                "unknown token type '{other}' (expected raw, stem or lemma)"
            ))),
        }
    }
}

impl std::fmt::Display for TokenType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The singleton dataset row of a store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    pub name: String,
    pub token_type: TokenType,
    /// Number of leading filter rules whose effects are committed.
    pub applied_rules: usize,
    /// Set when the applied prefix no longer matches the rule list.
    pub needs_full: bool,
    pub created_at: String,
    pub statistics_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub id: i64,
    pub field_key: String,
    pub position: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: i64,
    pub document_key: String,
}

/// One token as produced by the tokenization pipeline.
///
/// Serialized as the tuple `[position, text, stem, lemma, pos, is_stopword]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenInput(
    pub i64,
    pub String,
    pub String,
    pub String,
    pub String,
    pub bool,
);

impl TokenInput {
    pub fn new(position: i64, text: &str, stem: &str, lemma: &str, pos: &str, stop: bool) -> Self {
        TokenInput(
            position,
            text.to_string(),
            stem.to_string(),
            lemma.to_string(),
            pos.to_string(),
            stop,
        )
    }

    pub fn position(&self) -> i64 {
        self.0
    }
}

/// Statistics of one lexical variant on one token row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct VariantStats {
    pub tf: i64,
    pub idf: f64,
    pub tfidf: f64,
}

/// A stored token occurrence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StringToken {
    pub id: i64,
    pub field_id: i64,
    pub document_id: i64,
    pub position: i64,
    pub text: String,
    pub stem: String,
    pub lemma: String,
    pub pos: String,
    pub is_stopword: bool,
    pub included: bool,
    pub text_stats: VariantStats,
    pub stem_stats: VariantStats,
    pub lemma_stats: VariantStats,
}

impl StringToken {
    pub fn stats(&self, token_type: TokenType) -> VariantStats {
        match token_type {
            TokenType::Raw => self.text_stats,
            TokenType::Stem => self.stem_stats,
            TokenType::Lemma => self.lemma_stats,
        }
    }
}

/// One line of the included/removed word lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordSummary {
    pub value: String,
    pub pos: String,
    pub word_count: i64,
    pub doc_count: i64,
    pub is_stopword: bool,
    pub tfidf_min: f64,
    pub tfidf_max: f64,
}

/// Occurrence and distinct-value totals for one word list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordCounts {
    pub occurrences: i64,
    pub distinct_values: i64,
}

/// Snapshot of a store for `tokensieve status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetStatus {
    pub dataset: Dataset,
    pub documents: i64,
    pub fields: i64,
    pub tokens: i64,
    pub included: i64,
    pub rules: usize,
}

impl DatasetStatus {
    /// True when the included flags lag behind the stored rule list.
    pub fn apply_pending(&self) -> bool {
        self.dataset.needs_full || self.dataset.applied_rules < self.rules
    }
}

// Ingestion pipeline: corpus file -> token store -> statistics -> recompute.
//
// Two input shapes are accepted. Raw corpora carry field text per document
// and go through a `Tokenizer`; tokenized corpora come from an external NLP
// pipeline and are stored as-is.
//
//   raw:       {"fields": ["title", "body"],
//               "documents": {"d1": {"title": "...", "body": "..."}}}
//   tokenized: {"fields": ["body"],
//               "tokens": {"body": {"d1": [[0, "Cats", "cat", "cat", "NOUN", false]]}}}
//
// `fields` is optional and fixes field order; unlisted fields follow in key
// order.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::db::models::TokenInput;
use crate::db::{queries, DatasetStore};
use crate::error::Result;
use crate::rules::engine::{self, RecomputeReport};
use crate::statistics;
use crate::tokenize::traits::Tokenizer;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawCorpus {
    #[serde(default)]
    pub fields: Vec<String>,
    /// document_key -> field_key -> text
    pub documents: BTreeMap<String, BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenizedCorpus {
    #[serde(default)]
    pub fields: Vec<String>,
    /// field_key -> document_key -> tokens
    pub tokens: BTreeMap<String, BTreeMap<String, Vec<TokenInput>>>,
}

impl TokenizedCorpus {
    /// Field keys with the explicitly listed ones first.
    pub fn field_order(&self) -> Vec<String> {
        let mut order: Vec<String> = Vec::new();
        for field in self.fields.iter().chain(self.tokens.keys()) {
            if !order.contains(field) {
                order.push(field.clone());
            }
        }
        order
    }

    /// Every document key referenced by any field, sorted.
    pub fn document_keys(&self) -> Vec<String> {
        let keys: BTreeSet<&String> = self.tokens.values().flat_map(|docs| docs.keys()).collect();
        keys.into_iter().cloned().collect()
    }
}

/// Run every document's fields through `tokenizer`.
pub fn tokenize_corpus(tokenizer: &dyn Tokenizer, corpus: &RawCorpus) -> TokenizedCorpus {
    let mut tokens: BTreeMap<String, BTreeMap<String, Vec<TokenInput>>> = BTreeMap::new();
    for (document_key, fields) in &corpus.documents {
        for (field_key, text) in fields {
            tokens
                .entry(field_key.clone())
                .or_default()
                .insert(document_key.clone(), tokenizer.tokenize(text));
        }
    }
    TokenizedCorpus {
        fields: corpus.fields.clone(),
        tokens,
    }
}

pub fn read_raw_corpus(path: &Path) -> Result<RawCorpus> {
    let json = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&json)?)
}

pub fn read_tokenized_corpus(path: &Path) -> Result<TokenizedCorpus> {
    let json = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&json)?)
}

/// What an ingestion pass did.
#[derive(Debug, Clone)]
pub struct IngestReport {
    pub fields: usize,
    pub new_documents: usize,
    pub tokens: usize,
    pub distinct_values: usize,
    pub recompute: RecomputeReport,
}

/// Store a tokenized corpus, compute statistics, and replay the rules.
///
/// With `replace`, existing tokens are dropped first (re-tokenization pass);
/// fields and documents are kept and reused by key. The dataset lock is held
/// for the whole pass, so no recompute can see tokens without statistics.
pub fn ingest(store: &DatasetStore, corpus: &TokenizedCorpus, replace: bool) -> Result<IngestReport> {
    let report = store.with_conn(|conn| {
        if replace {
            queries::delete_tokens(conn)?;
        }

        let fields = corpus.field_order();
        for field in &fields {
            queries::ensure_field(conn, field)?;
        }
        let new_documents = queries::ensure_documents(conn, &corpus.document_keys())?;

        let mut tokens = 0;
        for field in &fields {
            if let Some(batch) = corpus.tokens.get(field) {
                tokens += queries::insert_tokens(conn, field, batch)?;
            }
        }

        let distinct_values = statistics::compute(conn)?;
        let recompute = engine::recompute(conn)?;

        Ok(IngestReport {
            fields: fields.len(),
            new_documents,
            tokens,
            distinct_values,
            recompute,
        })
    })?;

    info!(
        dataset = store.name(),
        fields = report.fields,
        new_documents = report.new_documents,
        tokens = report.tokens,
        "Ingestion finished"
    );
    Ok(report)
}

// DatasetStore: one dataset's connection behind a mutex.
//
// rusqlite's Connection is Send but not Sync, so each dataset gets its own
// std::sync::Mutex. Rule mutations, recomputes and reads on the same dataset
// are serialized through it; separate datasets have separate stores and run
// in parallel. Methods lock, call the synchronous engine functions, and
// return.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;
use tracing::warn;

use super::models::{Dataset, DatasetStatus, TokenInput, TokenType, WordSummary};
use super::queries;
use crate::error::Result;
use crate::rules::engine::{self, RecomputeReport, RuleProgress};
use crate::rules::FilterRule;
use crate::statistics;
use crate::views::{self, WordList};

pub struct DatasetStore {
    name: String,
    conn: Mutex<Connection>,
}

impl DatasetStore {
    /// Create a new dataset store file.
    pub fn create(path: &Path, name: &str, token_type: TokenType) -> Result<Self> {
        let conn = super::initialize(path)?;
        queries::create_dataset(&conn, name, token_type)?;
        Ok(Self::wrap(name, conn))
    }

    /// Open an existing dataset store file.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = super::open(path)?;
        let name = queries::get_dataset(&conn)?.name;
        Ok(Self::wrap(&name, conn))
    }

    pub fn in_memory(name: &str, token_type: TokenType) -> Result<Self> {
        let conn = super::open_in_memory()?;
        queries::create_dataset(&conn, name, token_type)?;
        Ok(Self::wrap(name, conn))
    }

    fn wrap(name: &str, conn: Connection) -> Self {
        Self {
            name: name.to_string(),
            conn: Mutex::new(conn),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // Every write commits through a transaction, so a panic while the
        // lock was held cannot leave half-applied state behind.
        self.conn.lock().unwrap_or_else(|poisoned| {
            warn!(dataset = %self.name, "Recovering poisoned dataset lock");
            poisoned.into_inner()
        })
    }

    /// Run `f` with exclusive access to the connection.
    pub fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.lock();
        f(&conn)
    }

    // --- Token store ---

    pub fn dataset(&self) -> Result<Dataset> {
        self.with_conn(queries::get_dataset)
    }

    pub fn insert_field(&self, field_key: &str) -> Result<i64> {
        self.with_conn(|c| queries::insert_field(c, field_key))
    }

    /// Insert the field unless it already exists; returns its id.
    pub fn ensure_field(&self, field_key: &str) -> Result<i64> {
        self.with_conn(|c| queries::ensure_field(c, field_key))
    }

    pub fn insert_documents(&self, keys: &[String]) -> Result<Vec<i64>> {
        self.with_conn(|c| queries::insert_documents(c, keys))
    }

    /// Check-then-insert under one lock; returns how many were new.
    pub fn ensure_documents(&self, keys: &[String]) -> Result<usize> {
        self.with_conn(|c| queries::ensure_documents(c, keys))
    }

    pub fn insert_tokens(
        &self,
        field_key: &str,
        tokens: &BTreeMap<String, Vec<TokenInput>>,
    ) -> Result<usize> {
        self.with_conn(|c| queries::insert_tokens(c, field_key, tokens))
    }

    pub fn delete_tokens(&self) -> Result<usize> {
        self.with_conn(queries::delete_tokens)
    }

    pub fn set_token_type(&self, token_type: TokenType) -> Result<bool> {
        self.with_conn(|c| queries::set_token_type(c, token_type))
    }

    // --- Statistics ---

    pub fn compute_statistics(&self) -> Result<usize> {
        self.with_conn(statistics::compute)
    }

    // --- Rules ---

    pub fn rules(&self) -> Result<Vec<FilterRule>> {
        self.with_conn(queries::get_rules)
    }

    /// Append rules without applying them.
    pub fn append_rules(&self, rules: &[FilterRule]) -> Result<usize> {
        self.with_conn(|c| queries::append_rules(c, rules))
    }

    pub fn replace_rules(&self, rules: &[FilterRule]) -> Result<()> {
        self.with_conn(|c| queries::replace_rules(c, rules))
    }

    /// Remove the rule at `index` (zero-based).
    pub fn remove_rule(&self, index: usize) -> Result<FilterRule> {
        self.with_conn(|c| {
            let mut rules = queries::get_rules(c)?;
            if index >= rules.len() {
                return Err(crate::error::EngineError::NotFound(format!("rule #{index}")));
            }
            let removed = rules.remove(index);
            queries::replace_rules(c, &rules)?;
            Ok(removed)
        })
    }

    /// Move the rule at `from` so it ends up at `to`.
    pub fn move_rule(&self, from: usize, to: usize) -> Result<()> {
        self.with_conn(|c| {
            let mut rules = queries::get_rules(c)?;
            if from >= rules.len() || to >= rules.len() {
                return Err(crate::error::EngineError::NotFound(format!(
                    "rule #{}",
                    from.max(to)
                )));
            }
            let rule = rules.remove(from);
            rules.insert(to, rule);
            queries::replace_rules(c, &rules)
        })
    }

    pub fn full_recompute(&self) -> Result<RecomputeReport> {
        self.with_conn(engine::full_recompute)
    }

    pub fn incremental_recompute(&self, new_rules: &[FilterRule]) -> Result<RecomputeReport> {
        self.with_conn(|c| engine::incremental_recompute(c, new_rules))
    }

    /// Recompute with the cheapest valid mode, reporting each rule.
    pub fn recompute_with<F>(&self, full: bool, observer: F) -> Result<RecomputeReport>
    where
        F: FnMut(&RuleProgress<'_>),
    {
        self.with_conn(|c| {
            if full {
                engine::full_recompute_with(c, observer)
            } else {
                engine::recompute_with(c, observer)
            }
        })
    }

    // --- Views ---

    pub fn word_summary(&self, list: WordList) -> Result<Vec<WordSummary>> {
        self.with_conn(|c| views::word_summary(c, list))
    }

    pub fn documents_tokens(&self) -> Result<BTreeMap<String, Vec<String>>> {
        self.with_conn(views::documents_tokens)
    }

    /// Stream `(document_key, tokens)` pairs to `f` without collecting them.
    pub fn for_each_document<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&str, &[String]) -> Result<()>,
    {
        self.with_conn(|c| {
            let sequence = views::DocumentSequence::new(c)?;
            for item in &sequence {
                let (key, tokens) = item?;
                f(&key, &tokens)?;
            }
            Ok(())
        })
    }

    pub fn status(&self) -> Result<DatasetStatus> {
        self.with_conn(|c| {
            Ok(DatasetStatus {
                dataset: queries::get_dataset(c)?,
                documents: queries::count_rows(c, queries::Table::Documents)?,
                fields: queries::count_rows(c, queries::Table::Fields)?,
                tokens: queries::count_rows(c, queries::Table::Tokens)?,
                included: queries::count_included(c)?,
                rules: queries::get_rules(c)?.len(),
            })
        })
    }
}

// Rule engine: replays the filter pipeline over a dataset's tokens.
//
// The `included` column is derived state. A full recompute resets every
// flag to true and applies each rule in order; every rule commits in its own
// transaction together with the new applied-prefix length, so an aborted
// pass always leaves the store at "rules 1..k applied" for some k. An
// incremental recompute applies only the rules past that prefix.
//
// Matching, grouping and ranking run as SQL against the store so the
// percentile rule gets SQLite's PERCENT_RANK tie semantics exactly.

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use tracing::{debug, info};

use super::{CountMetric, FilterRule, RuleAction, Selector, TfidfBand};
use crate::db::models::TokenType;
use crate::db::queries;
use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecomputeMode {
    Full,
    Incremental,
}

/// Outcome of one recompute pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecomputeReport {
    pub mode: RecomputeMode,
    /// Index of the first rule applied in this pass.
    pub first_rule: usize,
    pub rules_applied: usize,
    /// Sum of rows touched by each applied rule.
    pub rows_touched: usize,
}

/// Progress notification sent after each rule commits.
#[derive(Debug)]
pub struct RuleProgress<'a> {
    /// Zero-based position of the rule in the pipeline.
    pub index: usize,
    pub total: usize,
    pub rule: &'a FilterRule,
    pub rows: usize,
}

/// Reset all flags and replay every rule.
pub fn full_recompute(conn: &Connection) -> Result<RecomputeReport> {
    full_recompute_with(conn, |_| {})
}

pub fn full_recompute_with<F>(conn: &Connection, mut observer: F) -> Result<RecomputeReport>
where
    F: FnMut(&RuleProgress<'_>),
{
    let dataset = queries::get_dataset(conn)?;
    let rules = queries::get_rules(conn)?;

    info!(
        dataset = %dataset.name,
        rules = rules.len(),
        token_type = %dataset.token_type,
        "Starting full recompute"
    );

    let tx = conn.unchecked_transaction()?;
    queries::reset_included(&tx)?;
    tx.commit()?;

    let rows_touched = apply_from(conn, &rules, 0, dataset.token_type, &mut observer)?;

    info!(dataset = %dataset.name, rows_touched, "Full recompute finished");
    Ok(RecomputeReport {
        mode: RecomputeMode::Full,
        first_rule: 0,
        rules_applied: rules.len(),
        rows_touched,
    })
}

/// Append `new_rules` and apply only the pending suffix.
///
/// Fails with `IncrementalInvalid` (and appends nothing) when the applied
/// prefix is stale; run a full recompute in that case.
pub fn incremental_recompute(conn: &Connection, new_rules: &[FilterRule]) -> Result<RecomputeReport> {
    incremental_recompute_with(conn, new_rules, |_| {})
}

pub fn incremental_recompute_with<F>(
    conn: &Connection,
    new_rules: &[FilterRule],
    mut observer: F,
) -> Result<RecomputeReport>
where
    F: FnMut(&RuleProgress<'_>),
{
    let dataset = queries::get_dataset(conn)?;
    let existing = queries::get_rules(conn)?;
    if dataset.needs_full || dataset.applied_rules > existing.len() {
        return Err(EngineError::IncrementalInvalid(dataset.name));
    }

    queries::append_rules(conn, new_rules)?;
    let rules = queries::get_rules(conn)?;
    let first = dataset.applied_rules;

    debug!(
        dataset = %dataset.name,
        first_rule = first,
        pending = rules.len() - first,
        "Starting incremental recompute"
    );

    let rows_touched = apply_from(conn, &rules, first, dataset.token_type, &mut observer)?;

    Ok(RecomputeReport {
        mode: RecomputeMode::Incremental,
        first_rule: first,
        rules_applied: rules.len() - first,
        rows_touched,
    })
}

/// Bring the included flags up to date with the stored rule list, choosing
/// incremental replay when the applied prefix is still valid.
pub fn recompute(conn: &Connection) -> Result<RecomputeReport> {
    recompute_with(conn, |_| {})
}

pub fn recompute_with<F>(conn: &Connection, observer: F) -> Result<RecomputeReport>
where
    F: FnMut(&RuleProgress<'_>),
{
    let dataset = queries::get_dataset(conn)?;
    let rule_count = queries::get_rules(conn)?.len();
    if dataset.needs_full || dataset.applied_rules > rule_count {
        full_recompute_with(conn, observer)
    } else {
        incremental_recompute_with(conn, &[], observer)
    }
}

/// Apply `rules[first..]`, committing each rule with its prefix marker.
fn apply_from<F>(
    conn: &Connection,
    rules: &[FilterRule],
    first: usize,
    token_type: TokenType,
    observer: &mut F,
) -> Result<usize>
where
    F: FnMut(&RuleProgress<'_>),
{
    let mut rows_touched = 0;
    for (index, rule) in rules.iter().enumerate().skip(first) {
        let tx = conn.unchecked_transaction()?;
        let rows = apply_rule(&tx, rule, token_type)?;
        queries::set_applied_rules(&tx, index + 1)?;
        tx.commit()?;

        debug!(rule_index = index, rows, rule = %rule, "Applied filter rule");
        rows_touched += rows;
        observer(&RuleProgress {
            index,
            total: rules.len(),
            rule,
            rows,
        });
    }
    Ok(rows_touched)
}

/// WHERE fragment implementing the rule's selectors, plus its parameters.
struct MatchClause {
    sql: String,
    params: Vec<Value>,
}

fn match_clause(rule: &FilterRule, token_type: TokenType) -> MatchClause {
    let mut conditions = vec!["1 = 1".to_string()];
    let mut params = Vec::new();

    if let Selector::Literal(field) = &rule.field {
        conditions.push("field_id IN (SELECT id FROM fields WHERE field_key = ?)".to_string());
        params.push(Value::Text(field.clone()));
    }
    if let Selector::Literal(word) = &rule.word {
        conditions.push(format!("{} = ?", token_type.column()));
        params.push(Value::Text(word.clone()));
    }
    if let Selector::Literal(pos) = &rule.pos {
        conditions.push("pos = ?".to_string());
        params.push(Value::Text(pos.clone()));
    }

    MatchClause {
        sql: conditions.join(" AND "),
        params,
    }
}

/// Apply one rule against the committed state. Returns rows touched.
pub fn apply_rule(conn: &Connection, rule: &FilterRule, token_type: TokenType) -> Result<usize> {
    rule.validate()?;
    let m = match_clause(rule, token_type);

    match &rule.action {
        RuleAction::Remove | RuleAction::Include => {
            let flag = matches!(rule.action, RuleAction::Include);
            let sql = format!("UPDATE string_tokens SET included = ? WHERE {}", m.sql);
            let mut params = vec![Value::from(flag)];
            params.extend(m.params);
            Ok(conn.execute(&sql, params_from_iter(params))?)
        }

        RuleAction::RemoveStopwords => {
            let sql = format!(
                "UPDATE string_tokens SET included = 0 WHERE {} AND is_stopword = 1",
                m.sql
            );
            Ok(conn.execute(&sql, params_from_iter(m.params))?)
        }

        RuleAction::Count {
            direction,
            metric,
            comparator,
            threshold,
        } => {
            let total_rows = queries::count_rows(conn, queries::Table::Tokens)?;
            if total_rows == 0 {
                return Ok(0);
            }
            let total_docs = queries::count_token_documents(conn)?;

            let (metric_sql, denominator) = match metric {
                CountMetric::NumWords => ("COUNT(*)", None),
                CountMetric::PercentWords => ("COUNT(*) * 100.0 / ?", Some(total_rows)),
                CountMetric::NumDocs => ("COUNT(DISTINCT document_id)", None),
                CountMetric::PercentDocs => {
                    ("COUNT(DISTINCT document_id) * 100.0 / ?", Some(total_docs))
                }
            };

            let col = token_type.column();
            let sql = format!(
                "UPDATE string_tokens SET included = ?
                 WHERE {m} AND ({col}, pos) IN (
                     SELECT {col}, pos FROM string_tokens
                     WHERE {m}
                     GROUP BY {col}, pos
                     HAVING {metric_sql} {cmp} ?
                 )",
                m = m.sql,
                cmp = comparator.as_sql(),
            );

            let mut params = vec![Value::from(direction.included())];
            params.extend(m.params.iter().cloned());
            params.extend(m.params);
            if let Some(denominator) = denominator {
                params.push(Value::Real(denominator as f64));
            }
            params.push(Value::Real(*threshold));

            Ok(conn.execute(&sql, params_from_iter(params))?)
        }

        RuleAction::Tfidf {
            direction,
            band,
            percentile,
        } => {
            let cutoff = percentile / 100.0;
            if cutoff <= 0.0 {
                return Ok(0);
            }

            let flag = Value::from(direction.included());
            if cutoff >= 1.0 {
                // Every percent rank is <= 1, so the 100th percentile is the
                // whole population.
                let sql = format!("UPDATE string_tokens SET included = ? WHERE {}", m.sql);
                let mut params = vec![flag];
                params.extend(m.params);
                return Ok(conn.execute(&sql, params_from_iter(params))?);
            }

            let order = match band {
                TfidfBand::Lower => "ASC",
                TfidfBand::Upper => "DESC",
            };
            let sql = format!(
                "UPDATE string_tokens SET included = ?
                 WHERE {m} AND id IN (
                     SELECT id FROM (
                         SELECT id, PERCENT_RANK() OVER (ORDER BY {col}_tfidf {order}) AS pr
                         FROM string_tokens
                     ) WHERE pr < ?
                 )",
                m = m.sql,
                col = token_type.column(),
            );

            let mut params = vec![flag];
            params.extend(m.params);
            params.push(Value::Real(cutoff));
            Ok(conn.execute(&sql, params_from_iter(params))?)
        }
    }
}

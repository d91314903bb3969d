// Rule list import/export.
//
// A standalone rule file is a JSON array of rule tuples, in pipeline order.
// Importing replaces the dataset's pipeline, so the next recompute is full.

use std::path::Path;

use rusqlite::Connection;
use tracing::info;

use super::FilterRule;
use crate::db::queries;
use crate::error::{EngineError, Result};

pub fn rules_to_json(rules: &[FilterRule]) -> Result<String> {
    Ok(serde_json::to_string_pretty(rules)?)
}

/// Parse and validate a rule list. Unknown shapes are rejected here rather
/// than skipped later.
pub fn rules_from_json(json: &str) -> Result<Vec<FilterRule>> {
    let rules: Vec<FilterRule> = serde_json::from_str(json)
        .map_err(|e| EngineError::RuleApplicationFault(format!("invalid rule list: {e}")))?;
    for rule in &rules {
        rule.validate()?;
    }
    Ok(rules)
}

pub fn export_rules(conn: &Connection, path: &Path) -> Result<usize> {
    let rules = queries::get_rules(conn)?;
    std::fs::write(path, rules_to_json(&rules)?)?;
    info!(path = %path.display(), rules = rules.len(), "Exported filter rules");
    Ok(rules.len())
}

pub fn import_rules(conn: &Connection, path: &Path) -> Result<usize> {
    let json = std::fs::read_to_string(path)?;
    let rules = rules_from_json(&json)?;
    queries::replace_rules(conn, &rules)?;
    info!(path = %path.display(), rules = rules.len(), "Imported filter rules");
    Ok(rules.len())
}

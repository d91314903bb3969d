// Colored terminal output for word lists, rule pipelines and dataset status.
//
// main.rs delegates all formatting here so commands stay short.

use colored::Colorize;

use crate::db::models::{DatasetStatus, WordCounts, WordSummary};
use crate::rules::engine::{RecomputeMode, RecomputeReport};
use crate::rules::{Direction, FilterRule, RuleAction};
use crate::views::WordList;

/// Display one side of the filter as a table, most frequent first.
pub fn display_word_summary(
    list: WordList,
    words: &[WordSummary],
    counts: &WordCounts,
    limit: usize,
) {
    let title = match list {
        WordList::Included => "Included words",
        WordList::Removed => "Removed words",
    };
    println!(
        "\n{}",
        format!(
            "=== {} ({} occurrences, {} distinct) ===",
            title, counts.occurrences, counts.distinct_values
        )
        .bold()
    );

    if words.is_empty() {
        println!("  (none)");
        return;
    }

    println!(
        "  {:<28} {:<6} {:>8} {:>6} {:>5}  {:>9} {:>9}",
        "Word".dimmed(),
        "POS".dimmed(),
        "Count".dimmed(),
        "Docs".dimmed(),
        "Stop".dimmed(),
        "tfidf min".dimmed(),
        "tfidf max".dimmed(),
    );
    println!("  {}", "-".repeat(80).dimmed());

    for word in words.iter().take(limit) {
        let stop = if word.is_stopword {
            "yes".yellow().to_string()
        } else {
            "".to_string()
        };
        println!(
            "  {:<28} {:<6} {:>8} {:>6} {:>5}  {:>9.3} {:>9.3}",
            super::truncate_chars(&word.value, 25),
            word.pos,
            word.word_count,
            word.doc_count,
            stop,
            word.tfidf_min,
            word.tfidf_max,
        );
    }

    if words.len() > limit {
        println!(
            "  {}",
            format!("... {} more (raise --limit to see them)", words.len() - limit).dimmed()
        );
    }
}

/// Display the rule pipeline, marking the applied prefix.
pub fn display_rules(rules: &[FilterRule], applied: usize, needs_full: bool) {
    if rules.is_empty() {
        println!("No filter rules. Add one with `tokensieve rules add`.");
        return;
    }

    println!("\n{}", format!("=== Filter rules ({}) ===", rules.len()).bold());
    for (i, rule) in rules.iter().enumerate() {
        let marker = if needs_full || i >= applied {
            "pending".yellow()
        } else {
            "applied".green()
        };
        println!("  {:>3}. [{}] {}", i, marker, colorize_rule(rule));
    }
    if needs_full {
        println!(
            "\n  {}",
            "Rules changed since the last apply; the next apply replays all of them.".dimmed()
        );
    }
}

fn colorize_rule(rule: &FilterRule) -> String {
    let text = rule.to_string();
    let removes = match &rule.action {
        RuleAction::Remove | RuleAction::RemoveStopwords => true,
        RuleAction::Include => false,
        RuleAction::Count { direction, .. } | RuleAction::Tfidf { direction, .. } => {
            *direction == Direction::Remove
        }
    };
    if removes {
        text.red().to_string()
    } else {
        text.green().to_string()
    }
}

pub fn display_recompute(report: &RecomputeReport) {
    let mode = match report.mode {
        RecomputeMode::Full => "full",
        RecomputeMode::Incremental => "incremental",
    };
    println!(
        "{} ({} pass, {} rules from #{}, {} rows touched)",
        "Filter rules applied.".bold(),
        mode,
        report.rules_applied,
        report.first_rule,
        report.rows_touched
    );
}

/// Display a dataset's status block.
pub fn display_status(status: &DatasetStatus) {
    let ds = &status.dataset;
    println!("\n{}", format!("=== Dataset {} ===", ds.name).bold());
    println!("  Token type: {}", ds.token_type);
    println!("  Created: {}", ds.created_at);
    println!(
        "  Fields: {}  Documents: {}  Tokens: {}",
        status.fields, status.documents, status.tokens
    );

    let removed = status.tokens - status.included;
    println!(
        "  Included: {}  Removed: {}",
        status.included.to_string().green(),
        removed.to_string().red()
    );

    match &ds.statistics_at {
        Some(at) => println!("  Statistics computed: {at}"),
        None => println!("  Statistics: {}", "not computed".yellow()),
    }

    let rules_line = format!("{} defined, {} applied", status.rules, ds.applied_rules);
    if status.apply_pending() {
        println!("  Rules: {} ({})", rules_line, "apply pending".yellow());
    } else {
        println!("  Rules: {rules_line}");
    }
}

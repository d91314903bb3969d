// Rule engine tests: ordering, recompute modes, count and tf-idf rule
// boundaries, rule files, and token-type switches.

use std::collections::BTreeMap;

use tokensieve::db::models::{TokenInput, TokenType};
use tokensieve::db::{queries, DatasetStore};
use tokensieve::rules::engine::RecomputeMode;
use tokensieve::rules::io::{export_rules, import_rules, rules_from_json, rules_to_json};
use tokensieve::rules::{
    Comparator, CountMetric, Direction, FilterRule, RuleAction, Selector, TfidfBand,
};
use tokensieve::EngineError;

fn noun(position: i64, word: &str) -> TokenInput {
    TokenInput::new(position, word, word, word, "NOUN", false)
}

fn load(store: &DatasetStore, field: &str, docs: &[(&str, Vec<TokenInput>)]) {
    store.ensure_field(field).unwrap();
    let keys: Vec<String> = docs.iter().map(|(k, _)| k.to_string()).collect();
    store.ensure_documents(&keys).unwrap();
    let batch: BTreeMap<String, Vec<TokenInput>> = docs
        .iter()
        .map(|(k, t)| (k.to_string(), t.clone()))
        .collect();
    store.insert_tokens(field, &batch).unwrap();
}

/// doc1 = [cat], doc2 = [cat, dog]
fn cat_dog() -> DatasetStore {
    let store = DatasetStore::in_memory("pets", TokenType::Raw).unwrap();
    load(
        &store,
        "body",
        &[
            ("doc1", vec![noun(0, "cat")]),
            ("doc2", vec![noun(0, "cat"), noun(1, "dog")]),
        ],
    );
    store.compute_statistics().unwrap();
    store
}

/// Two fields, a stopword, and values spread unevenly across documents.
fn corpus() -> DatasetStore {
    let store = DatasetStore::in_memory("corpus", TokenType::Raw).unwrap();
    load(
        &store,
        "title",
        &[
            ("a", vec![noun(0, "river"), noun(1, "bank")]),
            ("b", vec![noun(0, "money")]),
        ],
    );
    load(
        &store,
        "body",
        &[
            (
                "a",
                vec![
                    TokenInput::new(0, "the", "the", "the", "DET", true),
                    noun(1, "bank"),
                    noun(2, "flood"),
                ],
            ),
            (
                "b",
                vec![
                    TokenInput::new(0, "the", "the", "the", "DET", true),
                    noun(1, "bank"),
                    noun(2, "loan"),
                    noun(3, "loan"),
                ],
            ),
            ("c", vec![noun(0, "flood"), noun(1, "river")]),
        ],
    );
    store.compute_statistics().unwrap();
    store
}

fn any(action: RuleAction) -> FilterRule {
    FilterRule::new(Selector::Any, Selector::Any, Selector::Any, action)
}

fn on_word(word: &str, action: RuleAction) -> FilterRule {
    FilterRule::new(Selector::Any, Selector::literal(word), Selector::Any, action)
}

fn count(direction: Direction, metric: CountMetric, comparator: Comparator, threshold: f64) -> RuleAction {
    RuleAction::Count {
        direction,
        metric,
        comparator,
        threshold,
    }
}

fn tfidf(direction: Direction, band: TfidfBand, percentile: f64) -> RuleAction {
    RuleAction::Tfidf {
        direction,
        band,
        percentile,
    }
}

fn flags(store: &DatasetStore) -> Vec<(i64, bool)> {
    store.with_conn(queries::included_flags).unwrap()
}

fn included_count(store: &DatasetStore) -> i64 {
    store.status().unwrap().included
}

fn pipeline() -> Vec<FilterRule> {
    vec![
        any(RuleAction::RemoveStopwords),
        any(count(Direction::Remove, CountMetric::NumDocs, Comparator::Less, 2.0)),
        on_word("loan", RuleAction::Include),
        FilterRule::new(
            Selector::literal("title"),
            Selector::Any,
            Selector::Any,
            RuleAction::Remove,
        ),
        any(tfidf(Direction::Remove, TfidfBand::Upper, 10.0)),
    ]
}

// ============================================================
// Ordering and the cat/dog scenarios
// ============================================================

#[test]
fn remove_all_then_include_dog() {
    let store = cat_dog();
    store
        .incremental_recompute(&[
            any(RuleAction::Remove),
            on_word("dog", RuleAction::Include),
        ])
        .unwrap();

    let docs = store.documents_tokens().unwrap();
    assert!(docs["doc1"].is_empty());
    assert_eq!(docs["doc2"], vec!["dog"]);
}

#[test]
fn rule_order_decides_the_outcome() {
    let store = cat_dog();
    store
        .incremental_recompute(&[
            on_word("dog", RuleAction::Include),
            any(RuleAction::Remove),
        ])
        .unwrap();
    assert_eq!(included_count(&store), 0);
}

#[test]
fn count_rule_removes_rare_values() {
    let store = cat_dog();
    store
        .incremental_recompute(&[any(count(
            Direction::Remove,
            CountMetric::NumWords,
            Comparator::Less,
            2.0,
        ))])
        .unwrap();

    let docs = store.documents_tokens().unwrap();
    assert_eq!(docs["doc1"], vec!["cat"]);
    assert_eq!(docs["doc2"], vec!["cat"]);
}

#[test]
fn empty_rule_list_includes_everything() {
    let store = corpus();
    let report = store.full_recompute().unwrap();
    assert_eq!(report.rules_applied, 0);
    assert_eq!(included_count(&store), store.status().unwrap().tokens);
}

// ============================================================
// Recompute modes
// ============================================================

#[test]
fn full_recompute_is_deterministic() {
    let store = corpus();
    store.append_rules(&pipeline()).unwrap();

    store.full_recompute().unwrap();
    let first = flags(&store);
    store.full_recompute().unwrap();
    assert_eq!(flags(&store), first);
}

#[test]
fn incremental_matches_full_replay() {
    let stepwise = corpus();
    for rule in pipeline() {
        let report = stepwise.incremental_recompute(&[rule]).unwrap();
        assert_eq!(report.mode, RecomputeMode::Incremental);
        assert_eq!(report.rules_applied, 1);
    }

    let replayed = corpus();
    replayed.append_rules(&pipeline()).unwrap();
    let report = replayed.full_recompute().unwrap();
    assert_eq!(report.mode, RecomputeMode::Full);
    assert_eq!(report.rules_applied, pipeline().len());

    assert_eq!(flags(&stepwise), flags(&replayed));
    assert_eq!(
        stepwise.dataset().unwrap().applied_rules,
        replayed.dataset().unwrap().applied_rules
    );
}

#[test]
fn incremental_is_rejected_after_rules_are_replaced() {
    let store = corpus();
    store.incremental_recompute(&pipeline()[..2]).unwrap();
    store.replace_rules(&pipeline()[..1]).unwrap();

    let err = store.incremental_recompute(&pipeline()[1..2]).unwrap_err();
    assert!(matches!(err, EngineError::IncrementalInvalid(_)));

    // The automatic mode falls back to a full pass and clears the flag
    let report = store.recompute_with(false, |_| {}).unwrap();
    assert_eq!(report.mode, RecomputeMode::Full);
    assert!(!store.dataset().unwrap().needs_full);
}

#[test]
fn pending_rules_are_applied_incrementally() {
    let store = corpus();
    store.incremental_recompute(&pipeline()[..2]).unwrap();
    store.append_rules(&pipeline()[2..]).unwrap();

    let mut seen = Vec::new();
    let report = store
        .recompute_with(false, |progress| seen.push(progress.index))
        .unwrap();
    assert_eq!(report.mode, RecomputeMode::Incremental);
    assert_eq!(report.first_rule, 2);
    assert_eq!(seen, vec![2, 3, 4]);
}

#[test]
fn ingest_after_apply_forces_full_replay() {
    let store = cat_dog();
    store
        .incremental_recompute(&[any(RuleAction::Remove)])
        .unwrap();
    load(&store, "body", &[("doc3", vec![noun(0, "bird")])]);
    assert!(store.dataset().unwrap().needs_full);

    store.compute_statistics().unwrap();
    store.recompute_with(false, |_| {}).unwrap();
    assert_eq!(included_count(&store), 0);
}

#[test]
fn refreshed_statistics_invalidate_applied_tfidf_rules() {
    let top_fifth = any(tfidf(Direction::Remove, TfidfBand::Upper, 20.0));
    let extra = [("doc3", vec![noun(0, "dog"), noun(1, "bird")])];

    let store = cat_dog();
    store.incremental_recompute(std::slice::from_ref(&top_fifth)).unwrap();
    load(&store, "body", &extra);

    // A replay that runs before the new rows have statistics ranks them at 0
    store.full_recompute().unwrap();
    assert!(!store.dataset().unwrap().needs_full);

    store.compute_statistics().unwrap();
    assert!(store.dataset().unwrap().needs_full);
    let report = store.recompute_with(false, |_| {}).unwrap();
    assert_eq!(report.mode, RecomputeMode::Full);

    let fresh = cat_dog();
    load(&fresh, "body", &extra);
    fresh.compute_statistics().unwrap();
    assert!(!fresh.dataset().unwrap().needs_full);
    fresh.incremental_recompute(&[top_fifth]).unwrap();

    assert_eq!(flags(&store), flags(&fresh));
    let docs = store.documents_tokens().unwrap();
    assert_eq!(docs["doc2"], vec!["cat", "dog"]);
    assert_eq!(docs["doc3"], vec!["dog"]);
}

#[test]
fn fault_mid_recompute_keeps_committed_prefix() {
    let store = corpus();
    store
        .append_rules(&[
            any(RuleAction::RemoveStopwords),
            on_word("bank", RuleAction::Remove),
            on_word("flood", RuleAction::Remove),
            on_word("loan", RuleAction::Remove),
        ])
        .unwrap();

    // Any attempt to exclude "flood" aborts the statement
    store
        .with_conn(|c| {
            c.execute_batch(
                "CREATE TRIGGER lock_flood BEFORE UPDATE OF included ON string_tokens
                 WHEN NEW.included = 0 AND OLD.text = 'flood'
                 BEGIN SELECT RAISE(ABORT, 'flood is locked'); END;",
            )?;
            Ok(())
        })
        .unwrap();

    let err = store.full_recompute().unwrap_err();
    assert!(matches!(err, EngineError::StorageFault(_)));

    let dataset = store.dataset().unwrap();
    assert_eq!(dataset.applied_rules, 2);
    assert!(!dataset.needs_full);

    let mut removed: Vec<String> = store
        .word_summary(tokensieve::views::WordList::Removed)
        .unwrap()
        .into_iter()
        .map(|w| w.value)
        .collect();
    removed.sort();
    removed.dedup();
    assert_eq!(removed, vec!["bank", "the"]);

    store
        .with_conn(|c| {
            c.execute_batch("DROP TRIGGER lock_flood")?;
            Ok(())
        })
        .unwrap();

    let mut seen = Vec::new();
    let report = store
        .recompute_with(false, |progress| seen.push(progress.index))
        .unwrap();
    assert_eq!(report.mode, RecomputeMode::Incremental);
    assert_eq!(seen, vec![2, 3]);
    assert_eq!(store.dataset().unwrap().applied_rules, 4);

    let resumed = flags(&store);
    store.full_recompute().unwrap();
    assert_eq!(flags(&store), resumed);
}

// ============================================================
// Count rule boundaries
// ============================================================

#[test]
fn percent_words_at_least_zero_matches_every_group() {
    let store = corpus();
    store
        .incremental_recompute(&[any(count(
            Direction::Remove,
            CountMetric::PercentWords,
            Comparator::GreaterOrEqual,
            0.0,
        ))])
        .unwrap();
    assert_eq!(included_count(&store), 0);
}

#[test]
fn percent_words_above_hundred_matches_nothing() {
    let store = corpus();
    store
        .incremental_recompute(&[any(count(
            Direction::Remove,
            CountMetric::PercentWords,
            Comparator::Greater,
            100.0,
        ))])
        .unwrap();
    assert_eq!(included_count(&store), store.status().unwrap().tokens);
}

#[test]
fn percent_docs_selects_values_in_every_document() {
    // "bank" is in a and b, "the" in a and b; nothing is in all three docs
    let store = corpus();
    store
        .incremental_recompute(&[any(count(
            Direction::Remove,
            CountMetric::PercentDocs,
            Comparator::Equal,
            100.0,
        ))])
        .unwrap();
    assert_eq!(included_count(&store), store.status().unwrap().tokens);

    store
        .incremental_recompute(&[any(count(
            Direction::Remove,
            CountMetric::PercentDocs,
            Comparator::Greater,
            50.0,
        ))])
        .unwrap();
    let removed: Vec<String> = store
        .word_summary(tokensieve::views::WordList::Removed)
        .unwrap()
        .into_iter()
        .map(|w| w.value)
        .collect();
    assert!(removed.contains(&"bank".to_string()));
    assert!(removed.contains(&"the".to_string()));
    assert!(!removed.contains(&"money".to_string()));
}

#[test]
fn count_rule_respects_field_selector() {
    // Within the title field "bank" occurs once, so it is rare there
    let store = corpus();
    store
        .incremental_recompute(&[FilterRule::new(
            Selector::literal("title"),
            Selector::Any,
            Selector::Any,
            count(Direction::Remove, CountMetric::NumWords, Comparator::Less, 2.0),
        )])
        .unwrap();

    let docs = store.documents_tokens().unwrap();
    assert!(docs["a"].iter().all(|t| t != "river"));
    assert_eq!(docs["a"].iter().filter(|t| *t == "bank").count(), 1);
}

// ============================================================
// tf-idf rule boundaries
// ============================================================

/// "common" is in all four documents (tf-idf 0), "rare" only in d1.
fn skewed() -> DatasetStore {
    let store = DatasetStore::in_memory("skewed", TokenType::Raw).unwrap();
    load(
        &store,
        "body",
        &[
            ("d1", vec![noun(0, "common"), noun(1, "rare")]),
            ("d2", vec![noun(0, "common")]),
            ("d3", vec![noun(0, "common")]),
            ("d4", vec![noun(0, "common")]),
        ],
    );
    store.compute_statistics().unwrap();
    store
}

#[test]
fn tfidf_hundredth_percentile_selects_everything() {
    for band in [TfidfBand::Lower, TfidfBand::Upper] {
        let store = skewed();
        store
            .incremental_recompute(&[any(tfidf(Direction::Remove, band, 100.0))])
            .unwrap();
        assert_eq!(included_count(&store), 0);
    }
}

#[test]
fn tfidf_zero_percentile_selects_nothing() {
    for band in [TfidfBand::Lower, TfidfBand::Upper] {
        let store = skewed();
        let report = store
            .incremental_recompute(&[any(tfidf(Direction::Remove, band, 0.0))])
            .unwrap();
        assert_eq!(report.rows_touched, 0);
        assert_eq!(included_count(&store), 5);
    }
}

#[test]
fn tfidf_upper_band_removes_highest_scores() {
    let store = skewed();
    store
        .incremental_recompute(&[any(tfidf(Direction::Remove, TfidfBand::Upper, 20.0))])
        .unwrap();
    let docs = store.documents_tokens().unwrap();
    assert_eq!(docs["d1"], vec!["common"]);
    assert_eq!(included_count(&store), 4);
}

#[test]
fn tfidf_lower_band_keeps_tied_scores_together() {
    let store = skewed();
    store
        .incremental_recompute(&[any(tfidf(Direction::Remove, TfidfBand::Lower, 50.0))])
        .unwrap();
    let docs = store.documents_tokens().unwrap();
    assert_eq!(docs["d1"], vec!["rare"]);
    assert!(docs["d2"].is_empty());
}

#[test]
fn invalid_percentile_is_rejected() {
    let store = skewed();
    let err = store
        .incremental_recompute(&[any(tfidf(Direction::Remove, TfidfBand::Upper, 150.0))])
        .unwrap_err();
    assert!(matches!(err, EngineError::RuleApplicationFault(_)));
    assert_eq!(store.dataset().unwrap().applied_rules, 0);
}

// ============================================================
// Rule files
// ============================================================

#[test]
fn rule_json_uses_tuple_shape() {
    let json = rules_to_json(&[on_word("dog", RuleAction::Include)]).unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value, serde_json::json!([[null, "dog", null, {"type": "include"}]]));

    let parsed = rules_from_json(r#"[[null, null, "DET", {"type": "remove_stopwords"}]]"#).unwrap();
    assert_eq!(parsed[0].pos, Selector::literal("DET"));
    assert_eq!(parsed[0].action, RuleAction::RemoveStopwords);
}

#[test]
fn export_then_import_reproduces_the_filter() {
    let source = corpus();
    source.incremental_recompute(&pipeline()).unwrap();

    let path = std::env::temp_dir().join(format!("tokensieve-rules-{}.json", std::process::id()));
    let written = source.with_conn(|c| export_rules(c, &path)).unwrap();
    assert_eq!(written, pipeline().len());

    let target = corpus();
    let read = target.with_conn(|c| import_rules(c, &path)).unwrap();
    assert_eq!(read, written);
    assert!(target.dataset().unwrap().needs_full);
    target.recompute_with(false, |_| {}).unwrap();

    assert_eq!(target.rules().unwrap(), source.rules().unwrap());
    assert_eq!(
        target.documents_tokens().unwrap(),
        source.documents_tokens().unwrap()
    );
    std::fs::remove_file(&path).unwrap();
}

// ============================================================
// Token type
// ============================================================

#[test]
fn switching_token_type_rematches_rules() {
    let store = DatasetStore::in_memory("variants", TokenType::Raw).unwrap();
    load(
        &store,
        "body",
        &[
            ("a", vec![TokenInput::new(0, "cats", "cat", "cat", "NOUN", false)]),
            ("b", vec![TokenInput::new(0, "cat", "cat", "cat", "NOUN", false)]),
        ],
    );
    store.compute_statistics().unwrap();

    store
        .incremental_recompute(&[on_word("cat", RuleAction::Remove)])
        .unwrap();
    assert_eq!(store.documents_tokens().unwrap()["a"], vec!["cats"]);

    assert!(store.set_token_type(TokenType::Stem).unwrap());
    assert!(!store.set_token_type(TokenType::Stem).unwrap());
    assert!(store.dataset().unwrap().needs_full);

    store.recompute_with(false, |_| {}).unwrap();
    assert_eq!(included_count(&store), 0);
}

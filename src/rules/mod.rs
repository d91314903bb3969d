// Filter rules: the ordered pipeline that decides which tokens survive.
//
// A rule is a `(field, word, pos, action)` tuple. Selectors are either a
// literal or ANY; the action is a tagged enum so the engine never has to
// guess a rule's shape at apply time. Rules serialize as plain JSON 4-tuples
// with `null` standing for ANY:
//
//   [null, "dog", null, {"type": "include"}]
//   [null, null, null, {"type": "count", "direction": "remove",
//                       "metric": "num_words", "comparator": "<", "threshold": 2}]

pub mod engine;
pub mod io;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Matches any value, or exactly one literal value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "Option<String>")]
pub enum Selector {
    #[default]
    Any,
    Literal(String),
}

impl Selector {
    pub fn literal(value: &str) -> Self {
        Selector::Literal(value.to_string())
    }
}

impl From<Option<String>> for Selector {
    fn from(value: Option<String>) -> Self {
        match value {
            Some(v) => Selector::Literal(v),
            None => Selector::Any,
        }
    }
}

impl From<Selector> for Option<String> {
    fn from(selector: Selector) -> Self {
        match selector {
            Selector::Any => None,
            Selector::Literal(v) => Some(v),
        }
    }
}

impl std::fmt::Display for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Selector::Any => write!(f, "ANY"),
            Selector::Literal(v) => write!(f, "\"{v}\""),
        }
    }
}

/// What a composite rule does to the rows it selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Remove,
    Include,
}

impl Direction {
    /// Value written to the `included` column.
    pub fn included(&self) -> bool {
        matches!(self, Direction::Include)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CountMetric {
    /// Occurrences of the group.
    NumWords,
    /// Occurrences as a percentage of all token rows.
    PercentWords,
    /// Distinct documents containing the group.
    NumDocs,
    /// Distinct documents as a percentage of all documents with tokens.
    PercentDocs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparator {
    #[serde(rename = ">")]
    Greater,
    #[serde(rename = ">=")]
    GreaterOrEqual,
    #[serde(rename = "=")]
    Equal,
    #[serde(rename = "<=")]
    LessOrEqual,
    #[serde(rename = "<")]
    Less,
}

impl Comparator {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Comparator::Greater => ">",
            Comparator::GreaterOrEqual => ">=",
            Comparator::Equal => "=",
            Comparator::LessOrEqual => "<=",
            Comparator::Less => "<",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            ">" => Ok(Comparator::Greater),
            ">=" => Ok(Comparator::GreaterOrEqual),
            "=" | "==" => Ok(Comparator::Equal),
            "<=" => Ok(Comparator::LessOrEqual),
            "<" => Ok(Comparator::Less),
            other => Err(EngineError::RuleApplicationFault(format!(
                "unknown comparator '{other}'"
            ))),
        }
    }
}

/// Which end of the tf-idf ranking a percentile rule starts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TfidfBand {
    /// Rank ascending: the lowest tf-idf rows come first.
    Lower,
    /// Rank descending: the highest tf-idf rows come first.
    Upper,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleAction {
    Remove,
    Include,
    /// Remove matching rows the tokenizer flagged as stopwords.
    RemoveStopwords,
    Count {
        direction: Direction,
        metric: CountMetric,
        comparator: Comparator,
        threshold: f64,
    },
    Tfidf {
        direction: Direction,
        band: TfidfBand,
        /// 0..=100
        percentile: f64,
    },
}

type RuleTuple = (Selector, Selector, Selector, RuleAction);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RuleTuple", into = "RuleTuple")]
pub struct FilterRule {
    pub field: Selector,
    pub word: Selector,
    pub pos: Selector,
    pub action: RuleAction,
}

impl From<RuleTuple> for FilterRule {
    fn from((field, word, pos, action): RuleTuple) -> Self {
        FilterRule {
            field,
            word,
            pos,
            action,
        }
    }
}

impl From<FilterRule> for RuleTuple {
    fn from(rule: FilterRule) -> Self {
        (rule.field, rule.word, rule.pos, rule.action)
    }
}

impl FilterRule {
    pub fn new(field: Selector, word: Selector, pos: Selector, action: RuleAction) -> Self {
        FilterRule {
            field,
            word,
            pos,
            action,
        }
    }

    /// Reject shapes the engine cannot apply deterministically.
    pub fn validate(&self) -> Result<()> {
        match &self.action {
            RuleAction::Count { threshold, .. } if !threshold.is_finite() => {
                Err(EngineError::RuleApplicationFault(format!(
                    "count rule threshold must be a finite number, got {threshold}"
                )))
            }
            RuleAction::Tfidf { percentile, .. }
                if !percentile.is_finite() || !(0.0..=100.0).contains(percentile) =>
            {
                Err(EngineError::RuleApplicationFault(format!(
                    "tf-idf percentile must be between 0 and 100, got {percentile}"
                )))
            }
            _ => Ok(()),
        }
    }

    pub fn describe_action(&self) -> String {
        match &self.action {
            RuleAction::Remove => "remove".to_string(),
            RuleAction::Include => "include".to_string(),
            RuleAction::RemoveStopwords => "remove stopwords".to_string(),
            RuleAction::Count {
                direction,
                metric,
                comparator,
                threshold,
            } => format!(
                "{} where {:?} {} {}",
                direction_str(*direction),
                metric,
                comparator.as_sql(),
                threshold
            ),
            RuleAction::Tfidf {
                direction,
                band,
                percentile,
            } => format!(
                "{} {:?} {}% by tf-idf",
                direction_str(*direction),
                band,
                percentile
            ),
        }
    }
}

fn direction_str(direction: Direction) -> &'static str {
    match direction {
        Direction::Remove => "remove",
        Direction::Include => "include",
    }
}

impl std::fmt::Display for FilterRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "field={} word={} pos={}: {}",
            self.field,
            self.word,
            self.pos,
            self.describe_action()
        )
    }
}

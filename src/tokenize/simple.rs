// Naive reference tokenizer.
//
// Splits on ASCII whitespace and punctuation (keeping inner apostrophes),
// lowercases for the lemma, strips a handful of English suffixes for the
// stem, and flags stopwords from the stop-words crate. There is no POS
// tagger, so every token gets the universal "unknown" tag X.

use std::collections::HashSet;

use regex_lite::Regex;
use stop_words::{get, LANGUAGE};

use super::traits::Tokenizer;
use crate::db::models::TokenInput;

pub const UNKNOWN_POS: &str = "X";

/// Runs of non-space, non-punctuation characters joined by apostrophes.
const WORD_PATTERN: &str = r"[^\s[:punct:]]+(?:'[^\s[:punct:]]+)*";

pub struct SimpleTokenizer {
    word: Regex,
    stop_words: HashSet<String>,
}

impl SimpleTokenizer {
    pub fn new() -> Self {
        Self::with_stop_words(get(LANGUAGE::English))
    }

    pub fn with_stop_words(words: Vec<String>) -> Self {
        let word = Regex::new(WORD_PATTERN).expect("WORD_PATTERN is a valid regex");
        Self {
            word,
            stop_words: words.into_iter().map(|w| w.to_lowercase()).collect(),
        }
    }
}

impl Default for SimpleTokenizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Tokenizer for SimpleTokenizer {
    fn tokenize(&self, text: &str) -> Vec<TokenInput> {
        self.word
            .find_iter(text)
            .enumerate()
            .map(|(position, m)| {
                let raw = m.as_str();
                let lemma = raw.to_lowercase();
                let stemmed = stem(&lemma);
                let is_stop = self.stop_words.contains(&lemma);
                TokenInput(
                    position as i64,
                    raw.to_string(),
                    stemmed,
                    lemma,
                    UNKNOWN_POS.to_string(),
                    is_stop,
                )
            })
            .collect()
    }
}

/// Strip one common English inflection, keeping at least three characters.
pub fn stem(word: &str) -> String {
    const RULES: [(&str, &str); 6] = [
        ("ies", "y"),
        ("ing", ""),
        ("ed", ""),
        ("es", ""),
        ("'s", ""),
        ("s", ""),
    ];

    for (suffix, replacement) in RULES {
        if let Some(base) = word.strip_suffix(suffix) {
            if base.chars().count() >= 3 && !(suffix == "s" && base.ends_with('s')) {
                return format!("{base}{replacement}");
            }
        }
    }
    word.to_string()
}

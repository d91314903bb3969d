// Tokenizer trait: swap-ready abstraction.
//
// Anything that can turn one field's text into ordered token tuples can feed
// the token store: a spaCy bridge, a stemmer library, or the naive default.

use crate::db::models::TokenInput;

/// Trait for splitting one field of one document into token tuples.
pub trait Tokenizer {
    /// Tokens of `text` in order, positions starting at 0.
    fn tokenize(&self, text: &str) -> Vec<TokenInput>;
}

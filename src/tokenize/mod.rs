// Tokenization: the seam where an external NLP pipeline plugs in.
//
// The engine only consumes `(position, text, stem, lemma, pos, is_stopword)`
// tuples. `SimpleTokenizer` is a dependency-light stand-in so raw text can be
// ingested from the CLI; real pipelines implement `Tokenizer` or hand over
// pre-tokenized JSON instead.

pub mod simple;
pub mod traits;

// tokensieve: token filtering and TF-IDF engine for text corpora.
//
// This is the library root. Each module corresponds to one subsystem: the
// token store (db), statistics, the rule engine (rules), the view projector
// (views), and the ingestion pipeline that feeds them.

pub mod config;
pub mod db;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod rules;
pub mod statistics;
pub mod status;
pub mod tokenize;
pub mod views;

pub use error::{EngineError, Result};

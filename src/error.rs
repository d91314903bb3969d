// Engine error taxonomy.
//
// Library code returns `EngineError` so callers can tell a broken store apart
// from a duplicate insert or a rule that cannot be applied. The binary wraps
// everything in anyhow for display.

use thiserror::Error;

/// Errors surfaced by the token store, statistics, rule engine and views.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The backing store is unavailable or corrupted.
    #[error("storage fault: {0}")]
    StorageFault(#[from] rusqlite::Error),

    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    /// A bulk document insert hit a key that already exists.
    #[error("duplicate key '{key}' in {table}")]
    DuplicateKey { table: &'static str, key: String },

    /// Any other uniqueness or reference violation on insert.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// A rule with an unknown or malformed shape.
    #[error("rule application fault: {0}")]
    RuleApplicationFault(String),

    /// Incremental recompute was requested but the applied prefix is stale.
    #[error("incremental recompute is invalid for dataset '{0}': rules were reordered, removed or the token type changed; run a full recompute")]
    IncrementalInvalid(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// True when a rusqlite error is a UNIQUE/PRIMARY KEY constraint failure.
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}

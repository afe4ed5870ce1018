//! Error types for vocabulary and database operations.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, BowError>;

/// Errors surfaced by vocabulary and database operations.
#[derive(Debug, Error)]
pub enum BowError {
    /// An operation that needs at least one descriptor received none.
    #[error("empty input: {0}")]
    EmptyInput(&'static str),

    /// The vocabulary has no words; `create` or `load` it first.
    #[error("vocabulary is empty")]
    NotTrained,

    /// A direct-index lookup on a database built without one.
    #[error("direct index is disabled for this database")]
    DirectIndexDisabled,

    /// A word, node, entry id or tree parameter outside its valid range.
    #[error("{kind} {id} out of range")]
    OutOfRange {
        /// What kind of id or parameter was rejected.
        kind: &'static str,
        /// The offending value.
        id: u32,
    },

    /// Underlying file I/O failure during save or load.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed or version-mismatched persisted data.
    #[error("malformed data: {0}")]
    Serialization(String),

    /// A scoring function produced a non-finite value.
    #[error("scoring produced a non-finite value")]
    Numeric,
}

impl From<bincode::Error> for BowError {
    fn from(e: bincode::Error) -> Self {
        BowError::Serialization(e.to_string())
    }
}

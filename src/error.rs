//! Error taxonomy for the document store core.
//!
//! One variant per behavioural error kind the spec distinguishes: callers
//! branch on the *kind*, never on a message string.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("invalid update: {0}")]
    InvalidUpdate(String),

    #[error("document not found")]
    DocumentNotFound,

    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    #[error("conflict: snapshot token {expected} no longer matches stored token {actual}")]
    ConflictError { expected: String, actual: String },

    #[error("lock timeout: {0}")]
    LockTimeout(String),

    #[error("file IO error: {0}")]
    FileIo(String),

    #[error("invalid file format: {0}")]
    InvalidFileFormat(String),

    #[error("master index error: {0}")]
    MasterIndexError(String),

    #[error("configuration error: {0}")]
    ConfigurationError(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

//! Error types for document editing

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DocumentError {
    #[error("Path not found: {0}")]
    PathNotFound(String),

    #[error("Index {index} out of bounds at {path} (length {len})")]
    IndexOutOfBounds {
        path: String,
        index: usize,
        len: usize,
    },

    #[error("Expected {expected} at {path}")]
    TypeMismatch {
        path: String,
        expected: &'static str,
    },

    #[error("Patch path must not be empty")]
    EmptyPath,

    #[error("Invalid patch: {0}")]
    InvalidPatch(String),
}

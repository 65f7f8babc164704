//! Error types for the store

use crate::handle::HandleError;
use docstore_document::DocumentError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store is not ready")]
    NotReady,

    #[error("Document resolution failed: {0}")]
    Resolution(String),

    #[error("Store was dropped before it became ready")]
    Dropped,

    #[error("Document error: {0}")]
    Document(#[from] DocumentError),

    #[error("Handle error: {0}")]
    Handle(#[from] HandleError),

    #[error("Inspector error: {0}")]
    Inspector(String),

    #[error("Invalid config: {0}")]
    Config(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

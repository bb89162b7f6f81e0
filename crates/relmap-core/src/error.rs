//! Error types for the core wire layer.

use thiserror::Error;

/// Errors that can occur while encoding or decoding wire blobs.
#[derive(Error, Debug, Clone)]
pub enum CodecError {
    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    #[error("Invalid snapshot data: {0}")]
    InvalidSnapshot(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_json::Error> for CodecError {
    fn from(err: serde_json::Error) -> Self {
        CodecError::SerializationError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CodecError>;

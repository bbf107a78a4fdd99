use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid coordinate string {input:?}: {reason}")]
    InvalidCoords { input: String, reason: String },

    #[error("serialization error: {0}")]
    Serialization(String),
}

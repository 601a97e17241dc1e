//! Error types for chain indexing

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChainError {
    #[error("Malformed data: {0}")]
    MalformedData(String),

    #[error("Source integrity error: {0}")]
    SourceIntegrity(String),

    #[error("Unknown wallet: {0}")]
    UnknownWallet(usize),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Zero-confirmation handling is disabled")]
    ZeroConfDisabled,
}

impl From<std::io::Error> for ChainError {
    fn from(err: std::io::Error) -> Self {
        ChainError::MalformedData(err.to_string())
    }
}

impl From<serde_json::Error> for ChainError {
    fn from(err: serde_json::Error) -> Self {
        ChainError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ChainError>;

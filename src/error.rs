use thiserror::Error;

/// Result type for admission gateway operations
pub type Result<T> = std::result::Result<T, GateError>;

/// Errors that can occur in the admission gateway
#[derive(Error, Debug)]
pub enum GateError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

//! Error types for the recognizer

use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the recognizer
#[derive(Error, Debug)]
pub enum Error {
    /// Missing model metadata, malformed symbol table, unknown context
    /// phrase token. Fatal at recognizer construction.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Bad caller input, e.g. an odd PCM byte count or decoding on a
    /// poisoned recognizer. The recognizer stays usable after `reset`.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Engine failure while processing a chunk. Poisons the recognizer
    /// until `reset`.
    #[error("Inference error: {0}")]
    Inference(String),

    /// Cache shape mismatch, beam underflow. Indicates a programming
    /// error rather than bad input.
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    /// Create an invalid-input error
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Error::InvalidInput(msg.into())
    }

    /// Create an inference error
    pub fn inference<S: Into<String>>(msg: S) -> Self {
        Error::Inference(msg.into())
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Error::Internal(msg.into())
    }
}

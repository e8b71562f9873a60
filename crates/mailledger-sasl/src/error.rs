//! Error types for SASL exchanges.

use thiserror::Error;

/// Errors raised by a mechanism while producing a response.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// The server challenge could not be interpreted.
    #[error("Malformed challenge: {0}")]
    Malformed(String),

    /// The server sent a challenge after the exchange had already ended.
    #[error("Unexpected challenge: {0}")]
    UnexpectedChallenge(String),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

//! Error types for the Switchboard signaling hub

use thiserror::Error;

/// Errors raised by a heartbeat connection
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("connection closed")]
    Closed,

    #[error("write timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),
}

/// Rejected relay credential requests (surfaced as HTTP 400)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialRequestError {
    #[error("Missing service parameter")]
    MissingService,

    #[error("Invalid service parameter")]
    InvalidService,

    #[error("Missing username parameter")]
    MissingUsername,
}

/// Configuration errors
#[derive(Error, Debug, Clone)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Serialization error: {0}")]
    Serialize(String),
}

/// Fatal server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

//! Error types for the won client.

use thiserror::Error;

use crate::transport::FetchError;

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in client operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Protocol precondition violated; nothing was sent.
    #[error("Protocol error: {0}")]
    Protocol(#[from] won_protocol::Error),

    /// Agreement reconciliation failed
    #[error("Agreement error: {0}")]
    Agreement(#[from] won_agreement::Error),

    /// Transport failure
    #[error("Transport error: {0}")]
    Transport(#[from] FetchError),

    /// Unknown connection
    #[error("Unknown connection: {0}")]
    UnknownConnection(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

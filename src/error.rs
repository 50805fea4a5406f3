//! Error types for the stream engine

use thiserror::Error;

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum Error {
    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("Host error: {0}")]
    Host(#[from] HostError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A host audio subsystem operation returned a non-success status
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{operation} failed with status {status}")]
pub struct HostError {
    /// Name of the host operation that failed
    pub operation: &'static str,
    /// Raw status code reported by the host
    pub status: i32,
}

impl HostError {
    pub fn new(operation: &'static str, status: i32) -> Self {
        Self { operation, status }
    }
}

/// Stream configuration and control errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StreamError {
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Stream limit reached: at most {limit} concurrent streams")]
    ResourceLimitExceeded { limit: usize },

    #[error("Host rejected configuration: {0}")]
    HostRejected(#[from] HostError),

    #[error("Sample rate converter setup failed: {0}")]
    ConversionSetupFailed(HostError),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Stream has shut down")]
    Shutdown,
}

/// Result type alias for the engine
pub type Result<T> = std::result::Result<T, Error>;

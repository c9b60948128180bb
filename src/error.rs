//! Wolfpack Error Types

use thiserror::Error;

/// Result type alias for wolfpack operations
pub type Result<T> = std::result::Result<T, Error>;

/// Wolfpack error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Coordination service errors
    #[error("Coordination service unavailable: {0}")]
    CoordinationUnavailable(String),

    #[error("Node already exists: {0}")]
    NodeExists(String),

    #[error("Node not found: {0}")]
    NoNode(String),

    #[error("Version mismatch on {0}")]
    VersionMismatch(String),

    #[error("Coordination error: {0}")]
    Coordination(String),

    // State errors
    #[error("Invalid state: {0}")]
    InvalidState(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Check if this error means the node was absent
    pub fn is_no_node(&self) -> bool {
        matches!(self, Error::NoNode(_))
    }

    /// Check if this error means the node was already present
    pub fn is_node_exists(&self) -> bool {
        matches!(self, Error::NodeExists(_))
    }

    /// Check if this error is retryable once the session recovers
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::CoordinationUnavailable(_))
    }
}

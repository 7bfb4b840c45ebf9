//! Error types for the responder.

use std::path::PathBuf;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Background task failed: {0}")]
    Task(String),

    #[error("Continuous mode is still stopping; start it again once it has stopped")]
    Stopping,
}

impl Error {
    /// Whether this error came from rejected credentials.
    pub fn is_auth(&self) -> bool {
        matches!(self, Error::Transport(TransportError::Auth { .. }))
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        Error::Task(e.to_string())
    }
}

/// Configuration-related errors. Always raised before any network activity.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Server profile '{0}' is not configured")]
    UnknownProfile(String),

    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Mail transport errors.
///
/// `Auth` and `Connect` are session-level and abort the current pass or run.
/// `Fetch` and `Send` are scoped to one message or recipient.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Authentication failed on {server}: {reason}")]
    Auth { server: String, reason: String },

    #[error("Could not connect to {server}: {reason}")]
    Connect { server: String, reason: String },

    #[error("Failed to fetch message {id}: {reason}")]
    Fetch { id: u32, reason: String },

    #[error("Failed to send to {recipient}: {reason}")]
    Send { recipient: String, reason: String },

    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Ledger file errors.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Ledger {path} IO error: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result type alias for the responder.
pub type Result<T> = std::result::Result<T, Error>;

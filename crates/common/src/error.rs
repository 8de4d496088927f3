//! Error types for stepmirror

use thiserror::Error;

/// Result type alias using stepmirror Error
pub type Result<T> = std::result::Result<T, Error>;

/// Stepmirror error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Reporting service rejected {operation}: {status} {message}")]
    Api {
        operation: String,
        status: u16,
        message: String,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to start launch: {0}")]
    LaunchStart(String),

    #[error("No launch has been started")]
    NoLaunch,

    #[error("Screenshot capture failed: {0}")]
    Capture(String),

    #[error("Reporter queue closed")]
    QueueClosed,
}

impl Error {
    /// Whether this error must stop the run.
    ///
    /// Only a rejected launch start is fatal: without a launch there is nothing
    /// to report against. Everything else is logged and swallowed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::LaunchStart(_))
    }
}

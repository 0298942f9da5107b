//! Error types for agentbox-ssh-proxy

use thiserror::Error;

/// Main error type for agentbox-ssh-proxy
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Bind, listen or dial failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Oversized or otherwise unusable frame; ends only the offending connection
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Socket error: {0}")]
    Socket(String),

    #[error("SSH key error: {0}")]
    SshKey(#[from] ssh_key::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<crate::utils::socket::SocketError> for Error {
    fn from(e: crate::utils::socket::SocketError) -> Self {
        Error::Socket(e.to_string())
    }
}

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

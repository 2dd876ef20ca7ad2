//! Error types for the OAuth token cache

use std::io;

use thiserror::Error;

use crate::oauth::OAuthTokenError;

/// Result type alias for the token cache
pub type Result<T> = std::result::Result<T, Error>;

/// Token cache errors
#[derive(Error, Debug)]
pub enum Error {
    /// A required argument was missing or empty
    #[error("Validation error: {0}")]
    Validation(String),

    /// Network or connection failure while talking to an OAuth endpoint
    #[error("Transport error: {0}")]
    Transport(String),

    /// The token endpoint answered with an OAuth error body
    #[error("Token endpoint error: {0}")]
    OAuth(OAuthTokenError),

    /// The endpoint answered with a status the flow cannot interpret
    #[error("Unexpected HTTP status {status}: {body}")]
    UnexpectedStatus {
        /// HTTP status code
        status: u16,
        /// Raw response body
        body: String,
    },

    /// Response body could not be parsed for its content type
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Coarse classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or empty required input
    Validation,
    /// Connection-level failure
    Transport,
    /// The endpoint rejected the request or answered unexpectedly
    Protocol,
    /// Body could not be decoded
    Deserialization,
    /// Invalid configuration
    Config,
    /// Local IO or snapshot serialization failure
    Io,
}

impl Error {
    /// Create a validation error for a missing required argument
    pub fn missing(argument: &str) -> Self {
        Self::Validation(format!("{argument} is required"))
    }

    /// Classify this error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Transport(_) => ErrorKind::Transport,
            Self::OAuth(_) | Self::UnexpectedStatus { .. } => ErrorKind::Protocol,
            Self::Deserialization(_) => ErrorKind::Deserialization,
            Self::Config(_) => ErrorKind::Config,
            Self::Io(_) | Self::Json(_) => ErrorKind::Io,
        }
    }

    /// OAuth error code (`invalid_grant`, ...) when the endpoint supplied one
    #[must_use]
    pub fn oauth_error_code(&self) -> Option<&str> {
        match self {
            Self::OAuth(err) => Some(err.error.as_str()),
            _ => None,
        }
    }
}

//! Error types for the GCM client
//!
//! Faults detected inside the connection supervisor (ping timeouts, drain
//! signals) are handled locally by replacing the streaming connection. Only
//! the errors a caller can act on cross the public boundary: construction
//! failures, send failures and errors returned by the caller's own handler.

use std::time::Duration;
use thiserror::Error;

/// Result alias used across the crate
pub type GcmResult<T> = Result<T, GcmError>;

/// Result alias for configuration operations
pub type ConfigurationResult<T> = Result<T, ConfigurationError>;

/// Primary error type for client operations
#[derive(Error, Debug)]
pub enum GcmError {
    /// Streaming connection errors
    #[error("Connection error: {source}")]
    Connection {
        #[from]
        source: ConnectionError,
    },

    /// HTTP send path errors
    #[error("HTTP error: {source}")]
    Http {
        #[from]
        source: HttpError,
    },

    /// Configuration errors
    #[error("Configuration error: {source}")]
    Configuration {
        #[from]
        source: ConfigurationError,
    },

    /// Error returned by the caller-supplied message handler
    #[error("Handler error: {source}")]
    Handler {
        #[from]
        source: HandlerError,
    },

    /// The client has been closed
    #[error("Client is closed")]
    Closed,
}

/// Streaming connection error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// Failed to establish a connection
    #[error("Failed to connect to {endpoint}: {reason}")]
    ConnectFailed { endpoint: String, reason: String },

    /// Health check did not get an answer in time
    #[error("Ping timed out after {timeout:?}")]
    PingTimeout { timeout: Duration },

    /// Connection dropped while in use
    #[error("Connection lost: {reason}")]
    ConnectionLost { reason: String },

    /// Writing a message to the connection failed
    #[error("Failed to send message {message_id}: {reason}")]
    SendFailed { message_id: String, reason: String },

    /// Operation on a connection that was already closed
    #[error("Connection is closed")]
    Closed,
}

/// HTTP send path error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HttpError {
    /// Request could not be sent or the response could not be read
    #[error("Request failed: {reason}")]
    Request { reason: String },

    /// Server answered with a non-success status
    #[error("Server returned status {status}")]
    Status {
        status: u16,
        retry_after: Option<Duration>,
    },

    /// Response body was not valid JSON for the expected shape
    #[error("Failed to decode response: {reason}")]
    Decode { reason: String },

    /// Message has no recipient
    #[error("Message has no recipients")]
    NoRecipients,
}

/// Configuration error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// Invalid configuration parameter
    #[error("Invalid configuration parameter: {parameter} - {reason}")]
    InvalidParameter { parameter: String, reason: String },

    /// Missing required configuration
    #[error("Missing required configuration: {config_key}")]
    MissingRequired { config_key: String },

    /// Configuration validation failed
    #[error("Configuration validation failed: {validation_errors:?}")]
    ValidationFailed { validation_errors: Vec<String> },

    /// Configuration file could not be read
    #[error("Configuration file not found: {file_path}")]
    FileNotFound { file_path: String },

    /// Configuration file could not be parsed
    #[error("Configuration parse error: {parse_error}")]
    ParseError { parse_error: String },
}

/// Error returned by a [`MessageHandler`](crate::transport::MessageHandler)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{reason}")]
pub struct HandlerError {
    /// Human readable reason
    pub reason: String,
}

impl HandlerError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl HttpError {
    /// Whether the request may succeed if sent again
    pub fn is_retryable(&self) -> bool {
        match self {
            HttpError::Request { .. } => true,
            HttpError::Status { status, .. } => (500..=599).contains(status),
            HttpError::Decode { .. } | HttpError::NoRecipients => false,
        }
    }

    /// Server supplied delay before the next attempt
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            HttpError::Status { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for HttpError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            HttpError::Decode {
                reason: err.to_string(),
            }
        } else {
            HttpError::Request {
                reason: err.to_string(),
            }
        }
    }
}

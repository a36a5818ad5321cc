//! Error types for the broker integration layer.

use crate::connection::ClientRole;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Error categories drive logging and retry decisions.
///
/// - **Transient**: connectivity problems (refused connection, timeout, broker gone)
/// - **Permanent**: bad configuration, bad payloads, handler failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Temporary failure, worth another attempt.
    Transient,

    /// Unrecoverable for this call.
    Permanent,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Transient => write!(f, "transient"),
            ErrorCategory::Permanent => write!(f, "permanent"),
        }
    }
}

/// Errors raised by connection management, provisioning, publishing and subscribing.
#[derive(Debug, Error)]
pub enum MessagingError {
    /// The broker refused or dropped a connection.
    #[error("broker connection error: {0}")]
    Connection(String),

    /// A single connect attempt did not settle within its timeout.
    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),

    /// The component's connection is not in the `Connected` state.
    #[error("{role} is not connected to the broker")]
    NotConnected { role: ClientRole },

    /// Publishing a message failed.
    #[error("failed to publish to topic '{topic}': {message}")]
    Publish { topic: String, message: String },

    /// Listing or creating topics failed.
    #[error("topic provisioning failed: {0}")]
    Provisioning(String),

    /// Creating a topic failed because the broker already has it.
    #[error("topic '{0}' already exists")]
    TopicExists(String),

    /// Registering a subscription with the broker failed.
    #[error("failed to subscribe to topic '{topic}': {message}")]
    Subscribe { topic: String, message: String },

    /// Payload could not be encoded or decoded as JSON.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A message handler rejected a message.
    #[error("handler error: {0}")]
    Handler(#[from] HandlerError),

    /// Invalid client configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The underlying message stream has been closed.
    #[error("message stream closed")]
    Closed,
}

impl MessagingError {
    /// Create a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    /// Create a publish error.
    pub fn publish(topic: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Publish {
            topic: topic.into(),
            message: message.into(),
        }
    }

    /// Create a subscribe error.
    pub fn subscribe(topic: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Subscribe {
            topic: topic.into(),
            message: message.into(),
        }
    }

    /// Create a provisioning error.
    pub fn provisioning(message: impl Into<String>) -> Self {
        Self::Provisioning(message.into())
    }

    /// Get the error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            MessagingError::Connection(_)
            | MessagingError::Timeout(_)
            | MessagingError::NotConnected { .. }
            | MessagingError::Publish { .. }
            | MessagingError::Subscribe { .. }
            | MessagingError::Closed => ErrorCategory::Transient,
            MessagingError::Provisioning(_)
            | MessagingError::TopicExists(_)
            | MessagingError::Serialization(_)
            | MessagingError::Handler(_)
            | MessagingError::Config(_) => ErrorCategory::Permanent,
        }
    }

    /// True for the "not connected" failure raised by fail-fast paths.
    pub fn is_not_connected(&self) -> bool {
        matches!(self, MessagingError::NotConnected { .. })
    }
}

/// Failure reported by a message handler.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The payload did not have the shape the handler needs.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// The handler ran and failed.
    #[error("{0}")]
    Failed(String),

    /// The handler exceeded the consumer's handler timeout.
    #[error("handler timed out after {0:?}")]
    TimedOut(Duration),

    /// The handler panicked.
    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl HandlerError {
    pub fn invalid_payload(message: impl Into<String>) -> Self {
        Self::InvalidPayload(message.into())
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        HandlerError::InvalidPayload(err.to_string())
    }
}

/// Result alias for messaging operations.
pub type MessagingResult<T> = Result<T, MessagingError>;
